use crate::{Error, Result};
use ::config::{Config, Environment, File, FileFormat};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Logical name of the database connection config.
pub const DATABASE_CONFIG: &str = "configuration.json";
/// Logical name of the connector API credentials config.
pub const API_CONFIG: &str = "connector_api.json";
/// Logical name of the blob storage config.
pub const STORAGE_CONFIG: &str = "storage.json";
/// Logical name of the database connector payload template.
pub const DATABASE_CONNECTOR_TEMPLATE: &str = "config_fivetran_payload.json";

pub const DEFAULT_ROLE_NAME: &str = "role_name";
pub const DEFAULT_API_BASE_URL: &str = "https://api.fivetran.com/v1";

/// Environment overrides, e.g. `MSSQL_CAPTURE_DB_PASSWORD`.
pub const DATABASE_ENV_PREFIX: &str = "MSSQL_CAPTURE_DB";
pub const API_ENV_PREFIX: &str = "MSSQL_CAPTURE_API";
pub const STORAGE_ENV_PREFIX: &str = "MSSQL_CAPTURE_STORAGE";

/// Resolves named JSON configuration files from two layers: the user's home
/// directory (base) and the working directory (override).
///
/// Typed settings additionally take environment overrides. Raw objects
/// ([`ConfigSource::load`], used for payload templates) replace the base
/// value wholesale for every top-level key the override defines, so a nested
/// `config` object is never merged field by field.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    home_dir: Option<PathBuf>,
    work_dir: PathBuf,
}

/// A merged configuration object plus the files it was read from.
#[derive(Debug, Clone)]
pub struct ConfigObject {
    origin: Vec<PathBuf>,
    values: Map<String, Value>,
}

impl ConfigSource {
    pub fn new(home_dir: Option<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir,
            work_dir: work_dir.into(),
        }
    }

    pub fn from_environment() -> Result<Self> {
        let work_dir = std::env::current_dir()?;
        Ok(Self::new(dirs::home_dir(), work_dir))
    }

    /// Existing files named `name`, base first. A working directory equal to
    /// the home directory contributes one layer.
    fn layers(&self, name: &str) -> Result<Vec<PathBuf>> {
        let base = self.home_dir.as_ref().map(|dir| dir.join(name));
        let overlay = self.work_dir.join(name);

        let mut layers = Vec::new();
        if let Some(base) = base.as_ref().filter(|p| p.is_file()) {
            layers.push(base.clone());
        }
        let overlay_is_base = base.as_ref().is_some_and(|b| same_file(b, &overlay));
        if overlay.is_file() && !overlay_is_base {
            layers.push(overlay);
        }

        if layers.is_empty() {
            return Err(Error::Config(format!(
                "no configuration file named '{}' in home or working directory",
                name
            )));
        }
        Ok(layers)
    }

    pub fn load(&self, name: &str) -> Result<ConfigObject> {
        let origin = self.layers(name)?;

        let mut values = Map::new();
        for path in &origin {
            for (key, value) in read_layer(path)? {
                values.insert(key, value);
            }
        }

        debug!("Loaded configuration '{}' from {:?}", name, origin);
        Ok(ConfigObject { origin, values })
    }

    fn settings<T: DeserializeOwned>(&self, name: &str, env_prefix: &str) -> Result<T> {
        let origin = self.layers(name)?;

        let mut builder = Config::builder();
        for path in &origin {
            builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Json));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        debug!("Loaded settings '{}' from {:?}", name, origin);
        settings.try_deserialize().map_err(|e| {
            Error::Config(format!("invalid configuration in {:?}: {}", origin, e))
        })
    }

    pub fn database_settings(&self, name: &str) -> Result<DatabaseSettings> {
        self.settings(name, DATABASE_ENV_PREFIX)
    }

    pub fn api_settings(&self) -> Result<ApiSettings> {
        self.settings(API_CONFIG, API_ENV_PREFIX)
    }

    pub fn storage_settings(&self) -> Result<StorageSettings> {
        self.settings(STORAGE_CONFIG, STORAGE_ENV_PREFIX)
    }
}

impl ConfigObject {
    pub fn origin(&self) -> &[PathBuf] {
        &self.origin
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }

    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.to_value()).map_err(|e| {
            Error::Config(format!("invalid configuration in {:?}: {}", self.origin, e))
        })
    }
}

/// One file as a top-level JSON object.
fn read_layer(path: &Path) -> Result<Map<String, Value>> {
    Config::builder()
        .add_source(File::from(path).format(FileFormat::Json))
        .build()?
        .try_deserialize()
        .map_err(|e| Error::Config(format!("configuration file {:?}: {}", path, e)))
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct DatabaseSettings {
    pub server: String,
    pub database: String,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_encrypt")]
    pub encrypt: bool,
    #[serde(default)]
    pub trust_server_certificate: bool,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_application_name")]
    pub application_name: String,
    /// Database whose table list is replayed onto every tenant.
    #[serde(default)]
    pub template_database: Option<String>,
    #[serde(default = "default_role_name")]
    pub role_name: String,
}

impl DatabaseSettings {
    /// Same server and credentials, pointed at another database.
    pub fn for_database(&self, database: &str) -> Self {
        Self {
            database: database.to_string(),
            ..self.clone()
        }
    }

    /// Host and port from `server`, which may be `host`, `host,port` or
    /// `tcp:host,port`. An explicit `port` key wins over the embedded one.
    pub fn address(&self) -> Result<(String, u16)> {
        let server = self.server.trim();
        let server = server.strip_prefix("tcp:").unwrap_or(server);

        let (host, embedded_port) = match server.split_once(',') {
            Some((host, port)) => {
                let port = port.trim().parse::<u16>().map_err(|_| {
                    Error::Config(format!("invalid port in server '{}'", self.server))
                })?;
                (host.trim(), Some(port))
            }
            None => (server, None),
        };

        if host.is_empty() {
            return Err(Error::Config("server must not be empty".to_string()));
        }

        let port = self.port.or(embedded_port).unwrap_or(1433);
        Ok((host.to_string(), port))
    }
}

impl fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("server", &self.server)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("port", &self.port)
            .field("encrypt", &self.encrypt)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .field("template_database", &self.template_database)
            .field("role_name", &self.role_name)
            .finish()
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct ApiSettings {
    pub api_key: String,
    pub api_secret: String,
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
}

impl fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiSettings")
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct StorageSettings {
    pub container: String,
    #[serde(default)]
    pub connection_string: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
}

impl fmt::Debug for StorageSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageSettings")
            .field("container", &self.container)
            .field("connection_string", &self.connection_string.as_ref().map(|_| "[REDACTED]"))
            .field("account", &self.account)
            .field("access_key", &self.access_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn default_encrypt() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_application_name() -> String {
    "mssql-capture".to_string()
}

fn default_role_name() -> String {
    DEFAULT_ROLE_NAME.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_api_timeout() -> u64 {
    60
}
