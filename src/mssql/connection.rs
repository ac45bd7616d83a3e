use async_trait::async_trait;
use std::borrow::Cow;
use std::time::Duration;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

use super::types::{Row, Value};
use crate::config::DatabaseSettings;
use crate::{Error, Result};

const COMMIT_OPEN_TRANSACTION: &str = "IF @@TRANCOUNT > 0 COMMIT TRANSACTION";

/// One open session against one database.
///
/// Statements without parameters run as a plain batch so that context
/// changes such as `USE [db]` persist for the rest of the session;
/// parameterized statements bind `@P1..@Pn` at the protocol level.
#[async_trait]
pub trait SqlSession: Send {
    /// Database this session was opened against.
    fn database(&self) -> &str;

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Commits any transaction left open by the preceding statements.
    async fn commit(&mut self) -> Result<()>;

    async fn close(self: Box<Self>) -> Result<()>;
}

/// Opens sessions. Every unit of work gets its own session; nothing is pooled.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn connect(&self, database: &str) -> Result<Box<dyn SqlSession>>;
}

/// Closes a session, logging rather than propagating a failed close.
pub async fn release(session: Box<dyn SqlSession>) {
    let database = session.database().to_string();
    match session.close().await {
        Ok(()) => debug!("Connection to {} closed", database),
        Err(e) => warn!("Failed to close connection to {}: {}", database, e),
    }
}

/// [`ConnectionProvider`] backed by tiberius over TCP.
pub struct SqlServerProvider {
    settings: DatabaseSettings,
}

impl SqlServerProvider {
    pub fn new(settings: DatabaseSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &DatabaseSettings {
        &self.settings
    }

    fn tiberius_config(&self, database: &str) -> Result<Config> {
        let (host, port) = self.settings.address()?;

        let mut config = Config::new();
        config.host(&host);
        config.port(port);
        config.database(database);
        config.application_name(&self.settings.application_name);
        config.authentication(AuthMethod::sql_server(
            &self.settings.user,
            &self.settings.password,
        ));

        if self.settings.encrypt {
            config.encryption(EncryptionLevel::Required);
            if self.settings.trust_server_certificate {
                config.trust_cert();
            }
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        Ok(config)
    }

    async fn open(&self, config: Config) -> Result<Client<Compat<TcpStream>>> {
        let tcp = connect_tcp(&config).await?;

        match Client::connect(config.clone(), tcp.compat_write()).await {
            Ok(client) => Ok(client),
            // Azure SQL gateways hand out a redirect to the node hosting the database.
            Err(tiberius::error::Error::Routing { host, port }) => {
                debug!("Redirected to {}:{}", host, port);
                let mut config = config;
                config.host(&host);
                config.port(port);
                let tcp = connect_tcp(&config).await?;
                Ok(Client::connect(config, tcp.compat_write()).await?)
            }
            Err(e) => Err(Error::Connection(e.to_string())),
        }
    }
}

async fn connect_tcp(config: &Config) -> Result<TcpStream> {
    let tcp = TcpStream::connect(config.get_addr())
        .await
        .map_err(|e| Error::Connection(e.to_string()))?;
    tcp.set_nodelay(true)
        .map_err(|e| Error::Connection(e.to_string()))?;
    Ok(tcp)
}

#[async_trait]
impl ConnectionProvider for SqlServerProvider {
    async fn connect(&self, database: &str) -> Result<Box<dyn SqlSession>> {
        let config = self.tiberius_config(database)?;
        let timeout = Duration::from_secs(self.settings.connect_timeout_secs);

        let client = match tokio::time::timeout(timeout, self.open(config)).await {
            Ok(client) => client?,
            Err(_) => {
                return Err(Error::Timeout {
                    message: format!(
                        "connecting to database {} took longer than {:?}",
                        database, timeout
                    ),
                })
            }
        };

        info!("Connection established successfully to database: {}", database);

        Ok(Box::new(SqlServerSession {
            client,
            database: database.to_string(),
        }))
    }
}

pub struct SqlServerSession {
    client: Client<Compat<TcpStream>>,
    database: String,
}

#[async_trait]
impl SqlSession for SqlServerSession {
    fn database(&self) -> &str {
        &self.database
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        debug!(database = %self.database, "query: {}", sql);

        let rows = if params.is_empty() {
            self.client.simple_query(sql).await?.into_first_result().await?
        } else {
            let bound: Vec<SqlParam<'_>> = params.iter().map(SqlParam).collect();
            let refs: Vec<&dyn tiberius::ToSql> =
                bound.iter().map(|p| p as &dyn tiberius::ToSql).collect();
            self.client.query(sql, &refs).await?.into_first_result().await?
        };

        Ok(rows.iter().map(convert_row).collect())
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        debug!(database = %self.database, "execute: {}", sql);

        if params.is_empty() {
            self.client.simple_query(sql).await?.into_results().await?;
            return Ok(0);
        }

        let bound: Vec<SqlParam<'_>> = params.iter().map(SqlParam).collect();
        let refs: Vec<&dyn tiberius::ToSql> =
            bound.iter().map(|p| p as &dyn tiberius::ToSql).collect();
        let result = self.client.execute(sql, &refs).await?;
        Ok(result.total())
    }

    async fn commit(&mut self) -> Result<()> {
        self.client
            .simple_query(COMMIT_OPEN_TRANSACTION)
            .await?
            .into_results()
            .await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let SqlServerSession { client, database } = *self;
        client.close().await?;
        info!("Connection to {} closed successfully.", database);
        Ok(())
    }
}

/// Binds a [`Value`] as a typed TDS parameter; values are never spliced
/// into statement text.
struct SqlParam<'a>(&'a Value);

impl tiberius::ToSql for SqlParam<'_> {
    fn to_sql(&self) -> ColumnData<'_> {
        match self.0 {
            Value::Null => ColumnData::String(None),
            Value::Bool(b) => ColumnData::Bit(Some(*b)),
            Value::Int(n) => ColumnData::I64(Some(*n)),
            Value::Float(n) => ColumnData::F64(Some(*n)),
            Value::String(s) => ColumnData::String(Some(Cow::Borrowed(s.as_str()))),
            Value::Bytes(b) => ColumnData::Binary(Some(Cow::Borrowed(b.as_slice()))),
        }
    }
}

fn convert_row(row: &tiberius::Row) -> Row {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        out.push(column.name(), convert_value(row, idx));
    }
    out
}

// BIT must be probed before the integer types, strings before raw bytes.
fn convert_value(row: &tiberius::Row, idx: usize) -> Value {
    if let Ok(Some(v)) = row.try_get::<bool, _>(idx) {
        return Value::Bool(v);
    }
    if let Ok(Some(v)) = row.try_get::<u8, _>(idx) {
        return Value::Int(i64::from(v));
    }
    if let Ok(Some(v)) = row.try_get::<i16, _>(idx) {
        return Value::Int(i64::from(v));
    }
    if let Ok(Some(v)) = row.try_get::<i32, _>(idx) {
        return Value::Int(i64::from(v));
    }
    if let Ok(Some(v)) = row.try_get::<i64, _>(idx) {
        return Value::Int(v);
    }
    if let Ok(Some(v)) = row.try_get::<f32, _>(idx) {
        return Value::Float(f64::from(v));
    }
    if let Ok(Some(v)) = row.try_get::<f64, _>(idx) {
        return Value::Float(v);
    }
    if let Ok(Some(v)) = row.try_get::<tiberius::numeric::Numeric, _>(idx) {
        return Value::Float(f64::from(v));
    }
    if let Ok(Some(v)) = row.try_get::<&str, _>(idx) {
        return Value::String(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<&[u8], _>(idx) {
        return Value::Bytes(v.to_vec());
    }
    Value::Null
}

/// Bracket-quotes an identifier for statements that cannot take parameters
/// (`USE [db]`).
pub fn quote_identifier(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("0000001610_System"), "[0000001610_System]");
        assert_eq!(quote_identifier("odd]name"), "[odd]]name]");
    }

    #[test]
    fn test_sql_param_binding() {
        use tiberius::ToSql;

        let value = Value::from("ProductionData");
        match SqlParam(&value).to_sql() {
            ColumnData::String(Some(s)) => assert_eq!(s, "ProductionData"),
            other => panic!("unexpected column data: {:?}", other),
        }

        let value = Value::Bool(true);
        assert!(matches!(SqlParam(&value).to_sql(), ColumnData::Bit(Some(true))));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let provider = SqlServerProvider::new(DatabaseSettings {
            server: "127.0.0.1,1".to_string(),
            database: "master".to_string(),
            user: "sa".to_string(),
            password: "x".to_string(),
            port: None,
            encrypt: false,
            trust_server_certificate: true,
            connect_timeout_secs: 2,
            application_name: "mssql-capture-test".to_string(),
            template_database: None,
            role_name: "role_name".to_string(),
        });

        assert!(provider.connect("master").await.is_err());
    }
}
