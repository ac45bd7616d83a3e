//! Blob listing for file-based connectors.

use std::path::Path as FsPath;
use std::sync::Arc;

use futures::StreamExt;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::path::Path;
use object_store::ObjectStore;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::config::StorageSettings;
use crate::{Error, Result};

/// Header row of a listing file.
pub const LISTING_HEADER: &str = "File Name";

/// Lists blob names in one container.
pub struct BlobLister {
    store: Arc<dyn ObjectStore>,
    container: String,
}

impl BlobLister {
    pub fn new(store: Arc<dyn ObjectStore>, container: impl Into<String>) -> Self {
        Self {
            store,
            container: container.into(),
        }
    }

    /// Azure Blob Storage lister. Explicit `account`/`access_key` win over
    /// the values in `connection_string`.
    pub fn azure(settings: &StorageSettings) -> Result<Self> {
        let parsed = settings
            .connection_string
            .as_deref()
            .map(parse_connection_string)
            .unwrap_or_default();

        let account = settings
            .account
            .clone()
            .or(parsed.account)
            .ok_or_else(|| Error::Config("storage account name is not configured".to_string()))?;
        let access_key = settings.access_key.clone().or(parsed.access_key);

        let mut builder = MicrosoftAzureBuilder::new()
            .with_account(&account)
            .with_container_name(&settings.container);
        if let Some(key) = access_key {
            builder = builder.with_access_key(key);
        }

        let store = builder.build()?;
        info!(account = %account, container = %settings.container, "Connected to blob storage");
        Ok(Self::new(Arc::new(store), settings.container.clone()))
    }

    /// Names of every blob whose full name starts with `prefix`, sorted.
    ///
    /// The prefix is a raw string, so `NSAP/Pricing` matches blobs in
    /// `NSAP/PricingFivetran/`. Listing starts at the prefix's parent folder.
    pub async fn list_names(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.trim_start_matches('/');
        let parent = prefix
            .rsplit_once('/')
            .map(|(parent, _)| parent.trim_end_matches('/'))
            .filter(|parent| !parent.is_empty())
            .map(Path::from);
        info!(container = %self.container, "Listing blobs starting with {:?}", prefix);

        let mut stream = self.store.list(parent.as_ref());
        let mut names = Vec::new();
        while let Some(meta) = stream.next().await {
            let name = meta?.location.to_string();
            if name.starts_with(prefix) {
                debug!("Found file: {}", name);
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }
}

#[derive(Debug, Default, PartialEq)]
struct ConnectionStringParts {
    account: Option<String>,
    access_key: Option<String>,
}

/// Extracts `AccountName` and `AccountKey` from an Azure storage connection
/// string. Keys may contain `=`, so each pair splits on the first one only.
fn parse_connection_string(raw: &str) -> ConnectionStringParts {
    let mut parts = ConnectionStringParts::default();
    for pair in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        match key.trim() {
            k if k.eq_ignore_ascii_case("AccountName") => parts.account = Some(value.to_string()),
            k if k.eq_ignore_ascii_case("AccountKey") => parts.access_key = Some(value.to_string()),
            _ => {}
        }
    }
    parts
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Writes a single-column CSV listing headed by `File Name`.
pub async fn write_listing(path: impl AsRef<FsPath>, names: &[String]) -> Result<()> {
    let path = path.as_ref();
    let mut content = String::new();
    content.push_str(LISTING_HEADER);
    content.push_str("\r\n");
    for name in names {
        content.push_str(&csv_field(name));
        content.push_str("\r\n");
    }

    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await?;

    info!("File names written to {:?}", path);
    Ok(())
}
