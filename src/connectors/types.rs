use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A replication connector as the API lists it.
///
/// Only the fields the provisioning flows read are typed; everything else
/// stays in the raw `config`/`status` objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSummary {
    pub id: String,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub connected_by: Option<String>,
    #[serde(default)]
    pub status: Value,
    #[serde(default)]
    pub config: Value,
}

impl ConnectionSummary {
    /// `config.pattern` of a file connector.
    pub fn file_pattern(&self) -> Option<&str> {
        self.config.get("pattern").and_then(Value::as_str)
    }

    /// Schema name, falling back to the id for display.
    pub fn display_name(&self) -> &str {
        self.schema.as_deref().unwrap_or(&self.id)
    }
}

/// Standard response envelope: `{"code": ..., "message": ..., "data": ...}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    pub data: T,
}

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Id of a newly created connector.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedConnector {
    pub id: String,
}

/// A file in the landing container and the destination table it feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobFile {
    pub table_name: String,
    pub file_name: String,
}
