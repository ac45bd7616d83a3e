use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::client::ConnectorApi;
use super::types::BlobFile;
use crate::facilities::{FacilitySnapshot, TargetSelection};
use crate::report::ProvisionReport;
use crate::{Error, Result};

/// Random delay awaited before every connector creation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub min: Duration,
    pub max: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(2),
            max: Duration::from_secs(3),
        }
    }
}

impl Pacing {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Uniform in `[min, max)`; `min` when the range is empty.
    pub fn next_delay(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let secs = rand::thread_rng().gen_range(self.min.as_secs_f64()..self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    async fn wait(&self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Database connector payload: the template with `config.database` and a
/// lower-cased `config.schema_prefix`.
pub fn database_payload(template: &Value, database: &str, schema: &str) -> Result<Value> {
    override_config(
        template,
        [
            ("database", database.to_string()),
            ("schema_prefix", schema.to_lowercase()),
        ],
    )
}

/// File connector payload: the template with a lower-cased `config.table`
/// and `config.pattern` set to the file name.
pub fn blob_payload(template: &Value, table: &str, pattern: &str) -> Result<Value> {
    override_config(
        template,
        [
            ("table", table.to_lowercase()),
            ("pattern", pattern.to_string()),
        ],
    )
}

fn missing_config() -> Error {
    Error::Config("connector template has no 'config' object".to_string())
}

fn ensure_config(template: &Value) -> Result<()> {
    match template.get("config") {
        Some(Value::Object(_)) => Ok(()),
        _ => Err(missing_config()),
    }
}

fn override_config(template: &Value, fields: [(&str, String); 2]) -> Result<Value> {
    let mut payload = template.clone();
    let config = payload
        .get_mut("config")
        .and_then(Value::as_object_mut)
        .ok_or_else(missing_config)?;

    for (key, value) in fields {
        config.insert(key.to_string(), Value::String(value));
    }
    Ok(payload)
}

/// Bulk connector management on top of a [`ConnectorApi`].
///
/// Per-connector failures are logged and recorded in the returned
/// [`ProvisionReport`]; only an unusable template or a failed group listing
/// is returned as `Err`.
pub struct ConnectorProvisioner {
    api: Arc<dyn ConnectorApi>,
    pacing: Pacing,
}

impl ConnectorProvisioner {
    pub fn new(api: Arc<dyn ConnectorApi>, pacing: Pacing) -> Self {
        Self { api, pacing }
    }

    /// One database connector per selected facility, named after the
    /// facility key.
    pub async fn create_for_facilities(
        &self,
        snapshot: &FacilitySnapshot,
        selection: &TargetSelection,
        template: &Value,
    ) -> Result<ProvisionReport> {
        ensure_config(template)?;

        let mut report = ProvisionReport::new("create_for_facilities");
        info!("Total active databases: {}", snapshot.len());

        for record in snapshot.records() {
            let Some(database) = record.database() else {
                info!(key = %record.key, "No database name found for facility, skipping");
                continue;
            };
            if !selection.includes(database) {
                continue;
            }

            let schema = record.key.to_lowercase();
            let payload = database_payload(template, database, &schema)?;

            self.pacing.wait().await;
            match self.api.create_connector(&payload).await {
                Ok(id) => {
                    report.succeeded(&schema, Some(id.clone()));
                    info!(
                        "{}). {} Connector {} created successfully for database {}",
                        report.success_count(),
                        schema,
                        id,
                        database
                    );
                }
                Err(e) => {
                    error!(database = %database, "{} Connector setup failure: {}", schema, e);
                    report.failed(&schema, None, &e);
                }
            }
        }

        report.finish();
        Ok(report)
    }

    /// One file connector per blob, each resynced right after creation.
    pub async fn create_for_blobs(
        &self,
        files: &[BlobFile],
        template: &Value,
    ) -> Result<ProvisionReport> {
        ensure_config(template)?;

        let mut report = ProvisionReport::new("create_for_blobs");
        if files.is_empty() {
            warn!("No files to create connectors for");
        } else {
            info!("Total files: {}", files.len());
        }

        for file in files {
            let payload = blob_payload(template, &file.table_name, &file.file_name)?;

            self.pacing.wait().await;
            let id = match self.api.create_connector(&payload).await {
                Ok(id) => id,
                Err(e) => {
                    error!(file = %file.file_name, "Connector setup failure: {}", e);
                    report.failed(&file.file_name, None, &e);
                    continue;
                }
            };

            match self.api.resync_connector(&id).await {
                Ok(()) => {
                    report.succeeded(&file.file_name, Some(id.clone()));
                    info!(
                        "{}). {} Connector {} created and resynced for file {}",
                        report.success_count(),
                        file.table_name.to_lowercase(),
                        id,
                        file.file_name
                    );
                }
                Err(e) => {
                    error!(connector_id = %id, "Failed to resync connector: {}", e);
                    report.failed(&file.file_name, Some(id), &e);
                }
            }
        }

        report.finish();
        Ok(report)
    }

    /// Pauses or resumes every connection in `group_id`.
    pub async fn set_group_paused(&self, group_id: &str, paused: bool) -> Result<ProvisionReport> {
        let operation = if paused { "pause_group" } else { "resume_group" };
        let mut report = ProvisionReport::new(operation);
        let payload = json!({ "paused": paused });

        let connections = self.api.list_group_connections(group_id).await?;
        if connections.is_empty() {
            info!(group_id = %group_id, "No connections in group");
        }

        for connection in connections {
            match self.api.update_connector(&connection.id, &payload).await {
                Ok(()) => {
                    info!(
                        "Connector {} with {} paused state: {}",
                        connection.display_name(),
                        connection.id,
                        paused
                    );
                    report.succeeded(connection.display_name(), Some(connection.id.clone()));
                }
                Err(e) => {
                    error!(connector_id = %connection.id, "Failed to update connector: {}", e);
                    report.failed(connection.display_name(), Some(connection.id.clone()), &e);
                }
            }
        }

        report.finish();
        Ok(report)
    }

    /// Deletes every connection in `group_id`.
    pub async fn delete_group(&self, group_id: &str) -> Result<ProvisionReport> {
        let mut report = ProvisionReport::new("delete_group");

        let connections = self.api.list_group_connections(group_id).await?;
        if connections.is_empty() {
            info!(group_id = %group_id, "No connections in group");
        }

        for connection in connections {
            match self.api.delete_connector(&connection.id).await {
                Ok(()) => {
                    info!("Connector {} deleted successfully", connection.id);
                    report.succeeded(connection.display_name(), Some(connection.id.clone()));
                }
                Err(e) => {
                    error!(connector_id = %connection.id, "Failed to delete connector: {}", e);
                    report.failed(connection.display_name(), Some(connection.id.clone()), &e);
                }
            }
        }

        report.finish();
        Ok(report)
    }

    pub async fn resync(&self, connector_id: &str) -> Result<()> {
        self.api.resync_connector(connector_id).await?;
        info!("Connector {} resync requested successfully", connector_id);
        Ok(())
    }

    /// Files with no connection in `group_id` whose `config.pattern` equals
    /// either the full blob name or its last path segment.
    pub async fn files_without_connectors(
        &self,
        group_id: &str,
        files: &[String],
    ) -> Result<Vec<String>> {
        let connections = self.api.list_group_connections(group_id).await?;
        let patterns: HashSet<&str> = connections
            .iter()
            .filter_map(|c| c.file_pattern())
            .collect();

        let missing: Vec<String> = files
            .iter()
            .filter(|file| {
                let base = file.rsplit('/').next().unwrap_or(file.as_str());
                !patterns.contains(file.as_str()) && !patterns.contains(base)
            })
            .cloned()
            .collect();

        info!(
            group_id = %group_id,
            "{} of {} files have no connector",
            missing.len(),
            files.len()
        );
        Ok(missing)
    }
}
