//! Run summaries for bulk reconciliation and connector provisioning.
//!
//! Every bulk operation produces a report describing what happened to each
//! unit of work. Reports can be written to disk so that a run over hundreds
//! of facility databases leaves an auditable record behind.
//!
//! # Example
//!
//! ```rust,no_run
//! use mssql_capture::report::{ReportWriter, RunReport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let writer = ReportWriter::new("enable-all.json");
//!
//!     if let Some(previous) = writer.load::<RunReport>().await? {
//!         println!("Previous run had {} failures", previous.failed_units());
//!     }
//!
//!     let report = RunReport::new("enable_all", "0000000075_System", Vec::new());
//!     writer.save(&report).await?;
//!
//!     Ok(())
//! }
//! ```

use crate::cdc::{CdcTableRef, TransitionOutcome};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

/// Summary of one bulk CDC run across a facility snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Operation name, e.g. `enable_all` or `modify_all`
    pub operation: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Database the golden table set was read from
    pub template_database: String,
    pub golden_tables: Vec<CdcTableRef>,
    /// One entry per facility record, in snapshot order
    pub databases: Vec<DatabaseReport>,
}

/// What happened to one facility database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseReport {
    /// Facility key, `cip_prd_sql_<dbname>`
    pub key: String,
    pub database: Option<String>,
    pub status: DatabaseStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DatabaseStatus {
    Skipped {
        reason: String,
    },
    ConnectionFailed {
        error: String,
    },
    Processed {
        /// Outcome of disabling CDC before re-enabling, when a reset was requested
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reset: Option<TransitionOutcome>,
        /// Database-level transition; absent for table-only operations
        #[serde(default, skip_serializing_if = "Option::is_none")]
        database_outcome: Option<TransitionOutcome>,
        tables: Vec<TableReport>,
    },
}

/// What happened to one golden table inside one facility database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableReport {
    pub table: CdcTableRef,
    /// Capture instances dropped before the table was enabled again
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropped: Vec<DroppedInstance>,
    pub outcome: TransitionOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DroppedInstance {
    pub capture_instance: String,
    pub outcome: TransitionOutcome,
}

impl RunReport {
    /// Starts a report stamped with the current time.
    ///
    /// # Example
    ///
    /// ```rust
    /// use mssql_capture::report::RunReport;
    ///
    /// let report = RunReport::new("modify_all", "0000000075_System", Vec::new());
    /// assert!(report.finished_at.is_none());
    /// assert_eq!(report.failed_units(), 0);
    /// ```
    pub fn new(
        operation: impl Into<String>,
        template_database: impl Into<String>,
        golden_tables: Vec<CdcTableRef>,
    ) -> Self {
        Self {
            operation: operation.into(),
            started_at: Utc::now(),
            finished_at: None,
            template_database: template_database.into(),
            golden_tables,
            databases: Vec::new(),
        }
    }

    pub fn push(&mut self, database: DatabaseReport) {
        self.databases.push(database);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Number of failed units: unreachable databases, failed database-level
    /// transitions, failed table transitions and failed capture-instance drops.
    pub fn failed_units(&self) -> usize {
        self.databases.iter().map(DatabaseReport::failed_units).sum()
    }

    pub fn processed_count(&self) -> usize {
        self.databases
            .iter()
            .filter(|d| matches!(d.status, DatabaseStatus::Processed { .. }))
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.databases
            .iter()
            .filter(|d| matches!(d.status, DatabaseStatus::Skipped { .. }))
            .count()
    }
}

impl DatabaseStatus {
    pub fn connection_failed(error: &Error) -> Self {
        DatabaseStatus::ConnectionFailed {
            error: error.to_string(),
        }
    }
}

impl DatabaseReport {
    pub fn skipped(key: &str, database: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            database: database.map(str::to_string),
            status: DatabaseStatus::Skipped {
                reason: reason.into(),
            },
        }
    }

    pub fn failed_units(&self) -> usize {
        match &self.status {
            DatabaseStatus::Skipped { .. } => 0,
            DatabaseStatus::ConnectionFailed { .. } => 1,
            DatabaseStatus::Processed {
                reset,
                database_outcome,
                tables,
            } => {
                let database_failures = [reset, database_outcome]
                    .into_iter()
                    .flatten()
                    .filter(|o| !o.is_success())
                    .count();
                let table_failures: usize = tables
                    .iter()
                    .map(|t| {
                        t.dropped.iter().filter(|d| !d.outcome.is_success()).count()
                            + usize::from(!t.outcome.is_success())
                    })
                    .sum();
                database_failures + table_failures
            }
        }
    }
}

/// Result of one connector provisioning call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionItem {
    /// Facility key, blob file name or connector id the call was about
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of one bulk connector operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionReport {
    pub operation: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub items: Vec<ProvisionItem>,
}

impl ProvisionReport {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            started_at: Utc::now(),
            finished_at: None,
            items: Vec::new(),
        }
    }

    pub fn succeeded(&mut self, target: impl Into<String>, connector_id: Option<String>) {
        self.items.push(ProvisionItem {
            target: target.into(),
            connector_id,
            error: None,
        });
    }

    pub fn failed(
        &mut self,
        target: impl Into<String>,
        connector_id: Option<String>,
        error: &Error,
    ) {
        self.items.push(ProvisionItem {
            target: target.into(),
            connector_id,
            error: Some(error.to_string()),
        });
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn success_count(&self) -> usize {
        self.items.iter().filter(|i| i.error.is_none()).count()
    }

    pub fn failed_units(&self) -> usize {
        self.items.iter().filter(|i| i.error.is_some()).count()
    }
}

/// Persists reports to disk.
///
/// Writes go through a temporary file that is synced and then renamed over
/// the target, so a crash mid-write never leaves a truncated report.
///
/// # Example
///
/// ```rust
/// use mssql_capture::report::ReportWriter;
///
/// let writer = ReportWriter::new("/var/log/mssql-capture/enable-all.json");
/// assert!(writer.path().ends_with("enable-all.json"));
/// ```
pub struct ReportWriter {
    file_path: PathBuf,
}

impl ReportWriter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            file_path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Loads a previously saved report.
    ///
    /// Returns `None` if the file doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file exists but cannot be read, or does not hold
    /// a report of the requested type.
    pub async fn load<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        if !self.file_path.exists() {
            debug!("No report file found at {:?}", self.file_path);
            return Ok(None);
        }

        let content = fs::read_to_string(&self.file_path).await.map_err(|e| {
            error!("Failed to read report file: {}", e);
            Error::Io(e)
        })?;

        match serde_json::from_str::<T>(&content) {
            Ok(report) => {
                info!("Loaded report from {:?}", self.file_path);
                Ok(Some(report))
            }
            Err(e) => {
                error!("Failed to parse report file: {}", e);
                Err(Error::Serialization(e))
            }
        }
    }

    /// Saves a report atomically.
    ///
    /// The parent directory is created when missing.
    pub async fn save<T: Serialize>(&self, report: &T) -> Result<()> {
        if let Some(parent) = self.file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.file_path.with_extension("tmp");

        let json = serde_json::to_string_pretty(report)?;
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &self.file_path).await?;

        info!("Report written to {:?}", self.file_path);
        Ok(())
    }
}
