pub mod cdc;
pub mod config;
pub mod connectors;
pub mod error;
pub mod facilities;
pub mod mssql;
pub mod report;
pub mod storage;

pub use cdc::{BulkReconciler, CaptureReconciler, CdcTableRef, TransitionOutcome};
pub use config::{ConfigSource, DatabaseSettings};
pub use error::{Error, Result};
pub use facilities::{FacilityDirectory, FacilitySnapshot, TargetSelection};
