//! Replication connector management through the service's REST API.

pub mod client;
pub mod provisioning;
pub mod types;

pub use client::{ConnectorApi, RestConnectorClient};
pub use provisioning::{blob_payload, database_payload, ConnectorProvisioner, Pacing};
pub use types::{BlobFile, ConnectionSummary};
