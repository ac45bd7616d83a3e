use std::sync::Arc;
use tracing::{info, warn};

use super::transitions;
use super::types::{CdcTableRef, TransitionOutcome};
use crate::mssql::{release, ConnectionProvider};
use crate::Result;

/// Runs single CDC transitions against named databases, one fresh session
/// per call.
///
/// Only a failed connection surfaces as `Err`; everything after that is
/// reported through the returned [`TransitionOutcome`].
#[derive(Clone)]
pub struct CaptureReconciler {
    provider: Arc<dyn ConnectionProvider>,
    role_name: String,
}

impl CaptureReconciler {
    pub fn new(provider: Arc<dyn ConnectionProvider>, role_name: impl Into<String>) -> Self {
        Self {
            provider,
            role_name: role_name.into(),
        }
    }

    pub fn provider(&self) -> &Arc<dyn ConnectionProvider> {
        &self.provider
    }

    /// Role used when a call does not name one.
    pub fn role_name(&self) -> &str {
        &self.role_name
    }

    pub async fn enable_database_by_name(&self, database: &str) -> Result<TransitionOutcome> {
        let mut session = self.provider.connect(database).await?;
        let outcome = transitions::enable_database(session.as_mut(), database).await;
        release(session).await;
        Ok(outcome)
    }

    pub async fn disable_database_by_name(&self, database: &str) -> Result<TransitionOutcome> {
        let mut session = self.provider.connect(database).await?;
        let outcome = transitions::disable_database(session.as_mut(), database).await;
        release(session).await;
        Ok(outcome)
    }

    pub async fn enable_table_by_name(
        &self,
        database: &str,
        table: &CdcTableRef,
        role: Option<&str>,
    ) -> Result<TransitionOutcome> {
        let role = role.unwrap_or(&self.role_name);
        let mut session = self.provider.connect(database).await?;
        let outcome = transitions::enable_table(session.as_mut(), table, role).await;
        release(session).await;
        Ok(outcome)
    }

    /// Drops a capture instance from `table`. Without an explicit name every
    /// capture instance the catalog lists for the table is dropped.
    pub async fn disable_table_by_name(
        &self,
        database: &str,
        table: &CdcTableRef,
        capture_instance: Option<&str>,
    ) -> Result<TransitionOutcome> {
        let mut session = self.provider.connect(database).await?;

        let instances = match capture_instance {
            Some(name) => Ok(vec![name.to_string()]),
            None => transitions::capture_instances_for(session.as_mut(), table).await,
        };

        let outcome = match instances {
            Ok(instances) if instances.is_empty() => {
                info!(database = %database, table = %table, "No capture instance to drop");
                TransitionOutcome::AlreadySatisfied
            }
            Ok(instances) => {
                let outcomes =
                    transitions::drop_capture_instances(session.as_mut(), table, &instances).await;
                let failed = outcomes.iter().find(|(_, o)| !o.is_success()).cloned();
                failed
                    .or_else(|| outcomes.last().cloned())
                    .map(|(_, outcome)| outcome)
                    .unwrap_or(TransitionOutcome::AlreadySatisfied)
            }
            Err(e) => {
                warn!(database = %database, table = %table, "Capture instance lookup failed: {}", e);
                TransitionOutcome::Failed(e.to_string())
            }
        };

        release(session).await;
        Ok(outcome)
    }

    /// The golden table set, read from `template_database`.
    pub async fn golden_tables(&self, template_database: &str) -> Result<Vec<CdcTableRef>> {
        let mut session = self.provider.connect(template_database).await?;
        let tables = transitions::latest_base_tables(session.as_mut()).await;
        release(session).await;

        let tables = tables?;
        info!(
            database = %template_database,
            "Golden set holds {} base tables", tables.len()
        );
        Ok(tables)
    }
}
