use tracing::{error, info, instrument, warn};

use super::reconciler::CaptureReconciler;
use super::transitions;
use super::types::{CdcTableRef, TransitionOutcome};
use crate::facilities::{FacilitySnapshot, TargetSelection};
use crate::mssql::{release, SqlSession};
use crate::report::{DatabaseReport, DatabaseStatus, DroppedInstance, RunReport, TableReport};
use crate::Result;

/// Replays the golden table set onto every selected facility database.
///
/// Facilities are processed one after another, each on its own session that
/// is released before the next facility starts. A failing facility or table
/// is recorded in the [`RunReport`] and the run moves on.
pub struct BulkReconciler {
    reconciler: CaptureReconciler,
    template_database: String,
}

#[derive(Clone, Copy)]
enum Plan {
    Enable { reset: bool },
    Modify,
}

impl Plan {
    fn operation(self) -> &'static str {
        match self {
            Plan::Enable { .. } => "enable_all",
            Plan::Modify => "modify_all",
        }
    }
}

impl BulkReconciler {
    pub fn new(reconciler: CaptureReconciler, template_database: impl Into<String>) -> Self {
        Self {
            reconciler,
            template_database: template_database.into(),
        }
    }

    pub fn template_database(&self) -> &str {
        &self.template_database
    }

    pub async fn golden_tables(&self) -> Result<Vec<CdcTableRef>> {
        self.reconciler.golden_tables(&self.template_database).await
    }

    /// Enables CDC on each selected database and on every golden table that
    /// has no capture instance yet. With `reset`, CDC is first disabled on
    /// databases where it is on, dropping their capture instances.
    ///
    /// Returns `Err` only when the golden set cannot be read.
    pub async fn enable_all(
        &self,
        snapshot: &FacilitySnapshot,
        selection: &TargetSelection,
        reset: bool,
    ) -> Result<RunReport> {
        self.run(snapshot, selection, Plan::Enable { reset }).await
    }

    /// Drops and recreates the capture instance of every golden table on each
    /// selected database, so that capture picks up the current table shape.
    ///
    /// Returns `Err` only when the golden set cannot be read.
    pub async fn modify_all(
        &self,
        snapshot: &FacilitySnapshot,
        selection: &TargetSelection,
    ) -> Result<RunReport> {
        self.run(snapshot, selection, Plan::Modify).await
    }

    async fn run(
        &self,
        snapshot: &FacilitySnapshot,
        selection: &TargetSelection,
        plan: Plan,
    ) -> Result<RunReport> {
        let golden = self.golden_tables().await.map_err(|e| {
            error!(
                database = %self.template_database,
                "Could not read the golden table set: {}", e
            );
            e
        })?;

        let mut report = RunReport::new(plan.operation(), &self.template_database, golden.clone());

        for record in snapshot.records() {
            let Some(database) = record.database() else {
                info!(key = %record.key, "Skipping facility without a database name");
                report.push(DatabaseReport::skipped(&record.key, None, "no database name"));
                continue;
            };

            if !selection.includes(database) {
                info!(database = %database, "Skipping database outside the target selection");
                report.push(DatabaseReport::skipped(
                    &record.key,
                    Some(database),
                    "not selected",
                ));
                continue;
            }

            let status = self.reconcile_facility(database, &golden, plan).await;
            report.push(DatabaseReport {
                key: record.key.clone(),
                database: Some(database.to_string()),
                status,
            });
        }

        report.finish();
        info!(
            operation = plan.operation(),
            processed = report.processed_count(),
            skipped = report.skipped_count(),
            failed = report.failed_units(),
            "Bulk reconciliation finished"
        );
        Ok(report)
    }

    #[instrument(skip(self, golden, plan), fields(operation = plan.operation()))]
    async fn reconcile_facility(
        &self,
        database: &str,
        golden: &[CdcTableRef],
        plan: Plan,
    ) -> DatabaseStatus {
        let mut session = match self.reconciler.provider().connect(database).await {
            Ok(session) => session,
            Err(e) => {
                error!("Could not connect to database: {}", e);
                return DatabaseStatus::connection_failed(&e);
            }
        };

        let status = match plan {
            Plan::Enable { reset } => {
                self.enable_facility(session.as_mut(), database, golden, reset)
                    .await
            }
            Plan::Modify => self.modify_facility(session.as_mut(), golden).await,
        };

        release(session).await;
        status
    }

    async fn enable_facility(
        &self,
        session: &mut dyn SqlSession,
        database: &str,
        golden: &[CdcTableRef],
        reset: bool,
    ) -> DatabaseStatus {
        let reset = if reset {
            Some(reset_database(session, database).await)
        } else {
            None
        };

        let database_outcome = transitions::enable_database(session, database).await;

        let mut tables = Vec::with_capacity(golden.len());
        for table in golden {
            let outcome = match transitions::capture_instances_for(session, table).await {
                Ok(instances) if !instances.is_empty() => {
                    info!(table = %table, "Capture instance already present");
                    TransitionOutcome::AlreadySatisfied
                }
                Ok(_) => {
                    transitions::enable_table(session, table, self.reconciler.role_name()).await
                }
                Err(e) => {
                    warn!(table = %table, "Capture instance lookup failed: {}", e);
                    TransitionOutcome::Failed(e.to_string())
                }
            };
            tables.push(TableReport {
                table: table.clone(),
                dropped: Vec::new(),
                outcome,
            });
        }

        DatabaseStatus::Processed {
            reset,
            database_outcome: Some(database_outcome),
            tables,
        }
    }

    async fn modify_facility(
        &self,
        session: &mut dyn SqlSession,
        golden: &[CdcTableRef],
    ) -> DatabaseStatus {
        let mut tables = Vec::with_capacity(golden.len());

        for table in golden {
            let instances = match transitions::capture_instances_for(session, table).await {
                Ok(instances) => instances,
                Err(e) => {
                    warn!(table = %table, "Capture instance lookup failed: {}", e);
                    tables.push(TableReport {
                        table: table.clone(),
                        dropped: Vec::new(),
                        outcome: TransitionOutcome::Failed(e.to_string()),
                    });
                    continue;
                }
            };

            let dropped = transitions::drop_capture_instances(session, table, &instances)
                .await
                .into_iter()
                .map(|(capture_instance, outcome)| DroppedInstance {
                    capture_instance,
                    outcome,
                })
                .collect();

            let outcome =
                transitions::enable_table(session, table, self.reconciler.role_name()).await;
            tables.push(TableReport {
                table: table.clone(),
                dropped,
                outcome,
            });
        }

        DatabaseStatus::Processed {
            reset: None,
            database_outcome: None,
            tables,
        }
    }
}

async fn reset_database(session: &mut dyn SqlSession, database: &str) -> TransitionOutcome {
    match transitions::database_cdc_state(session, database).await {
        Ok(Some(false)) => TransitionOutcome::AlreadySatisfied,
        _ => transitions::disable_database(session, database).await,
    }
}
