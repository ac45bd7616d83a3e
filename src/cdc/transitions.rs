//! Single-unit CDC transitions.
//!
//! Each transition issues its mutation, commits, then reads the catalog back
//! and reports a [`TransitionOutcome`]. Errors never escape a transition;
//! they are logged and folded into the outcome.

use tracing::{error, info, warn};

use super::statements::{
    BASE_TABLES, CAPTURE_INSTANCE, DATABASE_CDC_STATE, DISABLE_DATABASE, DISABLE_TABLE,
    ENABLE_DATABASE, ENABLE_TABLE, EXCLUDED_SCHEMAS, TABLE_CDC_STATE,
};
use super::types::{CdcTableRef, TransitionOutcome};
use crate::mssql::{quote_identifier, SqlSession, Value};
use crate::Result;

/// `is_cdc_enabled` for `database`, or `None` when the catalog has no row.
pub async fn database_cdc_state(
    session: &mut dyn SqlSession,
    database: &str,
) -> Result<Option<bool>> {
    let rows = session
        .query(DATABASE_CDC_STATE, &[Value::from(database)])
        .await?;
    Ok(rows.first().and_then(|row| row.get_flag("is_cdc_enabled")))
}

/// `is_tracked_by_cdc` for the first table named `table`.
///
/// The lookup ignores the schema: when two schemas hold a table of the same
/// name, whichever row the server returns first decides the answer.
pub async fn table_cdc_state(session: &mut dyn SqlSession, table: &str) -> Result<Option<bool>> {
    let rows = session.query(TABLE_CDC_STATE, &[Value::from(table)]).await?;
    Ok(rows.first().and_then(|row| row.get_flag("is_tracked_by_cdc")))
}

fn verdict(state: Result<Option<bool>>, expected: bool) -> TransitionOutcome {
    match state {
        Ok(Some(actual)) if actual == expected => TransitionOutcome::Confirmed,
        Ok(Some(_)) => TransitionOutcome::Mismatch,
        Ok(None) => TransitionOutcome::Unconfirmed("catalog returned no row".to_string()),
        Err(e) => TransitionOutcome::Unconfirmed(e.to_string()),
    }
}

async fn apply(session: &mut dyn SqlSession, statements: &[(&str, Vec<Value>)]) -> Result<()> {
    for (sql, params) in statements {
        session.execute(sql, params).await?;
    }
    session.commit().await
}

/// Turns CDC on for `database`.
///
/// Returns [`TransitionOutcome::AlreadySatisfied`] without touching the
/// database when the catalog already reports it enabled.
pub async fn enable_database(session: &mut dyn SqlSession, database: &str) -> TransitionOutcome {
    match database_cdc_state(session, database).await {
        Ok(Some(true)) => {
            info!(database = %database, "CDC is already enabled on database");
            return TransitionOutcome::AlreadySatisfied;
        }
        Ok(_) => {}
        Err(e) => warn!(database = %database, "Could not read CDC state before enabling: {}", e),
    }

    let use_db = format!("USE {}", quote_identifier(database));
    let statements = [(use_db.as_str(), Vec::new()), (ENABLE_DATABASE, Vec::new())];

    if let Err(e) = apply(session, &statements).await {
        // Another actor may have enabled it between the pre-check and now.
        if e.is_already_enabled() {
            info!(database = %database, "CDC is already enabled on database");
            return TransitionOutcome::AlreadySatisfied;
        }
        error!(database = %database, "Error enabling CDC on database: {}", e);
        return TransitionOutcome::Failed(e.to_string());
    }

    let outcome = verdict(database_cdc_state(session, database).await, true);
    log_database_outcome(database, "enabled", &outcome);
    outcome
}

/// Turns CDC off for `database`, dropping every capture instance in it.
///
/// No pre-check: disabling an already disabled database reports whatever the
/// server reports.
pub async fn disable_database(session: &mut dyn SqlSession, database: &str) -> TransitionOutcome {
    if let Err(e) = apply(session, &[(DISABLE_DATABASE, Vec::new())]).await {
        error!(database = %database, "Error disabling CDC on database: {}", e);
        return TransitionOutcome::Failed(e.to_string());
    }

    let outcome = verdict(database_cdc_state(session, database).await, false);
    log_database_outcome(database, "disabled", &outcome);
    outcome
}

fn log_database_outcome(database: &str, action: &str, outcome: &TransitionOutcome) {
    if outcome.is_success() {
        info!(database = %database, "CDC {} successfully on database", action);
    } else {
        error!(database = %database, "CDC could not be {} on database: {}", action, outcome);
    }
}

/// Creates the default capture instance for `table`, gated by `role`.
pub async fn enable_table(
    session: &mut dyn SqlSession,
    table: &CdcTableRef,
    role: &str,
) -> TransitionOutcome {
    let params = vec![
        Value::from(table.schema.as_str()),
        Value::from(table.table.as_str()),
        Value::from(role),
    ];

    if let Err(e) = apply(session, &[(ENABLE_TABLE, params)]).await {
        error!(
            database = %session.database(),
            schema = %table.schema,
            table = %table.table,
            "Error enabling CDC on table: {}", e
        );
        return TransitionOutcome::Failed(e.to_string());
    }

    let outcome = verdict(table_cdc_state(session, &table.table).await, true);
    log_table_outcome(session.database(), table, "enabled", &outcome);
    outcome
}

/// Drops `capture_instance` from `table`.
///
/// Verification expects `is_tracked_by_cdc = 0`, which only holds once the
/// table's last capture instance is gone. Use [`drop_capture_instances`] for
/// tables that may carry more than one.
pub async fn disable_table(
    session: &mut dyn SqlSession,
    table: &CdcTableRef,
    capture_instance: &str,
) -> TransitionOutcome {
    if let Err(e) = issue_disable_table(session, table, capture_instance).await {
        return TransitionOutcome::Failed(e.to_string());
    }

    let outcome = verdict(table_cdc_state(session, &table.table).await, false);
    log_table_outcome(session.database(), table, "disabled", &outcome);
    outcome
}

/// Drops each of `instances` from `table`, in order, and returns one outcome
/// per instance.
///
/// An intermediate drop is confirmed by the instance disappearing from
/// `cdc.change_tables`; the final drop is verified like [`disable_table`].
/// A failed drop does not stop the remaining ones.
pub async fn drop_capture_instances(
    session: &mut dyn SqlSession,
    table: &CdcTableRef,
    instances: &[String],
) -> Vec<(String, TransitionOutcome)> {
    let mut outcomes = Vec::with_capacity(instances.len());

    for (idx, capture_instance) in instances.iter().enumerate() {
        let outcome = if idx + 1 == instances.len() {
            disable_table(session, table, capture_instance).await
        } else {
            drop_intermediate_instance(session, table, capture_instance).await
        };
        outcomes.push((capture_instance.clone(), outcome));
    }

    outcomes
}

async fn drop_intermediate_instance(
    session: &mut dyn SqlSession,
    table: &CdcTableRef,
    capture_instance: &str,
) -> TransitionOutcome {
    if let Err(e) = issue_disable_table(session, table, capture_instance).await {
        return TransitionOutcome::Failed(e.to_string());
    }

    let outcome = match capture_instances_for(session, table).await {
        Ok(remaining) if remaining.iter().any(|ci| ci == capture_instance) => {
            TransitionOutcome::Mismatch
        }
        Ok(_) => TransitionOutcome::Confirmed,
        Err(e) => TransitionOutcome::Unconfirmed(e.to_string()),
    };
    if outcome.is_success() {
        info!(
            database = %session.database(),
            table = %table,
            capture_instance = %capture_instance,
            "Capture instance dropped"
        );
    } else {
        error!(
            database = %session.database(),
            table = %table,
            capture_instance = %capture_instance,
            "Capture instance could not be dropped: {}", outcome
        );
    }
    outcome
}

async fn issue_disable_table(
    session: &mut dyn SqlSession,
    table: &CdcTableRef,
    capture_instance: &str,
) -> Result<()> {
    let params = vec![
        Value::from(table.schema.as_str()),
        Value::from(table.table.as_str()),
        Value::from(capture_instance),
    ];

    apply(session, &[(DISABLE_TABLE, params)]).await.map_err(|e| {
        error!(
            database = %session.database(),
            schema = %table.schema,
            table = %table.table,
            capture_instance = %capture_instance,
            "Error disabling CDC on table: {}", e
        );
        e
    })
}

fn log_table_outcome(database: &str, table: &CdcTableRef, action: &str, outcome: &TransitionOutcome) {
    if outcome.is_success() {
        info!(
            database = %database,
            schema = %table.schema,
            table = %table.table,
            "CDC {} successfully on table", action
        );
    } else {
        error!(
            database = %database,
            schema = %table.schema,
            table = %table.table,
            "CDC could not be {} on table: {}", action, outcome
        );
    }
}

/// Capture instances currently defined on `table`, oldest first.
pub async fn capture_instances_for(
    session: &mut dyn SqlSession,
    table: &CdcTableRef,
) -> Result<Vec<String>> {
    let rows = session
        .query(
            CAPTURE_INSTANCE,
            &[
                Value::from(table.schema.as_str()),
                Value::from(table.table.as_str()),
            ],
        )
        .await?;

    Ok(rows
        .iter()
        .filter_map(|row| row.get_str("capture_instance"))
        .map(str::to_string)
        .collect())
}

/// Base tables outside the `cdc`, `sys` and `dbo` schemas, ordered by schema
/// then table.
pub async fn latest_base_tables(session: &mut dyn SqlSession) -> Result<Vec<CdcTableRef>> {
    let rows = session.query(BASE_TABLES, &[]).await?;

    Ok(rows
        .iter()
        .filter_map(|row| {
            let schema = row.get_str("table_schema")?;
            let table = row.get_str("table_name")?;
            Some(CdcTableRef::new(schema, table))
        })
        .filter(|t| !EXCLUDED_SCHEMAS.contains(&t.schema.as_str()))
        .collect())
}
