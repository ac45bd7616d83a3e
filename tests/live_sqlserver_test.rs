mod common;

use common::{get_test_settings, unique_table};
use mssql_capture::cdc::transitions;
use mssql_capture::mssql::{release, ConnectionProvider, SqlServerProvider, SqlSession};
use mssql_capture::{CaptureReconciler, CdcTableRef, TransitionOutcome};
use std::sync::Arc;

const TEST_SCHEMA: &str = "cdc_it";

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("mssql_capture=debug")
        .try_init()
        .ok();
}

async fn create_test_table(provider: &SqlServerProvider, table: &str) {
    let database = provider.settings().database.clone();
    let mut session = provider.connect(&database).await.unwrap();
    session
        .execute(
            &format!(
                "IF SCHEMA_ID('{schema}') IS NULL EXEC('CREATE SCHEMA [{schema}]')",
                schema = TEST_SCHEMA
            ),
            &[],
        )
        .await
        .unwrap();
    session
        .execute(
            &format!(
                "CREATE TABLE [{}].[{}] (id INT PRIMARY KEY, reading FLOAT NULL)",
                TEST_SCHEMA, table
            ),
            &[],
        )
        .await
        .unwrap();
    release(session).await;
}

async fn drop_test_table(provider: &SqlServerProvider, table: &str) {
    let database = provider.settings().database.clone();
    let mut session = provider.connect(&database).await.unwrap();
    session
        .execute(
            &format!("DROP TABLE IF EXISTS [{}].[{}]", TEST_SCHEMA, table),
            &[],
        )
        .await
        .ok();
    release(session).await;
}

#[tokio::test]
#[ignore] // Requires SQL Server with CDC support (Developer or Enterprise edition)
async fn test_database_round_trip() {
    init_tracing();

    let settings = get_test_settings();
    let database = settings.database.clone();
    let reconciler = CaptureReconciler::new(Arc::new(SqlServerProvider::new(settings)), "role_name");

    let enabled = reconciler.enable_database_by_name(&database).await.unwrap();
    assert!(enabled.is_success(), "enable returned {}", enabled);

    let again = reconciler.enable_database_by_name(&database).await.unwrap();
    assert_eq!(again, TransitionOutcome::AlreadySatisfied);

    let disabled = reconciler.disable_database_by_name(&database).await.unwrap();
    assert_eq!(disabled, TransitionOutcome::Confirmed);
}

#[tokio::test]
#[ignore] // Requires SQL Server with CDC support (Developer or Enterprise edition)
async fn test_table_modify_cycle() {
    init_tracing();

    let settings = get_test_settings();
    let database = settings.database.clone();
    let provider = SqlServerProvider::new(settings.clone());
    let table_name = unique_table("Samples");
    create_test_table(&provider, &table_name).await;

    let reconciler =
        CaptureReconciler::new(Arc::new(SqlServerProvider::new(settings)), "role_name");
    let table = CdcTableRef::new(TEST_SCHEMA, &table_name);

    reconciler.enable_database_by_name(&database).await.unwrap();

    let enabled = reconciler
        .enable_table_by_name(&database, &table, None)
        .await
        .unwrap();
    assert_eq!(enabled, TransitionOutcome::Confirmed);

    let mut session = provider.connect(&database).await.unwrap();
    let instances = transitions::capture_instances_for(session.as_mut(), &table)
        .await
        .unwrap();
    release(session).await;
    assert_eq!(instances, vec![table.default_capture_instance()]);

    // Enabling again fails because the capture instance already exists
    let duplicate = reconciler
        .enable_table_by_name(&database, &table, None)
        .await
        .unwrap();
    assert!(matches!(duplicate, TransitionOutcome::Failed(_)));

    let dropped = reconciler
        .disable_table_by_name(&database, &table, None)
        .await
        .unwrap();
    assert_eq!(dropped, TransitionOutcome::Confirmed);

    let recreated = reconciler
        .enable_table_by_name(&database, &table, None)
        .await
        .unwrap();
    assert_eq!(recreated, TransitionOutcome::Confirmed);

    reconciler.disable_database_by_name(&database).await.unwrap();
    drop_test_table(&provider, &table_name).await;
}

#[tokio::test]
#[ignore] // Requires SQL Server
async fn test_golden_tables_skip_system_schemas() {
    init_tracing();

    let settings = get_test_settings();
    let database = settings.database.clone();
    let reconciler = CaptureReconciler::new(Arc::new(SqlServerProvider::new(settings)), "role_name");

    let tables = reconciler.golden_tables(&database).await.unwrap();

    assert!(tables.iter().all(|t| t.schema != "dbo" && t.schema != "cdc"));
}
