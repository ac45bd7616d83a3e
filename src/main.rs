use clap::{Parser, Subcommand};
use mssql_capture::config::{DATABASE_CONFIG, DATABASE_CONNECTOR_TEMPLATE};
use mssql_capture::connectors::{
    BlobFile, ConnectorApi, ConnectorProvisioner, Pacing, RestConnectorClient,
};
use mssql_capture::mssql::{ConnectionProvider, SqlServerProvider};
use mssql_capture::report::{ProvisionReport, ReportWriter, RunReport};
use mssql_capture::storage::{write_listing, BlobLister};
use mssql_capture::{
    BulkReconciler, CaptureReconciler, CdcTableRef, ConfigSource, DatabaseSettings, Error,
    FacilityDirectory, FacilitySnapshot, Result, TargetSelection, TransitionOutcome,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "mssql-capture")]
#[command(about = "SQL Server CDC reconciliation and replication connector provisioning", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "NAME", default_value = DATABASE_CONFIG, global = true,
          help = "Logical name of the database configuration file")]
    config_name: String,

    #[arg(short, long, global = true, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, global = true, help = "Verbose logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List active facility databases
    Facilities,
    /// Print the base tables replayed onto every facility
    GoldenTables {
        #[arg(long, value_name = "DATABASE")]
        template_database: Option<String>,
    },
    /// Enable CDC on one database
    EnableDb { database: String },
    /// Disable CDC on one database
    DisableDb { database: String },
    /// Create the capture instance of one table
    EnableTable {
        database: String,
        #[arg(long)]
        schema: String,
        #[arg(long)]
        table: String,
        #[arg(long, help = "Gating role; defaults to role_name from the configuration")]
        role: Option<String>,
    },
    /// Drop a capture instance from one table
    DisableTable {
        database: String,
        #[arg(long)]
        schema: String,
        #[arg(long)]
        table: String,
        #[arg(long, help = "Defaults to every capture instance on the table")]
        capture_instance: Option<String>,
    },
    /// Enable CDC on every selected facility database and its golden tables
    EnableAll {
        #[command(flatten)]
        targets: Targets,
        #[arg(long, help = "Disable CDC on each database first")]
        reset: bool,
        #[arg(long, value_name = "DATABASE")]
        template_database: Option<String>,
        #[arg(long, value_name = "FILE", help = "Write the run report to FILE")]
        report: Option<PathBuf>,
    },
    /// Recreate the capture instance of every golden table on selected databases
    ModifyAll {
        #[command(flatten)]
        targets: Targets,
        #[arg(long, value_name = "DATABASE")]
        template_database: Option<String>,
        #[arg(long, value_name = "FILE", help = "Write the run report to FILE")]
        report: Option<PathBuf>,
    },
    /// Manage replication connectors
    Connectors {
        #[command(subcommand)]
        command: ConnectorCommand,
    },
    /// Inspect the landing container
    Blobs {
        #[command(subcommand)]
        command: BlobCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConnectorCommand {
    /// Create one database connector per selected facility
    CreateDb {
        #[command(flatten)]
        targets: Targets,
        #[arg(long, default_value = DATABASE_CONNECTOR_TEMPLATE, help = "Logical name of the payload template")]
        template: String,
        #[command(flatten)]
        pacing: PacingArgs,
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },
    /// Create and resync one file connector per blob
    CreateBlob {
        #[arg(long, value_name = "FILE", help = "JSON list of {table_name, file_name}")]
        files: PathBuf,
        #[arg(long, help = "Logical name of the payload template")]
        template: String,
        #[command(flatten)]
        pacing: PacingArgs,
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },
    /// List the connections of a group
    List { group_id: String },
    /// Pause every connection of a group
    Pause { group_id: String },
    /// Resume every connection of a group
    Resume { group_id: String },
    /// Delete every connection of a group
    Delete { group_id: String },
    /// Trigger a full resync of one connector
    Resync { connector_id: String },
    /// List blobs under a prefix that no connection of the group reads
    Missing {
        group_id: String,
        #[arg(long, default_value = "")]
        prefix: String,
    },
}

#[derive(Subcommand, Debug)]
enum BlobCommand {
    /// List blob names under a prefix
    List {
        #[arg(long, default_value = "")]
        prefix: String,
        #[arg(long, value_name = "FILE", help = "Also write the names as a CSV listing")]
        output: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug)]
#[group(required = true, multiple = false)]
struct Targets {
    #[arg(long, help = "Every active facility database")]
    all: bool,
    #[arg(long = "target", value_name = "DATABASE", help = "Only this database; repeatable")]
    targets: Vec<String>,
}

impl Targets {
    fn selection(&self) -> TargetSelection {
        if self.all {
            TargetSelection::All
        } else {
            TargetSelection::only(self.targets.iter().cloned())
        }
    }
}

#[derive(clap::Args, Debug)]
struct PacingArgs {
    #[arg(long, default_value_t = 2000, help = "Minimum delay before each creation, in ms")]
    pacing_min_ms: u64,
    #[arg(long, default_value_t = 3000, help = "Maximum delay before each creation, in ms")]
    pacing_max_ms: u64,
}

impl PacingArgs {
    fn pacing(&self) -> Pacing {
        Pacing::new(
            Duration::from_millis(self.pacing_min_ms),
            Duration::from_millis(self.pacing_max_ms),
        )
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_logging(args.json_logs, args.verbose);

    match run(args).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failed) => {
            warn!("Run completed with {} failed units", failed);
            ExitCode::from(2)
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Runs one command and returns the number of failed units.
async fn run(args: Args) -> Result<usize> {
    let source = ConfigSource::from_environment()?;

    match args.command {
        Command::Facilities => {
            let snapshot = fetch_snapshot(&source, &args.config_name).await?;
            for record in snapshot.records() {
                println!("{}\t{}", record.key, record.database().unwrap_or(""));
            }
            Ok(0)
        }
        Command::GoldenTables { template_database } => {
            let (settings, reconciler) = reconciler(&source, &args.config_name)?;
            let template = template_database_name(template_database, &settings)?;
            for table in reconciler.golden_tables(&template).await? {
                println!("{}", table);
            }
            Ok(0)
        }
        Command::EnableDb { database } => {
            let (_, reconciler) = reconciler(&source, &args.config_name)?;
            let outcome = reconciler.enable_database_by_name(&database).await?;
            Ok(report_outcome(&database, &outcome))
        }
        Command::DisableDb { database } => {
            let (_, reconciler) = reconciler(&source, &args.config_name)?;
            let outcome = reconciler.disable_database_by_name(&database).await?;
            Ok(report_outcome(&database, &outcome))
        }
        Command::EnableTable {
            database,
            schema,
            table,
            role,
        } => {
            let (_, reconciler) = reconciler(&source, &args.config_name)?;
            let table = CdcTableRef::new(schema, table);
            let outcome = reconciler
                .enable_table_by_name(&database, &table, role.as_deref())
                .await?;
            Ok(report_outcome(&format!("{} {}", database, table), &outcome))
        }
        Command::DisableTable {
            database,
            schema,
            table,
            capture_instance,
        } => {
            let (_, reconciler) = reconciler(&source, &args.config_name)?;
            let table = CdcTableRef::new(schema, table);
            let outcome = reconciler
                .disable_table_by_name(&database, &table, capture_instance.as_deref())
                .await?;
            Ok(report_outcome(&format!("{} {}", database, table), &outcome))
        }
        Command::EnableAll {
            targets,
            reset,
            template_database,
            report,
        } => {
            let (settings, reconciler) = reconciler(&source, &args.config_name)?;
            let template = template_database_name(template_database, &settings)?;
            let snapshot = fetch_snapshot(&source, &args.config_name).await?;

            let bulk = BulkReconciler::new(reconciler, template);
            let run_report = bulk
                .enable_all(&snapshot, &targets.selection(), reset)
                .await?;
            finish_run(run_report, report).await
        }
        Command::ModifyAll {
            targets,
            template_database,
            report,
        } => {
            let (settings, reconciler) = reconciler(&source, &args.config_name)?;
            let template = template_database_name(template_database, &settings)?;
            let snapshot = fetch_snapshot(&source, &args.config_name).await?;

            let bulk = BulkReconciler::new(reconciler, template);
            let run_report = bulk.modify_all(&snapshot, &targets.selection()).await?;
            finish_run(run_report, report).await
        }
        Command::Connectors { command } => run_connectors(&source, &args.config_name, command).await,
        Command::Blobs {
            command: BlobCommand::List { prefix, output },
        } => {
            let lister = BlobLister::azure(&source.storage_settings()?)?;
            let names = lister.list_names(&prefix).await?;
            for name in &names {
                println!("{}", name);
            }
            if let Some(output) = output {
                write_listing(output, &names).await?;
            }
            Ok(0)
        }
    }
}

async fn run_connectors(
    source: &ConfigSource,
    config_name: &str,
    command: ConnectorCommand,
) -> Result<usize> {
    let client = RestConnectorClient::new(&source.api_settings()?)?;
    let api = Arc::new(client);

    match command {
        ConnectorCommand::CreateDb {
            targets,
            template,
            pacing,
            report,
        } => {
            let template = source.load(&template)?.to_value();
            let snapshot = fetch_snapshot(source, config_name).await?;
            let provisioner = ConnectorProvisioner::new(api, pacing.pacing());
            let provision = provisioner
                .create_for_facilities(&snapshot, &targets.selection(), &template)
                .await?;
            finish_provision(provision, report).await
        }
        ConnectorCommand::CreateBlob {
            files,
            template,
            pacing,
            report,
        } => {
            let template = source.load(&template)?.to_value();
            let content = tokio::fs::read_to_string(&files).await?;
            let files: Vec<BlobFile> = serde_json::from_str(&content)?;
            let provisioner = ConnectorProvisioner::new(api, pacing.pacing());
            let provision = provisioner.create_for_blobs(&files, &template).await?;
            finish_provision(provision, report).await
        }
        ConnectorCommand::List { group_id } => {
            for connection in api.list_group_connections(&group_id).await? {
                println!(
                    "{}\t{}\t{}\tpaused={}",
                    connection.id,
                    connection.display_name(),
                    connection.service.as_deref().unwrap_or(""),
                    connection.paused
                );
            }
            Ok(0)
        }
        ConnectorCommand::Pause { group_id } => {
            let provisioner = ConnectorProvisioner::new(api, Pacing::none());
            finish_provision(provisioner.set_group_paused(&group_id, true).await?, None).await
        }
        ConnectorCommand::Resume { group_id } => {
            let provisioner = ConnectorProvisioner::new(api, Pacing::none());
            finish_provision(provisioner.set_group_paused(&group_id, false).await?, None).await
        }
        ConnectorCommand::Delete { group_id } => {
            let provisioner = ConnectorProvisioner::new(api, Pacing::none());
            finish_provision(provisioner.delete_group(&group_id).await?, None).await
        }
        ConnectorCommand::Resync { connector_id } => {
            let provisioner = ConnectorProvisioner::new(api, Pacing::none());
            provisioner.resync(&connector_id).await?;
            Ok(0)
        }
        ConnectorCommand::Missing { group_id, prefix } => {
            let lister = BlobLister::azure(&source.storage_settings()?)?;
            let names = lister.list_names(&prefix).await?;
            let provisioner = ConnectorProvisioner::new(api, Pacing::none());
            for name in provisioner.files_without_connectors(&group_id, &names).await? {
                println!("{}", name);
            }
            Ok(0)
        }
    }
}

fn reconciler(source: &ConfigSource, config_name: &str) -> Result<(DatabaseSettings, CaptureReconciler)> {
    let settings = source.database_settings(config_name)?;
    info!(
        server = %settings.server,
        database = %settings.database,
        "Configuration summary"
    );

    let provider: Arc<dyn ConnectionProvider> = Arc::new(SqlServerProvider::new(settings.clone()));
    let reconciler = CaptureReconciler::new(provider, settings.role_name.clone());
    Ok((settings, reconciler))
}

fn template_database_name(explicit: Option<String>, settings: &DatabaseSettings) -> Result<String> {
    explicit
        .or_else(|| settings.template_database.clone())
        .ok_or_else(|| {
            Error::Config(
                "no template database: set template_database or pass --template-database"
                    .to_string(),
            )
        })
}

async fn fetch_snapshot(source: &ConfigSource, config_name: &str) -> Result<FacilitySnapshot> {
    let settings = source.database_settings(config_name)?;
    let control_database = settings.database.clone();
    let provider: Arc<dyn ConnectionProvider> = Arc::new(SqlServerProvider::new(settings));

    FacilityDirectory::new(provider, control_database.clone())
        .fetch_active_facilities()
        .await?
        .ok_or_else(|| {
            Error::Connection(format!(
                "facility directory in {} is unavailable",
                control_database
            ))
        })
}

fn report_outcome(target: &str, outcome: &TransitionOutcome) -> usize {
    println!("{}: {}", target, outcome);
    usize::from(!outcome.is_success())
}

async fn finish_run(report: RunReport, path: Option<PathBuf>) -> Result<usize> {
    if let Some(path) = path {
        ReportWriter::new(path).save(&report).await?;
    }
    Ok(report.failed_units())
}

async fn finish_provision(report: ProvisionReport, path: Option<PathBuf>) -> Result<usize> {
    info!(
        operation = %report.operation,
        succeeded = report.success_count(),
        failed = report.failed_units(),
        "Connector operation finished"
    );
    if let Some(path) = path {
        ReportWriter::new(path).save(&report).await?;
    }
    Ok(report.failed_units())
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("mssql_capture=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("mssql_capture=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
