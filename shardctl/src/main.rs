mod config;

use clap::{Parser, Subcommand};
use config::{Config, ConfigError};
use cutover::errors::CutoverError;
use cutover::executor::CutoverExecutor;
use cutover::journal::{JournalError, ReplayError, RollbackJournal};
use cutover::request::{CutoverPlan, CutoverRequest};
use cutover::rewirer::{ReplicationCredentials, ReplicationRewirer, RewireError};
use cutover::CutoverContext;
use metrics_exporter_statsd::StatsdBuilder;
use routing::{RoutingDirectory, RoutingError};
use shared::metrics_defs::describe_all;
use shared::sql::{Connector, MySqlConnector, SqlError};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shardctl")]
struct Cli {
    #[arg(long, default_value = "/etc/shardctl/config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Promote existing slaves to primaries for the pairs in the request
    Switch {
        #[arg(long)]
        request: PathBuf,
    },
    /// Move shards to new backend instances and rewire their replication
    Migrate {
        #[arg(long)]
        request: PathBuf,
    },
    /// Replay a persisted rollback journal against the control node
    Replay {
        #[arg(long)]
        journal: PathBuf,
    },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse request: {0}")]
    RequestParse(#[from] serde_yaml::Error),

    #[error("request plan kind does not match the `{0}` subcommand")]
    RequestKind(&'static str),

    #[error(transparent)]
    Cutover(#[from] CutoverError),

    #[error(transparent)]
    Rewire(#[from] RewireError),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Replay(#[from] ReplayError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Sql(#[from] SqlError),

    #[error("no captured binlog position for {shard}")]
    MissingPosition { shard: String },

    #[error("could not install metrics recorder: {0}")]
    Metrics(String),
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "shardctl failed");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn run(cli: Cli) -> Result<(), CliError> {
    let config = Config::from_file(&cli.config)?;
    init_metrics(&config)?;

    let connector: Arc<dyn Connector> = Arc::new(MySqlConnector);
    match &cli.command {
        CliCommand::Switch { request } => {
            run_cutover(connector, &config, request, false).await
        }
        CliCommand::Migrate { request } => {
            run_cutover(connector, &config, request, true).await
        }
        CliCommand::Replay { journal } => replay_journal(connector, &config, journal).await,
    }
}

fn init_metrics(config: &Config) -> Result<(), CliError> {
    let Some(metrics_config) = &config.metrics else {
        return Ok(());
    };

    let recorder = StatsdBuilder::from(metrics_config.statsd_host.as_str(), metrics_config.statsd_port)
        .build(Some("shardctl"))
        .map_err(|err| CliError::Metrics(err.to_string()))?;
    metrics::set_global_recorder(recorder)
        .map_err(|_| CliError::Metrics("global recorder already set".to_string()))?;

    describe_all(cutover::metrics_defs::ALL_METRICS);
    Ok(())
}

fn load_request(path: &PathBuf) -> Result<CutoverRequest, CliError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&raw)?)
}

async fn run_cutover(
    connector: Arc<dyn Connector>,
    config: &Config,
    request_path: &PathBuf,
    migrate: bool,
) -> Result<(), CliError> {
    let request = load_request(request_path)?;
    let is_migrate = matches!(request.plan, CutoverPlan::Migrate { .. });
    if is_migrate != migrate {
        return Err(CliError::RequestKind(if migrate { "migrate" } else { "switch" }));
    }

    // Migrations get a persisted journal so a crash mid-run can still be
    // rolled back with the replay subcommand.
    let journal_path = if is_migrate {
        std::fs::create_dir_all(&config.journal_dir)?;
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let path = config.journal_dir.join(format!("rollback-{stamp}.json"));
        info!(path = %path.display(), "rollback journal will be persisted");
        Some(path)
    } else {
        None
    };

    let ctx = CutoverContext::build(
        connector.clone(),
        &config.control,
        &config.routing_table,
        config.system_accounts.clone(),
        journal_path,
        config.checksum_tables.clone(),
    )
    .await?;

    let outcome = CutoverExecutor.run(&ctx, &request).await?;
    for warning in &outcome.warnings {
        warn!(warning = %warning, "cutover finished with warning");
    }

    // Routing is committed at this point. Rewiring failures below leave a
    // shard serving correctly but without a replica; they are reported, not
    // rolled back.
    if let CutoverPlan::Migrate { pairs } = &request.plan {
        let rewirer = ReplicationRewirer::new(ReplicationCredentials {
            username: config.replication.username.clone(),
            password: config.replication.password.clone(),
        });

        for pair in pairs {
            let shard = ctx
                .snapshot
                .find_addr(&pair.origin_master.host, pair.origin_master.port)
                .map(|route| route.name.to_string())
                .ok_or_else(|| CliError::MissingPosition {
                    shard: pair.origin_master.addr(),
                })?;
            let position =
                outcome
                    .positions
                    .get(&shard)
                    .ok_or_else(|| CliError::MissingPosition {
                        shard: shard.clone(),
                    })?;
            rewirer.rewire(connector.as_ref(), pair, position).await?;
        }
    }

    info!("cutover complete");
    Ok(())
}

async fn replay_journal(
    connector: Arc<dyn Connector>,
    config: &Config,
    path: &PathBuf,
) -> Result<(), CliError> {
    let journal = RollbackJournal::load(path)?;
    info!(entries = journal.len(), path = %path.display(), "replaying rollback journal");

    let control = &config.control;
    let conn = connector
        .connect(
            &control.host,
            control.port,
            &control.username,
            &control.password,
        )
        .await?;
    let directory = RoutingDirectory::new(conn, &config.routing_table);

    journal.replay(&directory).await?;
    directory.flush_routing(true).await?;

    info!("journal replayed and routing flushed");
    Ok(())
}
