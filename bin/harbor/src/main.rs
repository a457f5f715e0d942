//! Harbor - object-storage-chain indexer.
//!
//! # Usage
//!
//! ```bash
//! # Start the full ingestion engine
//! harbor start
//!
//! # One-shot backfill from a height up to the last exported block
//! harbor parse blocks missing 100
//!
//! # Re-fetch transactions for a height range
//! harbor parse transactions all --start 100 --end 200
//!
//! # Convert a legacy TOML config to the current YAML schema
//! harbor migrate toml ./config.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use harbor_chain::{ChainClientConfig, HttpChainSource, JsonMessageCodec};
use harbor_core::config::{self, Config};
use harbor_core::metrics::init_metrics;
use harbor_core::ports::{ChainSource, ModuleRegistry, Repository};
use harbor_core::services::{ParserContext, Supervisor};
use harbor_modules::HarborRegistrar;
use harbor_storage::{Database, DatabaseConfig, PgRepository};

/// Harbor CLI - object-storage-chain indexer.
#[derive(Parser, Debug)]
#[command(name = "harbor")]
#[command(about = "Harbor - blockchain indexer for object-storage chains")]
#[command(version)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, env = "HARBOR_CONFIG")]
    config: Option<PathBuf>,

    /// Prometheus metrics port.
    #[arg(long, global = true, env = "METRICS_PORT", default_value = "9090")]
    metrics_port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch the ingestion engine (producers + workers + periodic +
    /// async tasks).
    Start,

    /// One-shot parsing commands.
    Parse {
        #[command(subcommand)]
        target: ParseTarget,
    },

    /// Configuration migrations.
    Migrate {
        #[command(subcommand)]
        format: MigrateFormat,
    },
}

#[derive(Subcommand, Debug)]
enum ParseTarget {
    /// Block backfill commands.
    Blocks {
        #[command(subcommand)]
        mode: BlocksMode,
    },
    /// Transaction re-fetch commands.
    Transactions {
        #[command(subcommand)]
        mode: TransactionsMode,
    },
}

#[derive(Subcommand, Debug)]
enum BlocksMode {
    /// Backfill heights missing from the repository, from the given
    /// height up to the last exported one.
    Missing { start_height: u64 },
}

#[derive(Subcommand, Debug)]
enum TransactionsMode {
    /// Re-fetch transactions for a closed height range.
    All {
        /// Defaults to parsing.start_height.
        #[arg(long)]
        start: Option<u64>,
        /// Defaults to the node's latest height.
        #[arg(long)]
        end: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
enum MigrateFormat {
    /// Convert a legacy TOML config to the current YAML schema.
    Toml {
        /// Legacy config file.
        input: PathBuf,
        /// Output path; defaults to config.yaml next to the input.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // `migrate toml` runs before any config is loadable.
    if let Command::Migrate { format } = &cli.command {
        return run_migrate(format);
    }

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| config::default_home().join(config::CONFIG_FILE_NAME));
    let config = config::load_config(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let _log_guard = init_tracing(&config);
    install_metrics(cli.metrics_port);

    info!("Starting Harbor indexer");
    debug!(rpc = %config.node.rpc.address, "Chain endpoint");
    debug!(dsn = %mask_password(&config.database.dsn), "Database endpoint");

    // ─────────────────────────────────────────────────────────────────────────
    // Database
    // ─────────────────────────────────────────────────────────────────────────
    info!("Connecting to database...");
    let db = Database::connect(&DatabaseConfig {
        dsn: config.database.dsn.clone(),
        max_open_connections: config.database.max_open_connections,
        max_idle_connections: config.database.max_idle(),
        conn_max_idle_time: config.database.conn_max_idle_time(),
        conn_max_lifetime: config.database.conn_max_lifetime(),
        slow_threshold: config.database.slow_threshold(),
    })
    .await
    .context("Failed to connect to database")?;

    db.migrate().await.context("Failed to run migrations")?;
    info!("Database ready (migrations applied)");

    let repository: Arc<dyn Repository> = Arc::new(PgRepository::new(db.clone()));

    // ─────────────────────────────────────────────────────────────────────────
    // Chain connection
    // ─────────────────────────────────────────────────────────────────────────
    info!("Connecting to chain node...");
    let source: Arc<dyn ChainSource> = Arc::new(
        HttpChainSource::new(ChainClientConfig {
            rpc_address: config.node.rpc.address.clone(),
            api_address: config.node.grpc.as_ref().map(|g| g.address.clone()),
            max_connections: config.node.rpc.max_connections,
        })
        .context("Failed to build chain client")?,
    );

    let chain_id = source.chain_id().await.context("Failed to reach the chain node")?;
    let tip = source.latest_height().await.unwrap_or(0);
    info!(chain_id = %chain_id, tip, "Chain connected");

    // ─────────────────────────────────────────────────────────────────────────
    // Modules
    // ─────────────────────────────────────────────────────────────────────────
    let registrar = HarborRegistrar::new(db.clone(), repository.clone());
    let registry = Arc::new(ModuleRegistry::build(&registrar, &config.chain.modules));
    info!(
        modules = registry.all().len(),
        enabled = ?config.chain.modules,
        "Modules registered"
    );

    registry
        .prepare_tables()
        .await
        .context("Module table preparation failed")?;
    registry
        .run_additional_operations()
        .await
        .context("Module additional operations failed")?;

    let codec = Arc::new(JsonMessageCodec::new(config.chain.bech32_prefix.clone()));
    let ctx = ParserContext::new(
        config.parsing.clone(),
        chain_id,
        source,
        repository,
        codec,
        registry,
    );
    let supervisor = Supervisor::new(ctx);

    match cli.command {
        Command::Start => run_start(supervisor).await,
        Command::Parse { target } => match target {
            ParseTarget::Blocks {
                mode: BlocksMode::Missing { start_height },
            } => {
                supervisor.parse_missing_blocks(start_height).await?;
                Ok(())
            }
            ParseTarget::Transactions {
                mode: TransactionsMode::All { start, end },
            } => {
                let start = start.unwrap_or(config.parsing.start_height);
                supervisor.reparse_transactions(start, end).await?;
                Ok(())
            }
        },
        Command::Migrate { .. } => unreachable!("handled before config load"),
    }
}

/// Run the full engine until a termination signal.
async fn run_start(supervisor: Supervisor) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let engine = tokio::spawn(async move { supervisor.start(shutdown_rx).await });

    info!("Harbor ready. Press Ctrl+C to stop");
    shutdown_signal().await;

    info!("Shutting down...");
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(std::time::Duration::from_secs(35), engine).await {
        Ok(Ok(Ok(()))) => debug!("Engine stopped"),
        Ok(Ok(Err(e))) => error!(error = %e, "Engine error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "Engine task panicked"),
        Err(_) => warn!("Engine shutdown timed out"),
    }

    info!("Shutdown complete");
    Ok(())
}

/// Handle `migrate toml`.
fn run_migrate(format: &MigrateFormat) -> Result<()> {
    let MigrateFormat::Toml { input, out } = format;

    let content = std::fs::read_to_string(input)
        .with_context(|| format!("reading {}", input.display()))?;
    let config = config::load_legacy_toml(&content).context("Legacy config is invalid")?;
    let yaml = config::to_yaml(&config)?;

    let out_path = out.clone().unwrap_or_else(|| {
        input
            .parent()
            .unwrap_or_else(|| std::path::Path::new("."))
            .join(config::CONFIG_FILE_NAME)
    });
    std::fs::write(&out_path, yaml)
        .with_context(|| format!("writing {}", out_path.display()))?;

    info!(from = %input.display(), to = %out_path.display(), "Config migrated");
    Ok(())
}

/// Initialize the tracing subscriber. When `logging.root_dir` is set
/// the output goes to a file (decorated with `NODE_IP`), otherwise to
/// stdout. Returns the appender guard that must stay alive.
fn init_tracing(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    match config.logging.log_path() {
        Some(path) => {
            let dir = path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
            let file = path
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| "harbor.log".to_string());
            let appender = tracing_appender::rolling::never(dir, file);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
            None
        }
    }
}

/// Prometheus metrics exporter (optional - failures don't crash the app).
fn install_metrics(port: u16) {
    match format!("0.0.0.0:{}", port).parse::<std::net::SocketAddr>() {
        Ok(addr) => match PrometheusBuilder::new().with_http_listener(addr).install() {
            Ok(()) => init_metrics(),
            Err(e) => {
                warn!("Failed to start metrics exporter: {}. Continuing without metrics.", e);
            }
        },
        Err(e) => warn!("Invalid metrics address: {}. Continuing without metrics.", e),
    }
}

/// Mask password in the DSN for logging.
fn mask_password(dsn: &str) -> String {
    match url::Url::parse(dsn) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("****"));
            }
            url.to_string()
        }
        Err(_) => dsn.to_string(),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
