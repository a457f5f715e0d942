//! Indexer configuration.
//!
//! Configuration is loaded from a YAML file, validated, and treated as
//! read-only afterwards. A legacy TOML schema from earlier releases is
//! mapped 1:1 onto the YAML schema at load time so old deployments keep
//! working (`harbor migrate toml` rewrites the file permanently).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IndexerError, IndexerResult};

/// Name of the config file inside the home directory.
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Default height-queue capacity.
pub const DEFAULT_QUEUE_SIZE: usize = 25;

// =============================================================================
// Schema
// =============================================================================

/// Top-level configuration tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub chain: ChainConfig,
    pub node: NodeConfig,
    #[serde(default)]
    pub parsing: ParsingConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Chain-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainConfig {
    /// Bech32 address prefix used by the chain.
    pub bech32_prefix: String,
    /// Enabled modules, in dispatch order.
    pub modules: Vec<String>,
}

/// Node connectivity settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Node type; only "remote" is supported.
    #[serde(default = "default_node_type")]
    pub r#type: String,
    pub rpc: RpcConfig,
    #[serde(default)]
    pub grpc: Option<GrpcConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RpcConfig {
    /// HTTP RPC address (e.g. "http://localhost:26657").
    pub address: String,
    /// Maximum concurrent connections to the node.
    #[serde(default = "default_rpc_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrpcConfig {
    pub address: String,
    #[serde(default)]
    pub insecure: bool,
}

/// Which per-height pipeline the workers run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerType {
    /// Full fidelity: blocks, txs, validators, commits, accounts,
    /// every module hook.
    #[default]
    Explorer,
    /// Lightweight: block row + filtered event dispatch only.
    BlockSyncer,
}

/// Ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ParsingConfig {
    /// Number of concurrent workers.
    pub workers: usize,
    /// First height the indexer cares about.
    pub start_height: u64,
    /// Average block time in seconds; base unit for retry/backoff.
    pub average_block_time_secs: u64,
    /// Subscribe to new blocks at the tip.
    pub listen_new_blocks: bool,
    /// Backfill missing historical heights at startup.
    pub parse_old_blocks: bool,
    /// Process the genesis document when the database is empty.
    pub parse_genesis: bool,
    /// Optional local genesis file; falls back to the node API.
    pub genesis_file_path: Option<PathBuf>,
    /// Skip per-height gap detection and trust the tip stream.
    pub fast_sync: bool,
    /// Re-enqueue failed heights instead of blocking the worker.
    pub concurrent_sync: bool,
    /// Pipeline flavor.
    pub worker_type: WorkerType,
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            start_height: 1,
            average_block_time_secs: 3,
            listen_new_blocks: true,
            parse_old_blocks: true,
            parse_genesis: false,
            genesis_file_path: None,
            fast_sync: false,
            concurrent_sync: false,
            worker_type: WorkerType::default(),
        }
    }
}

impl ParsingConfig {
    /// Average block time as a [`Duration`].
    pub fn average_block_time(&self) -> Duration {
        Duration::from_secs(self.average_block_time_secs.max(1))
    }
}

/// Database settings. Connection-pool defaults follow the repository
/// contract: max-open 256, max-idle = max-open, idle 5 minutes,
/// lifetime 1 hour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Connection string, or `env://VAR` to read it from the
    /// environment at load time.
    pub dsn: String,
    #[serde(default = "default_max_open")]
    pub max_open_connections: u32,
    #[serde(default)]
    pub max_idle_connections: Option<u32>,
    #[serde(default = "default_partition_size")]
    pub partition_size: u64,
    #[serde(default = "default_partition_batch")]
    pub partition_batch: u64,
    #[serde(default = "default_idle_secs")]
    pub conn_max_idle_time_secs: u64,
    #[serde(default = "default_lifetime_secs")]
    pub conn_max_lifetime_secs: u64,
    /// Queries slower than this (milliseconds) log a warning.
    #[serde(default = "default_slow_threshold_ms")]
    pub slow_threshold_ms: u64,
    /// Optional secrets-service reference; resolution happens outside
    /// the indexer, the block is carried for schema compatibility.
    #[serde(default)]
    pub secrets: Option<SecretsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    #[serde(rename = "SecretId")]
    pub secret_id: String,
    #[serde(rename = "Region")]
    pub region: String,
}

impl DatabaseConfig {
    pub fn max_idle(&self) -> u32 {
        self.max_idle_connections.unwrap_or(self.max_open_connections)
    }

    pub fn conn_max_idle_time(&self) -> Duration {
        Duration::from_secs(self.conn_max_idle_time_secs)
    }

    pub fn conn_max_lifetime(&self) -> Duration {
        Duration::from_secs(self.conn_max_lifetime_secs)
    }

    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_threshold_ms)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    /// Service name used in the log file name.
    pub service_name: String,
    /// Directory for log files; stdout only when unset.
    pub root_dir: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            service_name: "harbor".to_string(),
            root_dir: None,
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Resolve the log file path, decorated with `NODE_IP` when set.
    pub fn log_path(&self) -> Option<PathBuf> {
        let root = self.root_dir.as_ref()?;
        let name = match std::env::var("NODE_IP") {
            Ok(ip) if !ip.is_empty() => format!("{}-{}.log", self.service_name, ip),
            _ => format!("{}.log", self.service_name),
        };
        Some(root.join(name))
    }
}

fn default_node_type() -> String {
    "remote".to_string()
}
fn default_rpc_max_connections() -> u32 {
    20
}
fn default_max_open() -> u32 {
    256
}
fn default_partition_size() -> u64 {
    100_000
}
fn default_partition_batch() -> u64 {
    1_000
}
fn default_idle_secs() -> u64 {
    300
}
fn default_lifetime_secs() -> u64 {
    3_600
}
fn default_slow_threshold_ms() -> u64 {
    200
}

// =============================================================================
// Loading
// =============================================================================

/// Default config directory: `$HOME/.harbor`.
pub fn default_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".harbor")
}

/// Load and validate configuration from a YAML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> IndexerResult<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| IndexerError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    load_config_from_str(&content)
}

/// Load and validate configuration from a YAML string.
///
/// Useful for testing or when config is provided via other means.
pub fn load_config_from_str(content: &str) -> IndexerResult<Config> {
    let mut config: Config = serde_yaml::from_str(content)
        .map_err(|e| IndexerError::Config(format!("invalid config: {}", e)))?;

    resolve_dsn(&mut config)?;
    validate_config(&config)?;

    Ok(config)
}

/// Load a legacy TOML config and map it onto the current schema.
///
/// The legacy schema is field-for-field identical apart from the file
/// format, so the mapping is a straight deserialize.
pub fn load_legacy_toml(content: &str) -> IndexerResult<Config> {
    let mut config: Config = toml::from_str(content)
        .map_err(|e| IndexerError::Config(format!("invalid legacy config: {}", e)))?;

    resolve_dsn(&mut config)?;
    validate_config(&config)?;

    Ok(config)
}

/// Serialize a config back to YAML (used by `migrate toml`).
pub fn to_yaml(config: &Config) -> IndexerResult<String> {
    serde_yaml::to_string(config)
        .map_err(|e| IndexerError::Config(format!("cannot serialize config: {}", e)))
}

/// Resolve `env://VAR` DSN indirection.
fn resolve_dsn(config: &mut Config) -> IndexerResult<()> {
    if let Some(var) = config.database.dsn.strip_prefix("env://") {
        config.database.dsn = std::env::var(var).map_err(|_| {
            IndexerError::Config(format!("database.dsn points at unset env var {}", var))
        })?;
    }
    Ok(())
}

fn validate_config(config: &Config) -> IndexerResult<()> {
    if config.chain.bech32_prefix.is_empty() {
        return Err(IndexerError::Config("chain.bech32_prefix is empty".into()));
    }
    if config.node.rpc.address.is_empty() {
        return Err(IndexerError::Config("node.rpc.address is empty".into()));
    }
    if config.database.dsn.is_empty() {
        return Err(IndexerError::Config("database.dsn is empty".into()));
    }
    if config.parsing.workers == 0 {
        return Err(IndexerError::Config("parsing.workers must be >= 1".into()));
    }
    if config.parsing.average_block_time_secs == 0 {
        return Err(IndexerError::Config(
            "parsing.average_block_time_secs must be >= 1".into(),
        ));
    }
    Ok(())
}
