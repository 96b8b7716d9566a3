use cutover::request::Endpoint;
use serde::Deserialize;
use std::fs::File;
use std::path::PathBuf;

#[derive(Deserialize, Debug)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

/// The account created on new masters for their slaves to replicate with.
#[derive(Deserialize, Debug, Clone)]
pub struct ReplicationConfig {
    pub username: String,
    pub password: String,
}

fn default_routing_table() -> String {
    "shard_route".to_string()
}

#[derive(Deserialize, Debug)]
pub struct Config {
    /// The control node whose routing table is the source of truth.
    pub control: Endpoint,
    #[serde(default = "default_routing_table")]
    pub routing_table: String,
    /// Accounts ignored when counting active client connections on proxies.
    #[serde(default)]
    pub system_accounts: Vec<String>,
    /// Rollback journals for migrations are written here.
    pub journal_dir: PathBuf,
    /// Tables compared when checksum verification is requested.
    #[serde(default)]
    pub checksum_tables: Vec<String>,
    pub replication: ReplicationConfig,
    pub metrics: Option<MetricsConfig>,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}
