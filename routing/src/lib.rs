//! Access to the control node's authoritative shard-routing directory.

mod directory;
mod types;

pub use directory::{DirectorySnapshot, RoutingDirectory};
pub use types::{ShardName, ShardRole, ShardRoute};

use shared::sql::SqlError;

#[derive(thiserror::Error, Debug)]
pub enum RoutingError {
    #[error(transparent)]
    Sql(#[from] SqlError),

    #[error("shard name {0:?} does not follow the naming convention")]
    InvalidShardName(String),

    #[error("directory row is missing column {0:?}")]
    MissingColumn(&'static str),

    #[error("directory row for {name} has invalid port {port:?}")]
    InvalidPort { name: String, port: String },
}
