use crate::journal::JournalError;
use routing::RoutingError;
use shared::sql::SqlError;

/// Topology problems found before any network mutation. Nothing to undo.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("no directory entry for {wanted} (expected a {expected} row)")]
    TopologyMismatch {
        wanted: String,
        expected: &'static str,
    },

    #[error("{name} is a {actual} row, expected a {expected} row")]
    RoleMismatch {
        name: String,
        actual: &'static str,
        expected: &'static str,
    },

    #[error("master {master} and slave {slave} belong to different shards")]
    ShardIndexMismatch { master: String, slave: String },

    #[error("destination slaves must be given for every pair or for none")]
    IncompletePairSet,
}

/// Pre-flight health problems. Downgraded to warnings when `force` is set.
#[derive(thiserror::Error, Debug)]
pub enum HealthCheckError {
    #[error("no slave status reported by {addr}")]
    NoSlaveStatus { addr: String },

    #[error("no usable master status reported by {addr}")]
    NoMasterStatus { addr: String },

    #[error("replication i/o thread not running on {addr}")]
    IoThreadDown { addr: String },

    #[error("replication sql thread not running on {addr}")]
    SqlThreadDown { addr: String },

    #[error("replication lag not reported by {addr}")]
    LagUnknown { addr: String },

    #[error("replication lag on {addr} is {seconds}s, above the {limit}s limit")]
    LagTooHigh {
        addr: String,
        seconds: u64,
        limit: u64,
    },

    #[error("variable mismatch between {reference} and {candidate}: {details}")]
    VariableMismatch {
        reference: String,
        candidate: String,
        details: String,
    },

    #[error("checksum mismatch for table {table} between {origin} and {candidate}")]
    ChecksumMismatch {
        table: String,
        origin: String,
        candidate: String,
    },

    #[error("active client connections on {proxy}: {users}")]
    ActiveClients { proxy: String, users: String },

    #[error(transparent)]
    Sql(#[from] SqlError),
}

#[derive(thiserror::Error, Debug)]
pub enum CutoverError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("health check failed: {0}")]
    Health(#[from] HealthCheckError),

    #[error("routing mutation failed for {shard}: {source}")]
    Mutation {
        shard: String,
        #[source]
        source: RoutingError,
    },

    #[error("write freeze failed on {proxy}: {source}")]
    Lock {
        proxy: String,
        #[source]
        source: SqlError,
    },

    #[error("routing activation failed: {0}")]
    Activation(#[source] RoutingError),

    #[error("rollback journal error: {0}")]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Sql(#[from] SqlError),
}
