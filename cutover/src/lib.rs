//! Shard backend cutover: moves the write path of one or more shards to new
//! backend instances by mutating the routing directory under a cluster-wide
//! write freeze, with a rollback journal covering every step until routing is
//! activated.

pub mod context;
pub mod errors;
pub mod executor;
pub mod freeze;
pub mod health;
pub mod journal;
pub mod metrics_defs;
pub mod request;
pub mod rewirer;
pub mod validator;

#[cfg(test)]
mod testutils;

pub use context::CutoverContext;
pub use errors::{CutoverError, HealthCheckError, ValidationError};
pub use executor::{BinlogPosition, CutoverExecutor, CutoverOutcome, CutoverState};
pub use request::{CutoverFlags, CutoverPlan, CutoverRequest, Endpoint, InstanceAddr, MigratePair, SwitchPair};
pub use rewirer::{ReplicationCredentials, ReplicationRewirer, RewireError};
