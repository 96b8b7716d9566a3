//! Pre-flight topology validation. Pure functions over the directory
//! snapshot; no side effects, no network calls.

use crate::errors::ValidationError;
use crate::request::{CutoverPlan, CutoverRequest, Endpoint, InstanceAddr, MigratePair, SwitchPair};
use routing::{DirectorySnapshot, ShardName, ShardRole, ShardRoute};

/// One planned mutation of a directory row, with the row's prior values kept
/// for the rollback journal.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteChange {
    pub prior: ShardRoute,
    pub new_host: String,
    pub new_port: u16,
    pub new_username: String,
    pub new_password: String,
}

impl RouteChange {
    pub fn shard_name(&self) -> &str {
        self.prior.name.as_str()
    }
}

/// A request pair with every identifier resolved against the directory
/// snapshot, so later stages never re-resolve.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidatedPair {
    Switch {
        master: ShardRoute,
        slave: ShardRoute,
    },
    Migrate {
        origin_master: ShardRoute,
        origin_slave: Option<ShardRoute>,
        dest_master: Endpoint,
        dest_slave: Option<Endpoint>,
    },
}

impl ValidatedPair {
    /// The master shard name, used to label journal entries, captured binlog
    /// positions and log lines.
    pub fn shard(&self) -> &ShardName {
        match self {
            ValidatedPair::Switch { master, .. } => &master.name,
            ValidatedPair::Migrate { origin_master, .. } => &origin_master.name,
        }
    }

    /// The current primary's row, used as the reference side of variable
    /// parity and checksum checks.
    pub fn origin_route(&self) -> &ShardRoute {
        match self {
            ValidatedPair::Switch { master, .. } => master,
            ValidatedPair::Migrate { origin_master, .. } => origin_master,
        }
    }

    /// The instance that will become the shard's primary, with the
    /// credentials to reach it.
    pub fn candidate_endpoint(&self) -> Endpoint {
        match self {
            ValidatedPair::Switch { slave, .. } => Endpoint {
                host: slave.host.clone(),
                port: slave.port,
                username: slave.username.clone(),
                password: slave.password.clone(),
            },
            ValidatedPair::Migrate { dest_master, .. } => dest_master.clone(),
        }
    }

    pub fn dest_slave_endpoint(&self) -> Option<&Endpoint> {
        match self {
            ValidatedPair::Switch { .. } => None,
            ValidatedPair::Migrate { dest_slave, .. } => dest_slave.as_ref(),
        }
    }

    pub fn is_migrate(&self) -> bool {
        matches!(self, ValidatedPair::Migrate { .. })
    }

    /// The directory mutations this pair stages, in issue order.
    pub fn route_changes(&self) -> Vec<RouteChange> {
        match self {
            // A switch swaps the two rows' endpoints and credentials.
            ValidatedPair::Switch { master, slave } => vec![
                RouteChange {
                    prior: master.clone(),
                    new_host: slave.host.clone(),
                    new_port: slave.port,
                    new_username: slave.username.clone(),
                    new_password: slave.password.clone(),
                },
                RouteChange {
                    prior: slave.clone(),
                    new_host: master.host.clone(),
                    new_port: master.port,
                    new_username: master.username.clone(),
                    new_password: master.password.clone(),
                },
            ],
            ValidatedPair::Migrate {
                origin_master,
                origin_slave,
                dest_master,
                dest_slave,
            } => {
                let mut changes = vec![RouteChange {
                    prior: origin_master.clone(),
                    new_host: dest_master.host.clone(),
                    new_port: dest_master.port,
                    new_username: dest_master.username.clone(),
                    new_password: dest_master.password.clone(),
                }];
                if let (Some(slave_route), Some(slave_endpoint)) = (origin_slave, dest_slave) {
                    changes.push(RouteChange {
                        prior: slave_route.clone(),
                        new_host: slave_endpoint.host.clone(),
                        new_port: slave_endpoint.port,
                        new_username: slave_endpoint.username.clone(),
                        new_password: slave_endpoint.password.clone(),
                    });
                }
                changes
            }
        }
    }
}

pub fn validate(
    request: &CutoverRequest,
    snapshot: &DirectorySnapshot,
) -> Result<Vec<ValidatedPair>, ValidationError> {
    match &request.plan {
        CutoverPlan::Switch { pairs } => pairs
            .iter()
            .map(|pair| validate_switch(pair, snapshot))
            .collect(),
        CutoverPlan::Migrate { pairs } => {
            // All-or-nothing rule: a set that names destination slaves for
            // some pairs but not others is rejected outright.
            let with_slave = pairs.iter().filter(|p| p.dest_slave.is_some()).count();
            if with_slave != 0 && with_slave != pairs.len() {
                return Err(ValidationError::IncompletePairSet);
            }
            pairs
                .iter()
                .map(|pair| validate_migrate(pair, snapshot))
                .collect()
        }
    }
}

fn resolve(
    snapshot: &DirectorySnapshot,
    instance: &InstanceAddr,
    expected: ShardRole,
) -> Result<ShardRoute, ValidationError> {
    let route = snapshot
        .find_addr(&instance.host, instance.port)
        .ok_or_else(|| ValidationError::TopologyMismatch {
            wanted: instance.addr(),
            expected: expected.as_str(),
        })?;

    if route.name.role != expected {
        return Err(ValidationError::RoleMismatch {
            name: route.name.to_string(),
            actual: route.name.role.as_str(),
            expected: expected.as_str(),
        });
    }

    Ok(route.clone())
}

fn validate_switch(
    pair: &SwitchPair,
    snapshot: &DirectorySnapshot,
) -> Result<ValidatedPair, ValidationError> {
    let master = resolve(snapshot, &pair.master, ShardRole::Master)?;
    let slave = resolve(snapshot, &pair.slave, ShardRole::Slave)?;

    if master.name.index != slave.name.index {
        return Err(ValidationError::ShardIndexMismatch {
            master: master.name.to_string(),
            slave: slave.name.to_string(),
        });
    }

    Ok(ValidatedPair::Switch { master, slave })
}

fn validate_migrate(
    pair: &MigratePair,
    snapshot: &DirectorySnapshot,
) -> Result<ValidatedPair, ValidationError> {
    let origin_master = resolve(snapshot, &pair.origin_master, ShardRole::Master)?;

    // A destination slave replaces the origin's slave row, which therefore
    // must exist.
    let origin_slave = match &pair.dest_slave {
        Some(_) => {
            let slave_name = origin_master.name.slave_name();
            let route = snapshot.find_name(&slave_name).ok_or_else(|| {
                ValidationError::TopologyMismatch {
                    wanted: slave_name,
                    expected: ShardRole::Slave.as_str(),
                }
            })?;
            Some(route.clone())
        }
        None => None,
    };

    Ok(ValidatedPair::Migrate {
        origin_master,
        origin_slave,
        dest_master: pair.dest_master.clone(),
        dest_slave: pair.dest_slave.clone(),
    })
}
