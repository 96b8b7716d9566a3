//! The cutover state machine. One run moves through
//! Init -> Validated -> RoutingStaged -> Frozen -> Reverified -> Activated
//! -> Unlocked, with a rolling-back branch reachable from the three middle
//! states. The total order "stage, freeze, activate, unlock" is the
//! correctness argument for the protocol and must not be reordered.

use crate::context::CutoverContext;
use crate::errors::{CutoverError, HealthCheckError};
use crate::freeze;
use crate::health;
use crate::journal::RollbackJournal;
use crate::metrics_defs::{
    CUTOVER_COMPLETED, CUTOVER_ROLLED_BACK, CUTOVER_STARTED, FORCED_WARNINGS,
};
use crate::request::{CutoverFlags, CutoverRequest};
use crate::validator::{self, ValidatedPair};
use routing::RoutingDirectory;
use shared::counter;
use shared::sql::Conn;
use std::collections::HashMap;
use std::fmt;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutoverState {
    Validated,
    RoutingStaged,
    Frozen,
    Reverified,
    Activated,
    Unlocked,
    RollingBack,
}

impl fmt::Display for CutoverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CutoverState::Validated => "validated",
            CutoverState::RoutingStaged => "routing_staged",
            CutoverState::Frozen => "frozen",
            CutoverState::Reverified => "reverified",
            CutoverState::Activated => "activated",
            CutoverState::Unlocked => "unlocked",
            CutoverState::RollingBack => "rolling_back",
        };
        f.write_str(s)
    }
}

/// A destination master's coordinates, captured while writes are frozen.
/// Read-only once captured; never re-captured within the same cutover.
#[derive(Debug, Clone, PartialEq)]
pub struct BinlogPosition {
    pub file: String,
    pub position: u64,
    pub gtid_set: Option<String>,
}

#[derive(Debug, Default)]
pub struct CutoverOutcome {
    /// One entry per destination master, keyed by master shard name.
    pub positions: HashMap<String, BinlogPosition>,
    /// Forced-past health failures and residual unlock hazards.
    pub warnings: Vec<String>,
}

/// A validated pair with its backend connections open.
struct PairRuntime {
    pair: ValidatedPair,
    /// The shard's current primary.
    origin: Box<dyn Conn>,
    /// The instance that will become the primary.
    candidate: Box<dyn Conn>,
}

struct FrozenPhaseError {
    error: CutoverError,
    activation_attempted: bool,
}

pub struct CutoverExecutor;

impl CutoverExecutor {
    pub async fn run(
        &self,
        ctx: &CutoverContext,
        request: &CutoverRequest,
    ) -> Result<CutoverOutcome, CutoverError> {
        counter!(CUTOVER_STARTED).increment(1);
        let mut warnings = Vec::new();

        // Init -> Validated. Failures here exit with zero writes attempted.
        let pairs = validator::validate(request, &ctx.snapshot)?;
        info!(state = %CutoverState::Validated, pairs = pairs.len(), "topology validated");

        let runtimes = self.connect_pairs(ctx, pairs).await?;
        self.preflight(ctx, &runtimes, &request.flags, &mut warnings)
            .await?;

        // Validated -> RoutingStaged. From here on there is something to
        // undo.
        let mut journal = RollbackJournal::new();
        if let Err(err) = self.stage_routing(ctx, &runtimes, &mut journal).await {
            self.roll_back(ctx, &journal, false, &mut warnings).await;
            return Err(err);
        }
        info!(
            state = %CutoverState::RoutingStaged,
            entries = journal.len(),
            "routing changes staged"
        );

        // RoutingStaged -> Frozen. A staged-but-unactivated change plus the
        // freeze bound the inconsistency window.
        let lock_set = match freeze::lock_all(&ctx.proxies).await {
            Ok(set) => set,
            Err(failure) => {
                self.roll_back(ctx, &journal, false, &mut warnings).await;
                freeze::unlock_all(&ctx.proxies, failure.locked).await;
                return Err(CutoverError::Lock {
                    proxy: failure.proxy,
                    source: failure.source,
                });
            }
        };
        info!(state = %CutoverState::Frozen, proxies = lock_set.len(), "writes frozen");

        match self.frozen_phase(ctx, &runtimes, &request.flags).await {
            Ok(positions) => {
                // Activated -> Unlocked. A completed activation is
                // committed; anything that fails past this point is reported
                // but never rolled back.
                warnings.extend(freeze::unlock_all(&ctx.proxies, lock_set).await);
                counter!(CUTOVER_COMPLETED).increment(1);
                info!(state = %CutoverState::Unlocked, "cutover complete");
                Ok(CutoverOutcome {
                    positions,
                    warnings,
                })
            }
            Err(failure) => {
                self.roll_back(ctx, &journal, failure.activation_attempted, &mut warnings)
                    .await;
                freeze::unlock_all(&ctx.proxies, lock_set).await;
                Err(failure.error)
            }
        }
    }

    async fn connect_pairs(
        &self,
        ctx: &CutoverContext,
        pairs: Vec<ValidatedPair>,
    ) -> Result<Vec<PairRuntime>, CutoverError> {
        let mut runtimes = Vec::new();

        for pair in pairs {
            let origin_route = pair.origin_route();
            let origin = ctx
                .connector
                .connect(
                    &origin_route.host,
                    origin_route.port,
                    &origin_route.username,
                    &origin_route.password,
                )
                .await?;

            let candidate_endpoint = pair.candidate_endpoint();
            let candidate = ctx
                .connector
                .connect(
                    &candidate_endpoint.host,
                    candidate_endpoint.port,
                    &candidate_endpoint.username,
                    &candidate_endpoint.password,
                )
                .await?;

            // Reachability probe with the slave's own endpoint and
            // credentials. The rewirer opens its own connection later.
            if let Some(slave) = pair.dest_slave_endpoint() {
                ctx.connector
                    .connect(&slave.host, slave.port, &slave.username, &slave.password)
                    .await?;
            }

            runtimes.push(PairRuntime {
                pair,
                origin,
                candidate,
            });
        }

        Ok(runtimes)
    }

    async fn preflight(
        &self,
        ctx: &CutoverContext,
        runtimes: &[PairRuntime],
        flags: &CutoverFlags,
        warnings: &mut Vec<String>,
    ) -> Result<(), CutoverError> {
        if flags.check_active_clients {
            let result =
                health::check_no_active_clients(&ctx.proxies, &ctx.system_accounts).await;
            self.advisory(flags, warnings, result)?;
        }

        for rt in runtimes {
            if flags.check_slave_delay {
                let result = health::check_replication_link(rt.candidate.as_ref()).await;
                self.advisory(flags, warnings, result)?;
            }

            let result = health::check_variable_parity(
                rt.origin.as_ref(),
                rt.candidate.as_ref(),
                health::PARITY_VARIABLES,
            )
            .await;
            self.advisory(flags, warnings, result)?;

            if flags.verify_checksum {
                let result = health::check_checksum(
                    rt.origin.as_ref(),
                    rt.candidate.as_ref(),
                    &ctx.checksum_tables,
                )
                .await;
                self.advisory(flags, warnings, result)?;
            }
        }

        Ok(())
    }

    /// Health checks are advisory under force: the failure is logged,
    /// counted and recorded as a warning instead of aborting.
    fn advisory(
        &self,
        flags: &CutoverFlags,
        warnings: &mut Vec<String>,
        result: Result<(), HealthCheckError>,
    ) -> Result<(), CutoverError> {
        match result {
            Ok(()) => Ok(()),
            Err(err) if flags.force => {
                counter!(FORCED_WARNINGS).increment(1);
                warn!(error = %err, "health check failed, continuing under force");
                warnings.push(format!("forced past failing health check: {err}"));
                Ok(())
            }
            Err(err) => Err(CutoverError::Health(err)),
        }
    }

    /// Stages every routing change. The inverse of each mutation is recorded
    /// (and, when a journal path is configured, persisted) before the
    /// mutation itself is issued.
    async fn stage_routing(
        &self,
        ctx: &CutoverContext,
        runtimes: &[PairRuntime],
        journal: &mut RollbackJournal,
    ) -> Result<(), CutoverError> {
        for rt in runtimes {
            for change in rt.pair.route_changes() {
                let prior = &change.prior;
                let inverse = RoutingDirectory::alter_node_statement(
                    prior.name.as_str(),
                    &prior.host,
                    prior.port,
                    &prior.username,
                    &prior.password,
                );
                journal.record(change.shard_name(), inverse);

                if let Some(path) = &ctx.journal_path {
                    journal.persist(path)?;
                }

                ctx.directory
                    .alter_node(
                        change.shard_name(),
                        &change.new_host,
                        change.new_port,
                        &change.new_username,
                        &change.new_password,
                    )
                    .await
                    .map_err(|source| CutoverError::Mutation {
                        shard: change.shard_name().to_string(),
                        source,
                    })?;
            }
        }

        Ok(())
    }

    /// Everything that happens under the write freeze: re-verification,
    /// binlog position capture, and the activation flush.
    async fn frozen_phase(
        &self,
        ctx: &CutoverContext,
        runtimes: &[PairRuntime],
        flags: &CutoverFlags,
    ) -> Result<HashMap<String, BinlogPosition>, FrozenPhaseError> {
        if flags.force {
            info!("force set, skipping in-freeze re-verification");
        } else if flags.check_slave_delay {
            // Time has passed since pre-flight; check the links again.
            for rt in runtimes {
                health::check_replication_link(rt.candidate.as_ref())
                    .await
                    .map_err(|err| FrozenPhaseError {
                        error: CutoverError::Health(err),
                        activation_attempted: false,
                    })?;
            }
            info!(state = %CutoverState::Reverified, "replication links re-verified");
        }

        let mut positions = HashMap::new();
        for rt in runtimes.iter().filter(|rt| rt.pair.is_migrate()) {
            let position = capture_position(rt.candidate.as_ref())
                .await
                .map_err(|error| FrozenPhaseError {
                    error,
                    activation_attempted: false,
                })?;
            positions.insert(rt.pair.shard().to_string(), position);
        }

        // The single moment the staged change becomes visible to every
        // proxy.
        ctx.directory
            .flush_routing(true)
            .await
            .map_err(|err| FrozenPhaseError {
                error: CutoverError::Activation(err),
                activation_attempted: true,
            })?;
        info!(state = %CutoverState::Activated, "routing change activated");

        Ok(positions)
    }

    async fn roll_back(
        &self,
        ctx: &CutoverContext,
        journal: &RollbackJournal,
        compensate_activation: bool,
        warnings: &mut Vec<String>,
    ) {
        if journal.is_empty() && !compensate_activation {
            return;
        }

        warn!(
            state = %CutoverState::RollingBack,
            entries = journal.len(),
            "rolling back staged routing changes"
        );
        counter!(CUTOVER_ROLLED_BACK).increment(1);

        if let Err(err) = journal.replay(&ctx.directory).await {
            error!(error = %err, "rollback journal replay incomplete");
            warnings.push(format!("rollback incomplete: {err}"));
        }

        // An attempted activation may already be visible to proxies; flush
        // once more so the rollback is too.
        if compensate_activation {
            if let Err(err) = ctx.directory.flush_routing(true).await {
                error!(error = %err, "compensating routing flush failed");
                warnings.push(format!("compensating routing flush failed: {err}"));
            }
        }
    }
}

async fn capture_position(conn: &dyn Conn) -> Result<BinlogPosition, CutoverError> {
    let rows = conn.query("SHOW MASTER STATUS").await?;
    let addr = conn.addr().to_string();

    let row = rows
        .first()
        .ok_or_else(|| HealthCheckError::NoMasterStatus { addr: addr.clone() })?;

    let file = row
        .get("File")
        .ok_or_else(|| HealthCheckError::NoMasterStatus { addr: addr.clone() })?
        .to_string();
    let position = row
        .get("Position")
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(|| HealthCheckError::NoMasterStatus { addr: addr.clone() })?;
    let gtid_set = row
        .get("Executed_Gtid_Set")
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(BinlogPosition {
        file,
        position,
        gtid_set,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ValidationError;
    use crate::request::{CutoverPlan, MigratePair, SwitchPair};
    use crate::testutils::{endpoint, instance, TestEnv};

    fn switch_request(pairs: Vec<SwitchPair>, flags: CutoverFlags) -> CutoverRequest {
        CutoverRequest {
            plan: CutoverPlan::Switch { pairs },
            flags,
        }
    }

    fn two_pair_switch() -> CutoverRequest {
        switch_request(
            vec![
                SwitchPair {
                    master: instance("10.0.1.1", 3306),
                    slave: instance("10.0.1.2", 3306),
                },
                SwitchPair {
                    master: instance("10.0.2.1", 3306),
                    slave: instance("10.0.2.2", 3306),
                },
            ],
            CutoverFlags::default(),
        )
    }

    #[tokio::test]
    async fn test_switch_two_pairs_success() {
        let env = TestEnv::new(None);

        let outcome = CutoverExecutor
            .run(&env.ctx, &two_pair_switch())
            .await
            .unwrap();
        assert!(outcome.warnings.is_empty());
        assert!(outcome.positions.is_empty());

        // Both shards' rows were re-pointed at their slaves and vice versa
        let control = env.log.statements_for("control:9066");
        let alters: Vec<_> = control
            .iter()
            .filter(|s| s.starts_with("ALTER NODE"))
            .collect();
        assert_eq!(alters.len(), 4);
        assert!(alters[0].starts_with("ALTER NODE shard0001 ") && alters[0].contains("host '10.0.1.2'"));
        assert!(alters[1].starts_with("ALTER NODE shard0001_slave ") && alters[1].contains("host '10.0.1.1'"));
        assert!(alters[2].starts_with("ALTER NODE shard0002 ") && alters[2].contains("host '10.0.2.2'"));

        // Freeze bracketing: last alter < first lock < activation < first
        // unlock
        let last_alter = env.log.last_position_of("ALTER NODE").unwrap();
        let first_lock = env.log.position_of("FLUSH TABLES WITH READ LOCK").unwrap();
        let activation = env.log.position_of("FLUSH ROUTING FORCE").unwrap();
        let first_unlock = env.log.position_of("UNLOCK TABLES").unwrap();
        assert!(last_alter < first_lock);
        assert!(first_lock < activation);
        assert!(activation < first_unlock);

        // Each proxy locked exactly once and unlocked exactly once
        assert_eq!(env.log.count_matching("FLUSH TABLES WITH READ LOCK"), 2);
        assert_eq!(env.log.count_matching("UNLOCK TABLES"), 2);
    }

    #[tokio::test]
    async fn test_failed_alter_rolls_back_staged_pairs() {
        let env = TestEnv::new(None);
        // The second pair's first mutation fails once
        env.control.fail_times("ALTER NODE shard0002", 1);

        let err = CutoverExecutor
            .run(&env.ctx, &two_pair_switch())
            .await
            .unwrap_err();
        assert!(matches!(err, CutoverError::Mutation { ref shard, .. } if shard == "shard0002"));

        // The first pair's rows were restored to their original endpoints
        let control = env.log.statements_for("control:9066");
        let restore = control
            .iter()
            .rposition(|s| s.starts_with("ALTER NODE shard0001 ") && s.contains("host '10.0.1.1'"))
            .unwrap();
        let forward = control
            .iter()
            .position(|s| s.starts_with("ALTER NODE shard0001 ") && s.contains("host '10.0.1.2'"))
            .unwrap();
        assert!(forward < restore);

        // No proxy lock was ever acquired and nothing was activated
        assert_eq!(env.log.count_matching("FLUSH TABLES WITH READ LOCK"), 0);
        assert_eq!(env.log.count_matching("FLUSH ROUTING"), 0);
    }

    #[tokio::test]
    async fn test_force_downgrades_failing_lag_check() {
        let env = TestEnv::new(None);
        // shard0001's slave reports a lag way above the limit
        env.conn("10.0.1.2:3306").respond_replace(
            "SHOW SLAVE STATUS",
            vec![
                shared::sql::Row::new()
                    .with("Slave_IO_Running", "Yes")
                    .with("Slave_SQL_Running", "Yes")
                    .with("Seconds_Behind_Master", "120"),
            ],
        );

        let mut flags = CutoverFlags::default();
        flags.force = true;
        let request = switch_request(
            vec![SwitchPair {
                master: instance("10.0.1.1", 3306),
                slave: instance("10.0.1.2", 3306),
            }],
            flags,
        );

        let outcome = CutoverExecutor.run(&env.ctx, &request).await.unwrap();
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("replication lag"));

        // The cutover still went through
        assert_eq!(env.log.count_matching("ALTER NODE"), 2);
        assert_eq!(env.log.count_matching("FLUSH ROUTING FORCE"), 1);
    }

    #[tokio::test]
    async fn test_failed_activation_rolls_back_and_compensates() {
        let env = TestEnv::new(None);
        env.control.fail_times("FLUSH ROUTING", 1);

        let err = CutoverExecutor
            .run(&env.ctx, &two_pair_switch())
            .await
            .unwrap_err();
        assert!(matches!(err, CutoverError::Activation(_)));

        // Four forward alters, then four restores after the failed flush
        assert_eq!(env.log.count_matching("ALTER NODE"), 8);

        // The rollback was made visible by a compensating flush
        assert_eq!(env.log.count_matching("FLUSH ROUTING FORCE"), 2);
        let failed_activation = env.log.position_of("FLUSH ROUTING FORCE").unwrap();
        let compensating = env.log.last_position_of("FLUSH ROUTING FORCE").unwrap();
        let last_restore = env.log.last_position_of("ALTER NODE").unwrap();
        assert!(failed_activation < last_restore);
        assert!(last_restore < compensating);

        // Every locked proxy was still unlocked
        assert_eq!(env.log.count_matching("UNLOCK TABLES"), 2);
        let last_unlock = env.log.last_position_of("UNLOCK TABLES").unwrap();
        assert!(compensating < last_unlock);
    }

    #[tokio::test]
    async fn test_lock_failure_rolls_back_and_unwinds_partial_set() {
        let env = TestEnv::new(None);
        env.conn("10.1.0.2:4000").fail_on("FLUSH TABLES WITH READ LOCK");

        let err = CutoverExecutor
            .run(&env.ctx, &two_pair_switch())
            .await
            .unwrap_err();
        assert!(matches!(err, CutoverError::Lock { ref proxy, .. } if proxy == "proxy02"));

        // Staged changes were rolled back and nothing was activated
        assert_eq!(env.log.count_matching("ALTER NODE"), 8);
        assert_eq!(env.log.count_matching("FLUSH ROUTING"), 0);

        // Only the proxy that was actually locked got an unlock
        assert_eq!(env.log.statements_for("10.1.0.1:4000"), vec![
            "SHOW PROCESSLIST".to_string(),
            "FLUSH TABLES WITH READ LOCK".to_string(),
            "UNLOCK TABLES".to_string(),
        ]);
        assert_eq!(
            env.log
                .statements_for("10.1.0.2:4000")
                .iter()
                .filter(|s| *s == "UNLOCK TABLES")
                .count(),
            0
        );
    }

    #[tokio::test]
    async fn test_migrate_captures_positions_and_persists_journal() {
        let dir = tempfile::tempdir().unwrap();
        let journal_path = dir.path().join("rollback.json");

        let mut env = TestEnv::new(Some(journal_path.clone()));
        env.add_backend("10.9.1.1:3306");
        env.add_backend("10.9.1.2:3306");

        let request = CutoverRequest {
            plan: CutoverPlan::Migrate {
                pairs: vec![MigratePair {
                    origin_master: instance("10.0.1.1", 3306),
                    dest_master: endpoint("10.9.1.1", 3306),
                    dest_slave: Some(endpoint("10.9.1.2", 3306)),
                }],
            },
            flags: CutoverFlags::default(),
        };

        let outcome = CutoverExecutor.run(&env.ctx, &request).await.unwrap();

        // Captured exactly once, while frozen, from the destination master
        assert_eq!(
            outcome.positions["shard0001"],
            BinlogPosition {
                file: "binlog.000042".to_string(),
                position: 1337,
                gtid_set: Some("3e11fa47-71ca-11e1-9e33:1-5".to_string()),
            }
        );
        assert_eq!(env.log.count_matching("SHOW MASTER STATUS"), 1);
        let capture = env.log.position_of("SHOW MASTER STATUS").unwrap();
        let first_lock = env.log.position_of("FLUSH TABLES WITH READ LOCK").unwrap();
        let activation = env.log.position_of("FLUSH ROUTING FORCE").unwrap();
        assert!(first_lock < capture);
        assert!(capture < activation);

        // Both rows were re-pointed at the new endpoints
        assert_eq!(env.log.count_matching("host '10.9.1.1'"), 1);
        assert_eq!(env.log.count_matching("host '10.9.1.2'"), 1);

        // The journal was persisted and restores the origin endpoints
        let journal = RollbackJournal::load(&journal_path).unwrap();
        assert_eq!(journal.len(), 2);
        assert!(journal.entries()[0].statement.contains("host '10.0.1.1'"));

        // The destination slave was connected with its own credentials
        assert!(
            env.connector
                .connects()
                .contains(&"u_10.9.1.2@10.9.1.2:3306".to_string())
        );
    }

    #[tokio::test]
    async fn test_mixed_pair_set_performs_zero_network_mutation() {
        let env = TestEnv::new(None);

        let request = CutoverRequest {
            plan: CutoverPlan::Migrate {
                pairs: vec![
                    MigratePair {
                        origin_master: instance("10.0.1.1", 3306),
                        dest_master: endpoint("10.9.1.1", 3306),
                        dest_slave: Some(endpoint("10.9.1.2", 3306)),
                    },
                    MigratePair {
                        origin_master: instance("10.0.2.1", 3306),
                        dest_master: endpoint("10.9.2.1", 3306),
                        dest_slave: None,
                    },
                ],
            },
            flags: CutoverFlags::default(),
        };

        let err = CutoverExecutor.run(&env.ctx, &request).await.unwrap_err();
        assert!(matches!(
            err,
            CutoverError::Validation(ValidationError::IncompletePairSet)
        ));
        assert!(env.log.entries().is_empty());
        assert!(env.connector.connects().is_empty());
    }
}
