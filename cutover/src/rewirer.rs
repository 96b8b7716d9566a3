//! Post-activation replication rewiring for migrations: the destination
//! master stops replicating from the origin and the destination slave starts
//! replicating from the destination master at the position captured while
//! writes were frozen.

use crate::errors::HealthCheckError;
use crate::executor::BinlogPosition;
use crate::health;
use crate::request::{Endpoint, MigratePair};
use shared::retry::retry;
use shared::sql::{Conn, Connector, SqlError};
use tokio::time::Duration;
use tracing::{debug, info};

pub const CATCHUP_ATTEMPTS: u32 = 30;
pub const CATCHUP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(thiserror::Error, Debug)]
pub enum RewireError {
    #[error(transparent)]
    Sql(#[from] SqlError),

    #[error("replication on {addr} not healthy after {attempts} attempts: {last}")]
    CatchupTimeout {
        addr: String,
        attempts: u32,
        last: HealthCheckError,
    },
}

/// The account the new slave uses to replicate from the new master.
#[derive(Debug, Clone)]
pub struct ReplicationCredentials {
    pub username: String,
    pub password: String,
}

pub struct ReplicationRewirer {
    credentials: ReplicationCredentials,
    catchup_attempts: u32,
    catchup_interval: Duration,
}

impl ReplicationRewirer {
    pub fn new(credentials: ReplicationCredentials) -> Self {
        ReplicationRewirer {
            credentials,
            catchup_attempts: CATCHUP_ATTEMPTS,
            catchup_interval: CATCHUP_INTERVAL,
        }
    }

    #[cfg(test)]
    fn with_catchup(mut self, attempts: u32, interval: Duration) -> Self {
        self.catchup_attempts = attempts;
        self.catchup_interval = interval;
        self
    }

    /// Rewires one migrated pair. Must only run after a successful cutover;
    /// the captured position is the destination master's state at freeze
    /// time.
    pub async fn rewire(
        &self,
        connector: &dyn Connector,
        pair: &MigratePair,
        position: &BinlogPosition,
    ) -> Result<(), RewireError> {
        let master = &pair.dest_master;
        let master_conn = connector
            .connect(&master.host, master.port, &master.username, &master.password)
            .await?;

        self.stop_old_replication(master_conn.as_ref()).await?;

        let Some(slave) = &pair.dest_slave else {
            debug!(master = %master.addr(), "no destination slave, rewire complete");
            return Ok(());
        };

        self.grant_replication_privilege(master_conn.as_ref(), &slave.host)
            .await?;

        // The slave connects with its own endpoint and credentials.
        let slave_conn = connector
            .connect(&slave.host, slave.port, &slave.username, &slave.password)
            .await?;

        self.change_master_and_start(slave_conn.as_ref(), master, position)
            .await?;

        info!(
            master = %master.addr(),
            slave = %slave.addr(),
            "replication rewired"
        );
        Ok(())
    }

    /// The destination master was replicating from the origin to stay in
    /// sync; it is a standalone primary now.
    async fn stop_old_replication(&self, conn: &dyn Conn) -> Result<(), SqlError> {
        conn.execute("STOP SLAVE").await?;
        conn.execute("RESET SLAVE ALL").await?;
        Ok(())
    }

    async fn grant_replication_privilege(
        &self,
        master_conn: &dyn Conn,
        slave_host: &str,
    ) -> Result<(), SqlError> {
        let user = &self.credentials.username;
        master_conn
            .execute(&format!(
                "CREATE USER IF NOT EXISTS '{user}'@'{slave_host}' IDENTIFIED BY '{}'",
                self.credentials.password
            ))
            .await?;
        master_conn
            .execute(&format!(
                "GRANT REPLICATION SLAVE, REPLICATION CLIENT ON *.* TO '{user}'@'{slave_host}'"
            ))
            .await?;
        Ok(())
    }

    /// Issues the position-based handshake and waits, with bounded retries,
    /// for the new link to report healthy.
    async fn change_master_and_start(
        &self,
        slave_conn: &dyn Conn,
        master: &Endpoint,
        position: &BinlogPosition,
    ) -> Result<(), RewireError> {
        let change = format!(
            "CHANGE MASTER TO MASTER_HOST='{}', MASTER_PORT={}, MASTER_USER='{}', \
             MASTER_PASSWORD='{}', MASTER_LOG_FILE='{}', MASTER_LOG_POS={}",
            master.host,
            master.port,
            self.credentials.username,
            self.credentials.password,
            position.file,
            position.position,
        );
        slave_conn.execute(&change).await?;
        slave_conn.execute("START SLAVE").await?;

        retry(self.catchup_attempts, self.catchup_interval, || {
            health::check_replication_link(slave_conn)
        })
        .await
        .map_err(|last| RewireError::CatchupTimeout {
            addr: slave_conn.addr().to_string(),
            attempts: self.catchup_attempts,
            last,
        })
    }
}
