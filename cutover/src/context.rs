//! The shared dependency bundle for one cutover run. Connections and their
//! lifecycles are owned here explicitly instead of living in implicit shared
//! state.

use crate::errors::CutoverError;
use crate::freeze::ProxyNode;
use crate::request::Endpoint;
use routing::{DirectorySnapshot, RoutingDirectory};
use shared::sql::Connector;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub struct CutoverContext {
    /// Control-node connection wrapped in directory accessors.
    pub directory: RoutingDirectory,
    /// Directory state fetched once at the start of the run.
    pub snapshot: DirectorySnapshot,
    /// One open connection per writable proxy, in directory order.
    pub proxies: Vec<ProxyNode>,
    /// Accounts that do not count as client connections during pre-flight.
    pub system_accounts: Vec<String>,
    /// Opens connections to backend instances as pairs are processed.
    pub connector: Arc<dyn Connector>,
    /// Where the rollback journal is persisted. `None` disables persistence
    /// (the in-place switch variant).
    pub journal_path: Option<PathBuf>,
    /// Tables compared by the optional checksum verification.
    pub checksum_tables: Vec<String>,
}

impl CutoverContext {
    /// Connects the control node, snapshots the directory, and opens one
    /// connection per writable proxy found in the snapshot.
    pub async fn build(
        connector: Arc<dyn Connector>,
        control: &Endpoint,
        routing_table: &str,
        system_accounts: Vec<String>,
        journal_path: Option<PathBuf>,
        checksum_tables: Vec<String>,
    ) -> Result<Self, CutoverError> {
        let control_conn = connector
            .connect(
                &control.host,
                control.port,
                &control.username,
                &control.password,
            )
            .await?;

        let directory = RoutingDirectory::new(control_conn, routing_table);
        let snapshot = directory.snapshot().await?;

        let mut proxies = Vec::new();
        for route in snapshot.write_proxies() {
            let conn = connector
                .connect(&route.host, route.port, &route.username, &route.password)
                .await?;
            proxies.push(ProxyNode {
                name: route.name.to_string(),
                conn,
            });
        }

        info!(
            routes = snapshot.routes().len(),
            proxies = proxies.len(),
            "cutover context ready"
        );

        Ok(CutoverContext {
            directory,
            snapshot,
            proxies,
            system_accounts,
            connector,
            journal_path,
            checksum_tables,
        })
    }
}
