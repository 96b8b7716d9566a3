//! Fixtures shared by the tests in this crate: a small two-shard directory
//! and a scripted cluster (control node, proxies, backends) wired into a
//! `CutoverContext`.

use crate::context::CutoverContext;
use crate::freeze::ProxyNode;
use crate::request::{Endpoint, InstanceAddr};
use routing::{DirectorySnapshot, RoutingDirectory, ShardRole, ShardRoute};
use shared::sql::{Conn, Connector, Row};
use shared::testutils::{ScriptedConn, ScriptedConnector, StatementLog};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

pub(crate) fn instance(host: &str, port: u16) -> InstanceAddr {
    InstanceAddr {
        host: host.to_string(),
        port,
    }
}

pub(crate) fn endpoint(host: &str, port: u16) -> Endpoint {
    Endpoint {
        host: host.to_string(),
        port,
        username: format!("u_{host}"),
        password: "pw".to_string(),
    }
}

pub(crate) fn route(name: &str, host: &str, port: u16) -> ShardRoute {
    ShardRoute {
        name: name.parse().unwrap(),
        host: host.to_string(),
        port,
        username: "rw".to_string(),
        password: "pw".to_string(),
        wrapper: "mysql".to_string(),
    }
}

pub(crate) fn two_shard_routes() -> Vec<ShardRoute> {
    vec![
        route("shard0001", "10.0.1.1", 3306),
        route("shard0001_slave", "10.0.1.2", 3306),
        route("shard0002", "10.0.2.1", 3306),
        route("shard0002_slave", "10.0.2.2", 3306),
        route("proxy01", "10.1.0.1", 4000),
        route("proxy02", "10.1.0.2", 4000),
    ]
}

pub(crate) fn snapshot_with_two_shards() -> DirectorySnapshot {
    DirectorySnapshot::from_routes(two_shard_routes())
}

pub(crate) fn healthy_slave_status() -> Vec<Row> {
    vec![
        Row::new()
            .with("Slave_IO_Running", "Yes")
            .with("Slave_SQL_Running", "Yes")
            .with("Seconds_Behind_Master", "0"),
    ]
}

pub(crate) fn master_status(file: &str, position: u64) -> Vec<Row> {
    vec![
        Row::new()
            .with("File", file)
            .with("Position", position.to_string())
            .with("Executed_Gtid_Set", "3e11fa47-71ca-11e1-9e33:1-5"),
    ]
}

pub(crate) struct TestEnv {
    pub log: Arc<StatementLog>,
    pub connector: Arc<ScriptedConnector>,
    pub control: Arc<ScriptedConn>,
    pub conns: HashMap<String, Arc<ScriptedConn>>,
    pub ctx: CutoverContext,
}

impl TestEnv {
    /// Two shards, two proxies, every backend reachable and with healthy
    /// replication on the slave rows.
    pub fn new(journal_path: Option<PathBuf>) -> Self {
        let log = StatementLog::new();
        let connector = ScriptedConnector::new();
        let routes = two_shard_routes();

        let mut conns = HashMap::new();
        for r in &routes {
            let conn = ScriptedConn::new(r.addr(), log.clone());
            if r.name.role == ShardRole::Slave {
                conn.respond("SHOW SLAVE STATUS", healthy_slave_status());
            }
            connector.add(conn.clone());
            conns.insert(r.addr(), conn);
        }

        let control = ScriptedConn::new("control:9066", log.clone());
        connector.add(control.clone());

        let proxies = routes
            .iter()
            .filter(|r| r.name.role == ShardRole::Proxy)
            .map(|r| ProxyNode {
                name: r.name.to_string(),
                conn: Box::new(conns[&r.addr()].clone()) as Box<dyn Conn>,
            })
            .collect();

        let ctx = CutoverContext {
            directory: RoutingDirectory::new(Box::new(control.clone()), "shard_route"),
            snapshot: DirectorySnapshot::from_routes(routes),
            proxies,
            system_accounts: vec!["shardctl".to_string(), "repl".to_string()],
            connector: connector.clone() as Arc<dyn Connector>,
            journal_path,
            checksum_tables: vec![],
        };

        TestEnv {
            log,
            connector,
            control,
            conns,
            ctx,
        }
    }

    /// Registers a destination backend with healthy replication and a stable
    /// binlog position.
    pub fn add_backend(&mut self, addr: &str) -> Arc<ScriptedConn> {
        let conn = ScriptedConn::new(addr, self.log.clone());
        conn.respond("SHOW SLAVE STATUS", healthy_slave_status());
        conn.respond("SHOW MASTER STATUS", master_status("binlog.000042", 1337));
        self.connector.add(conn.clone());
        self.conns.insert(addr.to_string(), conn.clone());
        conn
    }

    pub fn conn(&self, addr: &str) -> &Arc<ScriptedConn> {
        &self.conns[addr]
    }
}
