use crate::types::{ShardRole, ShardRoute};
use crate::RoutingError;
use shared::sql::Conn;
use std::collections::HashMap;
use tracing::debug;

/// Read/write access to the routing directory on the control node.
///
/// Directory mutations are statement-granular: the control node's `ALTER
/// NODE` extension is not transactional across shards, so callers are
/// responsible for recording inverses before mutating.
pub struct RoutingDirectory {
    conn: Box<dyn Conn>,
    table: String,
}

impl RoutingDirectory {
    pub fn new(conn: Box<dyn Conn>, table: impl Into<String>) -> Self {
        RoutingDirectory {
            conn,
            table: table.into(),
        }
    }

    /// Reads every directory row and indexes it by name and by host:port.
    pub async fn snapshot(&self) -> Result<DirectorySnapshot, RoutingError> {
        let rows = self
            .conn
            .query(&format!("SELECT * FROM {}", self.table))
            .await?;

        let routes = rows
            .iter()
            .map(ShardRoute::from_row)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(rows = routes.len(), "loaded routing directory snapshot");
        Ok(DirectorySnapshot::from_routes(routes))
    }

    /// Points `name` at a new physical endpoint. The change is staged in the
    /// control node's cached view; proxies do not see it until
    /// [`flush_routing`](Self::flush_routing) runs.
    pub async fn alter_node(
        &self,
        name: &str,
        host: &str,
        port: u16,
        username: &str,
        password: &str,
    ) -> Result<(), RoutingError> {
        let statement = Self::alter_node_statement(name, host, port, username, password);
        self.conn.execute(&statement).await?;
        Ok(())
    }

    /// Builds the `ALTER NODE` statement text. Also used to construct the
    /// inverse statements recorded in the rollback journal.
    pub fn alter_node_statement(
        name: &str,
        host: &str,
        port: u16,
        username: &str,
        password: &str,
    ) -> String {
        format!(
            "ALTER NODE {name} OPTIONS(user '{username}', password '{password}', \
             host '{host}', port {port})"
        )
    }

    /// Makes all staged directory changes visible to every proxy at once.
    pub async fn flush_routing(&self, force: bool) -> Result<(), RoutingError> {
        let statement = if force {
            "FLUSH ROUTING FORCE"
        } else {
            "FLUSH ROUTING"
        };
        self.conn.execute(statement).await?;
        Ok(())
    }

    /// Issues a previously recorded statement verbatim (rollback replay).
    pub async fn execute(&self, statement: &str) -> Result<(), RoutingError> {
        self.conn.execute(statement).await?;
        Ok(())
    }

    pub fn addr(&self) -> &str {
        self.conn.addr()
    }
}

/// An immutable point-in-time view of the directory.
pub struct DirectorySnapshot {
    routes: Vec<ShardRoute>,
    by_name: HashMap<String, usize>,
    by_addr: HashMap<String, usize>,
}

impl DirectorySnapshot {
    pub fn from_routes(routes: Vec<ShardRoute>) -> Self {
        let mut by_name = HashMap::new();
        let mut by_addr = HashMap::new();
        for (i, route) in routes.iter().enumerate() {
            by_name.insert(route.name.as_str().to_string(), i);
            // First writer wins; directory rows are expected to have unique
            // endpoints.
            by_addr.entry(route.addr()).or_insert(i);
        }
        DirectorySnapshot {
            routes,
            by_name,
            by_addr,
        }
    }

    pub fn find_addr(&self, host: &str, port: u16) -> Option<&ShardRoute> {
        self.by_addr
            .get(&format!("{host}:{port}"))
            .map(|&i| &self.routes[i])
    }

    pub fn find_name(&self, name: &str) -> Option<&ShardRoute> {
        self.by_name.get(name).map(|&i| &self.routes[i])
    }

    /// Proxy rows that accept writes, i.e. the nodes a write freeze must
    /// cover.
    pub fn write_proxies(&self) -> impl Iterator<Item = &ShardRoute> {
        self.routes
            .iter()
            .filter(|r| r.name.role == ShardRole::Proxy)
    }

    pub fn routes(&self) -> &[ShardRoute] {
        &self.routes
    }
}
