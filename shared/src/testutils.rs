//! Scripted SQL connections used by tests across the workspace. Not gated to
//! cfg(test) because downstream crates use these fakes in their own tests.

use crate::sql::{Conn, Connector, Row, SqlError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A log of every statement issued on any scripted connection, in issue
/// order. Shared across connections so tests can assert global ordering.
#[derive(Default)]
pub struct StatementLog {
    entries: Mutex<Vec<(String, String)>>,
}

impl StatementLog {
    pub fn new() -> Arc<Self> {
        Arc::new(StatementLog::default())
    }

    pub fn record(&self, addr: &str, statement: &str) {
        self.entries
            .lock()
            .unwrap()
            .push((addr.to_string(), statement.to_string()));
    }

    /// All (addr, statement) entries in issue order.
    pub fn entries(&self) -> Vec<(String, String)> {
        self.entries.lock().unwrap().clone()
    }

    /// Statements issued on one node, in issue order.
    pub fn statements_for(&self, addr: &str) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(a, _)| a == addr)
            .map(|(_, s)| s.clone())
            .collect()
    }

    /// Number of logged statements containing `needle`.
    pub fn count_matching(&self, needle: &str) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| s.contains(needle))
            .count()
    }

    /// Position of the first logged statement containing `needle`.
    pub fn position_of(&self, needle: &str) -> Option<usize> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .position(|(_, s)| s.contains(needle))
    }

    /// Position of the last logged statement containing `needle`.
    pub fn last_position_of(&self, needle: &str) -> Option<usize> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .rposition(|(_, s)| s.contains(needle))
    }
}

/// A fake connection that replays canned result sets and injects failures.
pub struct ScriptedConn {
    addr: String,
    log: Arc<StatementLog>,
    // First matching prefix wins.
    results: Mutex<Vec<(String, Vec<Row>)>>,
    // (substring, remaining failure count)
    failures: Mutex<Vec<(String, u32)>>,
}

impl ScriptedConn {
    pub fn new(addr: impl Into<String>, log: Arc<StatementLog>) -> Arc<Self> {
        Arc::new(ScriptedConn {
            addr: addr.into(),
            log,
            results: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        })
    }

    /// Statements starting with `prefix` return `rows`.
    pub fn respond(&self, prefix: &str, rows: Vec<Row>) {
        self.results
            .lock()
            .unwrap()
            .push((prefix.to_string(), rows));
    }

    /// Replaces any previous script for `prefix`.
    pub fn respond_replace(&self, prefix: &str, rows: Vec<Row>) {
        let mut results = self.results.lock().unwrap();
        results.retain(|(p, _)| p != prefix);
        results.push((prefix.to_string(), rows));
    }

    /// Every statement containing `needle` fails.
    pub fn fail_on(&self, needle: &str) {
        self.fail_times(needle, u32::MAX);
    }

    /// The next `times` statements containing `needle` fail.
    pub fn fail_times(&self, needle: &str, times: u32) {
        self.failures
            .lock()
            .unwrap()
            .push((needle.to_string(), times));
    }

    fn check_failure(&self, statement: &str) -> Result<(), SqlError> {
        let mut failures = self.failures.lock().unwrap();
        for (needle, remaining) in failures.iter_mut() {
            if statement.contains(needle.as_str()) && *remaining > 0 {
                *remaining -= 1;
                return Err(SqlError::Server(format!(
                    "scripted failure on {}: {statement}",
                    self.addr
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Conn for ScriptedConn {
    async fn execute(&self, statement: &str) -> Result<(), SqlError> {
        self.log.record(&self.addr, statement);
        self.check_failure(statement)
    }

    async fn query(&self, statement: &str) -> Result<Vec<Row>, SqlError> {
        self.log.record(&self.addr, statement);
        self.check_failure(statement)?;

        let results = self.results.lock().unwrap();
        let rows = results
            .iter()
            .find(|(prefix, _)| statement.starts_with(prefix.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default();
        Ok(rows)
    }

    fn addr(&self) -> &str {
        &self.addr
    }
}

// Connectors hand out shared handles to the same scripted node.
#[async_trait]
impl Conn for Arc<ScriptedConn> {
    async fn execute(&self, statement: &str) -> Result<(), SqlError> {
        (**self).execute(statement).await
    }

    async fn query(&self, statement: &str) -> Result<Vec<Row>, SqlError> {
        (**self).query(statement).await
    }

    fn addr(&self) -> &str {
        (**self).addr()
    }
}

/// A connector that hands out pre-registered scripted connections by
/// "host:port" and records every connect with its credentials.
pub struct ScriptedConnector {
    conns: Mutex<HashMap<String, Arc<ScriptedConn>>>,
    connects: Mutex<Vec<String>>,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(ScriptedConnector {
            conns: Mutex::new(HashMap::new()),
            connects: Mutex::new(Vec::new()),
        })
    }

    pub fn add(&self, conn: Arc<ScriptedConn>) {
        self.conns
            .lock()
            .unwrap()
            .insert(conn.addr.clone(), conn);
    }

    /// Every connect as "username@host:port", in order.
    pub fn connects(&self) -> Vec<String> {
        self.connects.lock().unwrap().clone()
    }
}

impl Default for ScriptedConnector {
    fn default() -> Self {
        ScriptedConnector {
            conns: Mutex::new(HashMap::new()),
            connects: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        username: &str,
        _password: &str,
    ) -> Result<Box<dyn Conn>, SqlError> {
        let addr = format!("{host}:{port}");
        self.connects
            .lock()
            .unwrap()
            .push(format!("{username}@{addr}"));

        let conns = self.conns.lock().unwrap();
        match conns.get(&addr) {
            Some(conn) => Ok(Box::new(conn.clone())),
            None => Err(SqlError::Server(format!("no scripted node at {addr}"))),
        }
    }
}
