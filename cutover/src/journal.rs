//! The rollback journal: inverse directory mutations recorded before the
//! forward statements are issued. Atomicity of a cutover is approximated by
//! this journal plus the write freeze, never by the storage engine.

use routing::{RoutingDirectory, RoutingError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::Path;
use tracing::{error, info};

#[derive(thiserror::Error, Debug)]
pub enum JournalError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Replay is best-effort: every entry is attempted and all failures are
/// collected.
#[derive(thiserror::Error, Debug)]
#[error("rollback incomplete: {failed} of {attempted} entries failed")]
pub struct ReplayError {
    pub attempted: usize,
    pub failed: usize,
    pub failures: Vec<(String, RoutingError)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackEntry {
    pub shard_name: String,
    /// The exact statement that restores the shard's row to its prior
    /// values. Independently idempotent.
    pub statement: String,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RollbackJournal {
    entries: Vec<RollbackEntry>,
}

impl RollbackJournal {
    pub fn new() -> Self {
        RollbackJournal::default()
    }

    /// Must be called before the corresponding forward mutation is issued.
    pub fn record(&mut self, shard_name: impl Into<String>, statement: impl Into<String>) {
        self.entries.push(RollbackEntry {
            shard_name: shard_name.into(),
            statement: statement.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[RollbackEntry] {
        &self.entries
    }

    /// Executes every entry against the control node, in append order (each
    /// entry restores one whole row, so order does not matter and replaying
    /// twice is harmless).
    pub async fn replay(&self, directory: &RoutingDirectory) -> Result<(), ReplayError> {
        let mut failures = Vec::new();

        for entry in &self.entries {
            info!(shard = %entry.shard_name, "replaying rollback entry");
            if let Err(err) = directory.execute(&entry.statement).await {
                error!(shard = %entry.shard_name, error = %err, "rollback entry failed");
                failures.push((entry.shard_name.clone(), err));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ReplayError {
                attempted: self.entries.len(),
                failed: failures.len(),
                failures,
            })
        }
    }

    /// Writes the journal to stable storage as operator-readable JSON, so a
    /// crash mid-cutover can still be rolled back by re-running the file.
    pub fn persist(&self, path: &Path) -> Result<(), JournalError> {
        let mut file = File::create(path)?;
        serde_json::to_writer_pretty(&file, self)?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, JournalError> {
        let file = File::open(path)?;
        let journal = serde_json::from_reader(BufReader::new(file))?;
        Ok(journal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::testutils::{ScriptedConn, StatementLog};

    fn restore_statement(shard: &str, host: &str) -> String {
        RoutingDirectory::alter_node_statement(shard, host, 3306, "rw", "pw")
    }

    #[tokio::test]
    async fn test_replay_preserves_order_and_collects_failures() {
        let log = StatementLog::new();
        let control = ScriptedConn::new("control:9066", log.clone());
        control.fail_on("shard0002");
        let directory = RoutingDirectory::new(Box::new(control), "shard_route");

        let mut journal = RollbackJournal::new();
        journal.record("shard0001", restore_statement("shard0001", "10.0.1.1"));
        journal.record("shard0002", restore_statement("shard0002", "10.0.2.1"));
        journal.record("shard0003", restore_statement("shard0003", "10.0.3.1"));

        let err = journal.replay(&directory).await.unwrap_err();
        assert_eq!(err.attempted, 3);
        assert_eq!(err.failed, 1);
        assert_eq!(err.failures[0].0, "shard0002");

        // Best-effort: the entry after the failing one was still attempted
        let statements = log.statements_for("control:9066");
        assert_eq!(statements.len(), 3);
        assert!(statements[0].contains("shard0001"));
        assert!(statements[2].contains("shard0003"));
    }

    #[tokio::test]
    async fn test_replay_twice_issues_identical_statements() {
        let log = StatementLog::new();
        let control = ScriptedConn::new("control:9066", log.clone());
        let directory = RoutingDirectory::new(Box::new(control), "shard_route");

        let mut journal = RollbackJournal::new();
        journal.record("shard0001", restore_statement("shard0001", "10.0.1.1"));
        journal.record("shard0001_slave", restore_statement("shard0001_slave", "10.0.1.2"));

        journal.replay(&directory).await.unwrap();
        journal.replay(&directory).await.unwrap();

        let statements = log.statements_for("control:9066");
        assert_eq!(statements.len(), 4);
        // Entries restore whole rows, so the second replay repeats the first
        assert_eq!(statements[0], statements[2]);
        assert_eq!(statements[1], statements[3]);
    }

    #[test]
    fn test_persist_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollback.json");

        let mut journal = RollbackJournal::new();
        journal.record("shard0001", restore_statement("shard0001", "10.0.1.1"));

        journal.persist(&path).unwrap();
        let loaded = RollbackJournal::load(&path).unwrap();
        assert_eq!(journal, loaded);
    }
}
