//! The SQL connection seam. Every component above this module talks to the
//! control node, proxy nodes and backend instances through the `Conn` trait,
//! so tests can substitute scripted connections.

use async_trait::async_trait;
use sqlx::mysql::MySqlConnectOptions;
use sqlx::{Column, ConnectOptions, MySqlConnection, Row as SqlxRow};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(thiserror::Error, Debug)]
pub enum SqlError {
    #[error("could not connect to {addr}: {source}")]
    Connect { addr: String, source: sqlx::Error },

    #[error("statement failed on {addr}: {source}")]
    Statement {
        addr: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("server error: {0}")]
    Server(String),
}

/// One result row, keyed by column name. A `None` value is SQL NULL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: HashMap<String, Option<String>>,
}

impl Row {
    pub fn new() -> Self {
        Row::default()
    }

    /// Builder used by row conversion and by test fixtures.
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.columns.insert(name.to_string(), Some(value.into()));
        self
    }

    pub fn with_null(mut self, name: &str) -> Self {
        self.columns.insert(name.to_string(), None);
        self
    }

    /// Returns the column value, or `None` when the column is absent or NULL.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.columns.get(name).and_then(|v| v.as_deref())
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|k| k.as_str())
    }
}

/// A live connection to one MySQL-speaking node.
#[async_trait]
pub trait Conn: Send + Sync {
    /// Issues a statement that returns no rows.
    async fn execute(&self, statement: &str) -> Result<(), SqlError>;

    /// Issues a statement and returns every result row.
    async fn query(&self, statement: &str) -> Result<Vec<Row>, SqlError>;

    /// "host:port" label used in error messages and logs.
    fn addr(&self) -> &str;
}

/// Opens connections from endpoint coordinates. The production implementation
/// is [`MySqlConnector`]; tests inject a scripted one.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        username: &str,
        password: &str,
    ) -> Result<Box<dyn Conn>, SqlError>;
}

pub struct MySqlConn {
    addr: String,
    // Statements within one cutover are issued sequentially, so a single
    // connection behind a mutex is all we need.
    inner: Mutex<MySqlConnection>,
}

// Free async fns (not boxed by async_trait) so the compiler can pick the
// concrete `Executor` lifetime; calling sqlx directly inside the boxed trait
// methods trips "implementation of `Executor` is not general enough".
// A bare `&str` query goes over the unprepared text protocol, the same wire
// behavior as `sqlx::raw_sql`. Calling through `Executor` directly sidesteps
// a "implementation of `Executor` is not general enough" compiler error that
// `raw_sql(..).execute(&mut *conn)` triggers inside async_trait methods.
async fn raw_execute(inner: &Mutex<MySqlConnection>, statement: &str) -> Result<(), sqlx::Error> {
    use sqlx::Executor;
    let mut conn = inner.lock().await;
    conn.execute(statement).await?;
    Ok(())
}

async fn raw_fetch_all(
    inner: &Mutex<MySqlConnection>,
    statement: &str,
) -> Result<Vec<sqlx::mysql::MySqlRow>, sqlx::Error> {
    use sqlx::Executor;
    let mut conn = inner.lock().await;
    conn.fetch_all(statement).await
}

#[async_trait]
impl Conn for MySqlConn {
    async fn execute(&self, statement: &str) -> Result<(), SqlError> {
        raw_execute(&self.inner, statement)
            .await
            .map_err(|source| SqlError::Statement {
                addr: self.addr.clone(),
                source,
            })?;
        Ok(())
    }

    async fn query(&self, statement: &str) -> Result<Vec<Row>, SqlError> {
        let rows = raw_fetch_all(&self.inner, statement)
            .await
            .map_err(|source| SqlError::Statement {
                addr: self.addr.clone(),
                source,
            })?;

        Ok(rows.iter().map(convert_row).collect())
    }

    fn addr(&self) -> &str {
        &self.addr
    }
}

fn convert_row(row: &sqlx::mysql::MySqlRow) -> Row {
    let mut converted = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        // Statements go over the text protocol (raw_sql), so every value
        // decodes as an optional string.
        let value: Option<String> = row.try_get_unchecked(i).unwrap_or(None);
        converted = match value {
            Some(v) => converted.with(column.name(), v),
            None => converted.with_null(column.name()),
        };
    }
    converted
}

pub struct MySqlConnector;

#[async_trait]
impl Connector for MySqlConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        username: &str,
        password: &str,
    ) -> Result<Box<dyn Conn>, SqlError> {
        let addr = format!("{host}:{port}");

        let options = MySqlConnectOptions::new()
            .host(host)
            .port(port)
            .username(username)
            .password(password);

        let conn = options.connect().await.map_err(|source| SqlError::Connect {
            addr: addr.clone(),
            source,
        })?;

        Ok(Box::new(MySqlConn {
            addr,
            inner: Mutex::new(conn),
        }))
    }
}
