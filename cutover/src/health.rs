//! Live replication and cluster health checks. All checks are advisory: the
//! executor downgrades failures to warnings when the request is forced.

use crate::errors::HealthCheckError;
use crate::freeze::ProxyNode;
use shared::sql::Conn;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Replication lag above this is a failing condition.
pub const MAX_REPLICATION_LAG_SECS: u64 = 5;

/// Variables that must agree between the current and the destination
/// instance before a shard can move.
pub const PARITY_VARIABLES: &[&str] = &[
    "character_set_server",
    "lower_case_table_names",
    "time_zone",
    "binlog_format",
    "binlog_transaction_compression",
];

// Server-internal accounts that never count as client connections.
const BUILTIN_ACCOUNTS: &[&str] = &["system user", "event_scheduler"];

/// Both replication threads must report healthy and the lag must be present
/// and small. A missing lag value is its own failure, distinct from a high
/// one.
pub async fn check_replication_link(conn: &dyn Conn) -> Result<(), HealthCheckError> {
    let addr = conn.addr().to_string();
    let rows = conn.query("SHOW SLAVE STATUS").await?;
    let status = rows
        .first()
        .ok_or_else(|| HealthCheckError::NoSlaveStatus { addr: addr.clone() })?;

    if status.get("Slave_IO_Running") != Some("Yes") {
        return Err(HealthCheckError::IoThreadDown { addr });
    }
    if status.get("Slave_SQL_Running") != Some("Yes") {
        return Err(HealthCheckError::SqlThreadDown { addr });
    }

    let seconds = status
        .get("Seconds_Behind_Master")
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(|| HealthCheckError::LagUnknown { addr: addr.clone() })?;

    if seconds > MAX_REPLICATION_LAG_SECS {
        return Err(HealthCheckError::LagTooHigh {
            addr,
            seconds,
            limit: MAX_REPLICATION_LAG_SECS,
        });
    }

    Ok(())
}

/// Compares the parity checklist between two instances and reports every
/// mismatch, not just the first.
pub async fn check_variable_parity(
    reference: &dyn Conn,
    candidate: &dyn Conn,
    names: &[&str],
) -> Result<(), HealthCheckError> {
    let reference_vars = global_variables(reference).await?;
    let candidate_vars = global_variables(candidate).await?;

    let mut mismatches = Vec::new();
    for name in names {
        let expected = reference_vars.get(*name);
        let actual = candidate_vars.get(*name);
        if expected != actual {
            mismatches.push(format!(
                "{name}: {:?} vs {:?}",
                expected.map(String::as_str),
                actual.map(String::as_str)
            ));
        }
    }

    if mismatches.is_empty() {
        Ok(())
    } else {
        Err(HealthCheckError::VariableMismatch {
            reference: reference.addr().to_string(),
            candidate: candidate.addr().to_string(),
            details: mismatches.join(", "),
        })
    }
}

async fn global_variables(conn: &dyn Conn) -> Result<HashMap<String, String>, HealthCheckError> {
    let rows = conn.query("SHOW GLOBAL VARIABLES").await?;
    Ok(rows
        .iter()
        .filter_map(|row| {
            let name = row.get("Variable_name")?;
            let value = row.get("Value")?;
            Some((name.to_string(), value.to_string()))
        })
        .collect())
}

/// Compares `CHECKSUM TABLE` between the origin and the candidate for each
/// configured table. Skipped when no tables are configured.
pub async fn check_checksum(
    origin: &dyn Conn,
    candidate: &dyn Conn,
    tables: &[String],
) -> Result<(), HealthCheckError> {
    if tables.is_empty() {
        debug!("no checksum tables configured, skipping checksum verification");
        return Ok(());
    }

    for table in tables {
        let origin_sum = table_checksum(origin, table).await?;
        let candidate_sum = table_checksum(candidate, table).await?;
        if origin_sum != candidate_sum {
            return Err(HealthCheckError::ChecksumMismatch {
                table: table.clone(),
                origin: origin.addr().to_string(),
                candidate: candidate.addr().to_string(),
            });
        }
    }

    Ok(())
}

async fn table_checksum(conn: &dyn Conn, table: &str) -> Result<Option<String>, HealthCheckError> {
    let rows = conn.query(&format!("CHECKSUM TABLE {table}")).await?;
    Ok(rows
        .first()
        .and_then(|row| row.get("Checksum"))
        .map(str::to_string))
}

/// No client connection may be live on any proxy, except the configured
/// system accounts.
pub async fn check_no_active_clients(
    proxies: &[ProxyNode],
    system_accounts: &[String],
) -> Result<(), HealthCheckError> {
    for proxy in proxies {
        let rows = proxy.conn.query("SHOW PROCESSLIST").await?;

        let offenders: BTreeSet<&str> = rows
            .iter()
            .filter_map(|row| row.get("User"))
            .filter(|user| {
                !BUILTIN_ACCOUNTS.contains(user)
                    && !system_accounts.iter().any(|a| a == user)
            })
            .collect();

        if !offenders.is_empty() {
            return Err(HealthCheckError::ActiveClients {
                proxy: proxy.name.clone(),
                users: offenders.into_iter().collect::<Vec<_>>().join(", "),
            });
        }
    }

    Ok(())
}
