//! Cluster-wide write freeze: a table-level read lock held on every writable
//! proxy while a staged routing change is activated.

use crate::metrics_defs::UNLOCK_FAILURES;
use shared::counter;
use shared::retry::retry;
use shared::sql::{Conn, SqlError};
use tokio::time::Duration;
use tracing::{debug, warn};

const UNLOCK_ATTEMPTS: u32 = 3;
const UNLOCK_BACKOFF: Duration = Duration::from_millis(500);

/// A proxy node and the open connection the freeze is issued on.
pub struct ProxyNode {
    pub name: String,
    pub conn: Box<dyn Conn>,
}

/// The proxies currently holding the read lock. Consumed by `unlock_all`, so
/// a lock set can never be released twice.
#[derive(Debug, Default)]
pub struct ProxyLockSet {
    locked: Vec<usize>,
}

impl ProxyLockSet {
    pub fn len(&self) -> usize {
        self.locked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locked.is_empty()
    }
}

/// `lock_all` failure: the proxies locked so far are handed back so the
/// caller can unwind them through the one shared unlock path.
pub struct LockFailure {
    pub locked: ProxyLockSet,
    pub proxy: String,
    pub source: SqlError,
}

/// Freezes writes by locking every proxy in order. Stops at the first
/// failure without unwinding; release always goes through `unlock_all`.
pub async fn lock_all(proxies: &[ProxyNode]) -> Result<ProxyLockSet, LockFailure> {
    let mut set = ProxyLockSet::default();

    for (i, proxy) in proxies.iter().enumerate() {
        debug!(proxy = %proxy.name, "freezing writes");
        if let Err(source) = proxy.conn.execute("FLUSH TABLES WITH READ LOCK").await {
            return Err(LockFailure {
                locked: set,
                proxy: proxy.name.clone(),
                source,
            });
        }
        set.locked.push(i);
    }

    Ok(set)
}

/// Releases every held lock. Each unlock is retried a bounded number of
/// times; a proxy that still cannot be unlocked is a residual hazard reported
/// back as a warning, never as a fatal error.
pub async fn unlock_all(proxies: &[ProxyNode], set: ProxyLockSet) -> Vec<String> {
    let mut warnings = Vec::new();

    for i in set.locked {
        let proxy = &proxies[i];
        let result = retry(UNLOCK_ATTEMPTS, UNLOCK_BACKOFF, || {
            proxy.conn.execute("UNLOCK TABLES")
        })
        .await;

        if let Err(err) = result {
            counter!(UNLOCK_FAILURES).increment(1);
            warn!(
                proxy = %proxy.name,
                error = %err,
                "proxy could not be unlocked, operator attention required"
            );
            warnings.push(format!(
                "proxy {} may still hold the read lock: {err}",
                proxy.name
            ));
        }
    }

    warnings
}
