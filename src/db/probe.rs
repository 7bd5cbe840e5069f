//! Bounded count probes.
//!
//! Exact COUNT queries are allowed to run only for a fixed window. A second
//! connection watches the clock; when the window closes it kills the probe
//! session server-side, and the caller falls back to an estimate. The
//! watcher never touches the primary connection, so a stuck probe cannot
//! wedge the session that issued it.

use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::driver::{Driver, ResultSet};

/// Run `sql` on `primary`, cancelling it through `secondary` if it is still
/// executing when `timeout` elapses. Returns `None` when the probe was
/// killed or failed; the caller decides what estimate to show instead.
pub async fn run_probe(
    primary: &mut dyn Driver,
    secondary: Option<Box<dyn Driver>>,
    timeout: Duration,
    sql: &str,
) -> Option<ResultSet> {
    let (done_tx, done_rx) = oneshot::channel::<()>();
    let watcher = secondary.map(|mut killer| {
        // capture the id up front; the primary is busy once the query starts
        let victim = primary.thread_id();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    debug!(thread_id = victim, ?timeout, "probe deadline reached, killing");
                    if let Err(err) = killer.kill(victim).await {
                        // the probe may have finished on its own in the meantime
                        debug!(%err, "kill failed");
                    }
                    true
                }
                _ = done_rx => false,
            }
        })
    });

    debug!(%sql, "count probe");
    let outcome = primary.query(sql).await;
    let _ = done_tx.send(());
    let killed = match watcher {
        Some(handle) => handle.await.unwrap_or(false),
        None => false,
    };

    match outcome {
        Ok(result) => Some(result),
        Err(err) => {
            if killed {
                debug!(code = %err.code, "count probe cancelled at deadline");
            } else {
                warn!(
                    code = %err.code,
                    message = %err.message,
                    "count probe failed, falling back to estimate"
                );
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::driver::{ColumnMeta, DriverError, Value};
    use crate::db::schema::{Field, ForeignKey, Index, TableStatus};
    use crate::sql::dialect::Dialect;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::sync::Arc;

    // ---------------- mock driver ----------------

    struct MockDriver {
        thread_id: u64,
        delay: Duration,
        interrupted: Arc<AtomicBool>,
        kills: Arc<AtomicUsize>,
        kill_target: Arc<AtomicU64>,
    }

    struct Flags {
        interrupted: Arc<AtomicBool>,
        kills: Arc<AtomicUsize>,
        kill_target: Arc<AtomicU64>,
    }

    impl Flags {
        fn new() -> Flags {
            Flags {
                interrupted: Arc::new(AtomicBool::new(false)),
                kills: Arc::new(AtomicUsize::new(0)),
                kill_target: Arc::new(AtomicU64::new(0)),
            }
        }

        fn driver(&self, thread_id: u64, delay: Duration) -> MockDriver {
            MockDriver {
                thread_id,
                delay,
                interrupted: self.interrupted.clone(),
                kills: self.kills.clone(),
                kill_target: self.kill_target.clone(),
            }
        }
    }

    #[async_trait]
    impl Driver for MockDriver {
        fn dialect(&self) -> Dialect {
            Dialect::MySql
        }

        fn quote(&self, value: &str) -> String {
            format!("'{}'", value)
        }

        fn quote_binary(&self, _bytes: &[u8]) -> String {
            String::from("X''")
        }

        async fn query(&mut self, _sql: &str) -> Result<ResultSet, DriverError> {
            let started = tokio::time::Instant::now();
            while started.elapsed() < self.delay {
                tokio::time::sleep(Duration::from_millis(50)).await;
                if self.interrupted.load(Ordering::SeqCst) {
                    return Err(DriverError::new("1317", "Query execution was interrupted"));
                }
            }
            Ok(ResultSet {
                columns: vec![ColumnMeta::named("count")],
                rows: vec![vec![Value::UInt(1234)]],
            })
        }

        async fn execute(&mut self, _sql: &str) -> Result<u64, DriverError> {
            Ok(0)
        }

        async fn select_database(&mut self, _name: &str) -> Result<(), DriverError> {
            Ok(())
        }

        fn last_insert_id(&self) -> Option<u64> {
            None
        }

        fn affected_rows(&self) -> u64 {
            0
        }

        async fn begin(&mut self) -> Result<(), DriverError> {
            Ok(())
        }

        async fn commit(&mut self) -> Result<(), DriverError> {
            Ok(())
        }

        async fn rollback(&mut self) -> Result<(), DriverError> {
            Ok(())
        }

        fn thread_id(&self) -> u64 {
            self.thread_id
        }

        async fn kill(&mut self, thread_id: u64) -> Result<(), DriverError> {
            self.kills.fetch_add(1, Ordering::SeqCst);
            self.kill_target.store(thread_id, Ordering::SeqCst);
            self.interrupted.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn table_status(&mut self, _table: &str) -> Result<TableStatus, DriverError> {
            Err(DriverError::new("", "not used"))
        }

        async fn fields(&mut self, _table: &str) -> Result<Vec<Field>, DriverError> {
            Ok(vec![])
        }

        async fn indexes(&mut self, _table: &str) -> Result<Vec<Index>, DriverError> {
            Ok(vec![])
        }

        async fn foreign_keys(&mut self, _table: &str) -> Result<Vec<ForeignKey>, DriverError> {
            Ok(vec![])
        }
    }

    // ---------------- probe behaviour ----------------

    #[tokio::test(start_paused = true)]
    async fn test_fast_probe_returns_rows_without_killing() {
        let flags = Flags::new();
        let mut primary = flags.driver(7, Duration::from_millis(200));
        let killer = flags.driver(8, Duration::ZERO);

        let result = run_probe(
            &mut primary,
            Some(Box::new(killer)),
            Duration::from_secs(2),
            "SELECT COUNT(*) FROM t",
        )
        .await;

        let result = result.unwrap();
        assert_eq!(result.single_value(), Some(&Value::UInt(1234)));
        assert_eq!(flags.kills.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_is_killed_once_and_yields_none() {
        let flags = Flags::new();
        let mut primary = flags.driver(42, Duration::from_secs(60));
        let killer = flags.driver(43, Duration::ZERO);

        let result = run_probe(
            &mut primary,
            Some(Box::new(killer)),
            Duration::from_secs(2),
            "SELECT COUNT(*) FROM big",
        )
        .await;

        assert!(result.is_none());
        assert_eq!(flags.kills.load(Ordering::SeqCst), 1);
        // the watcher targets the primary session, not its own
        assert_eq!(flags.kill_target.load(Ordering::SeqCst), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_without_watcher_runs_to_completion() {
        let flags = Flags::new();
        let mut primary = flags.driver(7, Duration::from_millis(300));

        let result = run_probe(
            &mut primary,
            None,
            Duration::from_millis(100),
            "SELECT COUNT(*) FROM t",
        )
        .await;

        // no secondary connection means no deadline enforcement
        assert!(result.is_some());
        assert_eq!(flags.kills.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_yields_none_without_kill() {
        let flags = Flags::new();
        flags.interrupted.store(true, Ordering::SeqCst);
        let mut primary = flags.driver(7, Duration::from_secs(10));
        let killer = flags.driver(8, Duration::ZERO);

        let result = run_probe(
            &mut primary,
            Some(Box::new(killer)),
            Duration::from_secs(5),
            "SELECT COUNT(*) FROM t",
        )
        .await;

        assert!(result.is_none());
        assert_eq!(flags.kills.load(Ordering::SeqCst), 0);
    }
}
