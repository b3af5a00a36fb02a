//! Retry-safe transactions.
//!
//! A unit of work runs inside one `BEGIN IMMEDIATE` transaction. When SQLite
//! reports the database busy or locked, the transaction is rolled back and the
//! *whole* unit runs again on a fresh transaction after an exponential backoff
//! with jitter. Any other error aborts at once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rusqlite::{Transaction, TransactionBehavior};
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt; the work runs at most `max_retries + 1` times.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_jitter: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`: base, 2×base, 4×base, ... plus jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay.saturating_mul(1 << attempt.min(6));
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        exponential + jitter
    }
}

/// Runs `op` until it succeeds, fails with a non-lock error, or the retry
/// allowance is used up. `op` receives the zero-based attempt number.
pub async fn retry_locked<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempt, "transaction succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_locked() => {
                if attempt >= policy.max_retries {
                    tracing::error!(
                        attempts = attempt + 1,
                        "database still locked, giving up on this unit of work"
                    );
                    return Err(AppError::StillLocked {
                        attempts: attempt + 1,
                    });
                }
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "database locked, retrying transaction"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Runs `work` in its own immediate transaction with lock retries.
///
/// The transaction of a failed attempt is dropped (rolled back) before the
/// next attempt opens a new one, so nothing from a failed attempt survives.
pub async fn run_in_transaction<T, F>(conn: &Connection, policy: &RetryPolicy, work: F) -> Result<T>
where
    T: Send + 'static,
    F: Fn(&Transaction<'_>) -> rusqlite::Result<T> + Send + Sync + 'static,
{
    let work = Arc::new(work);
    retry_locked(policy, |_| {
        let work = Arc::clone(&work);
        async move {
            let value = conn
                .call(move |conn| {
                    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                    let value = work(&tx)?;
                    tx.commit()?;
                    Ok(value)
                })
                .await?;
            Ok(value)
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_jitter: Duration::ZERO,
        }
    }

    fn busy() -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        )
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_jitter: Duration::ZERO,
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_backoff_jitter_is_bounded() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_jitter: Duration::from_millis(50),
        };
        for _ in 0..50 {
            let d = policy.backoff(0);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn test_attempts_bounded_by_max_retries_plus_one() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_locked(&fast_policy(3), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::Sqlite(busy())) }
        })
        .await;

        assert!(matches!(result, Err(AppError::StillLocked { attempts: 4 })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_other_errors_abort_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_locked(&fast_policy(3), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::Config("nope".into())) }
        })
        .await;

        assert!(matches!(result, Err(AppError::Config(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_lock() {
        let result = retry_locked(&fast_policy(5), |attempt| async move {
            if attempt < 2 {
                Err(AppError::Sqlite(busy()))
            } else {
                Ok(attempt)
            }
        })
        .await;
        tokio_test::assert_ok!(&result);
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_attempt_is_rolled_back() {
        let conn = Connection::open_in_memory().await.unwrap();
        conn.call(|conn| {
            conn.execute_batch("CREATE TABLE t (v INTEGER NOT NULL);")?;
            Ok(())
        })
        .await
        .unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        run_in_transaction(&conn, &fast_policy(3), move |tx| {
            tx.execute("INSERT INTO t (v) VALUES (1)", [])?;
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(busy());
            }
            Ok(())
        })
        .await
        .unwrap();

        let rows: i64 = conn
            .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_real_lock_contention_exhausts_retries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locked.db");

        let blocker = rusqlite::Connection::open(&path).unwrap();
        blocker
            .execute_batch("CREATE TABLE t (v INTEGER); BEGIN EXCLUSIVE; INSERT INTO t VALUES (0);")
            .unwrap();

        let conn = Connection::open(&path).await.unwrap();
        conn.call(|conn| {
            conn.busy_timeout(Duration::ZERO)?;
            Ok(())
        })
        .await
        .unwrap();

        let result = run_in_transaction(&conn, &fast_policy(2), |tx| {
            tx.execute("INSERT INTO t (v) VALUES (1)", [])?;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(AppError::StillLocked { attempts: 3 })));

        blocker.execute_batch("COMMIT;").unwrap();
        tokio_test::assert_ok!(
            run_in_transaction(&conn, &fast_policy(2), |tx| {
                tx.execute("INSERT INTO t (v) VALUES (1)", [])?;
                Ok(())
            })
            .await
        );
    }
}
