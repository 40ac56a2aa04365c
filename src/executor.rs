use crate::error::{Error, Result};

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{Instrument, debug, error, warn};

/// Write-once outcome slot handed to an operation.
///
/// The operation reports through [`Outcome::succeed`] or [`Outcome::fail`], at most once since
/// both consume the slot. Dropping it without reporting surfaces as [`Error::NoOutcome`].
/// The slot is backed by a single-value buffer, so reporting never blocks, even after the
/// caller stopped waiting.
pub struct Outcome<T> {
    call: u64,
    tx: oneshot::Sender<Result<T>>,
}

impl<T> Outcome<T> {
    pub fn succeed(self, value: T) {
        self.complete(Ok(value))
    }

    pub fn fail(self, err: Error) {
        self.complete(Err(err))
    }

    pub fn complete(self, result: Result<T>) {
        if self.tx.send(result).is_err() {
            debug!(call = self.call, "caller gave up, discarding late outcome");
        }
    }

    /// Whether the caller already stopped waiting
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Runs hardware operations on their own task and bounds the caller's wait.
///
/// An operation that outlives its deadline keeps running in the background;
/// only its outcome is dropped.
#[derive(Clone, Default)]
pub struct CallExecutor {
    calls: Arc<AtomicU64>,
    abandoned: Arc<AtomicU64>,
}

impl CallExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls whose deadline fired before the operation reported
    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }

    pub async fn execute<T, F, Fut>(&self, deadline: Duration, operation: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Outcome<T>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let span = tracing::debug_span!("hw_call", call);
        tokio::spawn(operation(Outcome { call, tx }).instrument(span));

        match timeout(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                error!(call, "operation returned without reporting an outcome");
                Err(Error::NoOutcome)
            }
            Err(_) => {
                self.abandoned.fetch_add(1, Ordering::Relaxed);
                warn!(call, ?deadline, "operation timed out, abandoning it");
                Err(Error::Timeout(deadline))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{Instant, sleep};

    const DEADLINE: Duration = Duration::from_secs(7);

    #[tokio::test(start_paused = true)]
    async fn returns_the_reported_value() {
        let executor = CallExecutor::new();
        let res = executor
            .execute(DEADLINE, |outcome| async move { outcome.succeed(42u32) })
            .await;
        assert_eq!(res.unwrap(), 42);
        assert_eq!(executor.abandoned(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn propagates_the_reported_error() {
        let executor = CallExecutor::new();
        let res: Result<()> = executor
            .execute(DEADLINE, |outcome| async move { outcome.fail(Error::NotConnected) })
            .await;
        assert!(matches!(res, Err(Error::NotConnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_operation_is_no_outcome() {
        let executor = CallExecutor::new();
        let res: Result<()> = executor.execute(DEADLINE, |_outcome| async move {}).await;
        assert!(matches!(res, Err(Error::NoOutcome)));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_operation_is_no_outcome() {
        let executor = CallExecutor::new();
        let res: Result<()> = executor
            .execute(DEADLINE, |_outcome| async move { panic!("transport blew up") })
            .await;
        assert!(matches!(res, Err(Error::NoOutcome)));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_operation_times_out_on_deadline() {
        let executor = CallExecutor::new();
        for _ in 0..3 {
            let start = Instant::now();
            let res: Result<()> = executor
                .execute(DEADLINE, |outcome| async move {
                    std::future::pending::<()>().await;
                    outcome.succeed(());
                })
                .await;
            assert!(matches!(res, Err(Error::Timeout(d)) if d == DEADLINE));
            assert!(start.elapsed() >= DEADLINE);
            assert!(start.elapsed() < DEADLINE + Duration::from_millis(50));
        }
        assert_eq!(executor.abandoned(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn late_outcome_does_not_leak_into_next_call() {
        let executor = CallExecutor::new();
        let (done_tx, done_rx) = oneshot::channel();
        let res: Result<&str> = executor
            .execute(Duration::from_millis(100), |outcome| async move {
                sleep(Duration::from_millis(500)).await;
                assert!(outcome.is_abandoned());
                outcome.succeed("late");
                let _ = done_tx.send(());
            })
            .await;
        assert!(matches!(res, Err(Error::Timeout(_))));

        let res = executor
            .execute(DEADLINE, |outcome| async move { outcome.succeed("fresh") })
            .await;
        assert_eq!(res.unwrap(), "fresh");

        // the abandoned operation still runs to completion without blocking
        done_rx.await.unwrap();
        assert_eq!(executor.abandoned(), 1);
    }
}
