//! Bounded-concurrency fan-out with per-item retries.
//!
//! [`BatchExecutor::run`] drives every work item through the caller's
//! operation with at most `concurrency` calls in flight. Each item retries on
//! its own after retryable failures, so one slow or failing item never holds
//! up the rest of the pool beyond its own backoff budget.

use std::future::Future;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::item::{ItemResult, RetryPolicy, WorkItem};
use crate::error::ItemFailure;

/// Runs one pass over a set of work items.
#[derive(Debug, Clone, Default)]
pub struct BatchExecutor {
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl BatchExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            cancel: CancellationToken::new(),
        }
    }

    /// Stops new attempts and interrupts backoff sleeps once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns one result per input item, in completion order.
    ///
    /// Callers must sort by `seq` before consuming the results. `observer` is
    /// told about each item's terminal outcome as soon as it is known.
    pub async fn run<P, A, F, Fut>(
        &self,
        items: &[WorkItem<P>],
        concurrency: usize,
        op: &F,
        observer: Option<&dyn Fn(&ItemResult<A>)>,
    ) -> Vec<ItemResult<A>>
    where
        F: Fn(&WorkItem<P>) -> Fut,
        Fut: Future<Output = Result<A, ItemFailure>>,
    {
        if items.is_empty() {
            return Vec::new();
        }

        let workers = concurrency.clamp(1, items.len());
        let mut in_flight = stream::iter(items.iter().map(|item| self.run_item(item, op)))
            .buffer_unordered(workers);

        let mut results = Vec::with_capacity(items.len());
        while let Some(result) = in_flight.next().await {
            if let Some(notify) = observer {
                notify(&result);
            }
            results.push(result);
        }
        results
    }

    async fn run_item<P, A, F, Fut>(&self, item: &WorkItem<P>, op: &F) -> ItemResult<A>
    where
        F: Fn(&WorkItem<P>) -> Fut,
        Fut: Future<Output = Result<A, ItemFailure>>,
    {
        let max_attempts = self.policy.attempts_per_item();
        let mut last_failure: Option<ItemFailure> = None;
        let mut attempt = 0;

        while attempt < max_attempts {
            if self.cancel.is_cancelled() {
                break;
            }
            attempt += 1;

            let failure = match op(item).await {
                Ok(artifact) => return ItemResult::success(item.seq, artifact, attempt),
                Err(failure) => failure,
            };

            if !failure.kind.is_retryable() {
                warn!(seq = item.seq, kind = %failure.kind, attempt, "terminal item failure: {}", failure.message);
                return ItemResult::failure(item.seq, failure, attempt);
            }

            if attempt < max_attempts {
                let delay = self.policy.item_backoff(failure.kind, attempt);
                debug!(
                    seq = item.seq,
                    kind = %failure.kind,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "retrying item: {}",
                    failure.message
                );
                last_failure = Some(failure);
                if !self.pause(delay).await {
                    break;
                }
            } else {
                last_failure = Some(failure);
            }
        }

        let failure = last_failure.unwrap_or_else(ItemFailure::cancelled);
        warn!(seq = item.seq, kind = %failure.kind, attempts = attempt, "item failed: {}", failure.message);
        ItemResult::failure(item.seq, failure, attempt)
    }

    /// Sleeps for `delay`; returns false if cancelled first.
    pub(crate) async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::Instant;

    use super::*;
    use crate::error::ErrorKind;

    fn items(n: u32) -> Vec<WorkItem<u32>> {
        (1..=n).map(|seq| WorkItem::new(seq, seq * 10)).collect()
    }

    fn sorted<A>(mut results: Vec<ItemResult<A>>) -> Vec<ItemResult<A>> {
        results.sort_by_key(|r| r.seq);
        results
    }

    #[tokio::test]
    async fn every_item_gets_one_result() {
        let executor = BatchExecutor::default();
        let op = |item: &WorkItem<u32>| {
            let value = item.payload;
            async move { Ok::<_, ItemFailure>(value + 1) }
        };

        let results = sorted(executor.run(&items(5), 2, &op, None).await);

        assert_eq!(results.len(), 5);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.seq, i as u32 + 1);
            assert_eq!(result.artifact(), Some(&(result.seq * 10 + 1)));
            assert_eq!(result.attempts, 1);
        }
    }

    #[tokio::test]
    async fn repeated_runs_are_identical() {
        let executor = BatchExecutor::default();
        let op = |item: &WorkItem<u32>| {
            let seq = item.seq;
            async move { Ok::<_, ItemFailure>(format!("clip_{seq}")) }
        };

        let first = sorted(executor.run(&items(8), 3, &op, None).await);
        let second = sorted(executor.run(&items(8), 3, &op, None).await);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn empty_input_yields_nothing() {
        let executor = BatchExecutor::default();
        let op = |_: &WorkItem<u32>| async { Ok::<u32, ItemFailure>(0) };
        assert!(executor.run(&[], 4, &op, None).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_calls_never_exceed_concurrency() {
        let executor = BatchExecutor::default();
        let current = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let op = |item: &WorkItem<u32>| {
            let (current, peak) = (&current, &peak);
            let seq = item.seq;
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100 * u64::from(seq % 3 + 1))).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, ItemFailure>(seq)
            }
        };

        let results = executor.run(&items(10), 3, &op, None).await;
        assert_eq!(results.len(), 10);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn pool_never_larger_than_item_count() {
        let executor = BatchExecutor::default();
        let current = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let op = |item: &WorkItem<u32>| {
            let (current, peak) = (&current, &peak);
            let seq = item.seq;
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, ItemFailure>(seq)
            }
        };

        executor.run(&items(2), 16, &op, None).await;
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_errors_are_attempted_once() {
        let executor = BatchExecutor::default();
        let calls = Mutex::new(HashMap::<u32, u32>::new());
        let op = |item: &WorkItem<u32>| {
            *calls.lock().unwrap().entry(item.seq).or_default() += 1;
            let kind = if item.seq == 1 { ErrorKind::Unauthorized } else { ErrorKind::Unknown };
            async move { Err::<u32, _>(ItemFailure::new(kind, "rejected")) }
        };

        let results = sorted(executor.run(&items(2), 2, &op, None).await);

        assert_eq!(results[0].error_kind(), Some(ErrorKind::Unauthorized));
        assert_eq!(results[1].error_kind(), Some(ErrorKind::Unknown));
        assert!(results.iter().all(|r| r.attempts == 1));
        assert!(calls.lock().unwrap().values().all(|&n| n == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_error_recovers_within_attempt_budget() {
        let executor = BatchExecutor::default();
        let calls = AtomicUsize::new(0);
        let op = |_: &WorkItem<u32>| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ItemFailure::new(ErrorKind::ServerError, "500 internal server error"))
                } else {
                    Ok("audio.mp3")
                }
            }
        };

        let results = executor.run(&items(1), 1, &op, None).await;

        assert!(results[0].is_success());
        assert_eq!(results[0].attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_keep_last_failure() {
        let executor = BatchExecutor::new(RetryPolicy {
            max_attempts: 2,
            ..Default::default()
        });
        let calls = AtomicUsize::new(0);
        let op = |_: &WorkItem<u32>| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Err::<u32, _>(ItemFailure::new(ErrorKind::Timeout, format!("timeout #{n}"))) }
        };

        let results = executor.run(&items(1), 1, &op, None).await;

        assert_eq!(results[0].attempts, 2);
        assert_eq!(results[0].failure_ref().unwrap().message, "timeout #1");
        assert!(results[0].is_retryable_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_backoff_strictly_increases() {
        let executor = BatchExecutor::new(RetryPolicy {
            max_attempts: 4,
            ..Default::default()
        });
        let stamps = Mutex::new(Vec::<Instant>::new());
        let op = |_: &WorkItem<u32>| {
            stamps.lock().unwrap().push(Instant::now());
            async { Err::<u32, _>(ItemFailure::new(ErrorKind::RateLimited, "429")) }
        };

        executor.run(&items(1), 1, &op, None).await;

        let stamps = stamps.lock().unwrap();
        assert_eq!(stamps.len(), 4);
        let gaps: Vec<Duration> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps.windows(2).all(|g| g[1] > g[0]));
        assert!(gaps[0] >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_longer_than_server_error() {
        let executor = BatchExecutor::new(RetryPolicy {
            max_attempts: 2,
            ..Default::default()
        });
        let stamps = Mutex::new(HashMap::<u32, Vec<Instant>>::new());
        let op = |item: &WorkItem<u32>| {
            stamps.lock().unwrap().entry(item.seq).or_default().push(Instant::now());
            let kind = if item.seq == 1 { ErrorKind::RateLimited } else { ErrorKind::ServerError };
            async move { Err::<u32, _>(ItemFailure::new(kind, "busy")) }
        };

        executor.run(&items(2), 2, &op, None).await;

        let stamps = stamps.lock().unwrap();
        let gap = |seq: u32| stamps[&seq][1] - stamps[&seq][0];
        assert!(gap(1) > gap(2));
    }

    #[tokio::test]
    async fn observer_sees_each_terminal_outcome_once() {
        let executor = BatchExecutor::default();
        let seen = Mutex::new(Vec::new());
        let observer = |result: &ItemResult<u32>| seen.lock().unwrap().push(result.seq);
        let op = |item: &WorkItem<u32>| {
            let seq = item.seq;
            async move { Ok::<_, ItemFailure>(seq) }
        };

        executor.run(&items(4), 2, &op, Some(&observer)).await;

        let mut seen = seen.into_inner().unwrap();
        seen.sort();
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn cancelled_executor_skips_items() {
        let token = CancellationToken::new();
        token.cancel();
        let executor = BatchExecutor::default().with_cancellation(token);
        let calls = AtomicUsize::new(0);
        let op = |_: &WorkItem<u32>| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<u32, ItemFailure>(1) }
        };

        let results = executor.run(&items(3), 3, &op, None).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(results.iter().all(|r| r.error_kind() == Some(ErrorKind::Unknown)));
        assert!(results.iter().all(|r| r.attempts == 0));
    }
}
