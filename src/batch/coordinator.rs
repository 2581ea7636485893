//! Second retry tier: re-submits still-failing items as smaller, slower rounds.

use std::collections::BTreeMap;
use std::future::Future;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use super::executor::BatchExecutor;
use super::item::{ItemResult, WorkItem};
use crate::error::ItemFailure;

/// Bookkeeping for one executor pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundReport {
    /// 0 for the initial pass, then 1, 2, ... for retry rounds.
    pub round: u32,
    /// Worker count actually used (never above `submitted`).
    pub concurrency: usize,
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Final state of every item after all rounds.
#[derive(Debug, Clone)]
pub struct BatchOutcome<A> {
    /// One result per original item, ascending by `seq`.
    pub results: Vec<ItemResult<A>>,
    pub rounds: Vec<RoundReport>,
}

impl<A> BatchOutcome<A> {
    pub fn retry_rounds(&self) -> usize {
        self.rounds.len().saturating_sub(1)
    }
}

impl BatchExecutor {
    /// Runs `items` through the executor, then retries retryable failures in
    /// up to `max_batch_rounds` further rounds.
    ///
    /// Each retry round waits `round_backoff(round)`, runs only the items whose
    /// last outcome is a retryable failure and halves the worker count. Items
    /// that failed with a terminal kind are carried forward untouched.
    pub async fn run_with_batch_retry<P, A, F, Fut>(
        &self,
        items: Vec<WorkItem<P>>,
        concurrency: usize,
        op: &F,
        observer: Option<&dyn Fn(&ItemResult<A>)>,
    ) -> BatchOutcome<A>
    where
        P: Clone,
        F: Fn(&WorkItem<P>) -> Fut,
        Fut: Future<Output = Result<A, ItemFailure>>,
    {
        let started = Instant::now();
        let policy = self.policy();
        let mut latest: BTreeMap<u32, ItemResult<A>> = BTreeMap::new();
        let mut rounds = Vec::new();
        let mut workers = concurrency.max(1);
        let mut batch = items;
        let mut round = 0;

        debug_assert!(
            {
                let mut seqs: Vec<u32> = batch.iter().map(|i| i.seq).collect();
                seqs.sort_unstable();
                seqs.windows(2).all(|w| w[0] != w[1])
            },
            "sequence numbers must be unique within a stage"
        );

        loop {
            let results = self.run(&batch, workers, op, observer).await;
            let succeeded = results.iter().filter(|r| r.is_success()).count();
            rounds.push(RoundReport {
                round,
                concurrency: workers.min(batch.len()),
                submitted: batch.len(),
                succeeded,
                failed: results.len() - succeeded,
            });
            for result in results {
                latest.insert(result.seq, result);
            }

            let retry: Vec<WorkItem<P>> = batch
                .into_iter()
                .filter(|item| latest.get(&item.seq).is_some_and(ItemResult::is_retryable_failure))
                .collect();

            if retry.is_empty() {
                break;
            }
            if round >= policy.max_batch_rounds {
                warn!(remaining = retry.len(), rounds = round, "batch retry budget exhausted");
                break;
            }
            if self.cancellation().is_cancelled() {
                break;
            }
            if let Some(deadline) = policy.batch_retry_deadline
                && started.elapsed() >= deadline
            {
                warn!(remaining = retry.len(), "batch retry deadline reached, not starting another round");
                break;
            }

            round += 1;
            workers = (workers / 2).max(1);
            let delay = policy.round_backoff(round);
            info!(
                round,
                max_rounds = policy.max_batch_rounds,
                items = retry.len(),
                workers,
                delay_secs = delay.as_secs(),
                "retrying failed items as a new batch"
            );
            if !self.pause(delay).await {
                break;
            }
            batch = retry;
        }

        BatchOutcome {
            results: latest.into_values().collect(),
            rounds,
        }
    }
}
