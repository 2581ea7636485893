use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ItemFailure};

/// One unit of fan-out work, keyed by its position in the narrative order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem<P> {
    /// 1-based ordering key. Unique within a stage and stable across retries.
    pub seq: u32,
    pub payload: P,
}

impl<P> WorkItem<P> {
    pub fn new(seq: u32, payload: P) -> Self {
        Self { seq, payload }
    }
}

/// Outcome of the last attempt made on a work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemResult<A> {
    pub seq: u32,
    pub outcome: Result<A, ItemFailure>,
    /// Item-tier attempts spent in the round that produced this result.
    pub attempts: u32,
}

impl<A> ItemResult<A> {
    pub fn success(seq: u32, artifact: A, attempts: u32) -> Self {
        Self {
            seq,
            outcome: Ok(artifact),
            attempts,
        }
    }

    pub fn failure(seq: u32, failure: ItemFailure, attempts: u32) -> Self {
        Self {
            seq,
            outcome: Err(failure),
            attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn artifact(&self) -> Option<&A> {
        self.outcome.as_ref().ok()
    }

    pub fn failure_ref(&self) -> Option<&ItemFailure> {
        self.outcome.as_ref().err()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.failure_ref().map(|f| f.kind)
    }

    /// Failed with a kind the batch tier may submit again.
    pub fn is_retryable_failure(&self) -> bool {
        self.error_kind().is_some_and(ErrorKind::is_retryable)
    }
}

/// Attempt caps and backoff intervals for both retry tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per item within one executor pass.
    pub max_attempts: u32,
    /// Retry rounds the coordinator may run after the initial pass.
    pub max_batch_rounds: u32,
    /// Per-attempt backoff unit after a `RateLimited` failure.
    pub rate_limit_backoff: Duration,
    /// Per-attempt backoff unit after any other retryable failure.
    pub transient_backoff: Duration,
    /// Per-round cooldown unit before a batch retry round.
    pub round_backoff: Duration,
    /// Wall-clock budget after which no new retry round is started.
    pub batch_retry_deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_batch_rounds: 3,
            rate_limit_backoff: Duration::from_secs(10),
            transient_backoff: Duration::from_secs(5),
            round_backoff: Duration::from_secs(15),
            batch_retry_deadline: None,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following failed attempt number `attempt` (1-based).
    ///
    /// delay = unit(kind) * attempt, where rate limits use the longer unit.
    pub fn item_backoff(&self, kind: ErrorKind, attempt: u32) -> Duration {
        let unit = match kind {
            ErrorKind::RateLimited => self.rate_limit_backoff,
            _ => self.transient_backoff,
        };
        unit.saturating_mul(attempt.max(1))
    }

    /// Cooldown before batch retry round `round` (1-based).
    pub fn round_backoff(&self, round: u32) -> Duration {
        self.round_backoff.saturating_mul(round.max(1))
    }

    /// A zero cap still grants one attempt.
    pub fn attempts_per_item(&self) -> u32 {
        self.max_attempts.max(1)
    }
}
