//! Stage adapters: map a collaborator's call contract onto work items and
//! fold the batch results back into stage artifacts.

mod render;
mod segment;
mod synthesize;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::batch::{BatchOutcome, ItemResult};
use crate::error::ErrorKind;
use crate::state_machine::Stage;

pub use render::{RenderStage, VideoClip, image_for};
pub use segment::{ScriptPreview, TextBatch, TextSegmenter, preview_scripts, split_scripts};
pub use synthesize::{AudioClip, SynthesisStage};

/// A work item that was still failing after every retry tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub seq: u32,
    pub kind: ErrorKind,
    pub message: String,
}

/// Results of one fan-out stage, ascending by sequence number.
#[derive(Debug, Clone)]
pub struct StageReport<A> {
    pub stage: Stage,
    pub results: Vec<ItemResult<A>>,
    /// Batch retry rounds run after the initial pass.
    pub retry_rounds: usize,
}

impl<A> StageReport<A> {
    pub fn from_outcome(stage: Stage, outcome: BatchOutcome<A>) -> Self {
        let retry_rounds = outcome.retry_rounds();
        let mut results = outcome.results;
        results.sort_by_key(|r| r.seq);
        Self {
            stage,
            results,
            retry_rounds,
        }
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &A> {
        self.results.iter().filter_map(ItemResult::artifact)
    }

    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failures(&self) -> Vec<FailedItem> {
        self.results
            .iter()
            .filter_map(|r| {
                r.failure_ref().map(|f| FailedItem {
                    seq: r.seq,
                    kind: f.kind,
                    message: f.message.clone(),
                })
            })
            .collect()
    }

    /// "ServerError: 2, Unauthorized: 1"
    pub fn kind_summary(&self) -> String {
        let mut counts: BTreeMap<ErrorKind, usize> = BTreeMap::new();
        for kind in self.results.iter().filter_map(ItemResult::error_kind) {
            *counts.entry(kind).or_insert(0) += 1;
        }
        counts
            .iter()
            .map(|(kind, n)| format!("{kind}: {n}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ItemFailure;

    fn report() -> StageReport<&'static str> {
        StageReport::from_outcome(
            Stage::GeneratingAudio,
            BatchOutcome {
                results: vec![
                    ItemResult::failure(3, ItemFailure::new(ErrorKind::Timeout, "slow"), 3),
                    ItemResult::success(1, "a.mp3", 1),
                    ItemResult::failure(2, ItemFailure::new(ErrorKind::Unauthorized, "401"), 1),
                    ItemResult::failure(4, ItemFailure::new(ErrorKind::Timeout, "slow"), 3),
                ],
                rounds: Vec::new(),
            },
        )
    }

    #[test]
    fn results_are_resorted_by_sequence() {
        let seqs: Vec<u32> = report().results.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
    }

    #[test]
    fn counts_and_failures() {
        let report = report();
        assert_eq!(report.total(), 4);
        assert_eq!(report.success_count(), 1);
        assert_eq!(report.retry_rounds, 0);
        assert_eq!(report.succeeded().copied().collect::<Vec<_>>(), vec!["a.mp3"]);
        let failed: Vec<u32> = report.failures().iter().map(|f| f.seq).collect();
        assert_eq!(failed, vec![2, 3, 4]);
    }

    #[test]
    fn kind_summary_is_stable() {
        assert_eq!(report().kind_summary(), "Unauthorized: 1, Timeout: 2");
    }
}
