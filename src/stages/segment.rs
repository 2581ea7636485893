use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::JobError;
use crate::providers::Formatter;

/// One ordered chunk of script text, the unit of speech synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextBatch {
    pub seq: u32,
    pub text: String,
}

impl TextBatch {
    pub fn new(seq: u32, text: impl Into<String>) -> Self {
        Self {
            seq,
            text: text.into(),
        }
    }
}

/// Splits text on blank lines. Lines inside a paragraph are trimmed and kept.
pub fn split_into_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }
    paragraphs
}

/// Groups paragraphs into batches of `batch_size`, numbered from 1.
pub fn create_batches(paragraphs: &[String], batch_size: usize) -> Vec<TextBatch> {
    paragraphs
        .chunks(batch_size.max(1))
        .enumerate()
        .map(|(i, chunk)| TextBatch::new(i as u32 + 1, chunk.join("\n\n")))
        .collect()
}

/// Splits a multi-script file on lines consisting of `---`.
pub fn split_scripts(text: &str) -> Vec<String> {
    let mut scripts = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.trim() == "---" {
            if !current.trim().is_empty() {
                scripts.push(current.trim().to_string());
            }
            current.clear();
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    if !current.trim().is_empty() {
        scripts.push(current.trim().to_string());
    }
    scripts
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptPreview {
    pub index: usize,
    pub chars: usize,
    pub paragraphs: usize,
    pub batches: Vec<TextBatch>,
    /// Sequential processing time at `secs_per_batch`.
    pub estimated_secs: u64,
}

/// Shows how each script of a file would be batched without formatting.
pub fn preview_scripts(text: &str, batch_size: usize, secs_per_batch: u64) -> Vec<ScriptPreview> {
    let batch_size = batch_size.clamp(1, 10);
    split_scripts(text)
        .iter()
        .enumerate()
        .map(|(i, script)| {
            let paragraphs = split_into_paragraphs(script);
            let batches = create_batches(&paragraphs, batch_size);
            ScriptPreview {
                index: i + 1,
                chars: script.chars().count(),
                paragraphs: paragraphs.len(),
                estimated_secs: batches.len() as u64 * secs_per_batch,
                batches,
            }
        })
        .collect()
}

/// Text segmentation stage. Not fanned out: one formatter call or one local
/// split, and any failure is fatal to the job.
pub struct TextSegmenter<'a, F> {
    formatter: &'a F,
    batch_size: usize,
}

impl<'a, F: Formatter> TextSegmenter<'a, F> {
    pub fn new(formatter: &'a F, batch_size: usize) -> Self {
        Self {
            formatter,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn segment(&self, text: &str, work_dir: &Path, skip_formatting: bool) -> Result<Vec<TextBatch>, JobError> {
        let batches = if skip_formatting {
            create_batches(&split_into_paragraphs(text), self.batch_size)
        } else {
            let formatted = self
                .formatter
                .format(text, work_dir)
                .await
                .map_err(|e| JobError::SegmentationFailure(e.to_string()))?;
            normalize(formatted)?
        };

        if batches.is_empty() {
            return Err(JobError::SegmentationFailure("no text batches were produced".into()));
        }
        info!(batches = batches.len(), skip_formatting, "text segmented");
        Ok(batches)
    }
}

/// Drops blank batches, orders by sequence number and rejects duplicates.
fn normalize(mut batches: Vec<TextBatch>) -> Result<Vec<TextBatch>, JobError> {
    batches.retain(|b| !b.text.trim().is_empty());
    batches.sort_by_key(|b| b.seq);
    let mut seen = BTreeSet::new();
    for batch in &batches {
        if !seen.insert(batch.seq) {
            return Err(JobError::SegmentationFailure(format!(
                "formatter returned batch {} twice",
                batch.seq
            )));
        }
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;

    struct StubFormatter(Result<Vec<TextBatch>, String>);

    impl Formatter for StubFormatter {
        async fn format(&self, _text: &str, _work_dir: &Path) -> Result<Vec<TextBatch>, ProviderError> {
            self.0.clone().map_err(ProviderError::message)
        }
    }

    fn never_called() -> StubFormatter {
        StubFormatter(Err("formatter must not be called".into()))
    }

    #[test]
    fn paragraphs_split_on_blank_lines() {
        let text = "  A.\n\n\nB line one\n  B line two  \n   \nC.";
        assert_eq!(
            split_into_paragraphs(text),
            vec!["A.", "B line one\nB line two", "C."]
        );
    }

    #[test]
    fn batches_group_paragraphs() {
        let paragraphs: Vec<String> = ["p1", "p2", "p3", "p4", "p5"].map(String::from).to_vec();
        let batches = create_batches(&paragraphs, 2);
        assert_eq!(
            batches,
            vec![
                TextBatch::new(1, "p1\n\np2"),
                TextBatch::new(2, "p3\n\np4"),
                TextBatch::new(3, "p5"),
            ]
        );
    }

    #[test]
    fn zero_batch_size_means_one_paragraph_per_batch() {
        let paragraphs: Vec<String> = ["a", "b"].map(String::from).to_vec();
        assert_eq!(create_batches(&paragraphs, 0).len(), 2);
    }

    #[test]
    fn scripts_split_on_separator_lines() {
        let text = "First script.\n\nMore.\n---\nSecond.\n  ---  \n\n---\n";
        assert_eq!(split_scripts(text), vec!["First script.\n\nMore.", "Second."]);
    }

    #[test]
    fn preview_clamps_batch_size() {
        let text = "a\n\nb\n\nc\n---\nd";
        let previews = preview_scripts(text, 50, 60);
        assert_eq!(previews.len(), 2);
        assert_eq!(previews[0].paragraphs, 3);
        assert_eq!(previews[0].batches.len(), 1);
        assert_eq!(previews[1].index, 2);
        assert_eq!(previews[1].chars, 1);
    }

    #[test]
    fn preview_estimates_time_per_batch() {
        let text = "a\n\nb\n\nc\n\nd\n---\ne";
        let previews = preview_scripts(text, 2, 45);
        assert_eq!(previews[0].batches.len(), 2);
        assert_eq!(previews[0].estimated_secs, 90);
        assert_eq!(previews[1].estimated_secs, 45);
    }

    #[tokio::test]
    async fn skip_formatting_splits_locally() {
        let formatter = never_called();
        let segmenter = TextSegmenter::new(&formatter, 1);
        let batches = segmenter
            .segment("A.\n\nB.\n\nC.", Path::new("."), true)
            .await
            .unwrap();
        assert_eq!(
            batches,
            vec![TextBatch::new(1, "A."), TextBatch::new(2, "B."), TextBatch::new(3, "C.")]
        );
    }

    #[tokio::test]
    async fn formatter_output_is_ordered_and_cleaned() {
        let formatter = StubFormatter(Ok(vec![
            TextBatch::new(2, "second"),
            TextBatch::new(3, "  "),
            TextBatch::new(1, "first"),
        ]));
        let segmenter = TextSegmenter::new(&formatter, 3);
        let batches = segmenter.segment("ignored", Path::new("."), false).await.unwrap();
        assert_eq!(batches, vec![TextBatch::new(1, "first"), TextBatch::new(2, "second")]);
    }

    #[tokio::test]
    async fn formatter_failure_is_fatal() {
        let formatter = StubFormatter(Err("model overloaded".into()));
        let segmenter = TextSegmenter::new(&formatter, 3);
        let err = segmenter.segment("text", Path::new("."), false).await.unwrap_err();
        assert!(matches!(err, JobError::SegmentationFailure(msg) if msg.contains("overloaded")));
    }

    #[tokio::test]
    async fn duplicate_sequence_numbers_are_rejected() {
        let formatter = StubFormatter(Ok(vec![TextBatch::new(1, "a"), TextBatch::new(1, "b")]));
        let segmenter = TextSegmenter::new(&formatter, 3);
        assert!(segmenter.segment("text", Path::new("."), false).await.is_err());
    }

    #[tokio::test]
    async fn empty_split_is_a_segmentation_failure() {
        let formatter = StubFormatter(Ok(Vec::new()));
        let segmenter = TextSegmenter::new(&formatter, 3);
        let err = segmenter.segment("text", Path::new("."), false).await.unwrap_err();
        assert!(matches!(err, JobError::SegmentationFailure(_)));
    }
}
