use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::StageReport;
use super::segment::TextBatch;
use crate::batch::{BatchExecutor, ItemResult, WorkItem};
use crate::error::{ErrorKind, ItemFailure, JobError, ProviderError};
use crate::providers::{SynthesisRequest, Synthesizer};
use crate::state_machine::Stage;

/// Speech synthesized for one text batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioClip {
    pub seq: u32,
    pub text: String,
    pub path: PathBuf,
    pub duration_secs: Option<f64>,
}

/// Fans text batches out to the synthesis collaborator.
pub struct SynthesisStage<'a, S> {
    synthesizer: &'a S,
    executor: &'a BatchExecutor,
    concurrency: usize,
}

impl<'a, S: Synthesizer> SynthesisStage<'a, S> {
    pub fn new(synthesizer: &'a S, executor: &'a BatchExecutor, concurrency: usize) -> Self {
        Self {
            synthesizer,
            executor,
            concurrency,
        }
    }

    pub async fn run(
        &self,
        batches: &[TextBatch],
        voice: &str,
        model: &str,
        work_dir: &Path,
        observer: Option<&dyn Fn(&ItemResult<AudioClip>)>,
    ) -> Result<StageReport<AudioClip>, JobError> {
        let audio_dir = work_dir.join("audios");
        tokio::fs::create_dir_all(&audio_dir).await?;

        let voice_id = self.synthesizer.resolve_voice(voice).await;
        info!(batches = batches.len(), voice_id = %voice_id, concurrency = self.concurrency, "synthesizing audio");

        let items: Vec<WorkItem<String>> = batches
            .iter()
            .map(|b| WorkItem::new(b.seq, b.text.clone()))
            .collect();

        let synthesizer = self.synthesizer;
        let (voice_id, audio_dir) = (voice_id.as_str(), audio_dir.as_path());
        let op = |item: &WorkItem<String>| {
            let seq = item.seq;
            let text = item.payload.clone();
            let output = audio_dir.join(format!("audio_{seq}.mp3"));
            async move {
                let request = SynthesisRequest {
                    text: &text,
                    voice_id,
                    model,
                    output: &output,
                };
                match synthesizer.synthesize(request).await {
                    Ok(audio) => Ok(AudioClip {
                        seq,
                        path: audio.path,
                        duration_secs: audio.duration_secs,
                        text,
                    }),
                    Err(err) => Err(classify(err)),
                }
            }
        };

        let outcome = self
            .executor
            .run_with_batch_retry(items, self.concurrency, &op, observer)
            .await;
        Ok(StageReport::from_outcome(Stage::GeneratingAudio, outcome))
    }
}

/// An exhausted character quota never recovers within a job, whatever status
/// code the provider wraps it in.
fn classify(err: ProviderError) -> ItemFailure {
    let mut failure = err.into_item_failure();
    if failure.message.to_lowercase().contains("quota_exceeded") {
        failure.kind = ErrorKind::Unauthorized;
    }
    failure
}
