use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::StageReport;
use super::synthesize::AudioClip;
use crate::batch::{BatchExecutor, ItemResult, WorkItem};
use crate::error::JobError;
use crate::providers::{RenderRequest, Renderer};
use crate::state_machine::Stage;

/// Lip-synced clip rendered from one audio clip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoClip {
    pub seq: u32,
    pub path: PathBuf,
    pub audio_path: PathBuf,
    pub image_ref: String,
}

/// Image used for clip `seq`: images rotate in narrative order.
pub fn image_for(seq: u32, images: &[String]) -> Option<&str> {
    if images.is_empty() {
        return None;
    }
    let index = (seq.saturating_sub(1) as usize) % images.len();
    Some(images[index].as_str())
}

pub struct RenderStage<'a, R> {
    renderer: &'a R,
    executor: &'a BatchExecutor,
    concurrency: usize,
}

impl<'a, R: Renderer> RenderStage<'a, R> {
    pub fn new(renderer: &'a R, executor: &'a BatchExecutor, concurrency: usize) -> Self {
        Self {
            renderer,
            executor,
            concurrency,
        }
    }

    /// Renders every clip in `audio`, keeping each clip's sequence number.
    pub async fn run(
        &self,
        audio: &[AudioClip],
        images: &[String],
        work_dir: &Path,
        observer: Option<&dyn Fn(&ItemResult<VideoClip>)>,
    ) -> Result<StageReport<VideoClip>, JobError> {
        if images.is_empty() {
            return Err(JobError::InvalidRequest("no images to render with".into()));
        }
        let video_dir = work_dir.join("videos");
        tokio::fs::create_dir_all(&video_dir).await?;
        info!(clips = audio.len(), concurrency = self.concurrency, "rendering lip-synced video");

        let items: Vec<WorkItem<AudioClip>> = audio
            .iter()
            .map(|clip| WorkItem::new(clip.seq, clip.clone()))
            .collect();

        let renderer = self.renderer;
        let video_dir = video_dir.as_path();
        let op = |item: &WorkItem<AudioClip>| {
            let seq = item.seq;
            let audio_path = item.payload.path.clone();
            let image = image_for(seq, images).unwrap_or_default().to_string();
            let output = video_dir.join(format!("video_{seq}.mp4"));
            async move {
                let request = RenderRequest {
                    audio: &audio_path,
                    image: &image,
                    output: &output,
                };
                renderer
                    .render(request)
                    .await
                    .map(|path| VideoClip {
                        seq,
                        path,
                        audio_path: audio_path.clone(),
                        image_ref: image.clone(),
                    })
                    .map_err(|err| err.into_item_failure())
            }
        };

        let outcome = self
            .executor
            .run_with_batch_retry(items, self.concurrency, &op, observer)
            .await;
        Ok(StageReport::from_outcome(Stage::GeneratingVideo, outcome))
    }
}
