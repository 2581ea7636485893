//! Drives one job through every stage of the pipeline.
//!
//! The orchestrator is the only writer of a [`Job`]. Stages run one after
//! another; parallelism exists only inside a fan-out stage.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::batch::{BatchExecutor, ItemResult, RetryPolicy};
use crate::error::JobError;
use crate::providers::{Concatenator, Formatter, Renderer, Synthesizer};
use crate::stages::{AudioClip, RenderStage, StageReport, SynthesisStage, TextSegmenter, VideoClip};
use crate::state_machine::{Job, JobRequest, JobSnapshot, JobWarning, Stage};

/// Receives human-readable status updates. Advisory only.
pub trait ProgressSink {
    fn notify(&self, message: &str, percent: u8);
}

impl ProgressSink for () {
    fn notify(&self, _message: &str, _percent: u8) {}
}

/// Stores the latest state of a job for outside observers.
pub trait SnapshotSink {
    fn persist(&self, snapshot: &JobSnapshot) -> std::io::Result<()>;
}

impl SnapshotSink for () {
    fn persist(&self, _snapshot: &JobSnapshot) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub work_root: PathBuf,
    pub batch_size: usize,
    pub audio_concurrency: usize,
    pub video_concurrency: usize,
    pub allow_partial_success: bool,
    pub max_text_chars: usize,
    pub retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            work_root: PathBuf::from("./work"),
            batch_size: 3,
            audio_concurrency: 3,
            video_concurrency: 3,
            allow_partial_success: true,
            max_text_chars: 100_000,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct Pipeline<F, S, R, C> {
    formatter: F,
    synthesizer: S,
    renderer: R,
    concatenator: C,
    settings: PipelineSettings,
    executor: BatchExecutor,
    progress: Arc<dyn ProgressSink>,
    snapshots: Arc<dyn SnapshotSink>,
}

impl<F, S, R, C> Pipeline<F, S, R, C>
where
    F: Formatter,
    S: Synthesizer,
    R: Renderer,
    C: Concatenator,
{
    pub fn new(formatter: F, synthesizer: S, renderer: R, concatenator: C, settings: PipelineSettings) -> Self {
        let executor = BatchExecutor::new(settings.retry.clone());
        Self {
            formatter,
            synthesizer,
            renderer,
            concatenator,
            settings,
            executor,
            progress: Arc::new(()),
            snapshots: Arc::new(()),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_snapshots(mut self, snapshots: Arc<dyn SnapshotSink>) -> Self {
        self.snapshots = snapshots;
        self
    }

    /// Fan-out stages stop scheduling new attempts once `cancel` fires; the
    /// job then fails with [`JobError::Cancelled`].
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.executor = self.executor.with_cancellation(cancel);
        self
    }

    pub fn create_job(&self, request: JobRequest) -> Result<Job, JobError> {
        Job::create(request, &self.settings.work_root, self.settings.max_text_chars)
    }

    /// Runs `job` to a terminal stage and returns the final video path.
    ///
    /// On error the job is already marked `Failed`, with the stage it stopped
    /// at and the error message recorded.
    pub async fn run_job(&self, job: &mut Job) -> Result<PathBuf, JobError> {
        info!(job_id = %job.id, batch_size = self.settings.batch_size, "job started");
        match self.drive(job).await {
            Ok(output) => {
                match job.warning_summary() {
                    Some(summary) => warn!(job_id = %job.id, "{summary}"),
                    None => info!(job_id = %job.id, output = %output.display(), "job completed"),
                }
                Ok(output)
            }
            Err(err) => {
                error!(job_id = %job.id, stage = %job.stage, error = %err, "job failed");
                job.fail(&err);
                self.progress.notify(&job.progress_message, job.progress_percent);
                self.checkpoint(job);
                Err(err)
            }
        }
    }

    async fn drive(&self, job: &mut Job) -> Result<PathBuf, JobError> {
        tokio::fs::create_dir_all(&job.work_dir).await?;
        self.checkpoint(job);

        // Segmentation
        self.enter(job, Stage::ProcessingText, "Processing text")?;
        let segmenter = TextSegmenter::new(&self.formatter, self.settings.batch_size);
        job.batches = segmenter
            .segment(&job.request.text, &job.work_dir, job.request.skip_formatting)
            .await?;
        let message = if job.request.skip_formatting {
            format!("Text split into {} batches (not formatted)", job.batches.len())
        } else {
            format!("Text formatted into {} batches", job.batches.len())
        };
        self.report(job, message, Stage::ProcessingText.exit_percent());

        // Synthesis
        self.enter(job, Stage::GeneratingAudio, "Generating audio")?;
        let done = Cell::new(0);
        let total = job.batches.len();
        let observe_audio = |_: &ItemResult<AudioClip>| self.item_progress(Stage::GeneratingAudio, "audio", &done, total);
        let synthesis = SynthesisStage::new(&self.synthesizer, &self.executor, self.settings.audio_concurrency);
        let report = synthesis
            .run(
                &job.batches,
                &job.request.voice,
                &job.request.model,
                &job.work_dir,
                Some(&observe_audio),
            )
            .await?;
        job.audio = report.results.clone();
        self.ensure_active(job)?;
        self.settle(job, &report)?;
        let clips: Vec<AudioClip> = report.succeeded().cloned().collect();
        self.report(
            job,
            format!("Generated {}/{} audio clips", clips.len(), report.total()),
            Stage::GeneratingAudio.exit_percent(),
        );

        // Rendering
        self.enter(job, Stage::GeneratingVideo, "Generating video")?;
        let done = Cell::new(0);
        let total = clips.len();
        let observe_video = |_: &ItemResult<VideoClip>| self.item_progress(Stage::GeneratingVideo, "video", &done, total);
        let render = RenderStage::new(&self.renderer, &self.executor, self.settings.video_concurrency);
        let report = render
            .run(&clips, &job.request.image_refs, &job.work_dir, Some(&observe_video))
            .await?;
        job.video = report.results.clone();
        self.ensure_active(job)?;
        self.settle(job, &report)?;
        let mut videos: Vec<_> = report.succeeded().collect();
        videos.sort_by_key(|v| v.seq);
        let paths: Vec<PathBuf> = videos.iter().map(|v| v.path.clone()).collect();
        self.report(
            job,
            format!("Rendered {}/{} video clips", paths.len(), report.total()),
            Stage::GeneratingVideo.exit_percent(),
        );

        // Concatenation
        self.enter(job, Stage::Concatenating, "Concatenating clips")?;
        if paths.is_empty() {
            return Err(JobError::ConcatenationFailure("no video clips to concatenate".into()));
        }
        let output = final_output_path(&job.work_dir);
        let output = self
            .concatenator
            .concatenate(&paths, &output)
            .await
            .map_err(|e| JobError::ConcatenationFailure(e.to_string()))?;
        self.report(job, format!("Joined {} clips", paths.len()), Stage::Concatenating.exit_percent());

        job.complete(output.clone())?;
        self.progress.notify(&job.progress_message, job.progress_percent);
        self.checkpoint(job);
        Ok(output)
    }

    fn enter(&self, job: &mut Job, stage: Stage, message: &str) -> Result<(), JobError> {
        self.ensure_active(job)?;
        job.transition(stage)?;
        self.report(job, message, stage.entry_percent());
        Ok(())
    }

    fn ensure_active(&self, job: &Job) -> Result<(), JobError> {
        if self.executor.cancellation().is_cancelled() {
            return Err(JobError::Cancelled { stage: job.stage });
        }
        Ok(())
    }

    fn report(&self, job: &mut Job, message: impl Into<String>, percent: u8) {
        job.update_progress(message, percent);
        self.progress.notify(&job.progress_message, job.progress_percent);
        self.checkpoint(job);
    }

    /// Interpolates between the stage's checkpoints as items finish. Items
    /// re-run in retry rounds do not push past the exit checkpoint.
    fn item_progress(&self, stage: Stage, noun: &str, done: &Cell<usize>, total: usize) {
        let finished = (done.get() + 1).min(total.max(1));
        done.set(finished);
        let (from, to) = (stage.entry_percent() as usize, stage.exit_percent() as usize);
        let percent = from + (to - from) * finished / total.max(1);
        self.progress
            .notify(&format!("Generating {noun} {finished}/{total}"), percent as u8);
    }

    /// Applies the partial-success policy to a finished fan-out stage.
    fn settle<A>(&self, job: &mut Job, report: &StageReport<A>) -> Result<(), JobError> {
        info!(
            job_id = %job.id,
            stage = %report.stage,
            succeeded = report.success_count(),
            total = report.total(),
            retry_rounds = report.retry_rounds,
            "stage finished"
        );
        let failed = report.failures();
        if failed.is_empty() {
            return Ok(());
        }
        let summary = report.kind_summary();
        if failed.len() == report.total() {
            return Err(JobError::AllItemsFailed {
                stage: report.stage,
                failed: failed.len(),
                summary,
            });
        }
        if !self.settings.allow_partial_success {
            return Err(JobError::PartialFailureRejected {
                stage: report.stage,
                failed: failed.len(),
                total: report.total(),
                summary,
            });
        }
        let warning = JobWarning {
            stage: report.stage,
            total: report.total(),
            failed,
        };
        warn!(
            job_id = %job.id,
            stage = %report.stage,
            seqs = ?warning.failed_seqs(),
            total = report.total(),
            kinds = %summary,
            "continuing with the items that succeeded"
        );
        job.record_warning(warning);
        self.checkpoint(job);
        Ok(())
    }

    fn checkpoint(&self, job: &Job) {
        if let Err(e) = self.snapshots.persist(&job.snapshot()) {
            warn!(job_id = %job.id, error = %e, "failed to persist job snapshot");
        }
    }
}

pub fn final_output_path(work_dir: &Path) -> PathBuf {
    work_dir.join("final_output.mp4")
}
