use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stage::Stage;
use crate::batch::ItemResult;
use crate::error::{ErrorKind, JobError};
use crate::stages::{AudioClip, FailedItem, TextBatch, VideoClip};

/// Immutable inputs of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub text: String,
    /// Voice name or provider voice id.
    pub voice: String,
    /// Images rotated across clips in narrative order.
    pub image_refs: Vec<String>,
    /// Synthesis model selector.
    pub model: String,
    pub skip_formatting: bool,
}

impl JobRequest {
    pub fn validate(&self, max_text_chars: usize) -> Result<(), JobError> {
        if self.text.trim().is_empty() {
            return Err(JobError::InvalidRequest("text must not be empty".into()));
        }
        let chars = self.text.chars().count();
        if chars > max_text_chars {
            return Err(JobError::InvalidRequest(format!(
                "text has {chars} characters, the limit is {max_text_chars}"
            )));
        }
        if self.image_refs.is_empty() {
            return Err(JobError::InvalidRequest("at least one image is required".into()));
        }
        if self.image_refs.iter().any(|r| r.trim().is_empty()) {
            return Err(JobError::InvalidRequest("image references must not be blank".into()));
        }
        Ok(())
    }
}

/// Items a fan-out stage lost without failing the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobWarning {
    pub stage: Stage,
    pub total: usize,
    pub failed: Vec<FailedItem>,
}

impl JobWarning {
    pub fn failed_seqs(&self) -> Vec<u32> {
        self.failed.iter().map(|f| f.seq).collect()
    }

    pub fn counts(&self) -> BTreeMap<ErrorKind, usize> {
        let mut counts = BTreeMap::new();
        for item in &self.failed {
            *counts.entry(item.kind).or_insert(0) += 1;
        }
        counts
    }
}

/// One script-to-video request and everything the pipeline produced for it.
///
/// Only the orchestrator mutates a job. Workers report through return values.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub request: JobRequest,
    pub stage: Stage,
    pub stage_history: Vec<Stage>,
    /// Stage that was active when the job failed.
    pub failed_at: Option<Stage>,
    pub work_dir: PathBuf,
    pub batches: Vec<TextBatch>,
    pub audio: Vec<ItemResult<AudioClip>>,
    pub video: Vec<ItemResult<VideoClip>>,
    pub final_output: Option<PathBuf>,
    pub error: Option<String>,
    pub warnings: Vec<JobWarning>,
    pub progress_message: String,
    pub progress_percent: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Validates `request` and creates a job whose working directory lives
    /// under `work_root`. The directory itself is created when the job runs.
    pub fn create(request: JobRequest, work_root: &Path, max_text_chars: usize) -> Result<Self, JobError> {
        request.validate(max_text_chars)?;
        Ok(Self::new(request, work_root))
    }

    fn new(request: JobRequest, work_root: &Path) -> Self {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        Self {
            work_dir: work_root.join(format!("job_{id}")),
            id,
            request,
            stage: Stage::Created,
            stage_history: Vec::new(),
            failed_at: None,
            batches: Vec::new(),
            audio: Vec::new(),
            video: Vec::new(),
            final_output: None,
            error: None,
            warnings: Vec::new(),
            progress_message: "Job created".to_string(),
            progress_percent: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Moves to `to` if the stage machine allows it.
    pub fn transition(&mut self, to: Stage) -> Result<(), JobError> {
        if !self.stage.can_transition_to(to) {
            return Err(JobError::InvalidTransition {
                from: self.stage,
                to,
            });
        }
        self.stage_history.push(self.stage);
        self.stage = to;
        self.updated_at = Utc::now();
        if to.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
        Ok(())
    }

    /// Records a status message. The percentage is clamped to 0..=100 and
    /// never moves backwards.
    pub fn update_progress(&mut self, message: impl Into<String>, percent: u8) {
        self.progress_message = message.into();
        self.progress_percent = self.progress_percent.max(percent.min(100));
        self.updated_at = Utc::now();
    }

    pub fn complete(&mut self, final_output: PathBuf) -> Result<(), JobError> {
        self.transition(Stage::Completed)?;
        self.final_output = Some(final_output);
        self.update_progress("Completed", 100);
        Ok(())
    }

    /// Moves the job to `Failed`, remembering where it stopped. No-op once the
    /// job is terminal.
    pub fn fail(&mut self, error: &JobError) {
        if self.is_terminal() {
            return;
        }
        let at = self.stage;
        if self.transition(Stage::Failed).is_ok() {
            self.failed_at = Some(at);
            self.error = Some(error.to_string());
            self.progress_message = format!("Failed during {at}");
        }
    }

    pub fn record_warning(&mut self, warning: JobWarning) {
        self.warnings.push(warning);
        self.updated_at = Utc::now();
    }

    pub fn failed_item_count(&self) -> usize {
        self.warnings.iter().map(|w| w.failed.len()).sum()
    }

    /// Human-readable summary of items lost by a job that still completed.
    pub fn warning_summary(&self) -> Option<String> {
        if self.warnings.is_empty() {
            return None;
        }
        let mut counts: BTreeMap<ErrorKind, usize> = BTreeMap::new();
        for warning in &self.warnings {
            for (kind, n) in warning.counts() {
                *counts.entry(kind).or_insert(0) += n;
            }
        }
        let kinds = counts
            .iter()
            .map(|(kind, n)| format!("{kind}: {n}"))
            .collect::<Vec<_>>()
            .join(", ");
        Some(format!(
            "completed with {} failed items of {} batches ({kinds})",
            self.failed_item_count(),
            self.batches.len()
        ))
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot::from_job(self)
    }
}

/// Serializable view of a job, written after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub stage: Stage,
    pub failed_at: Option<Stage>,
    pub voice: String,
    pub model: String,
    pub skip_formatting: bool,
    pub progress_message: String,
    pub progress_percent: u8,
    pub batches: usize,
    pub audio_succeeded: usize,
    pub audio_failed: usize,
    pub video_succeeded: usize,
    pub video_failed: usize,
    pub final_output: Option<PathBuf>,
    pub error: Option<String>,
    pub warnings: Vec<JobWarning>,
    pub warning_summary: Option<String>,
    pub stage_history: Vec<Stage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl JobSnapshot {
    pub fn from_job(job: &Job) -> Self {
        let audio_succeeded = job.audio.iter().filter(|r| r.is_success()).count();
        let video_succeeded = job.video.iter().filter(|r| r.is_success()).count();
        Self {
            job_id: job.id.clone(),
            stage: job.stage,
            failed_at: job.failed_at,
            voice: job.request.voice.clone(),
            model: job.request.model.clone(),
            skip_formatting: job.request.skip_formatting,
            progress_message: job.progress_message.clone(),
            progress_percent: job.progress_percent,
            batches: job.batches.len(),
            audio_succeeded,
            audio_failed: job.audio.len() - audio_succeeded,
            video_succeeded,
            video_failed: job.video.len() - video_succeeded,
            final_output: job.final_output.clone(),
            error: job.error.clone(),
            warnings: job.warnings.clone(),
            warning_summary: job.warning_summary(),
            stage_history: job.stage_history.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
            duration_ms: job
                .completed_at
                .map(|done| (done - job.created_at).num_milliseconds()),
        }
    }
}
