//! Contracts of the external collaborators the pipeline drives.
//!
//! The orchestrator only sees these traits. Concrete clients live in the
//! submodules; tests substitute in-memory stubs.

pub mod ffmpeg;
pub mod formatter;
pub mod lipsync;
pub mod tts;

use std::path::{Path, PathBuf};

use crate::error::ProviderError;
use crate::stages::TextBatch;

pub use ffmpeg::FfmpegConcatenator;
pub use formatter::LlmFormatter;
pub use lipsync::LipsyncClient;
pub use tts::TtsClient;

/// Splits raw script text into ordered batches, possibly reformatting it.
#[allow(async_fn_in_trait)]
pub trait Formatter {
    async fn format(&self, text: &str, work_dir: &Path) -> Result<Vec<TextBatch>, ProviderError>;
}

/// Parameters of one speech synthesis call.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisRequest<'a> {
    pub text: &'a str,
    pub voice_id: &'a str,
    pub model: &'a str,
    pub output: &'a Path,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    pub path: PathBuf,
    pub duration_secs: Option<f64>,
}

#[allow(async_fn_in_trait)]
pub trait Synthesizer {
    /// Maps a human voice selector to the provider's voice id. Called once
    /// per job before fan-out.
    async fn resolve_voice(&self, selector: &str) -> String {
        selector.to_string()
    }

    async fn synthesize(&self, request: SynthesisRequest<'_>) -> Result<SynthesizedAudio, ProviderError>;
}

/// Parameters of one lip-sync rendering call.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub audio: &'a Path,
    pub image: &'a str,
    pub output: &'a Path,
}

#[allow(async_fn_in_trait)]
pub trait Renderer {
    async fn render(&self, request: RenderRequest<'_>) -> Result<PathBuf, ProviderError>;
}

/// Merges clips, in the given order, into one video file.
#[allow(async_fn_in_trait)]
pub trait Concatenator {
    async fn concatenate(&self, clips: &[PathBuf], output: &Path) -> Result<PathBuf, ProviderError>;
}
