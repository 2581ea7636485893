use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info};

use super::Concatenator;
use crate::error::ProviderError;

/// Joins clips with the ffmpeg concat demuxer, copying streams without
/// re-encoding.
pub struct FfmpegConcatenator {
    binary: String,
}

impl Default for FfmpegConcatenator {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegConcatenator {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

/// Body of a concat demuxer list file, one `file` directive per clip.
pub fn concat_list(clips: &[PathBuf]) -> String {
    let mut body = String::new();
    for path in clips {
        body.push_str("file '");
        body.push_str(&path.to_string_lossy().replace('\'', r"'\''"));
        body.push_str("'\n");
    }
    body
}

impl Concatenator for FfmpegConcatenator {
    async fn concatenate(&self, clips: &[PathBuf], output: &Path) -> Result<PathBuf, ProviderError> {
        if clips.is_empty() {
            return Err(ProviderError::message("no clips to concatenate"));
        }

        let list_path = output.with_extension("concat.txt");
        tokio::fs::write(&list_path, concat_list(clips)).await?;
        debug!(list = %list_path.display(), clips = clips.len(), "concat list written");

        let result = Command::new(&self.binary)
            .arg("-y")
            .args(["-f", "concat", "-safe", "0", "-i"])
            .arg(&list_path)
            .args(["-c", "copy"])
            .arg(output)
            .output()
            .await;
        let _ = tokio::fs::remove_file(&list_path).await;
        let result = result?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            return Err(ProviderError::message(format!(
                "ffmpeg exited with {}: {}",
                result.status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            )));
        }

        info!(output = %output.display(), clips = clips.len(), "clips concatenated");
        Ok(output.to_path_buf())
    }
}
