use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{SynthesisRequest, SynthesizedAudio, Synthesizer};
use crate::error::ProviderError;

pub const DEFAULT_TTS_URL: &str = "https://api.elevenlabs.io";

#[derive(Debug, Clone, Deserialize)]
pub struct Voice {
    pub voice_id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct VoiceList {
    voices: Vec<Voice>,
}

#[derive(Debug, Serialize)]
struct SpeechBody<'a> {
    text: &'a str,
    model_id: &'a str,
}

/// HTTP text-to-speech client. Writes the returned audio bytes to the
/// requested output path.
pub struct TtsClient {
    api_key: String,
    client: Client,
    base_url: String,
}

impl TtsClient {
    pub fn new(api_key: String, base_url: String, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            api_key,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn list_voices(&self) -> Result<Vec<Voice>, ProviderError> {
        let response = self
            .client
            .get(format!("{}/v1/voices", self.base_url))
            .header("xi-api-key", &self.api_key)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<VoiceList>().await?.voices)
    }
}

impl Synthesizer for TtsClient {
    async fn resolve_voice(&self, selector: &str) -> String {
        match self.list_voices().await {
            Ok(voices) => pick_voice(&voices, selector),
            Err(e) => {
                warn!(voice = selector, error = %e, "could not list voices, using selector as voice id");
                selector.to_string()
            }
        }
    }

    async fn synthesize(&self, request: SynthesisRequest<'_>) -> Result<SynthesizedAudio, ProviderError> {
        let response = self
            .client
            .post(format!("{}/v1/text-to-speech/{}", self.base_url, request.voice_id))
            .header("xi-api-key", &self.api_key)
            .header("accept", "audio/mpeg")
            .json(&SpeechBody {
                text: request.text,
                model_id: request.model,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(ProviderError::message("speech provider returned an empty body"));
        }
        tokio::fs::write(request.output, &bytes).await?;
        debug!(path = %request.output.display(), bytes = bytes.len(), "audio written");
        Ok(SynthesizedAudio {
            path: request.output.to_path_buf(),
            duration_secs: None,
        })
    }
}

/// Case-insensitive match on name, then on id. Falls back to the first
/// available voice, or to the selector itself when there are none.
fn pick_voice(voices: &[Voice], selector: &str) -> String {
    if let Some(voice) = voices
        .iter()
        .find(|v| v.name.eq_ignore_ascii_case(selector) || v.voice_id == selector)
    {
        return voice.voice_id.clone();
    }
    match voices.first() {
        Some(first) => {
            warn!(requested = selector, using = %first.name, "voice not found, using first available voice");
            first.voice_id.clone()
        }
        None => selector.to_string(),
    }
}
