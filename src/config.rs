//! Configuração do voxreel carregada a partir de `voxreel.toml`.
//!
//! A struct [`VoxreelConfig`] contém todos os parâmetros configuráveis,
//! agrupados por seção. Valores não presentes no arquivo usam defaults
//! sensíveis. As variáveis de ambiente `TTS_API_KEY`, `LIPSYNC_API_KEY` e
//! `ANTHROPIC_API_KEY` têm precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::batch::RetryPolicy;
use crate::orchestrator::PipelineSettings;
use crate::providers::tts::DEFAULT_TTS_URL;

pub const DEFAULT_CONFIG_FILE: &str = "voxreel.toml";

/// Configuração de nível superior carregada de `voxreel.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VoxreelConfig {
    pub pipeline: PipelineConfig,
    pub tts: TtsConfig,
    pub lipsync: LipsyncConfig,
    pub formatter: FormatterConfig,
    pub ffmpeg: FfmpegConfig,
    pub logging: LoggingConfig,
}

/// Concorrência, retentativas e limites do pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Diretório raiz onde cada job cria `job_<id>/`.
    pub work_dir: PathBuf,
    /// Parágrafos por batch quando a formatação é pulada.
    pub batch_size: usize,
    pub audio_concurrency: usize,
    pub video_concurrency: usize,
    /// Tentativas por item dentro de uma rodada.
    pub max_item_attempts: u32,
    /// Rodadas extras para itens que continuam falhando.
    pub max_batch_rounds: u32,
    pub allow_partial_success: bool,
    pub rate_limit_backoff_secs: u64,
    pub transient_backoff_secs: u64,
    pub round_backoff_secs: u64,
    /// Nenhuma rodada nova começa depois deste prazo. Sem limite se ausente.
    pub batch_retry_deadline_secs: Option<u64>,
    pub max_text_chars: usize,
    /// Segundos estimados por batch (áudio + vídeo) no `preview`.
    pub estimate_secs_per_batch: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("./work"),
            batch_size: 3,
            audio_concurrency: 3,
            video_concurrency: 3,
            max_item_attempts: 3,
            max_batch_rounds: 3,
            allow_partial_success: true,
            rate_limit_backoff_secs: 10,
            transient_backoff_secs: 5,
            round_backoff_secs: 15,
            batch_retry_deadline_secs: None,
            max_text_chars: 100_000,
            estimate_secs_per_batch: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub api_key: String,
    pub base_url: String,
    pub default_voice: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_TTS_URL.to_string(),
            default_voice: "Rachel".to_string(),
            model: "eleven_multilingual_v2".to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LipsyncConfig {
    pub api_key: String,
    pub base_url: String,
    /// A renderização é lenta; o timeout padrão é generoso.
    pub timeout_secs: u64,
}

impl Default for LipsyncConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "http://localhost:8000".to_string(),
            timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FormatterConfig {
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "claude-sonnet-4-5-20250929".to_string(),
            max_tokens: 8192,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FfmpegConfig {
    pub binary: String,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Entradas mantidas no histórico em memória.
    pub buffer_capacity: usize,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: crate::logbuf::DEFAULT_CAPACITY,
            json: false,
        }
    }
}

impl VoxreelConfig {
    /// Carrega a configuração de `path`. Usa valores padrão se o arquivo não
    /// existir; variáveis de ambiente são aplicadas por cima.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<VoxreelConfig>(&contents).with_context(|| format!("invalid config {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Chaves não vazias vindas de `lookup` substituem as do arquivo.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let targets = [
            ("TTS_API_KEY", &mut self.tts.api_key),
            ("LIPSYNC_API_KEY", &mut self.lipsync.api_key),
            ("ANTHROPIC_API_KEY", &mut self.formatter.api_key),
        ];
        for (var, slot) in targets {
            if let Some(value) = lookup(var)
                && !value.is_empty()
            {
                *slot = value;
            }
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let p = &self.pipeline;
        RetryPolicy {
            max_attempts: p.max_item_attempts,
            max_batch_rounds: p.max_batch_rounds,
            rate_limit_backoff: Duration::from_secs(p.rate_limit_backoff_secs),
            transient_backoff: Duration::from_secs(p.transient_backoff_secs),
            round_backoff: Duration::from_secs(p.round_backoff_secs),
            batch_retry_deadline: p.batch_retry_deadline_secs.map(Duration::from_secs),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        let p = &self.pipeline;
        PipelineSettings {
            work_root: p.work_dir.clone(),
            batch_size: p.batch_size,
            audio_concurrency: p.audio_concurrency,
            video_concurrency: p.video_concurrency,
            allow_partial_success: p.allow_partial_success,
            max_text_chars: p.max_text_chars,
            retry: self.retry_policy(),
        }
    }
}
