//! Interface de linha de comando do voxreel baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, preview, status)
//! e flags globais (--config, --verbose, --json-logs).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_FILE;

/// voxreel: transforma roteiros em vídeos narrados com lip-sync.
#[derive(Debug, Parser)]
#[command(name = "voxreel", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Habilita saída detalhada (nível debug).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Emite logs em JSON (equivalente a LOG_FORMAT=json).
    #[arg(long, global = true, default_value_t = false)]
    pub json_logs: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Gera um vídeo para cada roteiro do arquivo (separados por `---`).
    Run {
        /// Arquivo de texto com um ou mais roteiros.
        file: PathBuf,

        /// Nome ou id da voz. Padrão: `tts.default_voice` da configuração.
        #[arg(long)]
        voice: Option<String>,

        /// Imagem (caminho ou URL) usada na renderização. Repetível; as
        /// imagens se alternam entre os clipes.
        #[arg(long = "image", required = true)]
        images: Vec<String>,

        /// Modelo de síntese. Padrão: `tts.model` da configuração.
        #[arg(long)]
        model: Option<String>,

        /// Divide o texto localmente em vez de formatá-lo com o LLM.
        #[arg(long, default_value_t = false)]
        skip_formatting: bool,

        /// Falha o job se qualquer item falhar.
        #[arg(long, default_value_t = false)]
        strict: bool,

        #[arg(long)]
        audio_concurrency: Option<usize>,

        #[arg(long)]
        video_concurrency: Option<usize>,
    },

    /// Mostra como o arquivo seria dividido em roteiros e batches.
    Preview {
        file: PathBuf,

        /// Parágrafos por batch (1 a 10).
        #[arg(long, default_value_t = 3)]
        batch_size: usize,
    },

    /// Mostra o estado salvo de um job.
    Status {
        /// Diretório do job (`job_<id>`) ou o seu `state.json`.
        job_dir: PathBuf,
    },
}
