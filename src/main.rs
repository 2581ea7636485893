mod anthropic;
mod batch;
mod cli;
mod config;
mod error;
mod logbuf;
mod orchestrator;
mod providers;
mod snapshot;
mod stages;
mod state_machine;
mod ui;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail, ensure};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use anthropic::AnthropicClient;
use cli::{Cli, Command};
use config::VoxreelConfig;
use logbuf::LogBuffer;
use orchestrator::Pipeline;
use providers::{FfmpegConcatenator, LipsyncClient, LlmFormatter, TtsClient};
use snapshot::JsonSnapshotStore;
use state_machine::{JobRequest, Stage};
use ui::TerminalProgress;

/// Options of one `voxreel run` invocation.
struct RunOptions {
    file: PathBuf,
    voice: Option<String>,
    images: Vec<String>,
    model: Option<String>,
    skip_formatting: bool,
    strict: bool,
    audio_concurrency: Option<usize>,
    video_concurrency: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = VoxreelConfig::load(&cli.config)?;
    let logs = init_tracing(&cli, &config);

    match cli.command {
        Command::Run {
            file,
            voice,
            images,
            model,
            skip_formatting,
            strict,
            audio_concurrency,
            video_concurrency,
        } => {
            let options = RunOptions {
                file,
                voice,
                images,
                model,
                skip_formatting,
                strict,
                audio_concurrency,
                video_concurrency,
            };
            run_scripts(config, options, &logs).await
        }
        Command::Preview { file, batch_size } => {
            let text = std::fs::read_to_string(&file).with_context(|| format!("failed to read {}", file.display()))?;
            ui::print_previews(&stages::preview_scripts(
                &text,
                batch_size,
                config.pipeline.estimate_secs_per_batch,
            ));
            Ok(())
        }
        Command::Status { job_dir } => {
            let snapshot =
                snapshot::load(&job_dir).with_context(|| format!("no job state found at {}", job_dir.display()))?;
            ui::print_status(&snapshot);
            Ok(())
        }
    }
}

/// Human-readable logs by default, JSON with `--json-logs`, `logging.json`
/// or `LOG_FORMAT=json`. Every event is also kept in the returned buffer.
fn init_tracing(cli: &Cli, config: &VoxreelConfig) -> LogBuffer {
    let use_json = cli.json_logs
        || config.logging.json
        || std::env::var("LOG_FORMAT")
            .map(|v| v.to_lowercase() == "json")
            .unwrap_or(false);
    let default_level = if cli.verbose { "voxreel=debug" } else { "voxreel=info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let logs = LogBuffer::new(config.logging.buffer_capacity);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(logs.clone())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .with(logs.clone())
            .with(env_filter)
            .init();
    }
    logs
}

async fn run_scripts(config: VoxreelConfig, options: RunOptions, logs: &LogBuffer) -> Result<()> {
    let text = std::fs::read_to_string(&options.file)
        .with_context(|| format!("failed to read {}", options.file.display()))?;
    let scripts = stages::split_scripts(&text);
    ensure!(!scripts.is_empty(), "{} contains no script text", options.file.display());
    ensure!(!config.tts.api_key.is_empty(), "TTS_API_KEY is not set");
    if !options.skip_formatting {
        ensure!(
            !config.formatter.api_key.is_empty(),
            "ANTHROPIC_API_KEY is not set (use --skip-formatting to split text locally)"
        );
    }

    let mut settings = config.pipeline_settings();
    if options.strict {
        settings.allow_partial_success = false;
    }
    if let Some(n) = options.audio_concurrency {
        settings.audio_concurrency = n;
    }
    if let Some(n) = options.video_concurrency {
        settings.video_concurrency = n;
    }

    let formatter = LlmFormatter::new(
        AnthropicClient::new(config.formatter.api_key.clone())?,
        config.formatter.model.clone(),
        config.formatter.max_tokens,
        settings.batch_size,
    );
    let synthesizer = TtsClient::new(
        config.tts.api_key.clone(),
        config.tts.base_url.clone(),
        Duration::from_secs(config.tts.timeout_secs),
    )?;
    let renderer = LipsyncClient::new(
        config.lipsync.api_key.clone(),
        config.lipsync.base_url.clone(),
        Duration::from_secs(config.lipsync.timeout_secs),
    )?;
    let concatenator = FfmpegConcatenator::new(config.ffmpeg.binary.clone());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after in-flight requests");
            on_signal.cancel();
        }
    });

    let progress = Arc::new(TerminalProgress::default());
    let store = Arc::new(JsonSnapshotStore::new(settings.work_root.clone()));
    let pipeline = Pipeline::new(formatter, synthesizer, renderer, concatenator, settings)
        .with_progress(progress.clone())
        .with_snapshots(store)
        .with_cancellation(cancel.clone());

    let voice = options.voice.unwrap_or_else(|| config.tts.default_voice.clone());
    let model = options.model.unwrap_or_else(|| config.tts.model.clone());
    let total = scripts.len();
    let mut failed = 0;

    for (index, script) in scripts.into_iter().enumerate() {
        let label = format!("script {}/{total}", index + 1);
        if cancel.is_cancelled() {
            warn!(script = index + 1, "skipping remaining scripts after interrupt");
            failed += total - index;
            break;
        }
        logs.clear();

        let request = JobRequest {
            text: script,
            voice: voice.clone(),
            image_refs: options.images.clone(),
            model: model.clone(),
            skip_formatting: options.skip_formatting,
        };
        let mut job = match pipeline.create_job(request) {
            Ok(job) => job,
            Err(e) => {
                progress.reject(&label, &e);
                failed += 1;
                continue;
            }
        };

        progress.begin(&label);
        let result = pipeline.run_job(&mut job).await;
        let snapshot = job.snapshot();
        progress.finish(&snapshot);
        if result.is_err() || snapshot.stage == Stage::Failed {
            failed += 1;
            ui::print_log_entries(&logs.recent(20, Level::WARN));
        }
        info!(job_id = %job.id, work_dir = %job.work_dir.display(), "job state saved");
    }

    if failed == total {
        bail!("all {total} scripts failed");
    }
    Ok(())
}
