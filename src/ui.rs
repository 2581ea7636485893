//! Interface de terminal do voxreel: barra de progresso e saída colorida.
//!
//! Usa `indicatif` para a barra de progresso e `console` para estilização
//! com cores. O [`TerminalProgress`] acompanha visualmente a execução de um
//! job no terminal.

use std::sync::Mutex;
use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::logbuf::LogEntry;
use crate::orchestrator::ProgressSink;
use crate::stages::ScriptPreview;
use crate::state_machine::{JobSnapshot, Stage};

/// Barra de progresso, alimentada pelo orquestrador. Uma barra nova é
/// criada para cada job com [`TerminalProgress::begin`].
pub struct TerminalProgress {
    pb: Mutex<ProgressBar>,
    green: Style,
    red: Style,
    yellow: Style,
}

impl Default for TerminalProgress {
    fn default() -> Self {
        Self {
            pb: Mutex::new(ProgressBar::hidden()),
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }
}

impl TerminalProgress {
    fn bar(&self) -> ProgressBar {
        self.pb.lock().map(|pb| pb.clone()).unwrap_or_else(|_| ProgressBar::hidden())
    }

    /// Inicia uma barra nova com o rótulo do job (ex.: "script 2/3").
    pub fn begin(&self, label: &str) {
        let pb = ProgressBar::new(100);
        let style = ProgressStyle::default_bar()
            .template("{prefix:.bold} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        pb.set_style(style);
        pb.set_prefix(label.to_string());
        pb.enable_steady_tick(Duration::from_millis(200));
        if let Ok(mut current) = self.pb.lock() {
            *current = pb;
        }
    }

    /// Finaliza a barra e exibe o resultado do job.
    ///
    /// Sucesso em verde, sucesso parcial em amarelo, falha em vermelho.
    pub fn finish(&self, snapshot: &JobSnapshot) {
        self.bar().finish_and_clear();
        match snapshot.stage {
            Stage::Completed => {
                let output = snapshot
                    .final_output
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                println!("  {} Video ready: {output}", self.green.apply_to("✓"));
                if let Some(summary) = &snapshot.warning_summary {
                    println!("  {} {summary}", self.yellow.apply_to("!"));
                }
            }
            _ => {
                let at = snapshot.failed_at.map(|s| s.to_string()).unwrap_or_default();
                let error = snapshot.error.as_deref().unwrap_or("unknown error");
                println!("  {} Job failed during {at}: {error}", self.red.apply_to("✗"));
            }
        }
    }

    /// Mensagem de erro fora de um job (ex.: requisição inválida).
    pub fn reject(&self, label: &str, error: &dyn std::fmt::Display) {
        self.bar().finish_and_clear();
        println!("  {} {label} skipped: {error}", self.red.apply_to("✗"));
    }
}

impl ProgressSink for TerminalProgress {
    fn notify(&self, message: &str, percent: u8) {
        let pb = self.bar();
        pb.set_position(u64::from(percent));
        pb.set_message(message.to_string());
    }
}

/// Imprime as entradas de log guardadas em memória (avisos e erros do job).
pub fn print_log_entries(entries: &[LogEntry]) {
    if entries.is_empty() {
        return;
    }
    let dim = Style::new().dim();
    println!();
    println!("{}", dim.apply_to("─── Recent warnings ───"));
    for entry in entries {
        println!("  {entry}");
    }
}

/// Mostra como cada roteiro seria dividido em batches.
pub fn print_previews(previews: &[ScriptPreview]) {
    let bold = Style::new().bold();
    for preview in previews {
        println!(
            "{} {} chars, {} paragraphs, {} batches, ~{}",
            bold.apply_to(format!("Script {}:", preview.index)),
            preview.chars,
            preview.paragraphs,
            preview.batches.len(),
            format_duration(preview.estimated_secs)
        );
        for batch in &preview.batches {
            let first_line = batch.text.lines().next().unwrap_or_default();
            println!("  [{}] {first_line}", batch.seq);
        }
    }
    let chars: usize = previews.iter().map(|p| p.chars).sum();
    let batches: usize = previews.iter().map(|p| p.batches.len()).sum();
    let secs: u64 = previews.iter().map(|p| p.estimated_secs).sum();
    println!(
        "{} {} scripts, {chars} chars, {batches} batches, ~{}",
        bold.apply_to("Total:"),
        previews.len(),
        format_duration(secs)
    );
}

/// Formata segundos como `1h 2m 3s`, omitindo unidades à esquerda zeradas.
fn format_duration(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, secs % 3600 / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m}m {s}s")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}

/// Imprime o snapshot de um job em JSON formatado, com o estágio colorido.
pub fn print_status(snapshot: &JobSnapshot) {
    let style = match snapshot.stage {
        Stage::Completed => Style::new().green().bold(),
        Stage::Failed => Style::new().red().bold(),
        _ => Style::new().yellow(),
    };
    println!(
        "{} {} ({}%) {}",
        style.apply_to(snapshot.stage),
        snapshot.job_id,
        snapshot.progress_percent,
        snapshot.progress_message
    );
    println!("{}", serde_json::to_string_pretty(snapshot).unwrap_or_default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_drop_leading_zero_units() {
        assert_eq!(format_duration(45), "45s");
        assert_eq!(format_duration(630), "10m 30s");
        assert_eq!(format_duration(3723), "1h 2m 3s");
    }
}
