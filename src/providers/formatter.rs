use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::Formatter;
use crate::anthropic::{MessageSender, MessagesRequest};
use crate::error::ProviderError;
use crate::stages::TextBatch;

const SYSTEM_PROMPT: &str = "You prepare narration scripts for a text-to-speech voice. \
Fix punctuation and spacing, expand abbreviations and numbers so they read naturally aloud, \
and never add, remove or reorder content.";

#[derive(Debug, Deserialize)]
struct FormattedBatch {
    seq: u32,
    text: String,
}

/// Formats a script with an LLM and splits it into narration batches.
pub struct LlmFormatter<C> {
    client: C,
    model: String,
    max_tokens: u32,
    batch_size: usize,
}

impl<C: MessageSender> LlmFormatter<C> {
    pub fn new(client: C, model: impl Into<String>, max_tokens: u32, batch_size: usize) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens,
            batch_size: batch_size.max(1),
        }
    }

    fn prompt(&self, text: &str) -> String {
        format!(
            "Rewrite the script below for narration and split it into batches of about {} paragraphs each.\n\
             Respond with ONLY a JSON array, no other text.\n\
             Format: [{{\"seq\": 1, \"text\": \"...\"}}, {{\"seq\": 2, \"text\": \"...\"}}]\n\
             seq starts at 1 and follows the order of the script.\n\
             \n\
             Script:\n{text}",
            self.batch_size
        )
    }
}

impl<C: MessageSender> Formatter for LlmFormatter<C> {
    async fn format(&self, text: &str, work_dir: &Path) -> Result<Vec<TextBatch>, ProviderError> {
        let req = MessagesRequest::user(&self.model, self.max_tokens, self.prompt(text)).with_system(SYSTEM_PROMPT);
        let response = self.client.send_message(&req).await?;
        if response.truncated() {
            warn!(max_tokens = self.max_tokens, "formatter output hit the token limit");
        }

        let batches = parse_batches(&response.text())?;
        debug!(batches = batches.len(), "formatter response parsed");

        let batch_dir = work_dir.join("batches");
        tokio::fs::create_dir_all(&batch_dir).await?;
        for batch in &batches {
            tokio::fs::write(batch_dir.join(format!("batch_{}.txt", batch.seq)), &batch.text).await?;
        }
        info!(batches = batches.len(), dir = %batch_dir.display(), "formatted batches written");
        Ok(batches)
    }
}

/// Extracts the JSON array from a model reply, tolerating code fences and
/// prose around it. Blank batches are dropped.
fn parse_batches(reply: &str) -> Result<Vec<TextBatch>, ProviderError> {
    let start = reply.find('[');
    let end = reply.rfind(']');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &reply[s..=e],
        _ => return Err(ProviderError::message("formatter reply contains no JSON array")),
    };
    let parsed: Vec<FormattedBatch> = serde_json::from_str(json)
        .map_err(|e| ProviderError::message(format!("failed to parse formatter reply: {e}")))?;
    Ok(parsed
        .into_iter()
        .filter(|b| !b.text.trim().is_empty())
        .map(|b| TextBatch::new(b.seq, b.text.trim()))
        .collect())
}
