//! Tipos de erro para o cliente da API Anthropic.

use thiserror::Error;

use crate::error::ProviderError;

/// Erros que podem ocorrer ao interagir com a API da Anthropic.
#[derive(Debug, Error)]
pub enum AnthropicError {
    /// O servidor retornou HTTP 429. `retry_after_ms` vem do cabeçalho `retry-after`.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Qualquer outro status HTTP sem sucesso.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl From<AnthropicError> for ProviderError {
    fn from(err: AnthropicError) -> Self {
        match err {
            AnthropicError::RateLimited { retry_after_ms } => ProviderError::Status {
                status: 429,
                body: format!("retry after {retry_after_ms}ms"),
            },
            AnthropicError::ApiError { status, message } => ProviderError::Status { status, body: message },
            AnthropicError::NetworkError(e) => ProviderError::Transport(e),
        }
    }
}
