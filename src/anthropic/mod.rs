//! Cliente mínimo da API Anthropic Messages, usado pelo formatador de roteiros.

pub mod client;
pub mod error;
pub mod types;

pub use client::AnthropicClient;
pub use error::AnthropicError;
pub use types::{MessagesRequest, MessagesResponse};

/// Qualquer coisa capaz de enviar uma requisição Messages.
///
/// Implementado por [`AnthropicClient`]; os testes usam mocks em memória.
#[allow(async_fn_in_trait)]
pub trait MessageSender {
    async fn send_message(&self, req: &MessagesRequest) -> Result<MessagesResponse, AnthropicError>;
}
