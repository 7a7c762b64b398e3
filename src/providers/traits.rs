use async_trait::async_trait;

use super::types::{ChatRequest, ChatResponse, ChunkStream, ProviderError};
use crate::models::LlmModel;

/// Model-completion transport.
///
/// Non-success HTTP statuses come back as errors, never as an empty body.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    async fn send_message(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;

    async fn stream_message(&self, request: ChatRequest) -> Result<ChunkStream, ProviderError>;
}

#[async_trait]
pub trait ModelCatalog: Send + Sync {
    async fn list_models(&self) -> Result<Vec<LlmModel>, ProviderError>;
}
