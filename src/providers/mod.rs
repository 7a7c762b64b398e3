pub mod openrouter;
pub mod traits;
pub mod types;

pub use openrouter::OpenRouterProvider;
pub use traits::{CompletionTransport, ModelCatalog};
pub use types::{ChatMessage, ChatRequest, ChatResponse, ChunkStream, Credits, ProviderError};
