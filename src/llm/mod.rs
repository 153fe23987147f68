//! LLM provider abstraction.
//!
//! One trait covers the two external model capabilities the backend
//! consumes: chat completion (plain and streaming) and text embedding.
//! The concrete implementation talks to an Azure OpenAI deployment, but
//! everything downstream holds an `Arc<dyn LlmProvider>` so tests can
//! substitute a deterministic embedder.

mod azure;
mod provider;
mod types;

pub use azure::AzureOpenAiProvider;
pub use provider::LlmProvider;
pub use types::{ChatMessage, ChatRequest};
