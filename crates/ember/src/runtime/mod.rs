//! Thin client layer over the local inference runtime's HTTP API.
//!
//! The [`Runtime`] trait is the injected capability the rest of the
//! crate works against; [`OllamaRuntime`] is the production binding.

pub mod errors;
pub mod ollama;
pub mod types;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

pub use errors::RuntimeError;
pub use ollama::OllamaRuntime;
pub use types::{
    ChatMessage, Fragment, GenerationOptions, GenerationRequest, GenerationStats, ModelDescriptor,
};

/// A lazy, finite, non-restartable sequence of fragments. Created and
/// exclusively consumed by the orchestrator for the lifetime of one
/// request; cancellation is dropping it.
pub type GenerationStream = Pin<Box<dyn Stream<Item = Result<Fragment, RuntimeError>> + Send>>;

#[async_trait]
pub trait Runtime: Send + Sync {
    /// Query the runtime's installed models.
    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, RuntimeError>;

    /// Open a streaming generation call. The client performs no
    /// retries; retry policy belongs to the caller, which alone knows
    /// whether partial output has already been delivered.
    async fn generate(&self, request: GenerationRequest)
        -> Result<GenerationStream, RuntimeError>;

    async fn check_health(&self) -> bool {
        self.list_models().await.is_ok()
    }
}
