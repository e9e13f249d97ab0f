pub mod config;
pub mod conversation;
pub mod orchestrator;
pub mod registry;
pub mod runtime;

pub use config::ChatConfig;
pub use conversation::{ChatSession, Role, SessionManager, Turn};
pub use orchestrator::{ChatEvent, ChatOrchestrator, ChatRequest};
pub use registry::{ModelRegistry, RegistryConfig};
pub use runtime::{GenerationStream, OllamaRuntime, Runtime, RuntimeError};
