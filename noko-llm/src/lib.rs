// ABOUTME: Pluggable LLM completion backends for noko.
// ABOUTME: Provides trait-based backends (ollama, openai, mock) behind Send+Sync handles.

pub mod backends;
pub mod config;
pub mod error;
pub mod handle;
pub mod registry;
pub mod traits;
pub mod types;

pub use config::BackendConfig;
pub use error::LlmError;
pub use handle::LlmHandle;
pub use registry::{BackendFactory, BackendRegistry};
pub use traits::LlmBackend;
pub use types::{ChatMessage, CompletionParams, Role};
