// ABOUTME: Backend implementations (ollama, openai-compatible, mock).
// ABOUTME: Each backend implements LlmBackend and exposes a registry factory.

pub mod mock;
pub mod ollama;
pub mod openai;
