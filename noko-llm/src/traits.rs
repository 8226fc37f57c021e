// ABOUTME: Core LlmBackend trait that all completion backends implement.
// ABOUTME: A backend turns a message list plus sampling parameters into reply text.

use crate::error::Result;
use crate::types::{ChatMessage, CompletionParams};
use futures::future::BoxFuture;

/// Core trait that all LLM backends implement.
///
/// Methods return boxed futures so a backend can be driven from the worker
/// task behind an [`LlmHandle`](crate::handle::LlmHandle).
pub trait LlmBackend: Send + Sync {
    /// Backend name for logging and metrics
    fn name(&self) -> &str;

    /// Produce a single non-streaming completion
    fn complete<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        params: &'a CompletionParams,
    ) -> BoxFuture<'a, Result<String>>;
}
