// ABOUTME: LlmHandle provides a cheap Clone + Send + Sync front for any backend.
// ABOUTME: Requests travel over a channel to a worker task that owns the backend.

use crate::error::{LlmError, Result};
use crate::traits::LlmBackend;
use crate::types::{ChatMessage, CompletionParams};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Commands sent from LlmHandle to the backend worker
#[derive(Debug)]
pub enum Command {
    Complete {
        messages: Vec<ChatMessage>,
        params: CompletionParams,
        reply: oneshot::Sender<Result<String>>,
    },
}

/// Send + Sync handle that the orchestrator talks to.
///
/// The worker spawns one task per request, so a slow completion for one room
/// never queues behind another room's request.
#[derive(Clone)]
pub struct LlmHandle {
    tx: mpsc::Sender<Command>,
    name: Arc<str>,
}

impl std::fmt::Debug for LlmHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmHandle")
            .field("name", &self.name)
            .finish()
    }
}

impl LlmHandle {
    /// Create a new LlmHandle with the given command channel and backend name
    pub fn new(tx: mpsc::Sender<Command>, name: impl Into<Arc<str>>) -> Self {
        Self {
            tx,
            name: name.into(),
        }
    }

    /// Spawn a worker task that owns `backend` and return a handle to it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<B: LlmBackend + 'static>(backend: B) -> Self {
        let (tx, mut rx) = mpsc::channel::<Command>(64);
        let name: Arc<str> = Arc::from(backend.name());
        let backend = Arc::new(backend);

        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    Command::Complete {
                        messages,
                        params,
                        reply,
                    } => {
                        let backend = Arc::clone(&backend);
                        tokio::spawn(async move {
                            let result = backend.complete(&messages, &params).await;
                            // Caller may have timed out and dropped the receiver
                            let _ = reply.send(result);
                        });
                    }
                }
            }
            tracing::debug!(backend = %backend.name(), "LLM worker shutting down");
        });

        Self::new(tx, name)
    }

    /// Get the backend name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request a completion from the backend
    pub async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        params: CompletionParams,
    ) -> Result<String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Complete {
                messages,
                params,
                reply: reply_tx,
            })
            .await
            .map_err(|_| LlmError::Closed)?;
        reply_rx.await.map_err(|_| LlmError::Closed)?
    }
}
