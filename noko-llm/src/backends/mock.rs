// ABOUTME: Mock backend for testing - returns pre-configured responses.
// ABOUTME: Allows deterministic orchestrator and dispatcher tests without any network.
//!
//! # Example
//!
//! ```no_run
//! use noko_llm::backends::mock::MockBackend;
//! use noko_llm::{ChatMessage, CompletionParams, LlmError};
//!
//! # async fn example() {
//! let handle = MockBackend::new()
//!     .on_prompt("hello").respond_text("Hi there!")
//!     .on_prompt("boom").respond_error(LlmError::RateLimited("slow down".into()))
//!     .into_handle();
//!
//! let reply = handle
//!     .complete(vec![ChatMessage::user("hello")], CompletionParams::default())
//!     .await
//!     .unwrap();
//! assert_eq!(reply, "Hi there!");
//! # }
//! ```

use crate::error::{LlmError, Result};
use crate::handle::LlmHandle;
use crate::traits::LlmBackend;
use crate::types::{transcript, ChatMessage, CompletionParams};
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock backend for testing
pub struct MockBackend {
    name: String,
    expectations: Arc<Mutex<VecDeque<Expectation>>>,
    fallback: Option<String>,
    calls: Arc<Mutex<Vec<String>>>,
}

struct Expectation {
    pattern: String,
    delay: Option<Duration>,
    response: Result<String>,
}

impl MockBackend {
    /// Create a new mock backend with no expectations
    pub fn new() -> Self {
        Self::named("mock")
    }

    /// Create a mock that reports the given backend name
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            expectations: Arc::new(Mutex::new(VecDeque::new())),
            fallback: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Set up an expectation for a prompt containing the given pattern
    pub fn on_prompt(self, pattern: &str) -> ExpectationBuilder {
        ExpectationBuilder {
            backend: self,
            pattern: pattern.to_string(),
            delay: None,
        }
    }

    /// Reply with `text` whenever no expectation matches
    pub fn with_default(mut self, text: &str) -> Self {
        self.fallback = Some(text.to_string());
        self
    }

    /// Shared log of every prompt transcript this backend received
    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }

    /// Convert this backend into an LlmHandle
    pub fn into_handle(self) -> LlmHandle {
        LlmHandle::spawn(self)
    }

    /// Factory function for the registry.
    ///
    /// Accepts `name`, `default` and a `responses` table mapping prompt
    /// substrings to replies.
    pub fn factory() -> crate::registry::BackendFactory {
        Box::new(|config| {
            let name = config
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("mock");
            let mut backend = MockBackend::named(name);
            if let Some(default) = config.get("default").and_then(|v| v.as_str()) {
                backend = backend.with_default(default);
            }
            if let Some(responses) = config.get("responses").and_then(|v| v.as_object()) {
                for (pattern, reply) in responses {
                    if let Some(reply) = reply.as_str() {
                        backend = backend.on_prompt(pattern).respond_text(reply);
                    }
                }
            }
            Ok(backend.into_handle())
        })
    }

    fn take_expectation(&self, text: &str) -> Option<Expectation> {
        let mut exp = self.expectations.lock().unwrap_or_else(|e| e.into_inner());
        // FIFO preference: the front wins if it matches, otherwise the first match
        if exp.front().is_some_and(|front| text.contains(&front.pattern)) {
            return exp.pop_front();
        }
        exp.iter()
            .position(|e| text.contains(&e.pattern))
            .and_then(|i| exp.remove(i))
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn complete<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        _params: &'a CompletionParams,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let text = transcript(messages);
            self.calls
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(text.clone());

            match self.take_expectation(&text) {
                Some(expectation) => {
                    if let Some(delay) = expectation.delay {
                        tokio::time::sleep(delay).await;
                    }
                    expectation.response
                }
                None => self.fallback.clone().ok_or_else(|| {
                    LlmError::ResponseFormat(format!("mock: no expectation for '{}'", text))
                }),
            }
        })
    }
}

/// Builder for setting up mock expectations with a fluent API
pub struct ExpectationBuilder {
    backend: MockBackend,
    pattern: String,
    delay: Option<Duration>,
}

impl ExpectationBuilder {
    /// Wait this long before answering
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn push(self, response: Result<String>) -> MockBackend {
        self.backend
            .expectations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Expectation {
                pattern: self.pattern,
                delay: self.delay,
                response,
            });
        self.backend
    }

    /// Respond with a simple text result
    pub fn respond_text(self, text: &str) -> MockBackend {
        self.push(Ok(text.to_string()))
    }

    /// Respond with an error
    pub fn respond_error(self, error: LlmError) -> MockBackend {
        self.push(Err(error))
    }
}
