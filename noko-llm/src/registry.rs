// ABOUTME: Registry pattern for runtime backend selection.
// ABOUTME: Backends register factories; the bot creates handles by type from config.

use crate::config::BackendConfig;
use crate::handle::LlmHandle;
use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::collections::HashMap;

/// Factory function that creates an LlmHandle from config
pub type BackendFactory = Box<dyn Fn(&Value) -> Result<LlmHandle> + Send + Sync>;

/// Registry for runtime backend selection
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a backend factory by type name
    pub fn register<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn(&Value) -> Result<LlmHandle> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
        self
    }

    /// Create a backend by type name with the given config
    pub fn create(&self, backend_type: &str, config: &Value) -> Result<LlmHandle> {
        let factory = self
            .factories
            .get(backend_type)
            .ok_or_else(|| anyhow!("Unknown backend: {}", backend_type))?;
        factory(config)
    }

    /// List available backend type names
    pub fn available(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Create a backend from a BackendConfig
    pub fn create_from_config(&self, config: &BackendConfig) -> Result<LlmHandle> {
        self.create(config.backend_type(), &config.to_json_value())
            .with_context(|| format!("Failed to create LLM backend '{}'", config.name()))
    }

    /// Create handles for every entry, preserving priority order
    pub fn create_all(&self, configs: &[BackendConfig]) -> Result<Vec<LlmHandle>> {
        configs.iter().map(|c| self.create_from_config(c)).collect()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        use crate::backends::mock::MockBackend;
        use crate::backends::ollama::OllamaBackend;
        use crate::backends::openai::OpenAiBackend;

        Self::new()
            .register("mock", MockBackend::factory())
            .register("ollama", OllamaBackend::factory())
            .register("openai", OpenAiBackend::factory())
    }
}
