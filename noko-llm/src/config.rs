// ABOUTME: Configuration for a single LLM backend entry.
// ABOUTME: The `type` field selects the factory; remaining fields are passed through.

use serde::{Deserialize, Serialize};

/// Backend configuration with type discriminator.
///
/// Appears as `[[llm.backends]]` in the bot config; list order is priority order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend type: "ollama", "openai", "mock"
    #[serde(rename = "type")]
    pub backend_type: String,

    /// Display name used in logs, metrics and `target_backend`; defaults to the type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Remaining fields passed to backend factory
    #[serde(flatten)]
    pub config: toml::Table,
}

impl BackendConfig {
    /// Get backend type name
    pub fn backend_type(&self) -> &str {
        &self.backend_type
    }

    /// Name the orchestrator knows this backend by
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.backend_type)
    }

    /// Convert config table to serde_json::Value for the registry, with `name` filled in
    pub fn to_json_value(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(&self.config).unwrap_or(serde_json::json!({}));
        if let Some(obj) = value.as_object_mut() {
            obj.insert("name".to_string(), serde_json::json!(self.name()));
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Wrapper {
        backends: Vec<BackendConfig>,
    }

    #[test]
    fn test_parse_backend_list_keeps_order() {
        let toml = r#"
[[backends]]
type = "openai"
name = "primary"
model = "gpt-4o-mini"

[[backends]]
type = "ollama"
host = "http://127.0.0.1:11434"
"#;
        let parsed: Wrapper = toml::from_str(toml).unwrap();
        assert_eq!(parsed.backends.len(), 2);
        assert_eq!(parsed.backends[0].name(), "primary");
        assert_eq!(parsed.backends[1].name(), "ollama");

        let json = parsed.backends[1].to_json_value();
        assert_eq!(json["host"], "http://127.0.0.1:11434");
        assert_eq!(json["name"], "ollama");
    }
}
