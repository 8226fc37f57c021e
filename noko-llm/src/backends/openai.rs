// ABOUTME: OpenAI-compatible chat completions backend (OpenAI, OpenRouter, llama.cpp server).
// ABOUTME: Uses bearer auth and maps num_predict onto max_tokens.

use crate::error::{status_error, LlmError, Result};
use crate::traits::LlmBackend;
use crate::types::{ChatMessage, CompletionParams};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

/// Settings accepted by the `openai` factory
#[derive(Clone, Deserialize)]
pub struct OpenAiSettings {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable consulted when `api_key` is not set
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl std::fmt::Debug for OpenAiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiSettings")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_key_env", &self.api_key_env)
            .field("model", &self.model)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl OpenAiSettings {
    fn resolve_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            let var = self.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY");
            std::env::var(var).ok().filter(|k| !k.trim().is_empty())
        })
    }
}

pub struct OpenAiBackend {
    name: String,
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiBackend {
    pub fn new(settings: OpenAiSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;
        let api_key = settings.resolve_api_key();
        if api_key.is_none() {
            tracing::warn!(base_url = %settings.base_url, "openai backend configured without an API key");
        }
        Ok(Self {
            name: settings.name.unwrap_or_else(|| "openai".to_string()),
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: settings.model,
        })
    }

    /// Factory function for the registry
    pub fn factory() -> crate::registry::BackendFactory {
        Box::new(|config| {
            let settings: OpenAiSettings = serde_json::from_value(config.clone())
                .map_err(|e| anyhow::anyhow!("Invalid openai backend config: {}", e))?;
            Ok(OpenAiBackend::new(settings)?.into_handle())
        })
    }

    pub fn into_handle(self) -> crate::handle::LlmHandle {
        crate::handle::LlmHandle::spawn(self)
    }

    async fn chat(&self, messages: &[ChatMessage], params: &CompletionParams) -> Result<String> {
        let req = OpenAiChatRequest {
            model: &self.model,
            messages,
            temperature: params.temperature,
            max_tokens: params.num_predict,
        };

        let mut request = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&req);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(status_error("openai", status, &body));
        }

        let parsed: OpenAiChatResponse = serde_json::from_str(&body)?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| LlmError::ResponseFormat("openai response had no content".into()))
    }
}

impl LlmBackend for OpenAiBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn complete<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        params: &'a CompletionParams,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            tracing::debug!(backend = %self.name, model = %self.model, "openai chat request");
            self.chat(messages, params).await
        })
    }
}

#[derive(Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_debug_redacts_key() {
        let settings: OpenAiSettings =
            serde_json::from_value(serde_json::json!({"api_key": "sk-secret"})).unwrap();
        let debug = format!("{:?}", settings);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_request_maps_num_predict_to_max_tokens() {
        let messages = vec![ChatMessage::user("hi")];
        let req = OpenAiChatRequest {
            model: "m",
            messages: &messages,
            temperature: 1.0,
            max_tokens: 99,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["max_tokens"], 99);
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_response_parsing_takes_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"yo"}},{"message":{"content":"no"}}]}"#;
        let parsed: OpenAiChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("yo"));
    }
}
