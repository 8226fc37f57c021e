// ABOUTME: Ollama backend talking to the /api/chat endpoint of a local or remote server.
// ABOUTME: Sends non-streaming requests with temperature and num_predict options.

use crate::error::{status_error, LlmError, Result};
use crate::traits::LlmBackend;
use crate::types::{ChatMessage, CompletionParams};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_host() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

/// Settings accepted by the `ollama` factory
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaSettings {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

pub struct OllamaBackend {
    name: String,
    http: reqwest::Client,
    host: String,
    model: String,
}

impl OllamaBackend {
    pub fn new(settings: OllamaSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;
        Ok(Self {
            name: settings.name.unwrap_or_else(|| "ollama".to_string()),
            http,
            host: settings.host.trim_end_matches('/').to_string(),
            model: settings.model,
        })
    }

    /// Factory function for the registry
    pub fn factory() -> crate::registry::BackendFactory {
        Box::new(|config| {
            let settings: OllamaSettings = serde_json::from_value(config.clone())
                .map_err(|e| anyhow::anyhow!("Invalid ollama backend config: {}", e))?;
            Ok(OllamaBackend::new(settings)?.into_handle())
        })
    }

    pub fn into_handle(self) -> crate::handle::LlmHandle {
        crate::handle::LlmHandle::spawn(self)
    }

    async fn chat(&self, messages: &[ChatMessage], params: &CompletionParams) -> Result<String> {
        let req = OllamaChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options: OllamaOptions {
                temperature: params.temperature,
                num_predict: params.num_predict,
            },
        };

        let response = self
            .http
            .post(format!("{}/api/chat", self.host))
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(status_error("ollama", status, &body));
        }

        let parsed: OllamaChatResponse = serde_json::from_str(&body)?;
        if parsed.message.content.trim().is_empty() {
            return Err(LlmError::ResponseFormat(
                "ollama returned an empty message".into(),
            ));
        }
        Ok(parsed.message.content)
    }
}

impl LlmBackend for OllamaBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn complete<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        params: &'a CompletionParams,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            tracing::debug!(backend = %self.name, model = %self.model, "ollama chat request");
            self.chat(messages, params).await
        })
    }
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[test]
    fn test_settings_defaults() {
        let settings: OllamaSettings = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(settings.host, "http://localhost:11434");
        assert_eq!(settings.model, "llama3");
        assert!(settings.name.is_none());
    }

    #[test]
    fn test_request_body_shape() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        let req = OllamaChatRequest {
            model: "llama3",
            messages: &messages,
            stream: false,
            options: OllamaOptions {
                temperature: 0.5,
                num_predict: 64,
            },
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["num_predict"], 64);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(messages[1].role, Role::User);
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"model":"llama3","message":{"role":"assistant","content":"hey"},"done":true}"#;
        let parsed: OllamaChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.message.content, "hey");
    }
}
