// ABOUTME: Builds backend-agnostic completion requests and runs them down a fallback chain.
// ABOUTME: Also hosts the filter verdict parser and `{placeholder}` prompt templates.

use crate::config::LlmConfig;
use crate::history::{format_transcript, HistoryEntry};
use crate::metrics;
use noko_llm::{BackendRegistry, ChatMessage, CompletionParams, LlmError, LlmHandle};
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Style and mood shaping a reply. Never appears in the reply itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Persona {
    pub style: Option<String>,
    pub mood: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Name the bot goes by in this room
    pub nick: String,
    pub persona: Persona,
    /// Extra instructions appended to the preamble
    pub filter_prompt: Option<String>,
    /// Earlier room history, oldest first, not including `message`
    pub history: Vec<HistoryEntry>,
    /// The message being answered; always sent, even with no history kept
    pub message: HistoryEntry,
    /// Backend to try first
    pub target_backend: Option<String>,
    pub params: CompletionParams,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterVerdict {
    Allow,
    Transform(String),
    Block,
}

pub struct LlmOrchestrator {
    backends: Vec<LlmHandle>,
    timeout: Duration,
    prompts: BTreeMap<String, String>,
    chat_prompt: Option<String>,
    styles: Vec<String>,
    moods: Vec<String>,
}

impl std::fmt::Debug for LlmOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmOrchestrator")
            .field("backends", &self.backend_names())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl LlmOrchestrator {
    pub fn new(backends: Vec<LlmHandle>, timeout: Duration) -> Self {
        Self {
            backends,
            timeout,
            prompts: BTreeMap::new(),
            chat_prompt: None,
            styles: Vec::new(),
            moods: Vec::new(),
        }
    }

    /// An orchestrator with no backends; every completion is `Unavailable`
    pub fn disabled() -> Self {
        Self::new(Vec::new(), Duration::from_secs(1))
    }

    pub fn with_prompts(mut self, prompts: BTreeMap<String, String>) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_chat_prompt(mut self, name: Option<String>) -> Self {
        self.chat_prompt = name;
        self
    }

    pub fn with_personas(mut self, styles: Vec<String>, moods: Vec<String>) -> Self {
        self.styles = styles;
        self.moods = moods;
        self
    }

    /// Create handles for every configured backend, in priority order
    pub fn from_config(config: &LlmConfig, registry: &BackendRegistry) -> anyhow::Result<Self> {
        let backends = if config.enabled {
            registry.create_all(&config.backends)?
        } else {
            Vec::new()
        };
        if config.enabled && backends.is_empty() {
            tracing::warn!("LLM enabled but no [[llm.backends]] configured");
        }
        Ok(Self::with_handles(config, backends))
    }

    /// Apply the `[llm]` settings to already-created backend handles
    pub fn with_handles(config: &LlmConfig, backends: Vec<LlmHandle>) -> Self {
        Self::new(backends, Duration::from_secs(config.timeout_secs))
            .with_prompts(config.prompts.clone())
            .with_chat_prompt(config.chat_prompt.clone())
            .with_personas(config.styles.clone(), config.moods.clone())
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    pub fn is_configured(&self) -> bool {
        !self.backends.is_empty()
    }

    /// Random style and mood from the configured lists
    pub fn pick_persona(&self) -> Persona {
        let mut rng = rand::thread_rng();
        Persona {
            style: self.styles.choose(&mut rng).cloned(),
            mood: self.moods.choose(&mut rng).cloned(),
        }
    }

    fn ordered(&self, target: Option<&str>) -> Vec<&LlmHandle> {
        let mut order: Vec<&LlmHandle> = self.backends.iter().collect();
        if let Some(target) = target {
            match order.iter().position(|b| b.name() == target) {
                Some(i) => {
                    let preferred = order.remove(i);
                    order.insert(0, preferred);
                }
                None => tracing::warn!(backend = %target, "Requested backend not configured"),
            }
        }
        order
    }

    /// Try each backend in order until one produces an acceptable reply.
    async fn run_chain<F>(
        &self,
        messages: Vec<ChatMessage>,
        params: CompletionParams,
        target: Option<&str>,
        accept: F,
    ) -> Result<String, LlmError>
    where
        F: Fn(String) -> Result<String, LlmError>,
    {
        let order = self.ordered(target);
        let attempted = order.len();

        for backend in order {
            let started = Instant::now();
            let result =
                match tokio::time::timeout(self.timeout, backend.complete(messages.clone(), params))
                    .await
                {
                    Ok(result) => result.and_then(&accept),
                    Err(_) => Err(LlmError::Timeout(format!("{}s", self.timeout.as_secs()))),
                };
            let elapsed = started.elapsed().as_secs_f64();

            match result {
                Ok(text) => {
                    metrics::record_llm_request(backend.name(), "ok", elapsed);
                    tracing::debug!(backend = %backend.name(), elapsed, "LLM completion succeeded");
                    return Ok(text);
                }
                Err(e) => {
                    metrics::record_llm_request(backend.name(), "error", elapsed);
                    tracing::warn!(backend = %backend.name(), error = %e, "LLM backend failed");
                }
            }
        }

        Err(LlmError::Unavailable { attempted })
    }

    /// Build the message list for a conversational reply.
    ///
    /// Returns the messages and the preamble text that must not be echoed.
    pub fn build_messages(
        &self,
        request: &CompletionRequest,
    ) -> Result<(Vec<ChatMessage>, String), LlmError> {
        let mut entries = request.history.clone();
        entries.push(request.message.clone());
        let transcript = format_transcript(&entries);
        let style = request.persona.style.as_deref().unwrap_or("casual");
        let mood = request.persona.mood.as_deref().unwrap_or("neutral");

        if let Some(name) = &self.chat_prompt {
            let rendered = self.render_prompt(
                name,
                &[
                    ("history", transcript.as_str()),
                    ("bot_nick", request.nick.as_str()),
                    ("style", style),
                    ("mood", mood),
                ],
            )?;
            let preamble = match &request.filter_prompt {
                Some(extra) => format!("{}\n{}", rendered, extra),
                None => rendered,
            };
            return Ok((vec![ChatMessage::user(preamble.clone())], preamble));
        }

        let mut preamble = format!(
            "You are {nick}, a regular in a group chat. Speak in a {style} style; you feel {mood}. \
             Reply with the text of {nick}'s next message only, without a name or timestamp.",
            nick = request.nick,
        );
        if let Some(extra) = &request.filter_prompt {
            preamble.push('\n');
            preamble.push_str(extra);
        }
        Ok((
            vec![
                ChatMessage::system(preamble.clone()),
                ChatMessage::user(transcript),
            ],
            preamble,
        ))
    }

    /// Conversational reply for the last message in `request.history`
    pub async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let (messages, preamble) = self.build_messages(request)?;
        let nick = request.nick.clone();
        self.run_chain(
            messages,
            request.params,
            request.target_backend.as_deref(),
            |reply| {
                let cleaned = strip_echo(&reply, &preamble, &nick);
                if cleaned.is_empty() {
                    Err(LlmError::ResponseFormat("reply was empty after cleanup".into()))
                } else {
                    Ok(cleaned)
                }
            },
        )
        .await
    }

    /// Classify or rewrite `text` with a constrained prompt.
    ///
    /// Falls back to `Allow` when no backend answers or the answer is unparseable.
    pub async fn filter(&self, prompt: &str, text: &str, params: CompletionParams) -> FilterVerdict {
        let messages = vec![
            ChatMessage::system(format!(
                "{}\n\nAnswer with exactly one line: ALLOW, BLOCK, or TRANSFORM: <rewritten message>.",
                prompt
            )),
            ChatMessage::user(text),
        ];
        match self.run_chain(messages, params, None, Ok).await {
            Ok(reply) => parse_verdict(&reply),
            Err(e) => {
                tracing::warn!(error = %e, "Filter unavailable, allowing message");
                FilterVerdict::Allow
            }
        }
    }

    /// Fill a named template from `[llm.prompts]`
    pub fn render_prompt(&self, name: &str, vars: &[(&str, &str)]) -> Result<String, LlmError> {
        let template = self
            .prompts
            .get(name)
            .ok_or_else(|| LlmError::UnknownPrompt(name.to_string()))?;
        render_template(template, vars)
    }

    /// Render a named template and complete it as a single user message
    pub async fn run_prompt(
        &self,
        name: &str,
        vars: &[(&str, &str)],
        params: CompletionParams,
    ) -> Result<String, LlmError> {
        let prompt = self.render_prompt(name, vars)?;
        self.run_chain(vec![ChatMessage::user(prompt)], params, None, |reply| {
            let trimmed = reply.trim().to_string();
            if trimmed.is_empty() {
                Err(LlmError::ResponseFormat("empty reply".into()))
            } else {
                Ok(trimmed)
            }
        })
        .await
    }
}

/// Substitute `{name}` placeholders. Braces around anything that isn't an
/// identifier are left as-is.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> Result<String, LlmError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}');
        let name = close.map(|c| &after[..c]);

        match name {
            Some(name) if is_identifier(name) => {
                let value = vars
                    .iter()
                    .find(|(k, _)| *k == name)
                    .map(|(_, v)| *v)
                    .ok_or_else(|| LlmError::MissingPlaceholder(name.to_string()))?;
                out.push_str(value);
                rest = &after[name.len() + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Interpret a filter reply; anything unrecognised allows the message.
///
/// Only an exact leading keyword counts: `BLOCK`, `ALLOW`, or `TRANSFORM`
/// followed by `:` or whitespace and the replacement text.
pub fn parse_verdict(reply: &str) -> FilterVerdict {
    let trimmed = reply.trim();
    let word_end = trimmed
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(trimmed.len());
    let (word, rest) = trimmed.split_at(word_end);
    let word = word.to_ascii_uppercase();
    let ends_word = |rest: &str| {
        rest.chars()
            .next()
            .map_or(true, |c| c.is_whitespace() || c.is_ascii_punctuation())
    };

    match word.as_str() {
        "BLOCK" if ends_word(rest) => FilterVerdict::Block,
        "TRANSFORM" if rest.starts_with(':') || rest.starts_with(char::is_whitespace) => {
            let body = rest.trim_start();
            let body = body.strip_prefix(':').unwrap_or(body).trim();
            if body.is_empty() {
                FilterVerdict::Allow
            } else {
                FilterVerdict::Transform(body.to_string())
            }
        }
        _ => FilterVerdict::Allow,
    }
}

/// Remove preamble lines and a leading `nick:` label the model may echo back.
fn strip_echo(reply: &str, preamble: &str, nick: &str) -> String {
    let preamble_lines: Vec<&str> = preamble
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let mut text = reply.trim();
    if let Some(rest) = text.strip_prefix(preamble.trim()) {
        text = rest.trim();
    }

    let kept: Vec<&str> = text
        .lines()
        .skip_while(|line| {
            let line = line.trim();
            line.is_empty() || preamble_lines.contains(&line)
        })
        .collect();
    let mut text = kept.join("\n").trim().to_string();

    // "[12:00:00]noko: hi" or "noko: hi"
    let label_end = if text.starts_with('[') {
        text.find(']').map(|i| i + 1).unwrap_or(0)
    } else {
        0
    };
    let after_time = text.get(label_end..).unwrap_or("");
    let labelled = after_time
        .get(..nick.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(nick));
    if labelled {
        if let Some(body) = after_time
            .get(nick.len()..)
            .and_then(|rest| rest.strip_prefix(':'))
        {
            text = body.trim().to_string();
        }
    }
    text
}
