// ABOUTME: Scheduled poster for articles queued on the "feeds" store log by an external fetcher
// ABOUTME: Each post goes to its own rooms, the configured rooms, or every joined room

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use noko_core::noko_llm::CompletionParams;
use noko_core::{Config, OutgoingEvent, Plugin, TickContext};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const PLUGIN: &str = "feeds";
/// Store log the fetcher appends to
pub const FEED_LOG: &str = "feeds";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub every_secs: u64,
    /// Rooms to post to when an entry names none; empty means every joined room
    pub rooms: Vec<String>,
    /// Named prompt used to summarise entries that carry a description
    pub summarize_prompt: Option<String>,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            every_secs: 900,
            rooms: Vec::new(),
            summarize_prompt: None,
        }
    }
}

/// One queued article, as written to the feed log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedPost {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rooms: Option<Vec<String>>,
}

pub struct FeedsPlugin {
    every: Duration,
}

impl FeedsPlugin {
    pub fn new(every: Duration) -> Self {
        Self { every }
    }

    pub fn from_config(config: &Config) -> Self {
        let settings: FeedSettings = config.plugin_settings(PLUGIN).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Using default feed settings");
            FeedSettings::default()
        });
        Self::new(Duration::from_secs(settings.every_secs.max(1)))
    }
}

#[async_trait]
impl Plugin for FeedsPlugin {
    fn name(&self) -> &str {
        PLUGIN
    }

    fn schedule(&self) -> Option<Duration> {
        Some(self.every)
    }

    async fn tick(&self, ctx: &TickContext<'_>, _now: DateTime<Utc>) -> Result<Vec<OutgoingEvent>> {
        let settings: FeedSettings = ctx.settings(PLUGIN)?;
        let entries = ctx.store.drain_log(FEED_LOG)?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!(count = entries.len(), "Posting queued feed entries");

        let params = CompletionParams {
            temperature: ctx.config.llm.temperature,
            num_predict: ctx.config.llm.num_predict,
        };
        let mut out = Vec::new();
        for raw in entries {
            let post: FeedPost = match serde_json::from_str(&raw) {
                Ok(post) => post,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable feed entry");
                    continue;
                }
            };

            let targets: Vec<&String> = match (&post.rooms, settings.rooms.is_empty()) {
                (Some(rooms), _) => rooms.iter().collect(),
                (None, false) => settings.rooms.iter().collect(),
                (None, true) => ctx.joined_rooms.iter().collect(),
            };
            let targets: Vec<&String> = targets
                .into_iter()
                .filter(|room| ctx.joined_rooms.contains(*room))
                .collect();
            if targets.is_empty() {
                tracing::debug!(link = %post.link, "No joined room for feed entry");
                continue;
            }

            let summary = match (&settings.summarize_prompt, &post.description) {
                (Some(prompt), Some(description)) if ctx.config.llm.enabled => {
                    let vars = [("article", description.as_str()), ("url", post.link.as_str())];
                    match ctx.llm.run_prompt(prompt, &vars, params).await {
                        Ok(summary) => Some(summary),
                        Err(e) => {
                            tracing::warn!(link = %post.link, error = %e, "Feed summary failed");
                            None
                        }
                    }
                }
                _ => None,
            };

            let text = format_post(&post, summary.as_deref());
            out.extend(targets.into_iter().map(|room| OutgoingEvent::new(room.as_str(), text.as_str())));
        }
        Ok(out)
    }
}

pub fn format_post(post: &FeedPost, summary: Option<&str>) -> String {
    match summary {
        Some(summary) => format!("🌐 *{}*\n{}", post.title, summary),
        None => format!("{}\n🌐 *{}*", post.link, post.title),
    }
}
