// ABOUTME: Deferred messages: "tell" relays a note when the recipient next speaks, "remindme" fires later
// ABOUTME: Tells and reminders are persisted; reminders are delivered by a scheduled tick

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use noko_core::commands::Command;
use noko_core::config::MAX_COOLDOWN_SECS;
use noko_core::noko_llm::CompletionParams;
use noko_core::{
    CommandSpec, Config, LlmOrchestrator, OutgoingEvent, Plugin, PluginContext, Store, TickContext,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const PLUGIN: &str = "post_office";
const TELLS: &str = "tells";
const REMINDERS: &str = "reminders";
const REMINDER_CHECK: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostOfficeSettings {
    /// Per-user cooldown for tell and remindme
    pub cooldown_secs: u64,
    /// Named prompt that rewrites outgoing notes
    pub filter: Option<String>,
}

impl Default for PostOfficeSettings {
    fn default() -> Self {
        Self {
            cooldown_secs: 60,
            filter: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Tell {
    sender: String,
    recipient: String,
    message: String,
    at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Reminder {
    room_id: String,
    nick: String,
    due: DateTime<Utc>,
    message: String,
}

fn tell_prefix(room_id: &str, recipient: &str) -> String {
    format!("{}\t{}\t", room_id, recipient.to_lowercase())
}

fn tell_key(room_id: &str, recipient: &str, sender: &str) -> String {
    format!("{}{}", tell_prefix(room_id, recipient), sender.to_lowercase())
}

pub struct PostOffice {
    cooldown: Duration,
}

impl PostOffice {
    pub fn from_config(config: &Config) -> Self {
        let settings: PostOfficeSettings = config.plugin_settings(PLUGIN).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Using default post office settings");
            PostOfficeSettings::default()
        });
        if settings.cooldown_secs > MAX_COOLDOWN_SECS {
            tracing::warn!(
                cooldown_secs = settings.cooldown_secs,
                max = MAX_COOLDOWN_SECS,
                "Post office cooldown too long, clamping"
            );
        }
        Self {
            cooldown: Duration::from_secs(settings.cooldown_secs.min(MAX_COOLDOWN_SECS)),
        }
    }
}

impl Default for PostOffice {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(PostOfficeSettings::default().cooldown_secs),
        }
    }
}

#[async_trait]
impl Plugin for PostOffice {
    fn name(&self) -> &str {
        PLUGIN
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("tell", "Pass a message to someone the next time they speak here")
                .cooldown(self.cooldown)
                .usage("tell <nick> <message>"),
            CommandSpec::new("remindme", "Remind yourself of something later")
                .alias("remind")
                .cooldown(self.cooldown)
                .usage("remindme in <n> <minutes|hours|days> <message>"),
            CommandSpec::new("cleartells", "Delete every pending tell in this room")
                .category("admin")
                .admin_only()
                .usage("cleartells yes"),
        ]
    }

    fn schedule(&self) -> Option<Duration> {
        Some(REMINDER_CHECK)
    }

    async fn handle_command(
        &self,
        ctx: &PluginContext<'_>,
        command: &Command,
    ) -> Result<Vec<OutgoingEvent>> {
        let prefix = &ctx.policy.command_prefix;
        let reply = match command.name.as_str() {
            "tell" => {
                let (Some(recipient), message) = (command.first_arg(), command.rest_after(1)) else {
                    return Ok(vec![ctx.reply(format!("Usage: {}tell <nick> <message>", prefix))]);
                };
                if message.is_empty() {
                    format!("Usage: {}tell <nick> <message>", prefix)
                } else if recipient.eq_ignore_ascii_case(ctx.actor_id) {
                    format!("Use '{}remindme' instead.", prefix)
                } else {
                    self.add_tell(ctx, recipient, message)?
                }
            }
            "remindme" | "remind" => match parse_reminder(command.raw_args.trim())
                .and_then(|(after, label, message)| {
                    Some((ctx.timestamp.checked_add_signed(after)?, label, message))
                }) {
                Some((due, label, message)) => {
                    let reminder = Reminder {
                        room_id: ctx.room_id.to_string(),
                        nick: ctx.actor_id.to_string(),
                        due,
                        message: message.clone(),
                    };
                    ctx.store.put(
                        REMINDERS,
                        &uuid::Uuid::new_v4().to_string(),
                        &serde_json::to_string(&reminder)?,
                    )?;
                    format!("Sure, I will remind you of '{}' in {}.", message, label)
                }
                None => format!(
                    "Sorry, I couldn't understand that. Usage: {}remindme in <n> <minutes|hours|days> <message>",
                    prefix
                ),
            },
            "cleartells" => {
                if command.first_arg().is_some_and(|a| a.eq_ignore_ascii_case("yes")) {
                    let room = format!("{}\t", ctx.room_id);
                    let mut cleared = 0;
                    for (key, _) in ctx.store.list(TELLS)? {
                        if key.starts_with(&room) && ctx.store.delete(TELLS, &key)? {
                            cleared += 1;
                        }
                    }
                    tracing::info!(room_id = %ctx.room_id, cleared, "Cleared pending tells");
                    format!("All tells from {} have been deleted.", ctx.room_id)
                } else {
                    format!(
                        "This will delete all tells from {}. To confirm, type '{}cleartells yes'.",
                        ctx.room_id, prefix
                    )
                }
            }
            _ => return Ok(Vec::new()),
        };

        let reply = rewrite(ctx.llm, ctx.config, ctx.policy.llm_enabled, reply, params(ctx)).await;
        Ok(vec![ctx.reply(reply)])
    }

    async fn on_message(&self, ctx: &PluginContext<'_>, _text: &str) -> Result<Vec<OutgoingEvent>> {
        let prefix = tell_prefix(ctx.room_id, ctx.actor_id);
        let mut pending: Vec<(String, Tell)> = Vec::new();
        for (key, raw) in ctx.store.list(TELLS)? {
            if !key.starts_with(&prefix) {
                continue;
            }
            match serde_json::from_str::<Tell>(&raw) {
                Ok(tell) => pending.push((key, tell)),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Dropping unreadable tell");
                    ctx.store.delete(TELLS, &key)?;
                }
            }
        }
        pending.sort_by_key(|(_, tell)| tell.at);

        let mut out = Vec::with_capacity(pending.len());
        for (key, tell) in pending {
            ctx.store.delete(TELLS, &key)?;
            let text = format!(
                "{}, {} wanted me to tell you {}",
                ctx.actor_id, tell.sender, tell.message
            );
            let text = rewrite(ctx.llm, ctx.config, ctx.policy.llm_enabled, text, params(ctx)).await;
            out.push(ctx.say(text));
        }
        Ok(out)
    }

    async fn tick(&self, ctx: &TickContext<'_>, now: DateTime<Utc>) -> Result<Vec<OutgoingEvent>> {
        let mut out = Vec::new();
        for (key, raw) in ctx.store.list(REMINDERS)? {
            let reminder: Reminder = match serde_json::from_str(&raw) {
                Ok(reminder) => reminder,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Dropping unreadable reminder");
                    ctx.store.delete(REMINDERS, &key)?;
                    continue;
                }
            };
            // Keep reminders for rooms we're not in until we come back
            if reminder.due > now || !ctx.joined_rooms.contains(&reminder.room_id) {
                continue;
            }
            ctx.store.delete(REMINDERS, &key)?;
            let text = format!("Reminder for {}: {}", reminder.nick, reminder.message);
            let params = CompletionParams {
                temperature: ctx.config.llm.temperature,
                num_predict: ctx.config.llm.num_predict,
            };
            let text = rewrite(ctx.llm, ctx.config, ctx.config.llm.enabled, text, params).await;
            out.push(OutgoingEvent::new(reminder.room_id, text));
        }
        Ok(out)
    }
}

impl PostOffice {
    fn add_tell(&self, ctx: &PluginContext<'_>, recipient: &str, message: &str) -> Result<String> {
        let key = tell_key(ctx.room_id, recipient, ctx.actor_id);
        let previous = previous_message(ctx.store, &key)?;
        let tell = Tell {
            sender: ctx.actor_id.to_string(),
            recipient: recipient.to_string(),
            message: message.to_string(),
            at: ctx.timestamp,
        };
        ctx.store.put(TELLS, &key, &serde_json::to_string(&tell)?)?;
        Ok(match previous {
            Some(old) => format!(
                "Sure, I will tell {} {} for you instead of {} when I see them.",
                recipient, message, old
            ),
            None => format!(
                "Sure, I will tell {} {} for you when I see them.",
                recipient, message
            ),
        })
    }
}

fn params(ctx: &PluginContext<'_>) -> CompletionParams {
    ctx.policy.completion_params()
}

fn previous_message(store: &dyn Store, key: &str) -> Result<Option<String>> {
    Ok(store
        .get(TELLS, key)?
        .and_then(|raw| serde_json::from_str::<Tell>(&raw).ok())
        .map(|tell| tell.message))
}

/// Run text through the configured filter prompt, keeping the original on failure
async fn rewrite(
    llm: &LlmOrchestrator,
    config: &Config,
    llm_enabled: bool,
    text: String,
    params: CompletionParams,
) -> String {
    let settings: PostOfficeSettings = config.plugin_settings(PLUGIN).unwrap_or_default();
    let Some(prompt) = settings.filter.filter(|_| llm_enabled) else {
        return text;
    };
    match llm.run_prompt(&prompt, &[("text", &text)], params).await {
        Ok(rewritten) => rewritten,
        Err(e) => {
            tracing::warn!(prompt = %prompt, error = %e, "Post office filter failed, sending original");
            text
        }
    }
}

/// Parse "in <n> <unit> <message>" into a delay, a readable label and the message
pub fn parse_reminder(input: &str) -> Option<(TimeDelta, String, String)> {
    let re = regex::Regex::new(
        r"(?i)^in\s+(\d+)\s+(minute|minutes|min|mins|hour|hours|hr|hrs|day|days)\s+(.+)$",
    )
    .ok()?;

    let caps = re.captures(input)?;
    let amount: i64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str().to_lowercase();
    let message = caps.get(3)?.as_str().trim().to_string();
    if amount <= 0 {
        return None;
    }

    let (duration, name) = match unit.as_str() {
        "minute" | "minutes" | "min" | "mins" => (TimeDelta::try_minutes(amount)?, "minute"),
        "hour" | "hours" | "hr" | "hrs" => (TimeDelta::try_hours(amount)?, "hour"),
        "day" | "days" => (TimeDelta::try_days(amount)?, "day"),
        _ => return None,
    };
    let label = format!("{} {}{}", amount, name, if amount == 1 { "" } else { "s" });
    Some((duration, label, message))
}
