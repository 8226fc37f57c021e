// ABOUTME: Remembers each user's last message per room and answers "seen <nick>"
// ABOUTME: Sightings live in the store so they survive restarts

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use noko_core::commands::Command;
use noko_core::{CommandSpec, OutgoingEvent, Plugin, PluginContext};
use serde::{Deserialize, Serialize};

const NAMESPACE: &str = "seen";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sighting {
    nick: String,
    at: DateTime<Utc>,
    text: String,
}

fn key(room_id: &str, nick: &str) -> String {
    format!("{}\t{}", room_id, nick.to_lowercase())
}

pub struct SeenPlugin;

#[async_trait]
impl Plugin for SeenPlugin {
    fn name(&self) -> &str {
        "seen"
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![CommandSpec::new("seen", "When did someone last say something here")
            .alias("lastseen")
            .usage("seen [nick]")]
    }

    async fn on_message(&self, ctx: &PluginContext<'_>, text: &str) -> Result<Vec<OutgoingEvent>> {
        let sighting = Sighting {
            nick: ctx.actor_id.to_string(),
            at: ctx.timestamp,
            text: text.to_string(),
        };
        ctx.store.put(
            NAMESPACE,
            &key(ctx.room_id, ctx.actor_id),
            &serde_json::to_string(&sighting)?,
        )?;
        Ok(Vec::new())
    }

    async fn handle_command(
        &self,
        ctx: &PluginContext<'_>,
        command: &Command,
    ) -> Result<Vec<OutgoingEvent>> {
        let nick = command.first_arg().unwrap_or(ctx.actor_id);
        let reply = match ctx.store.get(NAMESPACE, &key(ctx.room_id, nick))? {
            Some(raw) => {
                let sighting: Sighting = serde_json::from_str(&raw)?;
                let age = (ctx.timestamp - sighting.at).num_seconds().max(0) as u64;
                format!(
                    "User '{}' was last seen {} ago saying '{}'.",
                    sighting.nick,
                    readable_age(age),
                    sighting.text
                )
            }
            None => format!("No messages from {} found.", nick),
        };
        Ok(vec![ctx.reply(reply)])
    }
}

fn plural(n: u64, unit: &str) -> String {
    format!("{} {}{}", n, unit, if n == 1 { "" } else { "s" })
}

/// Human-friendly elapsed time, coarser the older it gets
pub fn readable_age(secs: u64) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;

    if secs < MINUTE {
        plural(secs, "second")
    } else if secs < HOUR {
        plural(secs / MINUTE, "minute")
    } else if secs < DAY {
        format!(
            "{} and {}",
            plural(secs / HOUR, "hour"),
            plural(secs % HOUR / MINUTE, "minute")
        )
    } else if secs < 30 * DAY {
        format!(
            "{} and {}",
            plural(secs / DAY, "day"),
            plural(secs % DAY / HOUR, "hour")
        )
    } else {
        plural(secs / DAY, "day")
    }
}
