// ABOUTME: Core commands every deployment wants: help, ping, room membership, ignores, reload and shutdown
// ABOUTME: Help output only lists commands the asking user could actually run in this room

use anyhow::Result;
use async_trait::async_trait;
use noko_core::commands::Command;
use noko_core::{CommandSpec, OutgoingEvent, Plugin, PluginContext};
use crate::logging;
use std::collections::BTreeSet;

pub struct DefaultPlugin;

#[async_trait]
impl Plugin for DefaultPlugin {
    fn name(&self) -> &str {
        "default"
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("help", "List commands, or describe one command or category")
                .alias("h")
                .alias("commands")
                .usage("help [command|category]"),
            CommandSpec::new("ping", "Check that the bot is alive"),
            CommandSpec::new("join", "Join a room")
                .category("admin")
                .admin_only()
                .usage("join <room>"),
            CommandSpec::new("leave", "Leave a room, this one by default")
                .category("admin")
                .admin_only()
                .usage("leave [room]"),
            CommandSpec::new("ignore", "Manage the runtime ignore list")
                .category("admin")
                .admin_only()
                .usage("ignore add|remove <nick...> | ignore list"),
            CommandSpec::new("reload", "Re-read the configuration file")
                .alias("restart")
                .alias("reboot")
                .category("admin")
                .admin_only(),
            CommandSpec::new("logs", "Show the end of the log file, in direct messages only")
                .category("admin")
                .admin_only()
                .usage("logs [num] | logs <start> <num>"),
            CommandSpec::new("shutdown", "Stop the bot process")
                .category("admin")
                .admin_only(),
        ]
    }

    async fn handle_command(
        &self,
        ctx: &PluginContext<'_>,
        command: &Command,
    ) -> Result<Vec<OutgoingEvent>> {
        let reply = match command.name.as_str() {
            "help" | "h" | "commands" => help(ctx, command.first_arg()),
            "ping" => "pong".to_string(),
            "join" => match command.first_arg() {
                Some(room) => {
                    if ctx.control.join(room).await? {
                        format!("Joining {}", room)
                    } else {
                        format!("Already in {}", room)
                    }
                }
                None => usage(ctx, "join <room>"),
            },
            "leave" => {
                let room = command.first_arg().unwrap_or(ctx.room_id);
                if room == ctx.room_id {
                    tracing::info!(room_id = %room, actor = %ctx.actor_id, "Leaving room on request");
                    ctx.control.leave(room).await?;
                    return Ok(Vec::new());
                }
                if ctx.control.leave(room).await? {
                    format!("Left {}", room)
                } else {
                    format!("Not in {}", room)
                }
            }
            "ignore" => ignore(ctx, command)?,
            "reload" | "restart" | "reboot" => match ctx.control.reload().await {
                Ok(generation) => format!("Configuration reloaded (generation {}).", generation),
                Err(e) => format!("Reload failed, keeping the current configuration: {}", e),
            },
            "logs" => {
                // Log lines can carry other rooms' messages
                if !ctx.is_direct {
                    return Ok(Vec::new());
                }
                logs(ctx, command).await?
            }
            "shutdown" => {
                tracing::warn!(actor = %ctx.actor_id, room_id = %ctx.room_id, "Shutdown requested from chat");
                ctx.control.request_shutdown();
                "Going to sleep...".to_string()
            }
            _ => return Ok(Vec::new()),
        };
        Ok(vec![ctx.reply(reply)])
    }
}

fn usage(ctx: &PluginContext<'_>, usage: &str) -> String {
    format!("Usage: {}{}", ctx.policy.command_prefix, usage)
}

fn help(ctx: &PluginContext<'_>, topic: Option<&str>) -> String {
    let visible = ctx.registry.visible_commands(ctx.policy, ctx.is_admin);
    let prefix = &ctx.policy.command_prefix;

    let Some(topic) = topic.map(|t| t.trim_start_matches(prefix.as_str()).to_lowercase()) else {
        let general: Vec<&str> = visible
            .iter()
            .filter(|c| c.spec.category.is_none())
            .map(|c| c.spec.name.as_str())
            .collect();
        let categories: BTreeSet<&str> = visible
            .iter()
            .filter_map(|c| c.spec.category.as_deref())
            .collect();

        let mut text = format!("Available commands: {}.", general.join(", "));
        if !categories.is_empty() {
            let categories: Vec<&str> = categories.into_iter().collect();
            text.push_str(&format!(
                " Categories: {}. Use '{}help <category>' to list one.",
                categories.join(", "),
                prefix
            ));
        }
        return text;
    };

    // Aliases resolve to their command, but only if the command is visible
    if let Ok(resolved) = ctx.registry.resolve(&topic) {
        if visible.iter().any(|c| c.spec.name == resolved.spec.name) {
            let spec = &resolved.spec;
            let mut text = format!("{}{}: {}", prefix, spec.name, spec.help);
            if let Some(usage) = &spec.usage {
                text.push_str(&format!(" Usage: {}{}", prefix, usage));
            }
            if !spec.aliases.is_empty() {
                text.push_str(&format!(" Aliases: {}.", spec.aliases.join(", ")));
            }
            return text;
        }
    }

    let in_category: Vec<&str> = visible
        .iter()
        .filter(|c| c.spec.category.as_deref() == Some(topic.as_str()))
        .map(|c| c.spec.name.as_str())
        .collect();
    if in_category.is_empty() {
        format!("No command or category named '{}' found.", topic)
    } else {
        format!(
            "Commands in category '{}': {}.",
            topic,
            in_category.join(", ")
        )
    }
}

async fn logs(ctx: &PluginContext<'_>, command: &Command) -> Result<String> {
    let config = &ctx.config.logging;
    if !config.log_to_file {
        return Ok("Logging to file is disabled.".to_string());
    }
    let numbers: Option<Vec<usize>> = command.args.iter().map(|a| a.parse().ok()).collect();
    let (start, num) = match numbers.as_deref() {
        Some([]) => (1, 10),
        Some([num]) => (1, *num),
        Some([start, num]) => (*start, *num),
        _ => return Ok(usage(ctx, "logs [num] | logs <start> <num>")),
    };

    let path = logging::log_file(config);
    let content = match tokio::fs::read(&path).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Could not read log file");
            return Ok(format!("Could not read {}.", path.display()));
        }
    };
    let lines = tail(&content, start, num);
    if lines.is_empty() {
        Ok("The log file is empty.".to_string())
    } else {
        Ok(lines)
    }
}

/// `num` lines ending `start` lines from the bottom; `start = 1` is the newest line
pub fn tail(content: &str, start: usize, num: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let end = lines.len().saturating_sub(start.saturating_sub(1));
    let begin = end.saturating_sub(num);
    lines[begin..end].join("\n")
}

fn ignore(ctx: &PluginContext<'_>, command: &Command) -> Result<String> {
    let nicks: Vec<&str> = command.args.iter().skip(1).map(|s| s.as_str()).collect();
    match command.first_arg() {
        Some("add") if !nicks.is_empty() => {
            for nick in &nicks {
                ctx.ignore.add(nick)?;
            }
            Ok(format!("Ignoring {}.", nicks.join(", ")))
        }
        Some("remove") if !nicks.is_empty() => {
            let mut removed = Vec::new();
            for nick in &nicks {
                if ctx.ignore.remove(nick)? {
                    removed.push(*nick);
                }
            }
            if removed.is_empty() {
                Ok("None of those users were ignored.".to_string())
            } else {
                Ok(format!("No longer ignoring {}.", removed.join(", ")))
            }
        }
        Some("list") => {
            let ignored = ctx.ignore.list();
            if ignored.is_empty() {
                Ok("Nobody is ignored.".to_string())
            } else {
                Ok(format!("Ignored users: {}", ignored.join(", ")))
            }
        }
        _ => Ok(usage(ctx, "ignore add|remove <nick...> | ignore list")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "one\ntwo\nthree\nfour\n";

    #[test]
    fn test_tail_takes_newest_lines() {
        assert_eq!(tail(LOG, 1, 2), "three\nfour");
        assert_eq!(tail(LOG, 1, 10), "one\ntwo\nthree\nfour");
    }

    #[test]
    fn test_tail_can_start_further_back() {
        assert_eq!(tail(LOG, 2, 2), "two\nthree");
        assert_eq!(tail(LOG, 9, 2), "");
        assert_eq!(tail("", 1, 5), "");
    }
}
