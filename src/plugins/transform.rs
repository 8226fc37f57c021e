// ABOUTME: Restyles text through the LLM, one command per `*_filter` prompt
// ABOUTME: `[llm.prompts] pirate_filter = "..."` becomes `.pirate <text>`

use anyhow::Result;
use async_trait::async_trait;
use noko_core::commands::Command;
use noko_core::{CommandSpec, Config, OutgoingEvent, Plugin, PluginContext};
use std::time::Duration;

const PLUGIN: &str = "transform";
const FILTER_SUFFIX: &str = "_filter";
const COOLDOWN: Duration = Duration::from_secs(30);

pub struct TransformPlugin {
    styles: Vec<String>,
}

impl TransformPlugin {
    /// One style per `*_filter` prompt; none at all while the LLM is disabled.
    pub fn from_config(config: &Config) -> Self {
        if !config.llm.enabled {
            tracing::info!("LLM disabled, no transform commands registered");
            return Self { styles: Vec::new() };
        }
        let styles = config
            .llm
            .prompts
            .keys()
            .filter_map(|name| name.strip_suffix(FILTER_SUFFIX))
            .filter(|style| !style.is_empty() && !style.contains(char::is_whitespace))
            .map(str::to_lowercase)
            .collect();
        Self { styles }
    }

    /// Drop styles whose command name is already taken by another plugin
    pub fn skipping(mut self, taken: impl Fn(&str) -> bool) -> Self {
        self.styles.retain(|style| {
            let clash = taken(style);
            if clash {
                tracing::warn!(style = %style, "Transform style clashes with an existing command, skipping");
            }
            !clash
        });
        self
    }

    pub fn styles(&self) -> &[String] {
        &self.styles
    }
}

#[async_trait]
impl Plugin for TransformPlugin {
    fn name(&self) -> &str {
        PLUGIN
    }

    fn commands(&self) -> Vec<CommandSpec> {
        self.styles
            .iter()
            .map(|style| {
                CommandSpec::new(style, &format!("Rewrite text in the {} style", style))
                    .category(PLUGIN)
                    .cooldown(COOLDOWN)
                    .usage(&format!("{} <text>", style))
            })
            .collect()
    }

    async fn handle_command(
        &self,
        ctx: &PluginContext<'_>,
        command: &Command,
    ) -> Result<Vec<OutgoingEvent>> {
        let style = command.name.as_str();
        let text = command.raw_args.trim();
        if text.is_empty() {
            return Ok(vec![ctx.reply(format!(
                "Usage: {}{} <text>",
                ctx.policy.command_prefix, style
            ))]);
        }
        if !ctx.policy.llm_enabled {
            return Ok(vec![ctx.reply("Conversation is switched off here.")]);
        }

        let prompt = format!("{}{}", style, FILTER_SUFFIX);
        let reply = match ctx
            .llm
            .run_prompt(&prompt, &[("text", text)], ctx.policy.completion_params())
            .await
        {
            Ok(rewritten) => rewritten,
            Err(e) => {
                tracing::warn!(prompt = %prompt, error = %e, "Transform failed");
                format!("Could not {} that right now.", style)
            }
        };
        Ok(vec![ctx.reply(reply)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROMPTS: &str = r#"
[llm.prompts]
pirate_filter = "Say it like a pirate: {text}"
chat = "You are {bot_nick}."
_filter = "nameless"
"#;

    #[test]
    fn test_styles_come_from_filter_prompts() {
        let config = Config::parse(PROMPTS).unwrap();
        let plugin = TransformPlugin::from_config(&config);
        assert_eq!(plugin.styles(), ["pirate"]);

        let specs = plugin.commands();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].category.as_deref(), Some("transform"));
        assert_eq!(specs[0].cooldown, Some(COOLDOWN));
    }

    #[test]
    fn test_no_styles_without_llm() {
        let config = Config::parse(&format!("[llm]\nenabled = false\n{}", PROMPTS)).unwrap();
        assert!(TransformPlugin::from_config(&config).styles().is_empty());
    }

    #[test]
    fn test_clashing_styles_are_skipped() {
        let config = Config::parse(PROMPTS).unwrap();
        let plugin = TransformPlugin::from_config(&config).skipping(|name| name == "pirate");
        assert!(plugin.commands().is_empty());
    }
}
