// ABOUTME: Marker plugin for conversational LLM replies
// ABOUTME: Disabling "chat" in a room turns off mention and DM replies there

use anyhow::Result;
use async_trait::async_trait;
use noko_core::commands::Command;
use noko_core::plugin::CHAT_PLUGIN;
use noko_core::{CommandSpec, OutgoingEvent, Plugin, PluginContext};

pub struct ChatPlugin;

#[async_trait]
impl Plugin for ChatPlugin {
    fn name(&self) -> &str {
        CHAT_PLUGIN
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![CommandSpec::new("chat", "How to talk to the bot")]
    }

    async fn handle_command(
        &self,
        ctx: &PluginContext<'_>,
        _command: &Command,
    ) -> Result<Vec<OutgoingEvent>> {
        let text = if !ctx.policy.llm_enabled || !ctx.llm.is_configured() {
            "Conversation is switched off here.".to_string()
        } else if ctx.is_direct {
            "Just say something and I will answer.".to_string()
        } else {
            format!(
                "Mention {} in a message, or message me directly, and I will answer.",
                ctx.policy.nick
            )
        };
        Ok(vec![ctx.reply(text)])
    }
}
