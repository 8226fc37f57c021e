// ABOUTME: Plugin trait, per-invocation contexts, and the registry of plugins and their commands.
// ABOUTME: Command names and aliases are unique across the registry; plugins only run when a room enables them.

use crate::commands::{closest_command, Command};
use crate::config::Config;
use crate::error::RegistryError;
use crate::history::HistoryEntry;
use crate::ignore::IgnoreList;
use crate::llm::LlmOrchestrator;
use crate::policy::{EffectivePolicy, KnownNames};
use crate::store::Store;
use crate::traits::{BotControl, OutgoingEvent};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Name of the plugin that answers mentions and direct messages with the LLM.
///
/// Disabling it in a room turns off conversational replies there.
pub const CHAT_PLUGIN: &str = "chat";

/// Static description of one command a plugin serves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: String,
    pub aliases: Vec<String>,
    /// Commands in the same category share one cooldown
    pub category: Option<String>,
    /// Overrides the room cooldown when set
    pub cooldown: Option<Duration>,
    pub admin_only: bool,
    /// Left out of help listings and suggestions
    pub hidden: bool,
    pub usage: Option<String>,
    pub help: String,
}

impl CommandSpec {
    pub fn new(name: &str, help: &str) -> Self {
        Self {
            name: name.to_lowercase(),
            aliases: Vec::new(),
            category: None,
            cooldown: None,
            admin_only: false,
            hidden: false,
            usage: None,
            help: help.to_string(),
        }
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_lowercase());
        self
    }

    pub fn category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    pub fn admin_only(mut self) -> Self {
        self.admin_only = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn usage(mut self, usage: &str) -> Self {
        self.usage = Some(usage.to_string());
        self
    }

    /// Every name this command answers to, canonical first
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// Everything a plugin can see while handling one inbound message.
pub struct PluginContext<'a> {
    pub room_id: &'a str,
    pub actor_id: &'a str,
    pub timestamp: DateTime<Utc>,
    pub is_admin: bool,
    pub is_direct: bool,
    pub policy: &'a EffectivePolicy,
    /// Room history at the time of the message, oldest first
    pub history: &'a [HistoryEntry],
    pub config: &'a Config,
    pub llm: &'a LlmOrchestrator,
    pub store: &'a dyn Store,
    pub registry: &'a PluginRegistry,
    pub control: &'a dyn BotControl,
    pub ignore: &'a IgnoreList,
}

impl PluginContext<'_> {
    /// Reply in the current room, addressed to the sender
    pub fn reply(&self, text: impl Into<String>) -> OutgoingEvent {
        let event = OutgoingEvent::new(self.room_id, text);
        if self.is_direct {
            event
        } else {
            event.mentioning(self.actor_id)
        }
    }

    /// Say something in the current room without addressing anyone
    pub fn say(&self, text: impl Into<String>) -> OutgoingEvent {
        OutgoingEvent::new(self.room_id, text)
    }

    pub fn settings<T: DeserializeOwned + Default>(&self, plugin: &str) -> Result<T> {
        self.config.plugin_settings(plugin)
    }
}

/// What a scheduled plugin sees on each tick
pub struct TickContext<'a> {
    pub config: &'a Config,
    pub llm: &'a LlmOrchestrator,
    pub store: &'a dyn Store,
    pub joined_rooms: &'a [String],
}

impl TickContext<'_> {
    pub fn settings<T: DeserializeOwned + Default>(&self, plugin: &str) -> Result<T> {
        self.config.plugin_settings(plugin)
    }
}

/// A unit of bot behavior: commands, passive message hooks, and scheduled work.
///
/// Every hook has a no-op default, so plugins implement only what they use.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique, lowercase plugin name used in policies
    fn name(&self) -> &str;

    fn commands(&self) -> Vec<CommandSpec> {
        Vec::new()
    }

    /// How often `tick` should run, if at all
    fn schedule(&self) -> Option<Duration> {
        None
    }

    async fn handle_command(
        &self,
        _ctx: &PluginContext<'_>,
        _command: &Command,
    ) -> Result<Vec<OutgoingEvent>> {
        Ok(Vec::new())
    }

    /// Called for every non-command message in rooms where the plugin is enabled
    async fn on_message(&self, _ctx: &PluginContext<'_>, _text: &str) -> Result<Vec<OutgoingEvent>> {
        Ok(Vec::new())
    }

    /// Scheduled work; returned events are checked against the target room's policy before sending
    async fn tick(&self, _ctx: &TickContext<'_>, _now: DateTime<Utc>) -> Result<Vec<OutgoingEvent>> {
        Ok(Vec::new())
    }
}

/// A command name resolved to the plugin serving it
#[derive(Clone)]
pub struct ResolvedCommand {
    pub plugin: Arc<dyn Plugin>,
    pub spec: CommandSpec,
}

impl std::fmt::Debug for ResolvedCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCommand")
            .field("plugin", &self.plugin.name())
            .field("spec", &self.spec)
            .finish()
    }
}

impl ResolvedCommand {
    pub fn plugin_name(&self) -> &str {
        self.plugin.name()
    }

    /// Cooldown bucket: the category if the command has one, otherwise its name
    pub fn cooldown_key(&self) -> &str {
        self.spec.category.as_deref().unwrap_or(&self.spec.name)
    }
}

/// All registered plugins and the commands they serve.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
    /// Every name and alias, mapped to its command
    commands: BTreeMap<String, ResolvedCommand>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plugin and its commands.
    ///
    /// Fails without changing the registry if the plugin name or any command
    /// name or alias is already taken.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<(), RegistryError> {
        let plugin_name = plugin.name().to_string();
        if self.get(&plugin_name).is_some() {
            return Err(RegistryError::DuplicatePlugin(plugin_name));
        }

        let specs = plugin.commands();
        let mut claimed: BTreeMap<String, &CommandSpec> = BTreeMap::new();
        for spec in &specs {
            for name in spec.names() {
                let existing = self
                    .commands
                    .get(name)
                    .map(|c| c.plugin_name().to_string())
                    .or_else(|| claimed.get(name).map(|_| plugin_name.clone()));
                if let Some(existing) = existing {
                    return Err(RegistryError::DuplicateCommand {
                        command: name.to_string(),
                        plugin: plugin_name,
                        existing,
                    });
                }
                claimed.insert(name.to_string(), spec);
            }
        }

        for (name, spec) in claimed {
            self.commands.insert(
                name,
                ResolvedCommand {
                    plugin: Arc::clone(&plugin),
                    spec: spec.clone(),
                },
            );
        }
        tracing::debug!(plugin = %plugin_name, commands = specs.len(), "Registered plugin");
        self.plugins.push(plugin);
        Ok(())
    }

    /// Look up a command by name or alias
    pub fn resolve(&self, name: &str) -> Result<&ResolvedCommand, RegistryError> {
        self.commands
            .get(&name.to_lowercase())
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn get(&self, plugin: &str) -> Option<&Arc<dyn Plugin>> {
        self.plugins.iter().find(|p| p.name() == plugin)
    }

    /// Plugins in registration order
    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    pub fn list_enabled(&self, policy: &EffectivePolicy) -> Vec<Arc<dyn Plugin>> {
        self.plugins
            .iter()
            .filter(|p| policy.plugin_enabled(p.name()))
            .cloned()
            .collect()
    }

    /// Plugins that asked for periodic ticks, with their intervals
    pub fn scheduled(&self) -> Vec<(Arc<dyn Plugin>, Duration)> {
        self.plugins
            .iter()
            .filter_map(|p| p.schedule().map(|every| (Arc::clone(p), every)))
            .collect()
    }

    /// Names policies may refer to
    pub fn known_names(&self) -> KnownNames {
        KnownNames {
            plugins: self.plugins.iter().map(|p| p.name().to_string()).collect(),
            commands: self
                .commands
                .iter()
                .map(|(name, c)| (name.clone(), c.spec.name.clone()))
                .collect(),
        }
    }

    /// Commands the actor may run in a room, sorted by name, without aliases
    pub fn visible_commands(&self, policy: &EffectivePolicy, is_admin: bool) -> Vec<&ResolvedCommand> {
        self.commands
            .iter()
            .filter(|(name, c)| **name == c.spec.name)
            .map(|(_, c)| c)
            .filter(|c| !c.spec.hidden)
            .filter(|c| is_admin || !c.spec.admin_only)
            .filter(|c| policy.command_enabled(&c.spec.name, c.plugin_name()))
            .collect()
    }

    /// Nearest visible command to a mistyped name
    pub fn suggest(&self, name: &str, policy: &EffectivePolicy, is_admin: bool) -> Option<String> {
        let visible = self.visible_commands(policy, is_admin);
        closest_command(name, visible.iter().map(|c| c.spec.name.as_str())).map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{resolve, RoomPolicy, Setting};

    struct Fake {
        name: &'static str,
        commands: Vec<CommandSpec>,
        every: Option<Duration>,
    }

    #[async_trait]
    impl Plugin for Fake {
        fn name(&self) -> &str {
            self.name
        }

        fn commands(&self) -> Vec<CommandSpec> {
            self.commands.clone()
        }

        fn schedule(&self) -> Option<Duration> {
            self.every
        }
    }

    fn fake(name: &'static str, commands: Vec<CommandSpec>) -> Arc<dyn Plugin> {
        Arc::new(Fake {
            name,
            commands,
            every: None,
        })
    }

    fn registry() -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        registry
            .register(fake(
                "default",
                vec![
                    CommandSpec::new("help", "List commands").alias("h"),
                    CommandSpec::new("ping", "Pong"),
                    CommandSpec::new("reload", "Reload config").admin_only(),
                ],
            ))
            .unwrap();
        registry
            .register(fake(
                "post_office",
                vec![
                    CommandSpec::new("tell", "Leave a message").category("post"),
                    CommandSpec::new("remindme", "Set a reminder").category("post"),
                ],
            ))
            .unwrap();
        registry
    }

    fn policy(registry: &PluginRegistry, room: Option<&RoomPolicy>) -> EffectivePolicy {
        resolve(
            "lobby",
            &Config::default().global_policy(),
            room,
            &registry.known_names(),
        )
    }

    #[test]
    fn test_resolve_name_and_alias() {
        let registry = registry();
        assert_eq!(registry.resolve("help").unwrap().spec.name, "help");
        assert_eq!(registry.resolve("H").unwrap().spec.name, "help");
        assert_eq!(registry.resolve("tell").unwrap().plugin_name(), "post_office");
        assert_eq!(
            registry.resolve("nope").unwrap_err(),
            RegistryError::NotFound("nope".into())
        );
    }

    #[test]
    fn test_duplicate_plugin_rejected() {
        let mut registry = registry();
        let err = registry.register(fake("default", vec![])).unwrap_err();
        assert_eq!(err, RegistryError::DuplicatePlugin("default".into()));
    }

    #[test]
    fn test_duplicate_command_rejected_atomically() {
        let mut registry = registry();
        let err = registry
            .register(fake(
                "other",
                vec![CommandSpec::new("fresh", "x"), CommandSpec::new("x", "y").alias("h")],
            ))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateCommand {
                command: "h".into(),
                plugin: "other".into(),
                existing: "default".into(),
            }
        );
        assert!(registry.resolve("fresh").is_err());
        assert!(registry.get("other").is_none());
    }

    #[test]
    fn test_duplicate_within_one_plugin_rejected() {
        let mut registry = PluginRegistry::new();
        let err = registry
            .register(fake(
                "dup",
                vec![CommandSpec::new("a", "x"), CommandSpec::new("b", "y").alias("a")],
            ))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateCommand { .. }));
    }

    #[test]
    fn test_cooldown_key_uses_category() {
        let registry = registry();
        assert_eq!(registry.resolve("tell").unwrap().cooldown_key(), "post");
        assert_eq!(registry.resolve("ping").unwrap().cooldown_key(), "ping");
    }

    #[test]
    fn test_known_names_include_aliases() {
        let known = registry().known_names();
        assert!(known.plugins.contains("post_office"));
        assert_eq!(known.commands.get("h").map(String::as_str), Some("help"));
    }

    #[test]
    fn test_list_enabled_respects_policy() {
        let registry = registry();
        let room = RoomPolicy {
            disabled_plugins: Setting::Value(vec!["post_office".into()]),
            ..Default::default()
        };
        let policy = policy(&registry, Some(&room));
        let names: Vec<String> = registry
            .list_enabled(&policy)
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(names, vec!["default"]);
    }

    #[test]
    fn test_visible_commands_hide_admin_and_disabled() {
        let registry = registry();
        let room = RoomPolicy {
            disabled_commands: Setting::Value(vec!["ping".into()]),
            ..Default::default()
        };
        let policy = policy(&registry, Some(&room));
        let names: Vec<&str> = registry
            .visible_commands(&policy, false)
            .iter()
            .map(|c| c.spec.name.as_str())
            .collect();
        assert_eq!(names, vec!["help", "remindme", "tell"]);

        let admin: Vec<&str> = registry
            .visible_commands(&policy, true)
            .iter()
            .map(|c| c.spec.name.as_str())
            .collect();
        assert!(admin.contains(&"reload"));
    }

    #[test]
    fn test_suggest_only_visible() {
        let registry = registry();
        let policy = policy(&registry, None);
        assert_eq!(
            registry.suggest("remndme", &policy, false).as_deref(),
            Some("remindme")
        );
        assert_eq!(registry.suggest("reloda", &policy, false), None);
        assert_eq!(
            registry.suggest("reloda", &policy, true).as_deref(),
            Some("reload")
        );
    }

    #[test]
    fn test_scheduled_plugins() {
        let mut registry = registry();
        registry
            .register(Arc::new(Fake {
                name: "feeds",
                commands: vec![],
                every: Some(Duration::from_secs(300)),
            }))
            .unwrap();
        let scheduled = registry.scheduled();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].0.name(), "feeds");
        assert_eq!(scheduled[0].1, Duration::from_secs(300));
    }
}
