// ABOUTME: Cascades global bot settings and per-room overrides into one effective policy.
// ABOUTME: Room fields are tri-state so "absent" and "explicitly empty" stay distinguishable.

use crate::error::ConfigError;
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// A room override field.
///
/// `Unset` inherits the global value, `Cleared` is an explicit empty value
/// (`""` or `[]` in the config file), `Value` carries the override.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Setting<T> {
    #[default]
    Unset,
    Cleared,
    Value(T),
}

impl<T> Setting<T> {
    pub fn is_unset(&self) -> bool {
        matches!(self, Setting::Unset)
    }

    pub fn is_cleared(&self) -> bool {
        matches!(self, Setting::Cleared)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Setting::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl<T: Clone> Setting<T> {
    /// Replace semantics: the override wins when present, `Cleared` falls back.
    pub fn or_inherit(&self, inherited: &T) -> T {
        self.value().cloned().unwrap_or_else(|| inherited.clone())
    }
}

impl<T> Setting<Vec<T>> {
    pub fn items(&self) -> &[T] {
        self.value().map(|v| v.as_slice()).unwrap_or(&[])
    }
}

/// Values that can be written as "empty" in the config file.
pub trait Clearable {
    fn is_cleared(&self) -> bool;
}

impl Clearable for String {
    fn is_cleared(&self) -> bool {
        self.trim().is_empty()
    }
}

impl<T> Clearable for Vec<T> {
    fn is_cleared(&self) -> bool {
        self.is_empty()
    }
}

macro_rules! never_cleared {
    ($($t:ty),*) => {
        $(impl Clearable for $t {
            fn is_cleared(&self) -> bool {
                false
            }
        })*
    };
}

never_cleared!(bool, u32, u64, usize);

impl<'de, T> Deserialize<'de> for Setting<T>
where
    T: Deserialize<'de> + Clearable,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = T::deserialize(deserializer)?;
        if value.is_cleared() {
            Ok(Setting::Cleared)
        } else {
            Ok(Setting::Value(value))
        }
    }
}

/// How unknown commands are answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionMode {
    Off,
    #[default]
    Suggest,
    /// Run the closest command as if it had been typed
    Run,
}

/// Bot-wide defaults, derived from the `[bot]` and `[llm]` config sections.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalPolicy {
    pub command_prefix: String,
    pub nick: String,
    pub cooldown: Duration,
    pub disabled_plugins: Vec<String>,
    pub disabled_commands: Vec<String>,
    pub admins: Vec<String>,
    pub ignored: Vec<String>,
    pub llm_enabled: bool,
    pub llm_filter: bool,
    pub llm_filter_prompt: Option<String>,
    pub temperature: f32,
    pub num_predict: u32,
    pub history_size: usize,
    pub verbose_errors: bool,
    pub apologize_on_llm_failure: bool,
    pub command_suggestions: SuggestionMode,
    pub history_includes_commands: bool,
}

/// Per-room overrides, `[rooms."<id>"]` in the config file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoomPolicy {
    pub command_prefix: Setting<String>,
    pub nick: Setting<String>,
    pub cooldown_secs: Setting<u64>,
    pub disabled_commands: Setting<Vec<String>>,
    pub disabled_plugins: Setting<Vec<String>>,
    /// When set, only these plugins run in the room
    pub whitelist_plugins: Setting<Vec<String>>,
    /// Suppress notices (cooldown, disabled, errors); real replies still go out
    pub silent: Setting<bool>,
    pub allow_mentions: Setting<bool>,
    pub llm_enabled: Setting<bool>,
    pub llm_filter: Setting<bool>,
    pub llm_filter_prompt: Setting<String>,
    /// Backend tried first for conversational replies in this room
    pub llm_backend: Setting<String>,
    pub history_size: Setting<usize>,
}

impl RoomPolicy {
    /// Reject overrides that cannot be meaningfully cleared.
    pub fn validate(&self, room_id: &str) -> Result<(), ConfigError> {
        if self.command_prefix.is_cleared() {
            return Err(ConfigError::Empty(format!(
                "rooms.\"{room_id}\".command_prefix"
            )));
        }
        if self.nick.is_cleared() {
            return Err(ConfigError::Empty(format!("rooms.\"{room_id}\".nick")));
        }
        if let Some(secs) = self.cooldown_secs.value() {
            crate::config::check_cooldown(&format!("rooms.\"{room_id}\".cooldown_secs"), *secs)?;
        }
        if let Some(prefix) = self.command_prefix.value() {
            if prefix.chars().any(char::is_whitespace) {
                return Err(ConfigError::invalid(
                    &format!("rooms.\"{room_id}\".command_prefix"),
                    "must not contain whitespace",
                ));
            }
        }
        Ok(())
    }
}

/// Plugin and command names the registry knows about.
///
/// `commands` maps every name and alias to the canonical command name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownNames {
    pub plugins: BTreeSet<String>,
    pub commands: BTreeMap<String, String>,
}

impl KnownNames {
    fn plugin(&self, name: &str) -> Result<String, ConfigError> {
        let name = name.trim().to_lowercase();
        if self.plugins.contains(&name) {
            Ok(name)
        } else {
            Err(ConfigError::UnknownPlugin(name))
        }
    }

    fn command(&self, name: &str) -> Result<String, ConfigError> {
        let name = name.trim().to_lowercase();
        self.commands
            .get(&name)
            .cloned()
            .ok_or(ConfigError::UnknownCommand(name))
    }
}

/// Fully merged configuration for one room.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectivePolicy {
    pub command_prefix: String,
    pub nick: String,
    pub cooldown: Duration,
    pub disabled_commands: BTreeSet<String>,
    pub disabled_plugins: BTreeSet<String>,
    pub whitelist_plugins: Option<BTreeSet<String>>,
    pub admins: BTreeSet<String>,
    pub ignored: BTreeSet<String>,
    pub silent: bool,
    pub allow_mentions: bool,
    pub llm_enabled: bool,
    pub llm_filter: bool,
    pub llm_filter_prompt: Option<String>,
    pub llm_backend: Option<String>,
    pub temperature: f32,
    pub num_predict: u32,
    pub history_size: usize,
    pub verbose_errors: bool,
    pub apologize_on_llm_failure: bool,
    pub command_suggestions: SuggestionMode,
    pub history_includes_commands: bool,
}

impl EffectivePolicy {
    pub fn completion_params(&self) -> noko_llm::CompletionParams {
        noko_llm::CompletionParams {
            temperature: self.temperature,
            num_predict: self.num_predict,
        }
    }

    pub fn plugin_enabled(&self, plugin: &str) -> bool {
        !self.disabled_plugins.contains(plugin)
            && self
                .whitelist_plugins
                .as_ref()
                .map_or(true, |allowed| allowed.contains(plugin))
    }

    pub fn command_enabled(&self, command: &str, plugin: &str) -> bool {
        self.plugin_enabled(plugin) && !self.disabled_commands.contains(command)
    }

    pub fn is_admin(&self, actor: &str) -> bool {
        self.admins.contains(actor)
    }

    pub fn is_ignored(&self, actor: &str) -> bool {
        self.ignored.contains(actor)
    }

    /// Case-insensitive check for the room's bot nick in a message.
    pub fn mentions_nick(&self, text: &str) -> bool {
        text.to_lowercase().contains(&self.nick.to_lowercase())
    }
}

/// Collect validated names, logging and dropping the ones the registry doesn't know.
fn known_set<'a, F>(room: &str, names: impl Iterator<Item = &'a String>, check: F) -> BTreeSet<String>
where
    F: Fn(&str) -> Result<String, ConfigError>,
{
    names
        .filter_map(|name| match check(name) {
            Ok(canonical) => Some(canonical),
            Err(e) => {
                tracing::warn!(room_id = %room, error = %e, "Ignoring unknown name in policy");
                None
            }
        })
        .collect()
}

/// Merge global defaults with a room's overrides.
///
/// Scalars present in the override replace the global value. Disabled lists
/// are unioned, so a room can add restrictions but never lift a global one.
/// Pure apart from logging: equal inputs always give equal output.
pub fn resolve(
    room_id: &str,
    global: &GlobalPolicy,
    room: Option<&RoomPolicy>,
    known: &KnownNames,
) -> EffectivePolicy {
    let default_room = RoomPolicy::default();
    let room = room.unwrap_or(&default_room);

    let disabled_plugins = known_set(
        room_id,
        global
            .disabled_plugins
            .iter()
            .chain(room.disabled_plugins.items()),
        |n| known.plugin(n),
    );
    let disabled_commands = known_set(
        room_id,
        global
            .disabled_commands
            .iter()
            .chain(room.disabled_commands.items()),
        |n| known.command(n),
    );
    let whitelist_plugins = room
        .whitelist_plugins
        .value()
        .map(|list| known_set(room_id, list.iter(), |n| known.plugin(n)));

    let llm_filter_prompt = match &room.llm_filter_prompt {
        Setting::Value(p) => Some(p.clone()),
        Setting::Cleared => None,
        Setting::Unset => global.llm_filter_prompt.clone(),
    };

    EffectivePolicy {
        command_prefix: room.command_prefix.or_inherit(&global.command_prefix),
        nick: room.nick.or_inherit(&global.nick),
        cooldown: room
            .cooldown_secs
            .value()
            .map(|s| Duration::from_secs(*s))
            .unwrap_or(global.cooldown),
        disabled_commands,
        disabled_plugins,
        whitelist_plugins,
        admins: global.admins.iter().cloned().collect(),
        ignored: global.ignored.iter().cloned().collect(),
        silent: room.silent.or_inherit(&false),
        allow_mentions: room.allow_mentions.or_inherit(&true),
        llm_enabled: room.llm_enabled.or_inherit(&global.llm_enabled),
        llm_filter: room.llm_filter.or_inherit(&global.llm_filter),
        llm_filter_prompt,
        llm_backend: room.llm_backend.value().cloned(),
        temperature: global.temperature,
        num_predict: global.num_predict,
        history_size: room.history_size.or_inherit(&global.history_size),
        verbose_errors: global.verbose_errors,
        apologize_on_llm_failure: global.apologize_on_llm_failure,
        command_suggestions: global.command_suggestions,
        history_includes_commands: global.history_includes_commands,
    }
}
