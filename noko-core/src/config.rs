// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Validates ranges and names, and derives the global policy for rooms
use crate::error::ConfigError;
use crate::paths;
use crate::policy::{GlobalPolicy, RoomPolicy, SuggestionMode};
use anyhow::{Context, Result};
use noko_llm::BackendConfig;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const TEMPERATURE_RANGE: (f32, f32) = (0.0, 2.0);
pub const NUM_PREDICT_RANGE: (u32, u32) = (1, 8192);
/// One year; anything longer is a typo rather than a throttle
pub const MAX_COOLDOWN_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub rooms: BTreeMap<String, RoomPolicy>,
    /// Free-form per-plugin tables, `[plugins.<name>]`
    #[serde(default)]
    pub plugins: BTreeMap<String, toml::Table>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_nick")]
    pub nick: String,
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    #[serde(default = "default_command_cooldown")]
    pub command_cooldown_secs: u64,
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default)]
    pub ignored: Vec<String>,
    #[serde(default)]
    pub disabled_plugins: Vec<String>,
    #[serde(default)]
    pub disabled_commands: Vec<String>,
    /// Rooms joined at startup
    #[serde(default)]
    pub autojoin: Vec<String>,
    /// Tell the room when a command is disabled or fails
    #[serde(default)]
    pub verbose_errors: bool,
    #[serde(default = "default_true")]
    pub apologize_on_llm_failure: bool,
    #[serde(default = "default_llm_failure_message")]
    pub llm_failure_message: String,
    #[serde(default)]
    pub command_suggestions: SuggestionMode,
    #[serde(default = "default_true")]
    pub history_includes_commands: bool,
    /// Append every history entry to the `audit` store log
    #[serde(default)]
    pub audit_log: bool,
    #[serde(default = "default_queue_size")]
    pub room_queue_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaMode {
    /// One style/mood per room, re-rolled on config reload
    #[default]
    Sticky,
    PerMessage,
}

#[derive(Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_num_predict")]
    pub num_predict: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    /// Number of recent history entries included in a chat request
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Per-actor cooldown between conversational replies
    #[serde(default = "default_chat_cooldown")]
    pub chat_cooldown_secs: u64,
    /// Pass every outgoing message through the filter prompt
    #[serde(default)]
    pub filter_all_msgs: bool,
    #[serde(default)]
    pub filter_prompt: Option<String>,
    /// Name of the `[llm.prompts]` template used as the chat preamble
    #[serde(default)]
    pub chat_prompt: Option<String>,
    #[serde(default)]
    pub styles: Vec<String>,
    #[serde(default)]
    pub moods: Vec<String>,
    #[serde(default)]
    pub persona_mode: PersonaMode,
    /// Named templates with `{placeholder}` substitution
    #[serde(default)]
    pub prompts: BTreeMap<String, String>,
    /// Backends in priority order
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

// Custom Debug impl so backend tables (which may hold API keys) never reach logs
impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backends: Vec<&str> = self.backends.iter().map(|b| b.name()).collect();
        f.debug_struct("LlmConfig")
            .field("enabled", &self.enabled)
            .field("temperature", &self.temperature)
            .field("num_predict", &self.num_predict)
            .field("timeout_secs", &self.timeout_secs)
            .field("history_window", &self.history_window)
            .field("filter_all_msgs", &self.filter_all_msgs)
            .field("persona_mode", &self.persona_mode)
            .field("prompts", &self.prompts.keys().collect::<Vec<_>>())
            .field("backends", &backends)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub log_to_file: bool,
    #[serde(default)]
    pub log_file_path: Option<String>,
}

#[derive(Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("enabled", &self.enabled)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("metrics", &self.metrics)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// SQLite file; defaults to the XDG data dir
    #[serde(default)]
    pub path: Option<String>,
    /// Keep everything in memory (nothing survives a restart)
    #[serde(default)]
    pub in_memory: bool,
}

fn default_nick() -> String {
    "noko".to_string()
}

fn default_command_prefix() -> String {
    ".".to_string()
}

fn default_command_cooldown() -> u64 {
    2
}

fn default_chat_cooldown() -> u64 {
    60
}

fn default_max_history() -> usize {
    100
}

fn default_true() -> bool {
    true
}

fn default_llm_failure_message() -> String {
    "Sorry, I can't think of anything right now.".to_string()
}

fn default_queue_size() -> usize {
    256
}

fn default_temperature() -> f32 {
    1.2
}

fn default_num_predict() -> u32 {
    256
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_history_window() -> usize {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    13000
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            nick: default_nick(),
            command_prefix: default_command_prefix(),
            command_cooldown_secs: default_command_cooldown(),
            max_history: default_max_history(),
            admins: Vec::new(),
            ignored: Vec::new(),
            disabled_plugins: Vec::new(),
            disabled_commands: Vec::new(),
            autojoin: Vec::new(),
            verbose_errors: false,
            apologize_on_llm_failure: true,
            llm_failure_message: default_llm_failure_message(),
            command_suggestions: SuggestionMode::default(),
            history_includes_commands: true,
            audit_log: false,
            room_queue_size: default_queue_size(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            temperature: default_temperature(),
            num_predict: default_num_predict(),
            timeout_secs: default_llm_timeout(),
            history_window: default_history_window(),
            chat_cooldown_secs: default_chat_cooldown(),
            filter_all_msgs: false,
            filter_prompt: None,
            chat_prompt: None,
            styles: Vec::new(),
            moods: Vec::new(),
            persona_mode: PersonaMode::default(),
            prompts: BTreeMap::new(),
            backends: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            log_to_file: false,
            log_file_path: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_server_host(),
            port: default_server_port(),
            api_key: None,
            metrics: true,
        }
    }
}

fn split_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_bool(name: &str, val: &str) -> Result<bool> {
    match val.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("{} must be a boolean, got: {}", name, val),
    }
}

impl Config {
    /// Find the config file, checking multiple locations in order:
    /// 1. NOKO_CONFIG_PATH env var (if set)
    /// 2. ./config.toml (current directory)
    /// 3. ~/.config/noko/config.toml (XDG config dir)
    pub fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var("NOKO_CONFIG_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
        }

        let local_config = PathBuf::from("config.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        let xdg_config = paths::config_file();
        if xdg_config.exists() {
            return Some(xdg_config);
        }

        None
    }

    /// Load configuration from the first config file found, with environment overrides.
    /// Falls back to defaults plus environment when no file exists.
    pub fn load() -> Result<Self> {
        match Self::find_config_file() {
            Some(path) => Self::load_from(&path),
            None => {
                tracing::info!("No config file found, using environment variables and defaults");
                let mut config = Config::default();
                config.apply_env_overrides()?;
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Load a specific file, apply environment overrides, and validate.
    pub fn load_from(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "Loading configuration from file");
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config = Self::parse(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.apply_env_overrides()?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// Parse TOML without environment overrides or validation
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config TOML")
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("NOKO_NICK") {
            self.bot.nick = val;
        }
        if let Ok(val) = std::env::var("NOKO_CMD_PREFIX") {
            self.bot.command_prefix = val;
        }
        if let Ok(val) = std::env::var("NOKO_CMD_COOLDOWN") {
            self.bot.command_cooldown_secs = val.trim().parse().with_context(|| {
                format!("NOKO_CMD_COOLDOWN must be a number of seconds, got: {}", val)
            })?;
        }
        if let Ok(val) = std::env::var("NOKO_MAX_HISTORY") {
            self.bot.max_history = val
                .trim()
                .parse()
                .with_context(|| format!("NOKO_MAX_HISTORY must be a number, got: {}", val))?;
        }
        if let Ok(val) = std::env::var("NOKO_ADMINS") {
            self.bot.admins = split_list(&val);
        }
        if let Ok(val) = std::env::var("NOKO_IGNORED") {
            self.bot.ignored = split_list(&val);
        }
        if let Ok(val) = std::env::var("NOKO_DISABLED_PLUGINS") {
            self.bot.disabled_plugins = split_list(&val);
        }
        if let Ok(val) = std::env::var("NOKO_LLM_ENABLED") {
            self.llm.enabled = parse_bool("NOKO_LLM_ENABLED", &val)?;
        }
        if let Ok(val) = std::env::var("NOKO_SQL_FILE") {
            self.storage.path = Some(val);
        }
        if let Ok(val) = std::env::var("NOKO_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("NOKO_LOG_TO_FILE") {
            self.logging.log_to_file = parse_bool("NOKO_LOG_TO_FILE", &val)?;
        }
        if let Ok(val) = std::env::var("NOKO_LOG_FILE_PATH") {
            self.logging.log_file_path = Some(val);
        }
        Ok(())
    }

    /// Check ranges and required values. Unknown plugin names are not checked
    /// here; they are reported when a room's policy is resolved.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.bot.nick.trim().is_empty() {
            return Err(ConfigError::Empty("bot.nick".into()));
        }
        if self.bot.command_prefix.is_empty() {
            return Err(ConfigError::Empty("bot.command_prefix".into()));
        }
        if self.bot.command_prefix.chars().any(char::is_whitespace) {
            return Err(ConfigError::invalid(
                "bot.command_prefix",
                "must not contain whitespace",
            ));
        }
        if self.bot.room_queue_size == 0 {
            return Err(ConfigError::out_of_range(
                "bot.room_queue_size",
                1,
                usize::MAX,
                0,
            ));
        }

        let (t_min, t_max) = TEMPERATURE_RANGE;
        if !(t_min..=t_max).contains(&self.llm.temperature) {
            return Err(ConfigError::out_of_range(
                "llm.temperature",
                t_min,
                t_max,
                self.llm.temperature,
            ));
        }
        let (n_min, n_max) = NUM_PREDICT_RANGE;
        if !(n_min..=n_max).contains(&self.llm.num_predict) {
            return Err(ConfigError::out_of_range(
                "llm.num_predict",
                n_min,
                n_max,
                self.llm.num_predict,
            ));
        }
        check_cooldown("bot.command_cooldown_secs", self.bot.command_cooldown_secs)?;
        check_cooldown("llm.chat_cooldown_secs", self.llm.chat_cooldown_secs)?;
        if self.llm.timeout_secs == 0 {
            return Err(ConfigError::out_of_range(
                "llm.timeout_secs",
                1,
                u64::MAX,
                0,
            ));
        }
        if let Some(name) = &self.llm.chat_prompt {
            if !self.llm.prompts.contains_key(name) {
                return Err(ConfigError::invalid(
                    "llm.chat_prompt",
                    format!("no [llm.prompts] entry named '{}'", name),
                ));
            }
        }

        let mut seen = std::collections::BTreeSet::new();
        for backend in &self.llm.backends {
            if !seen.insert(backend.name()) {
                return Err(ConfigError::invalid(
                    "llm.backends",
                    format!("duplicate backend name '{}'", backend.name()),
                ));
            }
        }

        for (room_id, room) in &self.rooms {
            room.validate(room_id)?;
        }
        Ok(())
    }

    /// Bot-wide defaults every room policy starts from
    pub fn global_policy(&self) -> GlobalPolicy {
        GlobalPolicy {
            command_prefix: self.bot.command_prefix.clone(),
            nick: self.bot.nick.clone(),
            cooldown: Duration::from_secs(self.bot.command_cooldown_secs),
            disabled_plugins: self.bot.disabled_plugins.clone(),
            disabled_commands: self.bot.disabled_commands.clone(),
            admins: self.bot.admins.clone(),
            ignored: self.bot.ignored.clone(),
            llm_enabled: self.llm.enabled,
            llm_filter: self.llm.filter_all_msgs,
            llm_filter_prompt: self.llm.filter_prompt.clone(),
            temperature: self.llm.temperature,
            num_predict: self.llm.num_predict,
            history_size: self.bot.max_history,
            verbose_errors: self.bot.verbose_errors,
            apologize_on_llm_failure: self.bot.apologize_on_llm_failure,
            command_suggestions: self.bot.command_suggestions,
            history_includes_commands: self.bot.history_includes_commands,
        }
    }

    pub fn room(&self, room_id: &str) -> Option<&RoomPolicy> {
        self.rooms.get(room_id)
    }

    pub fn plugin_table(&self, plugin: &str) -> Option<&toml::Table> {
        self.plugins.get(plugin)
    }

    /// Deserialize a plugin's `[plugins.<name>]` table, or its default when absent
    pub fn plugin_settings<T: DeserializeOwned + Default>(&self, plugin: &str) -> Result<T> {
        match self.plugins.get(plugin) {
            Some(table) => toml::Value::Table(table.clone())
                .try_into()
                .with_context(|| format!("Invalid [plugins.{}] settings", plugin)),
            None => Ok(T::default()),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.storage
            .path
            .as_deref()
            .map(|p| PathBuf::from(paths::expand_tilde(p)))
            .unwrap_or_else(paths::database_file)
    }
}

pub(crate) fn check_cooldown(field: &str, secs: u64) -> std::result::Result<(), ConfigError> {
    if secs > MAX_COOLDOWN_SECS {
        return Err(ConfigError::out_of_range(field, 0, MAX_COOLDOWN_SECS, secs));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const FULL: &str = r#"
[bot]
nick = "noko"
command_prefix = "."
command_cooldown_secs = 3
admins = ["alice"]
disabled_plugins = ["feeds"]

[llm]
temperature = 0.7
num_predict = 128
filter_prompt = "Is this rude?"
chat_prompt = "chat"
styles = ["pirate"]

[llm.prompts]
chat = "You are {bot_nick}. Speak like a {style}."

[[llm.backends]]
type = "openai"
name = "cloud"
api_key = "sk-very-secret"

[[llm.backends]]
type = "ollama"

[rooms."lobby@muc"]
command_prefix = "!"
disabled_plugins = ["seen"]
llm_filter_prompt = ""

[plugins.feeds]
interval_secs = 60
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(FULL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.bot.command_cooldown_secs, 3);
        assert_eq!(config.llm.backends.len(), 2);
        assert_eq!(config.llm.backends[0].name(), "cloud");
        assert!(config.room("lobby@muc").is_some());
        assert!(config.plugin_table("feeds").is_some());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.bot.nick, "noko");
        assert_eq!(config.bot.command_prefix, ".");
        assert_eq!(config.bot.command_cooldown_secs, 2);
        assert_eq!(config.bot.max_history, 100);
        assert!((config.llm.temperature - 1.2).abs() < f32::EPSILON);
        assert_eq!(config.llm.num_predict, 256);
    }

    #[test]
    fn test_temperature_out_of_range_is_rejected() {
        let config = Config::parse("[llm]\ntemperature = 2.5").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { ref field, .. }) if field == "llm.temperature"
        ));
    }

    #[test]
    fn test_num_predict_out_of_range_is_rejected() {
        let config = Config::parse("[llm]\nnum_predict = 0").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { ref field, .. }) if field == "llm.num_predict"
        ));
    }

    #[test]
    fn test_missing_chat_prompt_template_is_rejected() {
        let config = Config::parse("[llm]\nchat_prompt = \"nope\"").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_oversized_cooldowns_are_rejected() {
        for toml in [
            "[bot]\ncommand_cooldown_secs = 9223372036854775807",
            "[llm]\nchat_cooldown_secs = 99999999999",
            "[rooms.lobby]\ncooldown_secs = 99999999999",
        ] {
            let config = Config::parse(toml).unwrap();
            assert!(
                matches!(config.validate(), Err(ConfigError::OutOfRange { .. })),
                "{toml}"
            );
        }
        let config = Config::parse("[bot]\ncommand_cooldown_secs = 3600").unwrap();
        config.validate().unwrap();
        assert_eq!(config.llm.chat_cooldown_secs, 60);
    }

    #[test]
    fn test_duplicate_backend_names_are_rejected() {
        let config =
            Config::parse("[[llm.backends]]\ntype = \"mock\"\n[[llm.backends]]\ntype = \"mock\"")
                .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_hides_backend_secrets() {
        let config = Config::parse(FULL).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("sk-very-secret"));
    }

    #[test]
    fn test_global_policy_mirrors_config() {
        let config = Config::parse(FULL).unwrap();
        let global = config.global_policy();
        assert_eq!(global.cooldown, Duration::from_secs(3));
        assert_eq!(global.disabled_plugins, vec!["feeds".to_string()]);
        assert_eq!(global.llm_filter_prompt.as_deref(), Some("Is this rude?"));
    }

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct FeedSettings {
        #[serde(default)]
        interval_secs: u64,
    }

    #[test]
    fn test_plugin_settings() {
        let config = Config::parse(FULL).unwrap();
        let feeds: FeedSettings = config.plugin_settings("feeds").unwrap();
        assert_eq!(feeds.interval_secs, 60);
        let missing: FeedSettings = config.plugin_settings("nothing").unwrap();
        assert_eq!(missing, FeedSettings::default());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        let keys = ["NOKO_NICK", "NOKO_ADMINS", "NOKO_CMD_COOLDOWN", "NOKO_LOG_TO_FILE"];
        let saved: Vec<(&str, Option<String>)> =
            keys.iter().map(|k| (*k, std::env::var(k).ok())).collect();

        std::env::set_var("NOKO_NICK", "robo");
        std::env::set_var("NOKO_ADMINS", "alice, bob ,");
        std::env::set_var("NOKO_CMD_COOLDOWN", "9");
        std::env::set_var("NOKO_LOG_TO_FILE", "yes");

        let mut config = Config::parse("").unwrap();
        let result = config.apply_env_overrides();

        std::env::set_var("NOKO_CMD_COOLDOWN", "soon");
        let mut bad = Config::parse("").unwrap();
        let bad_result = bad.apply_env_overrides();

        for (key, val) in &saved {
            match val {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }

        result.unwrap();
        assert_eq!(config.bot.nick, "robo");
        assert_eq!(config.bot.admins, vec!["alice", "bob"]);
        assert_eq!(config.bot.command_cooldown_secs, 9);
        assert!(config.logging.log_to_file);
        assert!(bad_result.is_err());
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let tmpdir = tempfile::tempdir().unwrap();
        let path = tmpdir.path().join("config.toml");
        std::fs::write(&path, FULL).unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.bot.admins, vec!["alice"]);

        std::fs::write(&path, "[llm]\ntemperature = 9.0").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
