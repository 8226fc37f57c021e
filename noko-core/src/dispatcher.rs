// ABOUTME: Routes one inbound event through policy, ignore lists, cooldowns, plugins and the LLM.
// ABOUTME: Produces an outcome plus the replies to send; handler failures never escape as panics.

use crate::commands::{parse_message, Command, ParseResult};
use crate::cooldown::{whole_seconds, CooldownTracker};
use crate::history::HistoryEntry;
use crate::ignore::IgnoreList;
use crate::llm::{CompletionRequest, FilterVerdict};
use crate::metrics;
use crate::plugin::{PluginContext, PluginRegistry, ResolvedCommand, CHAT_PLUGIN};
use crate::policy::{EffectivePolicy, KnownNames, SuggestionMode};
use crate::reload::Snapshot;
use crate::rooms::Room;
use crate::store::Store;
use crate::traits::{BotControl, InboundEvent, OutgoingEvent};
use anyhow::Result;
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

const AUDIT_LOG: &str = "audit";
const CHAT_COOLDOWN_KEY: &str = "chat";

/// How an event was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Sender ignored, the bot itself, or an empty message
    Ignored,
    Handled,
    Throttled,
    /// Command or plugin turned off in this room
    Disabled,
    /// Admin-only command from a non-admin
    Forbidden,
    UnknownCommand,
    HandlerError,
    /// Every LLM backend failed
    LlmUnavailable,
    /// The outgoing filter blocked every reply
    Filtered,
    /// Nothing had anything to say
    NoAction,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Ignored => "ignored",
            Outcome::Handled => "handled",
            Outcome::Throttled => "throttled",
            Outcome::Disabled => "disabled",
            Outcome::Forbidden => "forbidden",
            Outcome::UnknownCommand => "unknown_command",
            Outcome::HandlerError => "handler_error",
            Outcome::LlmUnavailable => "llm_unavailable",
            Outcome::Filtered => "filtered",
            Outcome::NoAction => "no_action",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub outcome: Outcome,
    pub replies: Vec<OutgoingEvent>,
}

impl Dispatch {
    fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            replies: Vec::new(),
        }
    }

    fn with_replies(outcome: Outcome, replies: Vec<OutgoingEvent>) -> Self {
        Self { outcome, replies }
    }
}

/// Long-lived services every dispatch shares
#[derive(Clone)]
pub struct Services {
    pub registry: Arc<PluginRegistry>,
    pub cooldowns: Arc<CooldownTracker>,
    pub store: Arc<dyn Store>,
    pub ignore: Arc<IgnoreList>,
}

pub struct Dispatcher {
    services: Services,
    known: KnownNames,
    control: Arc<dyn BotControl>,
}

impl Dispatcher {
    pub fn new(services: Services, control: Arc<dyn BotControl>) -> Self {
        let known = services.registry.known_names();
        Self {
            services,
            known,
            control,
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn known_names(&self) -> &KnownNames {
        &self.known
    }

    /// Handle one inbound event for a room.
    ///
    /// The caller owns the room exclusively, so events of one room are
    /// handled strictly in arrival order.
    pub async fn handle(&self, room: &mut Room, snapshot: &Snapshot, event: InboundEvent) -> Dispatch {
        let policy = room.policy(snapshot, &self.known);

        if self.is_ignorable(&policy, &event) {
            tracing::trace!(room_id = %event.room_id, actor = %event.actor_id, "Ignoring event");
            metrics::record_outcome(Outcome::Ignored.as_str());
            return Dispatch::new(Outcome::Ignored);
        }

        let is_admin = policy.is_admin(&event.actor_id);
        let entry = HistoryEntry::new(event.timestamp, &event.actor_id, &event.text);

        let dispatch = match parse_message(&event.text, &policy.command_prefix) {
            ParseResult::Ignore => Dispatch::new(Outcome::Ignored),
            ParseResult::Command(command) => {
                if policy.history_includes_commands {
                    self.remember(room, snapshot, entry);
                }
                self.handle_command(room, snapshot, &policy, &event, command, is_admin)
                    .await
            }
            ParseResult::Message(_) => {
                self.remember(room, snapshot, entry);
                self.handle_message(room, snapshot, &policy, &event, is_admin)
                    .await
            }
        };

        let dispatch = self.finish(room, snapshot, &policy, dispatch).await;
        tracing::debug!(
            room_id = %event.room_id,
            actor = %event.actor_id,
            outcome = dispatch.outcome.as_str(),
            replies = dispatch.replies.len(),
            "Event dispatched"
        );
        metrics::record_outcome(dispatch.outcome.as_str());
        dispatch
    }

    /// Deliver plugin-originated output (scheduled ticks) if the plugin is enabled in the target room
    pub async fn handle_post(
        &self,
        room: &mut Room,
        snapshot: &Snapshot,
        plugin: &str,
        outgoing: OutgoingEvent,
    ) -> Dispatch {
        let policy = room.policy(snapshot, &self.known);
        if !policy.plugin_enabled(plugin) {
            tracing::debug!(room_id = %room.id(), plugin = %plugin, "Plugin disabled in room, dropping post");
            return Dispatch::new(Outcome::Disabled);
        }
        let dispatch = Dispatch::with_replies(Outcome::Handled, vec![outgoing]);
        self.finish(room, snapshot, &policy, dispatch).await
    }

    fn is_ignorable(&self, policy: &EffectivePolicy, event: &InboundEvent) -> bool {
        event.text.trim().is_empty()
            || event.actor_id.eq_ignore_ascii_case(&policy.nick)
            || policy.is_ignored(&event.actor_id)
            || self.services.ignore.contains(&event.actor_id)
    }

    async fn handle_command(
        &self,
        room: &mut Room,
        snapshot: &Snapshot,
        policy: &EffectivePolicy,
        event: &InboundEvent,
        command: Command,
        is_admin: bool,
    ) -> Dispatch {
        let resolved = match self.services.registry.resolve(&command.name) {
            Ok(resolved) => resolved.clone(),
            Err(_) => {
                return self
                    .handle_unknown(room, snapshot, policy, event, command, is_admin)
                    .await
            }
        };
        self.run_command(room, snapshot, policy, event, &command, &resolved, is_admin)
            .await
    }

    async fn handle_unknown(
        &self,
        room: &mut Room,
        snapshot: &Snapshot,
        policy: &EffectivePolicy,
        event: &InboundEvent,
        command: Command,
        is_admin: bool,
    ) -> Dispatch {
        let suggestion = match policy.command_suggestions {
            SuggestionMode::Off => None,
            _ => self.services.registry.suggest(&command.name, policy, is_admin),
        };
        let Some(suggestion) = suggestion else {
            tracing::debug!(room_id = %event.room_id, command = %command.name, "Unknown command");
            return Dispatch::new(Outcome::UnknownCommand);
        };

        if policy.command_suggestions == SuggestionMode::Run {
            let Ok(resolved) = self.services.registry.resolve(&suggestion).cloned() else {
                return Dispatch::new(Outcome::UnknownCommand);
            };
            tracing::info!(
                room_id = %event.room_id,
                typed = %command.name,
                running = %suggestion,
                "Running closest command"
            );
            let command = command.renamed(&suggestion);
            return self
                .run_command(room, snapshot, policy, event, &command, &resolved, is_admin)
                .await;
        }

        let mut dispatch = Dispatch::new(Outcome::UnknownCommand);
        if !policy.silent {
            dispatch.replies.push(notice(
                event,
                format!(
                    "Unknown command '{}'. Did you mean '{}{}'?",
                    command.name, policy.command_prefix, suggestion
                ),
            ));
        }
        dispatch
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_command(
        &self,
        room: &mut Room,
        snapshot: &Snapshot,
        policy: &EffectivePolicy,
        event: &InboundEvent,
        command: &Command,
        resolved: &ResolvedCommand,
        is_admin: bool,
    ) -> Dispatch {
        let name = &resolved.spec.name;
        let plugin_name = resolved.plugin_name();

        if !policy.command_enabled(name, plugin_name) {
            tracing::debug!(room_id = %event.room_id, command = %name, "Command disabled in room");
            let mut dispatch = Dispatch::new(Outcome::Disabled);
            if policy.verbose_errors && !policy.silent {
                dispatch
                    .replies
                    .push(notice(event, format!("Command '{}' is disabled here.", name)));
            }
            return dispatch;
        }

        if resolved.spec.admin_only && !is_admin {
            tracing::info!(room_id = %event.room_id, actor = %event.actor_id, command = %name, "Non-admin tried admin command");
            return Dispatch::new(Outcome::Forbidden);
        }

        if !is_admin {
            let duration = resolved.spec.cooldown.unwrap_or(policy.cooldown);
            if let Some(dispatch) =
                self.throttle(policy, event, resolved.cooldown_key(), name, duration)
            {
                return dispatch;
            }
        }

        metrics::record_command(name);
        tracing::info!(room_id = %event.room_id, actor = %event.actor_id, command = %name, plugin = %plugin_name, "Running command");

        let history = room.history().snapshot();
        let ctx = self.context(snapshot, policy, event, &history, is_admin);
        let result = AssertUnwindSafe(resolved.plugin.handle_command(&ctx, command))
            .catch_unwind()
            .await;

        match settle(plugin_name, result) {
            Ok(replies) => Dispatch::with_replies(Outcome::Handled, replies),
            Err(reason) => {
                let mut dispatch = Dispatch::new(Outcome::HandlerError);
                if policy.verbose_errors && !policy.silent {
                    dispatch.replies.push(notice(
                        event,
                        format!("Command '{}' failed: {}", name, reason),
                    ));
                }
                dispatch
            }
        }
    }

    /// Arm the cooldown, or produce the throttled dispatch if it is already armed
    fn throttle(
        &self,
        policy: &EffectivePolicy,
        event: &InboundEvent,
        key: &str,
        label: &str,
        duration: Duration,
    ) -> Option<Dispatch> {
        let cooldowns = &self.services.cooldowns;
        if cooldowns.check_and_arm(&event.room_id, key, &event.actor_id, duration) {
            return None;
        }

        metrics::record_throttled(label);
        tracing::debug!(room_id = %event.room_id, actor = %event.actor_id, command = %label, "Throttled");
        let mut dispatch = Dispatch::new(Outcome::Throttled);
        if !policy.silent {
            let remaining = cooldowns
                .remaining(&event.room_id, key, &event.actor_id)
                .map(whole_seconds)
                .unwrap_or(1);
            dispatch.replies.push(notice(
                event,
                format!(
                    "Command '{}' is on cooldown. Try again in {} second(s).",
                    label, remaining
                ),
            ));
        }
        Some(dispatch)
    }

    async fn handle_message(
        &self,
        room: &mut Room,
        snapshot: &Snapshot,
        policy: &EffectivePolicy,
        event: &InboundEvent,
        is_admin: bool,
    ) -> Dispatch {
        let mut replies = Vec::new();
        let mut failed = false;
        {
            let history = room.history().snapshot();
            let ctx = self.context(snapshot, policy, event, &history, is_admin);
            for plugin in self.services.registry.list_enabled(policy) {
                let result = AssertUnwindSafe(plugin.on_message(&ctx, &event.text))
                    .catch_unwind()
                    .await;
                match settle(plugin.name(), result) {
                    Ok(out) => replies.extend(out),
                    Err(_) => failed = true,
                }
            }
        }

        let wants_llm = policy.llm_enabled
            && policy.plugin_enabled(CHAT_PLUGIN)
            && (event.is_direct || policy.mentions_nick(&event.text));
        if wants_llm {
            let chat = self.converse(room, snapshot, policy, event, is_admin).await;
            replies.extend(chat.replies);
            return Dispatch::with_replies(chat.outcome, replies);
        }

        if !replies.is_empty() {
            Dispatch::with_replies(Outcome::Handled, replies)
        } else if failed {
            Dispatch::new(Outcome::HandlerError)
        } else {
            Dispatch::new(Outcome::NoAction)
        }
    }

    /// Answer a mention or direct message with the LLM
    async fn converse(
        &self,
        room: &mut Room,
        snapshot: &Snapshot,
        policy: &EffectivePolicy,
        event: &InboundEvent,
        is_admin: bool,
    ) -> Dispatch {
        let llm_config = &snapshot.config.llm;
        if !is_admin {
            let duration = Duration::from_secs(llm_config.chat_cooldown_secs);
            if let Some(dispatch) =
                self.throttle(policy, event, CHAT_COOLDOWN_KEY, &policy.nick, duration)
            {
                return dispatch;
            }
        }

        let message = HistoryEntry::new(event.timestamp, &event.actor_id, &event.text);
        let window = llm_config.history_window;
        let mut history = room.history().window(window.saturating_add(1));
        if history.last() == Some(&message) {
            history.pop();
        } else if history.len() > window {
            history.remove(0);
        }

        let request = CompletionRequest {
            nick: policy.nick.clone(),
            persona: room.persona(snapshot),
            filter_prompt: None,
            history,
            message,
            target_backend: policy.llm_backend.clone(),
            params: policy.completion_params(),
        };

        match snapshot.llm.complete(&request).await {
            Ok(text) => {
                let reply = OutgoingEvent::new(&event.room_id, text);
                let reply = if event.is_direct {
                    reply
                } else {
                    reply.mentioning(&event.actor_id)
                };
                Dispatch::with_replies(Outcome::Handled, vec![reply])
            }
            Err(e) => {
                tracing::warn!(room_id = %event.room_id, error = %e, "No LLM reply");
                let mut dispatch = Dispatch::new(Outcome::LlmUnavailable);
                if policy.apologize_on_llm_failure && !policy.silent {
                    dispatch.replies.push(notice(
                        event,
                        snapshot.config.bot.llm_failure_message.clone(),
                    ));
                }
                dispatch
            }
        }
    }

    /// Outgoing filter, mention policy, and recording the bot's own replies
    async fn finish(
        &self,
        room: &mut Room,
        snapshot: &Snapshot,
        policy: &EffectivePolicy,
        mut dispatch: Dispatch,
    ) -> Dispatch {
        if policy.llm_filter && !dispatch.replies.is_empty() {
            if let Some(prompt) = policy.llm_filter_prompt.as_deref() {
                let params = policy.completion_params();
                let mut kept = Vec::with_capacity(dispatch.replies.len());
                for mut reply in std::mem::take(&mut dispatch.replies) {
                    match snapshot.llm.filter(prompt, &reply.text, params).await {
                        FilterVerdict::Allow => kept.push(reply),
                        FilterVerdict::Transform(text) => {
                            reply.text = text;
                            kept.push(reply);
                        }
                        FilterVerdict::Block => {
                            tracing::info!(room_id = %reply.room_id, "Filter blocked a reply");
                        }
                    }
                }
                if kept.is_empty() {
                    dispatch.outcome = Outcome::Filtered;
                }
                dispatch.replies = kept;
            }
        }

        if !policy.allow_mentions {
            for reply in &mut dispatch.replies {
                reply.mention_actor = None;
            }
        }

        let own: Vec<HistoryEntry> = dispatch
            .replies
            .iter()
            .filter(|r| r.room_id == room.id())
            .map(|r| HistoryEntry::new(Utc::now(), &policy.nick, &r.text))
            .collect();
        for entry in own {
            self.remember(room, snapshot, entry);
        }
        dispatch
    }

    fn remember(&self, room: &mut Room, snapshot: &Snapshot, entry: HistoryEntry) {
        if snapshot.config.bot.audit_log {
            let record = serde_json::json!({
                "room_id": room.id(),
                "timestamp": entry.timestamp,
                "actor": entry.actor,
                "text": entry.text,
            });
            if let Err(e) = self.services.store.append_log(AUDIT_LOG, &record.to_string()) {
                tracing::warn!(error = %e, "Failed to write audit log");
            }
        }
        room.history_mut().append(entry);
    }

    fn context<'a>(
        &'a self,
        snapshot: &'a Snapshot,
        policy: &'a EffectivePolicy,
        event: &'a InboundEvent,
        history: &'a [HistoryEntry],
        is_admin: bool,
    ) -> PluginContext<'a> {
        PluginContext {
            room_id: &event.room_id,
            actor_id: &event.actor_id,
            timestamp: event.timestamp,
            is_admin,
            is_direct: event.is_direct,
            policy,
            history,
            config: &snapshot.config,
            llm: &snapshot.llm,
            store: self.services.store.as_ref(),
            registry: &self.services.registry,
            control: self.control.as_ref(),
            ignore: &self.services.ignore,
        }
    }
}

/// A notice addressed to the sender
fn notice(event: &InboundEvent, text: impl Into<String>) -> OutgoingEvent {
    let out = OutgoingEvent::new(&event.room_id, text);
    if event.is_direct {
        out
    } else {
        out.mentioning(&event.actor_id)
    }
}

/// Flatten a plugin call into replies or a logged failure reason
fn settle(
    plugin: &str,
    result: std::thread::Result<Result<Vec<OutgoingEvent>>>,
) -> std::result::Result<Vec<OutgoingEvent>, String> {
    match result {
        Ok(Ok(replies)) => Ok(replies),
        Ok(Err(e)) => {
            tracing::warn!(plugin = %plugin, error = %e, "Plugin handler failed");
            metrics::record_handler_error(plugin);
            Err(e.to_string())
        }
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            tracing::error!(plugin = %plugin, reason = %reason, "Plugin handler panicked");
            metrics::record_handler_error(plugin);
            Err("internal error".to_string())
        }
    }
}
