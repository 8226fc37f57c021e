// ABOUTME: Shared fixtures for noko-core integration tests
// ABOUTME: Recording transport, no-op control, and a handful of small test plugins

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use noko_core::commands::Command;
use noko_core::ignore::IgnoreList;
use noko_core::noko_llm::LlmHandle;
use noko_core::{
    BotControl, CommandSpec, Config, CooldownTracker, LlmOrchestrator, MemoryStore, OutgoingEvent,
    Plugin, PluginContext, PluginRegistry, Services, Snapshot, Store, TickContext, Transport,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Transport that records everything sent through it
#[derive(Default)]
pub struct Recorder {
    sent: Mutex<Vec<OutgoingEvent>>,
}

impl Recorder {
    pub fn sent(&self) -> Vec<OutgoingEvent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts_for(&self, room: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|e| e.room_id == room)
            .map(|e| e.text)
            .collect()
    }
}

#[async_trait]
impl Transport for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn send(&self, event: OutgoingEvent) -> Result<()> {
        self.sent.lock().unwrap().push(event);
        Ok(())
    }
}

pub struct NoopControl;

#[async_trait]
impl BotControl for NoopControl {
    async fn join(&self, _room_id: &str) -> Result<bool> {
        Ok(true)
    }

    async fn leave(&self, _room_id: &str) -> Result<bool> {
        Ok(true)
    }

    async fn reload(&self) -> Result<u64> {
        Ok(1)
    }

    fn request_shutdown(&self) {}

    fn joined_rooms(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Commands covering the dispatcher's paths
#[derive(Default)]
pub struct Basics {
    pub ping_runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Plugin for Basics {
    fn name(&self) -> &str {
        "basics"
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("ping", "Reply with pong"),
            CommandSpec::new("forecast", "Tomorrow's weather"),
            CommandSpec::new("reload", "Reload configuration").admin_only(),
            CommandSpec::new("slow", "Takes a while").cooldown(Duration::ZERO),
            CommandSpec::new("boom", "Panics"),
            CommandSpec::new("fail", "Returns an error"),
            CommandSpec::new("hop", "Join another room").usage("hop <room>"),
        ]
    }

    async fn handle_command(
        &self,
        ctx: &PluginContext<'_>,
        command: &Command,
    ) -> Result<Vec<OutgoingEvent>> {
        match command.name.as_str() {
            "ping" => {
                self.ping_runs.fetch_add(1, Ordering::SeqCst);
                Ok(vec![ctx.reply("pong")])
            }
            "forecast" => Ok(vec![ctx.reply("sunny")]),
            "reload" => {
                let generation = ctx.control.reload().await?;
                Ok(vec![ctx.reply(format!("reloaded to {}", generation))])
            }
            "slow" => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(vec![ctx.say("finally")])
            }
            "boom" => panic!("kaboom"),
            "fail" => anyhow::bail!("disk on fire"),
            "hop" => {
                let room = command.first_arg().unwrap_or("elsewhere");
                ctx.control.join(room).await?;
                Ok(vec![ctx.say(format!("joined {}", room))])
            }
            _ => Ok(Vec::new()),
        }
    }
}

/// Registered so rooms can turn conversational replies off
pub struct Chat;

#[async_trait]
impl Plugin for Chat {
    fn name(&self) -> &str {
        "chat"
    }
}

/// Posts a headline to every joined room on each tick
pub struct Feeds;

#[async_trait]
impl Plugin for Feeds {
    fn name(&self) -> &str {
        "feeds"
    }

    fn schedule(&self) -> Option<Duration> {
        Some(Duration::from_secs(60))
    }

    async fn tick(&self, ctx: &TickContext<'_>, _now: DateTime<Utc>) -> Result<Vec<OutgoingEvent>> {
        Ok(ctx
            .joined_rooms
            .iter()
            .map(|room| OutgoingEvent::new(room.as_str(), "headline"))
            .collect())
    }
}

/// Answers messages containing "echo" without a command
pub struct Echo;

#[async_trait]
impl Plugin for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    async fn on_message(&self, ctx: &PluginContext<'_>, text: &str) -> Result<Vec<OutgoingEvent>> {
        if text.contains("echo") {
            Ok(vec![ctx.say(text.to_uppercase())])
        } else {
            Ok(Vec::new())
        }
    }
}

pub fn registry_with(basics: Basics) -> Arc<PluginRegistry> {
    let mut registry = PluginRegistry::new();
    registry.register(Arc::new(basics)).unwrap();
    registry.register(Arc::new(Chat)).unwrap();
    registry.register(Arc::new(Feeds)).unwrap();
    registry.register(Arc::new(Echo)).unwrap();
    Arc::new(registry)
}

pub fn registry() -> Arc<PluginRegistry> {
    registry_with(Basics::default())
}

pub fn services(registry: Arc<PluginRegistry>) -> Services {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let ignore = Arc::new(IgnoreList::load(Arc::clone(&store)).unwrap());
    Services {
        registry,
        cooldowns: Arc::new(CooldownTracker::new()),
        store,
        ignore,
    }
}

pub fn snapshot(generation: u64, config: Config, backends: Vec<LlmHandle>) -> Snapshot {
    Snapshot {
        generation,
        llm: Arc::new(LlmOrchestrator::with_handles(&config.llm, backends)),
        config: Arc::new(config),
    }
}

pub fn config(toml: &str) -> Config {
    let config = Config::parse(toml).unwrap();
    config.validate().unwrap();
    config
}
