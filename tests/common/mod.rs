// ABOUTME: Shared fixtures for the noko binary's integration tests
// ABOUTME: Builds a dispatcher over the built-in plugins with an in-memory store

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use noko::plugins;
use noko_core::ignore::IgnoreList;
use noko_core::noko_llm::BackendRegistry;
use noko_core::reload::Snapshot;
use noko_core::{
    BotControl, Config, CooldownTracker, Dispatch, Dispatcher, InboundEvent, LlmOrchestrator,
    MemoryStore, OutgoingEvent, Room, Services, Store, Transport,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct Recorder {
    sent: Mutex<Vec<OutgoingEvent>>,
}

impl Recorder {
    pub fn texts_for(&self, room: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.room_id == room)
            .map(|e| e.text.clone())
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

/// Remembers which rooms plugins asked to join or leave
#[derive(Default)]
pub struct RecordingControl {
    pub joined: Mutex<Vec<String>>,
    pub left: Mutex<Vec<String>>,
    pub shutdowns: AtomicUsize,
}

#[async_trait]
impl BotControl for RecordingControl {
    async fn join(&self, room_id: &str) -> Result<bool> {
        self.joined.lock().unwrap().push(room_id.to_string());
        Ok(true)
    }

    async fn leave(&self, room_id: &str) -> Result<bool> {
        self.left.lock().unwrap().push(room_id.to_string());
        Ok(true)
    }

    async fn reload(&self) -> Result<u64> {
        Ok(7)
    }

    fn request_shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }

    fn joined_rooms(&self) -> Vec<String> {
        self.joined.lock().unwrap().clone()
    }
}

/// A dispatcher over the built-in plugins plus one room per id
pub struct Harness {
    pub dispatcher: Dispatcher,
    pub snapshot: Snapshot,
    pub store: Arc<dyn Store>,
    pub control: Arc<RecordingControl>,
    rooms: HashMap<String, Room>,
}

impl Harness {
    pub fn new(toml: &str) -> Self {
        let config = Config::parse(toml).unwrap();
        config.validate().unwrap();

        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let services = Services {
            registry: Arc::new(plugins::builtin_registry(&config).unwrap()),
            cooldowns: Arc::new(CooldownTracker::new()),
            store: Arc::clone(&store),
            ignore: Arc::new(IgnoreList::load(Arc::clone(&store)).unwrap()),
        };
        let control = Arc::new(RecordingControl::default());
        let dispatcher = Dispatcher::new(services, control.clone());
        let snapshot = Snapshot {
            generation: 1,
            llm: Arc::new(
                LlmOrchestrator::from_config(&config.llm, &BackendRegistry::default()).unwrap(),
            ),
            config: Arc::new(config),
        };

        Self {
            dispatcher,
            snapshot,
            store,
            control,
            rooms: HashMap::new(),
        }
    }

    pub async fn send(&mut self, room: &str, actor: &str, text: &str) -> Dispatch {
        let room_state = self
            .rooms
            .entry(room.to_string())
            .or_insert_with(|| Room::new(room));
        self.dispatcher
            .handle(room_state, &self.snapshot, InboundEvent::new(room, actor, text))
            .await
    }

    /// A direct message from `actor`, handled in their pseudo-room
    pub async fn direct(&mut self, actor: &str, text: &str) -> Vec<String> {
        let room_state = self
            .rooms
            .entry(actor.to_string())
            .or_insert_with(|| Room::new(actor));
        self.dispatcher
            .handle(room_state, &self.snapshot, InboundEvent::direct(actor, text))
            .await
            .replies
            .into_iter()
            .map(|r| r.text)
            .collect()
    }

    /// Texts of the replies to one message
    pub async fn say(&mut self, room: &str, actor: &str, text: &str) -> Vec<String> {
        self.send(room, actor, text)
            .await
            .replies
            .into_iter()
            .map(|r| r.text)
            .collect()
    }
}
