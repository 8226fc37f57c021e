// ABOUTME: Per-room state and the manager that runs one sequential task per joined room.
// ABOUTME: Rooms run in parallel with each other; leaving a room discards replies still in flight.

use crate::config::PersonaMode;
use crate::dispatcher::{Dispatch, Dispatcher, Services};
use crate::history::HistoryBuffer;
use crate::llm::Persona;
use crate::metrics;
use crate::policy::{resolve, EffectivePolicy, KnownNames};
use crate::reload::{SharedConfig, Snapshot};
use crate::store::Store;
use crate::traits::{BotControl, InboundEvent, OutgoingEvent, Transport};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Notify};
use tracing::Instrument;

/// State owned by a single room's task
pub struct Room {
    id: String,
    joined: Arc<AtomicBool>,
    history: HistoryBuffer,
    policy: Option<(u64, Arc<EffectivePolicy>)>,
    persona: Option<(u64, Persona)>,
}

impl Room {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            joined: Arc::new(AtomicBool::new(true)),
            history: HistoryBuffer::new(0),
            policy: None,
            persona: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_joined(&self) -> bool {
        self.joined.load(Ordering::Acquire)
    }

    /// Flag shared with the manager; cleared when the room is left
    pub fn joined_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.joined)
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut HistoryBuffer {
        &mut self.history
    }

    /// Effective policy for this room under the given snapshot.
    ///
    /// Resolved once per config generation; the history capacity follows it.
    pub fn policy(&mut self, snapshot: &Snapshot, known: &KnownNames) -> Arc<EffectivePolicy> {
        if let Some((generation, policy)) = &self.policy {
            if *generation == snapshot.generation {
                return Arc::clone(policy);
            }
        }
        let config = &snapshot.config;
        let policy = Arc::new(resolve(
            &self.id,
            &config.global_policy(),
            config.room(&self.id),
            known,
        ));
        self.history.set_capacity(policy.history_size);
        self.policy = Some((snapshot.generation, Arc::clone(&policy)));
        tracing::debug!(room_id = %self.id, generation = snapshot.generation, "Resolved room policy");
        policy
    }

    /// Persona for the next reply: fixed per config generation, or fresh every time
    pub fn persona(&mut self, snapshot: &Snapshot) -> Persona {
        match snapshot.config.llm.persona_mode {
            PersonaMode::PerMessage => snapshot.llm.pick_persona(),
            PersonaMode::Sticky => match &self.persona {
                Some((generation, persona)) if *generation == snapshot.generation => {
                    persona.clone()
                }
                _ => {
                    let persona = snapshot.llm.pick_persona();
                    self.persona = Some((snapshot.generation, persona.clone()));
                    persona
                }
            },
        }
    }
}

/// Work queued for a room task
#[derive(Debug, Clone)]
pub enum RoomEvent {
    Message(InboundEvent),
    /// Output from a plugin outside any inbound event, e.g. a scheduled tick
    Post { plugin: String, outgoing: OutgoingEvent },
}

struct RoomHandle {
    tx: mpsc::Sender<RoomEvent>,
    joined: Arc<AtomicBool>,
}

/// Owns every joined room and routes events to their tasks.
pub struct RoomManager {
    rooms: DashMap<String, RoomHandle>,
    dispatcher: Arc<Dispatcher>,
    config: SharedConfig,
    transport: Arc<dyn Transport>,
    stop: Notify,
    me: Weak<RoomManager>,
}

impl RoomManager {
    pub fn new(config: SharedConfig, services: Services, transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<RoomManager>| {
            let control: Arc<dyn BotControl> = Arc::new(ManagerControl {
                manager: Weak::clone(me),
            });
            Self {
                rooms: DashMap::new(),
                dispatcher: Arc::new(Dispatcher::new(services, control)),
                config,
                transport,
                stop: Notify::new(),
                me: Weak::clone(me),
            }
        })
    }

    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    /// Wake whoever waits in `shutdown_requested`
    pub fn request_shutdown(&self) {
        tracing::info!("Shutdown requested");
        self.stop.notify_one();
    }

    /// Resolves once `request_shutdown` has been called, even if that came first
    pub async fn shutdown_requested(&self) {
        self.stop.notified().await;
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.dispatcher.services().store)
    }

    /// Start a task for the room. Returns false if it was already joined.
    pub fn join(&self, room_id: &str) -> bool {
        let joined = match self.rooms.entry(room_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let queue = self.config.snapshot().config.bot.room_queue_size.max(1);
                let (tx, rx) = mpsc::channel(queue);
                let room = Room::new(room_id);
                let flag = room.joined_flag();
                tokio::spawn(
                    run_room(
                        room,
                        rx,
                        Arc::clone(&self.dispatcher),
                        self.config.clone(),
                        Arc::clone(&self.transport),
                        Weak::clone(&self.me),
                    )
                    .instrument(tracing::info_span!("room", room_id = %room_id)),
                );
                slot.insert(RoomHandle { tx, joined: flag });
                true
            }
        };
        if joined {
            tracing::info!(room_id = %room_id, "Joined room");
            metrics::set_rooms_joined(self.rooms.len());
        }
        joined
    }

    /// Stop routing events to the room. Replies still being produced there are discarded.
    pub fn leave(&self, room_id: &str) -> bool {
        match self.rooms.remove(room_id) {
            Some((_, handle)) => {
                handle.joined.store(false, Ordering::Release);
                tracing::info!(room_id = %room_id, "Left room");
                metrics::set_rooms_joined(self.rooms.len());
                true
            }
            None => false,
        }
    }

    pub fn is_joined(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn joined_rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.rooms.iter().map(|r| r.key().clone()).collect();
        rooms.sort();
        rooms
    }

    /// Queue an inbound event on its room.
    ///
    /// Direct messages open their pseudo-room on first contact; events for
    /// rooms the bot is not in are dropped.
    pub async fn submit(&self, event: InboundEvent) -> Result<()> {
        if event.is_direct && !self.is_joined(&event.room_id) {
            self.join(&event.room_id);
        }
        let room_id = event.room_id.clone();
        self.enqueue(&room_id, RoomEvent::Message(event)).await
    }

    /// Queue plugin output on its target room
    pub async fn post(&self, plugin: &str, outgoing: OutgoingEvent) -> Result<()> {
        let room_id = outgoing.room_id.clone();
        self.enqueue(
            &room_id,
            RoomEvent::Post {
                plugin: plugin.to_string(),
                outgoing,
            },
        )
        .await
    }

    async fn enqueue(&self, room_id: &str, event: RoomEvent) -> Result<()> {
        let Some(tx) = self.rooms.get(room_id).map(|h| h.tx.clone()) else {
            tracing::debug!(room_id = %room_id, "Dropping event for room not joined");
            return Ok(());
        };
        tx.send(event)
            .await
            .map_err(|_| anyhow!("Room {} is no longer accepting events", room_id))
    }

    /// Leave every room
    pub fn shutdown(&self) {
        for room_id in self.joined_rooms() {
            self.leave(&room_id);
        }
    }
}

async fn run_room(
    mut room: Room,
    mut rx: mpsc::Receiver<RoomEvent>,
    dispatcher: Arc<Dispatcher>,
    config: SharedConfig,
    transport: Arc<dyn Transport>,
    manager: Weak<RoomManager>,
) {
    while let Some(event) = rx.recv().await {
        if !room.is_joined() {
            tracing::debug!("Room left, dropping queued event");
            continue;
        }
        let snapshot = config.snapshot();
        let handled = AssertUnwindSafe(async {
            match event {
                RoomEvent::Message(event) => dispatcher.handle(&mut room, &snapshot, event).await,
                RoomEvent::Post { plugin, outgoing } => {
                    dispatcher
                        .handle_post(&mut room, &snapshot, &plugin, outgoing)
                        .await
                }
            }
        })
        .catch_unwind()
        .await;
        let dispatch: Dispatch = match handled {
            Ok(dispatch) => dispatch,
            Err(_) => {
                tracing::error!("Event handling panicked, room keeps running");
                continue;
            }
        };

        if !room.is_joined() {
            if !dispatch.replies.is_empty() {
                tracing::debug!(
                    discarded = dispatch.replies.len(),
                    "Room left while handling event, discarding replies"
                );
            }
            continue;
        }

        for reply in dispatch.replies {
            let deliverable = reply.room_id == room.id()
                || manager
                    .upgrade()
                    .is_some_and(|m| m.is_joined(&reply.room_id));
            if !deliverable {
                tracing::debug!(target_room = %reply.room_id, "Dropping reply for room not joined");
                continue;
            }
            match transport.send(reply).await {
                Ok(()) => metrics::record_message_sent(),
                Err(e) => tracing::warn!(transport = transport.name(), error = %e, "Failed to send reply"),
            }
        }
    }
    tracing::debug!("Room task stopped");
}

/// Runtime control handed to plugins; holds the manager weakly to avoid a cycle
struct ManagerControl {
    manager: Weak<RoomManager>,
}

impl ManagerControl {
    fn manager(&self) -> Result<Arc<RoomManager>> {
        self.manager
            .upgrade()
            .ok_or_else(|| anyhow!("Bot is shutting down"))
    }
}

#[async_trait]
impl BotControl for ManagerControl {
    async fn join(&self, room_id: &str) -> Result<bool> {
        Ok(self.manager()?.join(room_id))
    }

    async fn leave(&self, room_id: &str) -> Result<bool> {
        Ok(self.manager()?.leave(room_id))
    }

    async fn reload(&self) -> Result<u64> {
        self.manager()?.config.reload_from_source()
    }

    fn request_shutdown(&self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.request_shutdown();
        }
    }

    fn joined_rooms(&self) -> Vec<String> {
        self.manager
            .upgrade()
            .map(|m| m.joined_rooms())
            .unwrap_or_default()
    }
}
