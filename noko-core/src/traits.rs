// ABOUTME: Core traits and event types at the edges of the bot
// ABOUTME: Transports deliver outgoing events; BotControl lets plugins steer the runtime

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Events
// =============================================================================

/// A message received from the chat network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Room identifier; for direct messages, the peer's pseudo-room
    pub room_id: String,
    pub actor_id: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub text: String,
    #[serde(default)]
    pub is_direct: bool,
}

impl InboundEvent {
    pub fn new(room_id: impl Into<String>, actor_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            actor_id: actor_id.into(),
            timestamp: Utc::now(),
            text: text.into(),
            is_direct: false,
        }
    }

    pub fn direct(peer_id: impl Into<String>, text: impl Into<String>) -> Self {
        let peer_id = peer_id.into();
        Self {
            room_id: peer_id.clone(),
            actor_id: peer_id,
            timestamp: Utc::now(),
            text: text.into(),
            is_direct: true,
        }
    }
}

/// A message the bot wants to send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingEvent {
    pub room_id: String,
    pub text: String,
    /// Actor to highlight, if the room allows mentions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mention_actor: Option<String>,
}

impl OutgoingEvent {
    pub fn new(room_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            text: text.into(),
            mention_actor: None,
        }
    }

    pub fn mentioning(mut self, actor: impl Into<String>) -> Self {
        self.mention_actor = Some(actor.into());
        self
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Delivers outgoing events to the chat network
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for logging
    fn name(&self) -> &str;

    async fn send(&self, event: OutgoingEvent) -> Result<()>;
}

// =============================================================================
// Runtime control
// =============================================================================

/// Operations admin commands can request from the running bot
#[async_trait]
pub trait BotControl: Send + Sync {
    /// Returns false if the room was already joined
    async fn join(&self, room_id: &str) -> Result<bool>;

    /// Returns false if the room was not joined
    async fn leave(&self, room_id: &str) -> Result<bool>;

    /// Re-read the config source; the old config stays active on error.
    /// Returns the new generation.
    async fn reload(&self) -> Result<u64>;

    /// Ask the process to stop after the current event
    fn request_shutdown(&self);

    fn joined_rooms(&self) -> Vec<String>;
}
