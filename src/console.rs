// ABOUTME: Local stdin/stdout transport for running the bot without a chat network
// ABOUTME: Lines like "#room actor text" or "@peer text" become inbound events

use anyhow::Result;
use async_trait::async_trait;
use noko_core::{InboundEvent, OutgoingEvent, RoomManager, Transport};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

/// Prints outgoing events to stdout
pub struct ConsoleTransport {
    out: Mutex<tokio::io::Stdout>,
}

impl ConsoleTransport {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
        }
    }
}

impl Default for ConsoleTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    fn name(&self) -> &str {
        "console"
    }

    async fn send(&self, event: OutgoingEvent) -> Result<()> {
        let mut line = render(&event);
        line.push('\n');
        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes()).await?;
        out.flush().await?;
        Ok(())
    }
}

/// Logs outgoing events when nothing else is listening (server-only mode)
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, event: OutgoingEvent) -> Result<()> {
        tracing::info!(
            room_id = %event.room_id,
            mention = ?event.mention_actor,
            text = %event.text,
            "Outgoing message"
        );
        Ok(())
    }
}

/// One line of console output for an outgoing event
pub fn render(event: &OutgoingEvent) -> String {
    match &event.mention_actor {
        Some(actor) => format!("[{}] {}: {}", event.room_id, actor, event.text),
        None => format!("[{}] {}", event.room_id, event.text),
    }
}

/// Turn a console line into an inbound event.
///
/// `#room actor text` speaks in a room, `@peer text` sends a direct message,
/// anything else is said by `actor` in `default_room`.
pub fn parse_line(line: &str, default_room: &str, actor: &str) -> Option<InboundEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if let Some(rest) = line.strip_prefix('#') {
        let mut parts = rest.splitn(3, char::is_whitespace);
        let room = parts.next().filter(|s| !s.is_empty())?;
        let who = parts.next().filter(|s| !s.is_empty())?;
        let text = parts.next().unwrap_or("").trim();
        return Some(InboundEvent::new(room, who, text));
    }

    if let Some(rest) = line.strip_prefix('@') {
        let (peer, text) = rest.split_once(char::is_whitespace)?;
        if peer.is_empty() {
            return None;
        }
        return Some(InboundEvent::direct(peer, text.trim()));
    }

    Some(InboundEvent::new(default_room, actor, line))
}

/// Feed stdin into the room manager until EOF or `/quit`
pub async fn run(manager: Arc<RoomManager>, default_room: String, actor: String) -> Result<()> {
    manager.join(&default_room);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim() == "/quit" {
            break;
        }
        if let Some(event) = parse_line(&line, &default_room, &actor) {
            if event.room_id != default_room && !event.is_direct && !manager.is_joined(&event.room_id) {
                tracing::info!(room_id = %event.room_id, "Joining room from console");
                manager.join(&event.room_id);
            }
            manager.submit(event).await?;
        }
    }

    tracing::info!("Console input closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_room_line() {
        let event = parse_line("#lobby bob .seen carol", "console", "operator").unwrap();
        assert_eq!(event.room_id, "lobby");
        assert_eq!(event.actor_id, "bob");
        assert_eq!(event.text, ".seen carol");
        assert!(!event.is_direct);
    }

    #[test]
    fn test_parse_direct_line() {
        let event = parse_line("@bob hi there", "console", "operator").unwrap();
        assert_eq!(event.room_id, "bob");
        assert_eq!(event.actor_id, "bob");
        assert!(event.is_direct);
    }

    #[test]
    fn test_parse_plain_line_uses_defaults() {
        let event = parse_line("  hello  ", "console", "operator").unwrap();
        assert_eq!(event.room_id, "console");
        assert_eq!(event.actor_id, "operator");
        assert_eq!(event.text, "hello");
    }

    #[test]
    fn test_parse_rejects_incomplete_lines() {
        assert!(parse_line("", "console", "operator").is_none());
        assert!(parse_line("#lobby", "console", "operator").is_none());
        assert!(parse_line("@bob", "console", "operator").is_none());
    }

    #[test]
    fn test_render_with_and_without_mention() {
        let plain = OutgoingEvent::new("lobby", "hi");
        assert_eq!(render(&plain), "[lobby] hi");
        let addressed = OutgoingEvent::new("lobby", "pong").mentioning("bob");
        assert_eq!(render(&addressed), "[lobby] bob: pong");
    }
}
