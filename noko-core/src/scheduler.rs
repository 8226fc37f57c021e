// ABOUTME: Drives scheduled plugins on their own intervals and routes their output through room policy.
// ABOUTME: A failing or panicking tick is logged and the schedule carries on.

use crate::metrics;
use crate::plugin::{Plugin, TickContext};
use crate::rooms::RoomManager;
use crate::traits::OutgoingEvent;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Spawn one loop per scheduled plugin. Abort the handles to stop them.
pub fn spawn_scheduler(manager: &Arc<RoomManager>) -> Vec<JoinHandle<()>> {
    let registry = Arc::clone(&manager.dispatcher().services().registry);
    registry
        .scheduled()
        .into_iter()
        .map(|(plugin, every)| {
            tracing::info!(plugin = %plugin.name(), every_secs = every.as_secs(), "Scheduling plugin");
            tokio::spawn(run_schedule(plugin, every, Arc::clone(manager)))
        })
        .collect()
}

async fn run_schedule(plugin: Arc<dyn Plugin>, every: Duration, manager: Arc<RoomManager>) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // first tick completes immediately
    interval.tick().await;
    loop {
        interval.tick().await;
        let outgoing = tick_once(plugin.as_ref(), &manager, Utc::now()).await;
        for event in outgoing {
            if let Err(e) = manager.post(plugin.name(), event).await {
                tracing::warn!(plugin = %plugin.name(), error = %e, "Failed to queue scheduled output");
            }
        }
    }
}

/// Run one tick of a plugin against the current config snapshot
pub async fn tick_once(
    plugin: &dyn Plugin,
    manager: &RoomManager,
    now: DateTime<Utc>,
) -> Vec<OutgoingEvent> {
    let snapshot = manager.config().snapshot();
    let store = manager.store();
    let joined_rooms = manager.joined_rooms();
    let ctx = TickContext {
        config: &snapshot.config,
        llm: &snapshot.llm,
        store: store.as_ref(),
        joined_rooms: &joined_rooms,
    };

    match AssertUnwindSafe(plugin.tick(&ctx, now)).catch_unwind().await {
        Ok(Ok(outgoing)) => {
            if !outgoing.is_empty() {
                tracing::debug!(plugin = %plugin.name(), count = outgoing.len(), "Scheduled plugin produced output");
            }
            outgoing
        }
        Ok(Err(e)) => {
            tracing::warn!(plugin = %plugin.name(), error = %e, "Scheduled tick failed");
            metrics::record_handler_error(plugin.name());
            Vec::new()
        }
        Err(_) => {
            tracing::error!(plugin = %plugin.name(), "Scheduled tick panicked");
            metrics::record_handler_error(plugin.name());
            Vec::new()
        }
    }
}
