// ABOUTME: Per (room, command, actor) throttle state shared by every room task.
// ABOUTME: Check-and-arm is atomic per key; expiry uses the monotonic tokio clock.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Expiry used when `now + duration` does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CooldownKey {
    pub room: String,
    /// Command name, or the category name for commands that share one
    pub command: String,
    pub actor: String,
}

impl CooldownKey {
    pub fn new(room: &str, command: &str, actor: &str) -> Self {
        Self {
            room: room.to_string(),
            command: command.to_string(),
            actor: actor.to_string(),
        }
    }
}

/// Tracks the earliest instant each key may be used again.
///
/// Backed by a sharded map, so rooms never contend on a single lock.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    next_allowed: DashMap<CooldownKey, Instant>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true and arms the cooldown if the key is allowed now.
    ///
    /// A rejected check leaves the stored expiry untouched.
    pub fn check_and_arm(&self, room: &str, command: &str, actor: &str, duration: Duration) -> bool {
        if duration.is_zero() {
            return true;
        }
        let now = Instant::now();
        let until = expiry(now, duration);
        match self.next_allowed.entry(CooldownKey::new(room, command, actor)) {
            Entry::Occupied(mut entry) => {
                if *entry.get() > now {
                    false
                } else {
                    entry.insert(until);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(until);
                true
            }
        }
    }

    /// Time left before the key is allowed again, if it is currently throttled
    pub fn remaining(&self, room: &str, command: &str, actor: &str) -> Option<Duration> {
        let key = CooldownKey::new(room, command, actor);
        let now = Instant::now();
        self.next_allowed
            .get(&key)
            .and_then(|until| until.checked_duration_since(now))
            .filter(|d| !d.is_zero())
    }

    /// Drop expired entries, returning how many were removed
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.next_allowed.retain(|_, until| {
            let keep = *until > now;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.next_allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.next_allowed.is_empty()
    }

    /// Periodically sweep expired entries until the tracker is dropped elsewhere
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(tracker) = weak.upgrade() else {
                    break;
                };
                let removed = tracker.sweep();
                if removed > 0 {
                    tracing::debug!(removed, remaining = tracker.len(), "Swept expired cooldowns");
                }
            }
        })
    }
}

/// Saturates instead of overflowing for absurdly long cooldowns
fn expiry(now: Instant, duration: Duration) -> Instant {
    now.checked_add(duration)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Human-friendly whole seconds, rounded up so "0 seconds" is never shown
pub fn whole_seconds(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}
