// ABOUTME: Runtime ignore list managed by admin commands, persisted in the store.
// ABOUTME: Complements the static `bot.ignored` list from the config file.

use crate::store::Store;
use anyhow::Result;
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

const NAMESPACE: &str = "ignore";

pub struct IgnoreList {
    actors: RwLock<BTreeSet<String>>,
    store: Arc<dyn Store>,
}

impl IgnoreList {
    /// Load previously ignored actors from the store
    pub fn load(store: Arc<dyn Store>) -> Result<Self> {
        let actors = store
            .list(NAMESPACE)?
            .into_iter()
            .map(|(actor, _)| actor)
            .collect();
        Ok(Self {
            actors: RwLock::new(actors),
            store,
        })
    }

    pub fn contains(&self, actor: &str) -> bool {
        self.actors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(actor)
    }

    /// Returns false if the actor was already ignored
    pub fn add(&self, actor: &str) -> Result<bool> {
        let added = self
            .actors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(actor.to_string());
        if added {
            self.store
                .put(NAMESPACE, actor, &chrono::Utc::now().to_rfc3339())?;
            tracing::info!(actor = %actor, "Actor added to ignore list");
        }
        Ok(added)
    }

    /// Returns false if the actor was not ignored
    pub fn remove(&self, actor: &str) -> Result<bool> {
        let removed = self
            .actors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(actor);
        if removed {
            self.store.delete(NAMESPACE, actor)?;
            tracing::info!(actor = %actor, "Actor removed from ignore list");
        }
        Ok(removed)
    }

    pub fn list(&self) -> Vec<String> {
        self.actors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}
