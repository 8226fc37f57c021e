// ABOUTME: Wires configuration, storage, plugins and the room manager into a running bot
// ABOUTME: Shared by the CLI entry point and the integration tests

use anyhow::{Context, Result};
use noko_core::ignore::IgnoreList;
use noko_core::noko_llm::BackendRegistry;
use noko_core::scheduler::spawn_scheduler;
use noko_core::{
    Config, CooldownTracker, LlmOrchestrator, MemoryStore, RoomManager, Services, SharedConfig,
    SqliteStore, Store, Transport,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::plugins;

const COOLDOWN_SWEEP: Duration = Duration::from_secs(60);

/// Open the configured store, creating the database directory if needed
pub fn open_store(config: &Config) -> Result<Arc<dyn Store>> {
    if config.storage.in_memory {
        tracing::info!("Using in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let path = config.database_path();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
    }
    tracing::info!(path = %path.display(), "Opening SQLite store");
    Ok(Arc::new(SqliteStore::open(&path)?))
}

/// Build backends from `[[llm.backends]]` on every config generation
pub fn shared_config(config: Config, source: Option<PathBuf>) -> Result<SharedConfig> {
    SharedConfig::new(config, source, |config: &Config| {
        LlmOrchestrator::from_config(&config.llm, &BackendRegistry::default())
    })
}

/// Assemble the room manager around an already-built shared config
pub fn build_manager(
    config: SharedConfig,
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
) -> Result<Arc<RoomManager>> {
    let snapshot = config.snapshot();
    let registry = plugins::builtin_registry(&snapshot.config).context("Failed to register plugins")?;
    tracing::info!(plugins = registry.plugins().len(), "Plugins registered");

    let ignore = IgnoreList::load(Arc::clone(&store)).context("Failed to load ignore list")?;
    let services = Services {
        registry: Arc::new(registry),
        cooldowns: Arc::new(CooldownTracker::new()),
        store,
        ignore: Arc::new(ignore),
    };
    Ok(RoomManager::new(config, services, transport))
}

/// Background work owned by a running bot
pub struct Running {
    pub manager: Arc<RoomManager>,
    tasks: Vec<JoinHandle<()>>,
}

impl Running {
    /// Join autojoin rooms and start schedules and housekeeping
    pub fn start(manager: Arc<RoomManager>) -> Self {
        let snapshot = manager.config().snapshot();
        for room in &snapshot.config.bot.autojoin {
            manager.join(room);
        }
        tracing::info!(rooms = ?manager.joined_rooms(), "Autojoin complete");

        let mut tasks = spawn_scheduler(&manager);
        tasks.push(
            manager
                .dispatcher()
                .services()
                .cooldowns
                .spawn_sweeper(COOLDOWN_SWEEP),
        );
        Self { manager, tasks }
    }

    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        self.manager.shutdown();
        tracing::info!("Bot stopped");
    }
}
