// ABOUTME: Shared, hot-reloadable configuration published as immutable generation-numbered snapshots.
// ABOUTME: A reload that fails validation or backend setup leaves the current snapshot in place.

use crate::config::Config;
use crate::llm::LlmOrchestrator;
use anyhow::{anyhow, Context, Result};
use noko_llm::LlmHandle;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Builds the LLM orchestrator for a candidate config
pub type OrchestratorBuilder = dyn Fn(&Config) -> Result<LlmOrchestrator> + Send + Sync;

/// One published configuration generation.
///
/// Events read a snapshot once and use it for their whole lifetime, so a
/// reload never changes settings halfway through handling a message.
#[derive(Debug)]
pub struct Snapshot {
    pub generation: u64,
    pub config: Arc<Config>,
    pub llm: Arc<LlmOrchestrator>,
}

struct Inner {
    tx: watch::Sender<Arc<Snapshot>>,
    build: Box<OrchestratorBuilder>,
    source: Option<PathBuf>,
    reload_lock: Mutex<()>,
}

#[derive(Clone)]
pub struct SharedConfig {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SharedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedConfig")
            .field("generation", &self.generation())
            .field("source", &self.inner.source)
            .finish()
    }
}

impl SharedConfig {
    /// Validate and publish the initial config as generation 1
    pub fn new<F>(config: Config, source: Option<PathBuf>, build: F) -> Result<Self>
    where
        F: Fn(&Config) -> Result<LlmOrchestrator> + Send + Sync + 'static,
    {
        config.validate().context("Invalid configuration")?;
        let llm = build(&config).context("Failed to set up LLM backends")?;
        let snapshot = Arc::new(Snapshot {
            generation: 1,
            config: Arc::new(config),
            llm: Arc::new(llm),
        });
        let (tx, _rx) = watch::channel(snapshot);
        Ok(Self {
            inner: Arc::new(Inner {
                tx,
                build: Box::new(build),
                source,
                reload_lock: Mutex::new(()),
            }),
        })
    }

    /// Use fixed backend handles for every generation, ignoring `[[llm.backends]]`
    pub fn with_backends(config: Config, backends: Vec<LlmHandle>) -> Result<Self> {
        Self::new(config, None, move |config: &Config| {
            Ok(LlmOrchestrator::with_handles(&config.llm, backends.clone()))
        })
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.inner.tx.borrow())
    }

    pub fn generation(&self) -> u64 {
        self.inner.tx.borrow().generation
    }

    /// Notified on every successful reload
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.inner.tx.subscribe()
    }

    pub fn source(&self) -> Option<&Path> {
        self.inner.source.as_deref()
    }

    /// Swap in a new config. Returns the new generation.
    pub fn reload(&self, config: Config) -> Result<u64> {
        let _guard = self
            .inner
            .reload_lock
            .lock()
            .map_err(|e| anyhow!("Reload mutex poisoned: {}", e))?;

        if let Err(e) = config.validate() {
            tracing::warn!(error = %e, "Rejected config reload");
            return Err(anyhow!(e).context("Invalid configuration; keeping current config"));
        }
        let llm = match (self.inner.build)(&config) {
            Ok(llm) => llm,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected config reload: backend setup failed");
                return Err(e.context("Failed to set up LLM backends; keeping current config"));
            }
        };

        let generation = self.generation() + 1;
        self.inner.tx.send_replace(Arc::new(Snapshot {
            generation,
            config: Arc::new(config),
            llm: Arc::new(llm),
        }));
        tracing::info!(generation, "Configuration reloaded");
        Ok(generation)
    }

    /// Re-read the file the config was loaded from, environment overrides included
    pub fn reload_from_source(&self) -> Result<u64> {
        let path = self
            .inner
            .source
            .as_deref()
            .ok_or_else(|| anyhow!("No config file to reload from"))?;
        let config = Config::load_from(path)?;
        self.reload(config)
    }
}
