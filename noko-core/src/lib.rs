// ABOUTME: Transport-agnostic chat bot engine: policy cascade, cooldowns, history, plugins and LLM orchestration
// ABOUTME: Rooms run as independent sequential tasks; configuration is swapped atomically on reload

pub mod commands;
pub mod config;
pub mod cooldown;
pub mod dispatcher;
pub mod error;
pub mod history;
pub mod ignore;
pub mod llm;
pub mod metrics;
pub mod paths;
pub mod plugin;
pub mod policy;
pub mod reload;
pub mod rooms;
pub mod scheduler;
pub mod store;
pub mod traits;

pub use config::Config;
pub use cooldown::CooldownTracker;
pub use dispatcher::{Dispatch, Dispatcher, Outcome, Services};
pub use error::{ConfigError, RegistryError};
pub use history::{HistoryBuffer, HistoryEntry};
pub use llm::{CompletionRequest, FilterVerdict, LlmOrchestrator, Persona};
pub use plugin::{CommandSpec, Plugin, PluginContext, PluginRegistry, TickContext};
pub use policy::{resolve, EffectivePolicy, GlobalPolicy, RoomPolicy, Setting};
pub use reload::{SharedConfig, Snapshot};
pub use rooms::{Room, RoomManager};
pub use store::{MemoryStore, SqliteStore, Store};
pub use traits::{BotControl, InboundEvent, OutgoingEvent, Transport};

// Re-export the LLM backend layer so applications need only one dependency
pub use noko_llm;
