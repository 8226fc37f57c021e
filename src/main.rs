// ABOUTME: Command-line entry point for the noko chat bot
// ABOUTME: `run` starts the bot (console and/or HTTP), `check-config` validates a config file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use noko::app::{self, Running};
use noko::console::{self, ConsoleTransport, LogTransport};
use noko::server::{self, AppState};
use noko::{logging, plugins};
use noko_core::noko_llm::BackendRegistry;
use noko_core::{Config, LlmOrchestrator, RoomManager, Transport};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "noko", version, about = "Multi-room chat bot with per-room policy and LLM replies")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the bot (default)
    Run {
        /// Config file; otherwise NOKO_CONFIG_PATH, ./config.toml, then the XDG config dir
        #[arg(long)]
        config: Option<PathBuf>,
        /// Read messages from stdin and print replies to stdout
        #[arg(long)]
        console: bool,
    },
    /// Load and validate the configuration, then print a summary
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run {
        config: None,
        console: false,
    }) {
        Command::Run { config, console } => run(config, console).await,
        Command::CheckConfig { config } => check_config(config),
    }
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        tracing::error!(panic = %panic_info, "noko panicked");
        eprintln!("\nnoko crashed: {}", panic_info);
        eprintln!("{:?}", std::backtrace::Backtrace::force_capture());
    }));
}

/// Load from an explicit path, or search the usual locations
fn load_config(path: Option<PathBuf>) -> Result<(Config, Option<PathBuf>)> {
    let source = path.or_else(Config::find_config_file);
    let config = match &source {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    Ok((config, source))
}

async fn run(config_path: Option<PathBuf>, use_console: bool) -> Result<()> {
    let (config, source) = load_config(config_path)?;
    let _log_guard = logging::init(&config.logging)?;
    install_panic_hook();

    tracing::info!(
        nick = %config.bot.nick,
        prefix = %config.bot.command_prefix,
        autojoin = ?config.bot.autojoin,
        source = ?source,
        "Starting noko"
    );

    let server_config = config.server.clone();
    let metrics = if server_config.enabled && server_config.metrics {
        Some(
            PrometheusBuilder::new()
                .install_recorder()
                .context("Failed to install Prometheus recorder")?,
        )
    } else {
        None
    };

    let default_room = config
        .bot
        .autojoin
        .first()
        .cloned()
        .unwrap_or_else(|| "console".to_string());
    let store = app::open_store(&config)?;
    let shared = app::shared_config(config, source)?;
    let transport: Arc<dyn Transport> = if use_console {
        Arc::new(ConsoleTransport::new())
    } else {
        Arc::new(LogTransport)
    };
    let manager = app::build_manager(shared, store, transport)?;
    let running = Running::start(Arc::clone(&manager));

    let server_task = server_config.enabled.then(|| {
        let state = Arc::new(AppState {
            manager: Arc::clone(&manager),
            api_key: server_config.api_key.clone(),
            metrics,
        });
        let host = server_config.host.clone();
        let port = server_config.port;
        tokio::spawn(async move {
            if let Err(e) = server::serve(&host, port, state).await {
                tracing::error!(error = %e, "HTTP server stopped");
            }
        })
    });
    let reload_task = spawn_reload_on_hangup(Arc::clone(&manager));

    if use_console {
        tokio::select! {
            result = console::run(Arc::clone(&manager), default_room, "operator".to_string()) => result?,
            _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
            _ = requested_shutdown(&manager) => {}
        }
    } else {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for ctrl-c")?;
                tracing::info!("Interrupted");
            }
            _ = requested_shutdown(&manager) => {}
        }
    }

    if let Some(task) = server_task {
        task.abort();
    }
    if let Some(task) = reload_task {
        task.abort();
    }
    running.shutdown();
    Ok(())
}

/// Wait for an admin's shutdown command, then give its reply a moment to go out
async fn requested_shutdown(manager: &RoomManager) {
    manager.shutdown_requested().await;
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
}

/// SIGHUP re-reads the config file
#[cfg(unix)]
fn spawn_reload_on_hangup(manager: Arc<RoomManager>) -> Option<tokio::task::JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for SIGHUP, reload only via command");
            return None;
        }
    };
    Some(tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!("SIGHUP received, reloading configuration");
            if let Err(e) = manager.config().reload_from_source() {
                tracing::error!(error = %e, "Reload failed");
            }
        }
    }))
}

#[cfg(not(unix))]
fn spawn_reload_on_hangup(_manager: Arc<RoomManager>) -> Option<tokio::task::JoinHandle<()>> {
    None
}

fn check_config(path: Option<PathBuf>) -> Result<()> {
    let (config, source) = load_config(path)?;
    let llm = LlmOrchestrator::from_config(&config.llm, &BackendRegistry::default())
        .context("LLM backends are misconfigured")?;
    let registry = plugins::builtin_registry(&config).context("Plugin registration failed")?;

    match &source {
        Some(path) => println!("Configuration OK: {}", path.display()),
        None => println!("Configuration OK: defaults and environment"),
    }
    println!("  nick:       {}", config.bot.nick);
    println!("  prefix:     {}", config.bot.command_prefix);
    println!("  admins:     {}", config.bot.admins.join(", "));
    println!("  autojoin:   {}", config.bot.autojoin.join(", "));
    println!("  rooms:      {}", config.rooms.keys().cloned().collect::<Vec<_>>().join(", "));
    println!(
        "  plugins:    {}",
        registry
            .plugins()
            .iter()
            .map(|p| p.name().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("  llm:        {}", if config.llm.enabled { "enabled" } else { "disabled" });
    println!("  backends:   {}", llm.backend_names().join(", "));
    println!("  database:   {}", if config.storage.in_memory {
        "in memory".to_string()
    } else {
        config.database_path().display().to_string()
    });
    Ok(())
}
