// ABOUTME: Tests for startup wiring: store selection, autojoin and shutdown
// ABOUTME: SQLite files go to temporary directories

mod common;

use common::Recorder;
use noko::app::{self, Running};
use noko_core::{Config, SharedConfig};
use std::sync::Arc;

#[test]
fn test_sqlite_store_created_under_missing_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("noko.db");
    let config = Config::parse(&format!(
        "[storage]\npath = \"{}\"\n",
        path.display().to_string().replace('\\', "/")
    ))
    .unwrap();

    let store = app::open_store(&config).unwrap();
    store.put("seen", "k", "v").unwrap();
    assert!(path.exists());

    let reopened = app::open_store(&config).unwrap();
    assert_eq!(reopened.get("seen", "k").unwrap().as_deref(), Some("v"));
}

#[test]
fn test_in_memory_store_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("noko.db");
    let config = Config::parse(&format!(
        "[storage]\nin_memory = true\npath = \"{}\"\n",
        path.display().to_string().replace('\\', "/")
    ))
    .unwrap();

    let store = app::open_store(&config).unwrap();
    store.put("seen", "k", "v").unwrap();
    assert!(!path.exists());
}

#[tokio::test]
async fn test_running_bot_autojoins_and_shuts_down() {
    let config = Config::parse("[bot]\nautojoin = [\"lobby\", \"annex\"]\n").unwrap();
    let shared = SharedConfig::with_backends(config, Vec::new()).unwrap();
    let store = app::open_store(&Config::parse("[storage]\nin_memory = true\n").unwrap()).unwrap();
    let manager = app::build_manager(shared, store, Arc::new(Recorder::default())).unwrap();

    let running = Running::start(Arc::clone(&manager));
    assert_eq!(manager.joined_rooms(), vec!["annex", "lobby"]);

    running.shutdown();
    assert!(manager.joined_rooms().is_empty());
}
