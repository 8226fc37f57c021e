// ABOUTME: Persistent key/value and append-log storage for plugins, backed by SQLite.
// ABOUTME: Values are namespaced per plugin; logs are FIFO queues drained by consumers.
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Storage used by plugins and the runtime.
///
/// Calls are short and synchronous; callers hold no locks across awaits.
pub trait Store: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>>;

    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()>;

    /// Returns true if a value was removed
    fn delete(&self, namespace: &str, key: &str) -> Result<bool>;

    /// All entries in a namespace, ordered by key
    fn list(&self, namespace: &str) -> Result<Vec<(String, String)>>;

    /// Append an entry to a named log
    fn append_log(&self, log: &str, entry: &str) -> Result<()>;

    /// Remove and return every entry of a named log, oldest first
    fn drain_log(&self, log: &str) -> Result<Vec<String>>;
}

#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database {}", path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (namespace, key)
            )",
            [],
        )
        .context("Failed to create kv table")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                log TEXT NOT NULL,
                entry TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )
        .context("Failed to create logs table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_logs_log ON logs(log, id)",
            [],
        )?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))
    }
}

impl Store for SqliteStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let db = self.conn()?;
        let value = db
            .query_row(
                "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO kv (namespace, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
            params![namespace, key, value],
        )?;
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let db = self.conn()?;
        let removed = db.execute(
            "DELETE FROM kv WHERE namespace = ?1 AND key = ?2",
            params![namespace, key],
        )?;
        Ok(removed > 0)
    }

    fn list(&self, namespace: &str) -> Result<Vec<(String, String)>> {
        let db = self.conn()?;
        let mut stmt =
            db.prepare("SELECT key, value FROM kv WHERE namespace = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![namespace], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list namespace")
    }

    fn append_log(&self, log: &str, entry: &str) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO logs (log, entry) VALUES (?1, ?2)",
            params![log, entry],
        )?;
        Ok(())
    }

    fn drain_log(&self, log: &str) -> Result<Vec<String>> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        let entries = {
            let mut stmt = tx.prepare("SELECT entry FROM logs WHERE log = ?1 ORDER BY id")?;
            let rows = stmt.query_map(params![log], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<String>>>()?
        };
        tx.execute("DELETE FROM logs WHERE log = ?1", params![log])?;
        tx.commit()?;
        Ok(entries)
    }
}

/// Non-persistent store for tests and `storage.in_memory = true`
#[derive(Default)]
pub struct MemoryStore {
    kv: Mutex<BTreeMap<(String, String), String>>,
    logs: Mutex<BTreeMap<String, VecDeque<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let kv = self.kv.lock().unwrap_or_else(|e| e.into_inner());
        Ok(kv.get(&(namespace.to_string(), key.to_string())).cloned())
    }

    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let mut kv = self.kv.lock().unwrap_or_else(|e| e.into_inner());
        kv.insert((namespace.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let mut kv = self.kv.lock().unwrap_or_else(|e| e.into_inner());
        Ok(kv
            .remove(&(namespace.to_string(), key.to_string()))
            .is_some())
    }

    fn list(&self, namespace: &str) -> Result<Vec<(String, String)>> {
        let kv = self.kv.lock().unwrap_or_else(|e| e.into_inner());
        Ok(kv
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|((_, k), v)| (k.clone(), v.clone()))
            .collect())
    }

    fn append_log(&self, log: &str, entry: &str) -> Result<()> {
        let mut logs = self.logs.lock().unwrap_or_else(|e| e.into_inner());
        logs.entry(log.to_string())
            .or_default()
            .push_back(entry.to_string());
        Ok(())
    }

    fn drain_log(&self, log: &str) -> Result<Vec<String>> {
        let mut logs = self.logs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(logs
            .remove(log)
            .map(|q| q.into_iter().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn Store) {
        assert_eq!(store.get("seen", "bob").unwrap(), None);
        store.put("seen", "bob", "1").unwrap();
        store.put("seen", "bob", "2").unwrap();
        store.put("seen", "alice", "3").unwrap();
        store.put("other", "bob", "x").unwrap();
        assert_eq!(store.get("seen", "bob").unwrap().as_deref(), Some("2"));
        assert_eq!(
            store.list("seen").unwrap(),
            vec![("alice".into(), "3".into()), ("bob".into(), "2".into())]
        );
        assert!(store.delete("seen", "bob").unwrap());
        assert!(!store.delete("seen", "bob").unwrap());

        store.append_log("feeds", "a").unwrap();
        store.append_log("feeds", "b").unwrap();
        store.append_log("audit", "z").unwrap();
        assert_eq!(store.drain_log("feeds").unwrap(), vec!["a", "b"]);
        assert!(store.drain_log("feeds").unwrap().is_empty());
        assert_eq!(store.drain_log("audit").unwrap(), vec!["z"]);
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_sqlite_store_in_memory() {
        exercise(&SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_store_persists_across_reopen() {
        let tmpdir = tempfile::tempdir().unwrap();
        let path = tmpdir.path().join("nested").join("noko.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.put("post_office", "k", "v").unwrap();
            store.append_log("feeds", "entry").unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get("post_office", "k").unwrap().as_deref(), Some("v"));
        assert_eq!(store.drain_log("feeds").unwrap(), vec!["entry"]);
    }
}
