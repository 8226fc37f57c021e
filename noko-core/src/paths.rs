// ABOUTME: XDG Base Directory paths for config, data and log storage.
// ABOUTME: Falls back to the working directory when no home directory is available.

use directories::ProjectDirs;
use std::path::PathBuf;

const QUALIFIER: &str = "org";
const ORGANIZATION: &str = "noko";
const APPLICATION: &str = "noko";

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
}

/// e.g. ~/.local/share/noko/, or ./data
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
}

/// e.g. ~/.local/share/noko/logs/
pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

/// e.g. ~/.config/noko/, or the current directory
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default SQLite database location
pub fn database_file() -> PathBuf {
    data_dir().join("noko.db")
}

/// Expand a leading `~` to the home directory
pub fn expand_tilde(path: &str) -> String {
    let home = || directories::BaseDirs::new().map(|b| b.home_dir().to_path_buf());
    if let Some(stripped) = path.strip_prefix("~/") {
        match home() {
            Some(h) => return h.join(stripped).to_string_lossy().to_string(),
            None => tracing::warn!(path = %path, "Could not determine home directory"),
        }
    } else if path == "~" {
        if let Some(h) = home() {
            return h.to_string_lossy().to_string();
        }
    }
    path.to_string()
}
