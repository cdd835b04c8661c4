//! Central path resolution for iapadmin data files.
//!
//! Resolved once at startup from: CLI `--data-dir` > `IAPADMIN_DATA_DIR` env > `~/.iapadmin`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::Context;

static DATA_DIR: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Pick the data directory. `None` only when no home directory is known.
pub fn resolve_data_dir(explicit: Option<&Path>, env_value: Option<String>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        return Some(p.to_path_buf());
    }
    if let Some(value) = env_value.filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(value));
    }
    dirs::home_dir().map(|home| home.join(".iapadmin"))
}

/// Initialize the global data directory. Returns the resolved path.
pub fn init_data_dir(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    let dir = resolve_data_dir(explicit, std::env::var("IAPADMIN_DATA_DIR").ok())
        .context("HOME directory not found; pass --data-dir")?;

    let mut guard = DATA_DIR.write().unwrap_or_else(|e| e.into_inner());
    *guard = Some(dir.clone());
    Ok(dir)
}

/// Current data directory; the default location until `init_data_dir` runs.
pub fn data_dir() -> PathBuf {
    let guard = DATA_DIR.read().unwrap_or_else(|e| e.into_inner());
    guard
        .clone()
        .or_else(|| resolve_data_dir(None, None))
        .unwrap_or_else(|| PathBuf::from(".iapadmin"))
}

pub fn settings_path() -> PathBuf {
    data_dir().join("config.toml")
}

pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

pub fn ensure_dirs() -> io::Result<()> {
    std::fs::create_dir_all(log_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_dir_wins() {
        let dir = resolve_data_dir(Some(Path::new("/tmp/a")), Some("/tmp/b".into()));
        assert_eq!(dir, Some(PathBuf::from("/tmp/a")));
    }

    #[test]
    fn env_dir_beats_home() {
        let dir = resolve_data_dir(None, Some("/tmp/b".into()));
        assert_eq!(dir, Some(PathBuf::from("/tmp/b")));
    }

    #[test]
    fn empty_env_falls_back_to_home() {
        let dir = resolve_data_dir(None, Some(String::new()));
        assert_eq!(dir, dirs::home_dir().map(|h| h.join(".iapadmin")));
    }
}
