//! `config.toml` in the data directory.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use iapadmin_core::tabs::DEFAULT_CONSOLE_HOST;
use iapadmin_core::DEFAULT_SERVER_URL;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base URL of the companion server
    pub server_url: String,
    pub request_timeout_secs: u64,
    /// Host of the cloud console, for `--console-url`
    pub console_host: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            request_timeout_secs: 30,
            console_host: DEFAULT_CONSOLE_HOST.to_string(),
        }
    }
}

impl Settings {
    /// Read `path`; a missing file means defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// `--server` (or `IAPADMIN_SERVER_URL`) beats the file.
    pub fn with_server_override(mut self, server: Option<String>) -> Self {
        if let Some(url) = server.filter(|u| !u.trim().is_empty()) {
            self.server_url = url;
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
