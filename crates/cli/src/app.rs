use std::sync::Arc;

use anyhow::Context;
use iapadmin_core::{Console, Endpoints, HttpCompanion, ProjectMode, WsConnector};
use iapadmin_protocol::client::Variables;
use tracing::info;

use crate::settings::Settings;

/// Everything a command needs: settings, the HTTP client and a console
pub struct App {
    pub settings: Settings,
    pub api: Arc<HttpCompanion>,
    pub console: Console,
}

impl App {
    pub fn connect(settings: Settings) -> anyhow::Result<Self> {
        let endpoints = Endpoints::new(&settings.server_url);
        let api = Arc::new(
            HttpCompanion::new(endpoints.clone(), settings.request_timeout())
                .context("building HTTP client")?,
        );
        let console = Console::new(api.clone(), Arc::new(WsConnector), endpoints);
        info!(
            component = "cli",
            event = "cli.connected",
            server_url = %settings.server_url,
            "Console created"
        );
        Ok(Self {
            settings,
            api,
            console,
        })
    }

    /// Load the configuration and apply `-c name=value` overrides.
    pub async fn load(&mut self, commons: &Variables) -> anyhow::Result<()> {
        self.console.load_config().await?;
        for (name, value) in commons {
            self.console.set_common(name, value)?;
        }
        Ok(())
    }

    /// Pick the project and list its instances. An explicit project is
    /// validated; otherwise the configured project operation decides.
    pub async fn resolve(&mut self, project: Option<String>) -> anyhow::Result<String> {
        let mode = match project {
            Some(name) => ProjectMode::Validate(name),
            None => ProjectMode::Get,
        };
        Ok(self.console.resolve_project(mode).await?)
    }
}

/// Parse a `name=value` argument.
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got `{s}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing name in `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

pub fn to_variables(pairs: &[(String, String)]) -> Variables {
    pairs.iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_pairs() {
        assert_eq!(
            parse_key_val("ZONE=us-west1-b"),
            Ok(("ZONE".to_string(), "us-west1-b".to_string()))
        );
        assert_eq!(
            parse_key_val("ARGS=a=b"),
            Ok(("ARGS".to_string(), "a=b".to_string()))
        );
        assert_eq!(parse_key_val("EMPTY="), Ok(("EMPTY".to_string(), String::new())));
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }
}
