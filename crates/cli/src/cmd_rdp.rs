//! `iapadmin rdp <instance>`: private RDP over an IAP tunnel.
//!
//! Runs the pre-RDP operations if configured, opens the RDP channel and
//! reports status until the server tears the tunnel down. Credentials, when
//! given, are sent once the server reports it is ready.

use std::time::Instant;

use anyhow::bail;
use console::style;
use iapadmin_core::rdp::STATUS_READY;
use iapadmin_core::{Console, RdpPhase};
use iapadmin_protocol::client::Variables;
use iapadmin_protocol::Instance;
use tracing::info;

use crate::app::App;
use crate::render;

pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// What the operator has already been shown
#[derive(Debug, Default)]
struct Shown {
    status: Option<String>,
    port: Option<String>,
    error: Option<String>,
    notice_at: Option<Instant>,
}

impl Shown {
    /// Print whatever changed on `instance` since the last call
    fn update(&mut self, instance: &Instance) {
        if instance.rdp_status != self.status {
            if let Some(status) = &instance.rdp_status {
                render::notice(status);
            }
            self.status = instance.rdp_status.clone();
        }
        if instance.port_running != self.port {
            if let Some(port) = &instance.port_running {
                println!(
                    "{} connect your RDP client to localhost:{}",
                    style("tunnel").green().bold(),
                    style(port).bold()
                );
            }
            self.port = instance.port_running.clone();
        }
        if instance.rdp_error != self.error {
            if let Some(error) = &instance.rdp_error {
                eprintln!("{} {error}", style("error").red().bold());
            }
            self.error = instance.rdp_error.clone();
        }
    }
}

fn finished(phase: &RdpPhase) -> bool {
    matches!(phase, RdpPhase::Idle | RdpPhase::Closed | RdpPhase::Error(_))
}

pub async fn run(
    app: &mut App,
    instance: &str,
    project: Option<String>,
    credentials: Option<Credentials>,
    commons: &Variables,
) -> anyhow::Result<()> {
    app.load(commons).await?;
    if !app.console.capabilities().rdp {
        bail!("private RDP is disabled in the companion server configuration");
    }
    app.resolve(project).await?;
    match app.console.directory().find(instance) {
        None => bail!("no instance named {instance}"),
        Some(target) if !target.display_private_rdp_dom => {
            bail!("{instance} has no Windows disk, private RDP is not available")
        }
        Some(_) => {}
    }

    let mut shown = Shown::default();
    let phase = app.console.click_rdp(instance).await?;
    report(&app.console, instance, &mut shown);
    if finished(&phase) {
        return Ok(());
    }

    let mut credentials = credentials;
    let mut interrupted = false;
    loop {
        tokio::select! {
            update = app.console.next_event() => {
                if update.is_none() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if interrupted {
                    break;
                }
                interrupted = true;
                info!(
                    component = "cli",
                    event = "cli.rdp_interrupted",
                    instance = %instance,
                    "Ending private RDP"
                );
                app.console.click_rdp(instance).await?;
            }
        }

        report(&app.console, instance, &mut shown);

        let ready = shown.status.as_deref() == Some(STATUS_READY);
        if ready {
            if let Some(creds) = credentials.take() {
                app.console
                    .send_rdp_credentials(instance, &creds.username, &creds.password)
                    .await?;
                render::notice("Credentials sent");
            }
        }

        if finished(&app.console.rdp_phase(instance)) {
            break;
        }
    }
    Ok(())
}

fn report(console: &Console, instance: &str, shown: &mut Shown) {
    if let Some(notice) = console.notice() {
        if shown.notice_at != Some(notice.shown_at) {
            render::notice(&notice.text);
            shown.notice_at = Some(notice.shown_at);
        }
    }
    if let Some(target) = console.directory().find(instance) {
        shown.update(target);
    }
}
