//! `iapadmin run`, `iapadmin workflow` and `iapadmin instance-op`
//!
//! Each prepares on the companion server, opens operation sessions and
//! streams their output until the server closes them. Ctrl-C ends every
//! session still running; a second Ctrl-C stops waiting.

use std::collections::HashSet;

use console::style;
use iapadmin_core::{Console, ConsoleUpdate, SessionId};
use iapadmin_protocol::client::Variables;
use tracing::info;

use crate::app::App;
use crate::render;

pub async fn run(
    app: &mut App,
    operation: &str,
    params: &[(String, String)],
    commons: &Variables,
) -> anyhow::Result<()> {
    app.load(commons).await?;
    for (name, value) in params {
        app.console.set_param(operation, name, value)?;
    }

    let prepared = app.console.prepare(operation).await?;
    render::notice(&format!("Prepared {operation} ({})", prepared.status));

    let session = app.console.start_prepared(operation).await?;
    announce(&app.console);
    stream_sessions(&mut app.console, vec![session]).await
}

pub async fn workflow(app: &mut App, name: &str, commons: &Variables) -> anyhow::Result<()> {
    app.load(commons).await?;
    app.console.prepare_workflow(name).await?;

    let members: Vec<String> = match app.console.catalog() {
        Some(catalog) => {
            let workflow = catalog.workflow(name)?;
            workflow
                .members
                .iter()
                .map(|id| catalog.operation(*id).name.clone())
                .collect()
        }
        None => Vec::new(),
    };

    let mut sessions = Vec::with_capacity(members.len());
    for member in &members {
        sessions.push(app.console.start_prepared(member).await?);
        announce(&app.console);
    }
    stream_sessions(&mut app.console, sessions).await
}

pub async fn instance_op(
    app: &mut App,
    instance: &str,
    operation: &str,
    project: Option<String>,
    commons: &Variables,
) -> anyhow::Result<()> {
    app.load(commons).await?;
    app.resolve(project).await?;

    app.console
        .prepare_instance_operation(operation, instance)
        .await?;
    let session = app.console.start_instance_operation().await?;
    announce(&app.console);
    stream_sessions(&mut app.console, vec![session]).await
}

fn announce(console: &Console) {
    if let Some(notice) = console.notice() {
        render::notice(&notice.text);
    }
}

fn label_of(console: &Console, session: &SessionId) -> String {
    console
        .registry()
        .get(session)
        .map(|s| s.label.clone())
        .unwrap_or_else(|| session.to_string())
}

/// Print channel output until every session in `sessions` is closed.
pub async fn stream_sessions(console: &mut Console, sessions: Vec<SessionId>) -> anyhow::Result<()> {
    let mut live: HashSet<SessionId> = sessions.into_iter().collect();
    let mut interrupted = false;

    while !live.is_empty() {
        tokio::select! {
            update = console.next_event() => {
                let Some(update) = update else { break };
                match update {
                    ConsoleUpdate::Output { session, message } => {
                        render::print_output(&label_of(console, &session), &message);
                    }
                    ConsoleUpdate::Errored { session, message } => {
                        eprintln!(
                            "{} {}: {message}",
                            style("error").red().bold(),
                            label_of(console, &session)
                        );
                        live.remove(&session);
                    }
                    ConsoleUpdate::Closed { session } => {
                        render::notice(&format!("{} finished", label_of(console, &session)));
                        live.remove(&session);
                    }
                    ConsoleUpdate::Opened { .. } | ConsoleUpdate::Stale => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if interrupted {
                    break;
                }
                interrupted = true;
                end_sessions(console, &mut live).await?;
            }
        }
    }
    Ok(())
}

/// Close the tab of every live session, which sends its end message.
async fn end_sessions(console: &mut Console, live: &mut HashSet<SessionId>) -> anyhow::Result<()> {
    info!(
        component = "cli",
        event = "cli.interrupted",
        sessions = live.len(),
        "Ending sessions"
    );
    for id in live.drain().collect::<Vec<_>>() {
        let Some(index) = console.registry().position(&id) else {
            continue;
        };
        console.select_tab(index)?;
        console.close_current_tab().await?;
        announce(console);
    }
    Ok(())
}
