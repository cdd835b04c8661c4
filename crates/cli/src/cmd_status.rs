//! `iapadmin status`: check the companion server and its configuration.

use std::path::Path;

use console::style;
use iapadmin_core::CompanionApi;
use iapadmin_protocol::client::VerifyTokenRequest;

use crate::app::App;
use crate::render;
use crate::VERSION;

pub async fn run(app: &mut App, data_dir: &Path, token: Option<String>) -> anyhow::Result<()> {
    println!();
    println!("  iapadmin v{}", VERSION);
    println!("  Data dir: {}", data_dir.display());
    println!("  Server: {}", app.settings.server_url);

    match app.api.health().await {
        Ok(health) => println!("  Health: {}", style(health.status).green()),
        Err(err) => {
            println!("  Health: {}", style("unreachable").red());
            println!();
            println!("  {}", err.user_message());
            println!();
            return Ok(());
        }
    }

    if let Some(token) = token {
        let verified = app.api.verify_token(&VerifyTokenRequest { token }).await;
        match verified {
            Ok(response) => match (response.email, response.error) {
                (_, Some(error)) => println!("  Token: {}", style(error).red()),
                (Some(email), None) => println!("  Token: verified for {email}"),
                (None, None) => println!("  Token: verified"),
            },
            Err(err) => println!("  Token: {}", style(err.user_message()).red()),
        }
    }

    match app.console.load_config().await {
        Ok(caps) => {
            let operations = app
                .console
                .catalog()
                .map(|c| c.operations().len())
                .unwrap_or(0);
            println!("  Operations: {operations}");
            println!("  Features: {}", render::capability_summary(&caps));
        }
        Err(err) => println!("  Config: {}", style(err.user_message()).red()),
    }

    println!();
    Ok(())
}
