//! iapadmin CLI
//!
//! Terminal front end for the companion server: inspect the configuration,
//! list compute instances, run operations and workflows with live output, and
//! open private RDP tunnels.

mod app;
mod cmd_catalog;
mod cmd_rdp;
mod cmd_run;
mod cmd_status;
mod logging;
mod paths;
mod render;
mod settings;

use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use console::style;

use crate::app::{parse_key_val, to_variables, App};
use crate::settings::Settings;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "iapadmin", version, about = "Run companion-server operations and private RDP")]
struct Cli {
    /// Companion server base URL (overrides config.toml)
    #[arg(long, global = true, env = "IAPADMIN_SERVER_URL")]
    server: Option<String>,

    /// Data directory for config.toml and logs
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone, Default)]
struct CommonArgs {
    /// Common parameter, repeatable
    #[arg(short = 'c', long = "common", value_name = "NAME=VALUE", value_parser = parse_key_val)]
    commons: Vec<(String, String)>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the companion server and its configuration
    Status {
        /// Also verify this identity token
        #[arg(long)]
        token: Option<String>,
    },
    /// List configured operations and workflows
    Config,
    /// List the compute instances of a project
    Instances {
        #[arg(long)]
        project: Option<String>,
        /// Take the project from a cloud console compute URL
        #[arg(long, conflicts_with = "project")]
        console_url: Option<String>,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Prepare and run an operation, streaming its output
    Run {
        operation: String,
        /// Operation parameter, repeatable
        #[arg(short = 'p', long = "param", value_name = "NAME=VALUE", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Prepare every member of a workflow and run them together
    Workflow {
        name: String,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Run an instance operation against one compute instance
    InstanceOp {
        instance: String,
        operation: String,
        #[arg(long)]
        project: Option<String>,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Open a private RDP tunnel to a Windows instance
    Rdp {
        instance: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(long, requires = "password")]
        username: Option<String>,
        #[arg(long, requires = "username", env = "IAPADMIN_RDP_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Generate shell completions
    Completions {
        /// Target shell (bash, zsh, fish, powershell, elvish)
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{} {err:#}", style("error:").red().bold());
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Command::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "iapadmin", &mut std::io::stdout());
        return Ok(());
    }

    let data_dir = paths::init_data_dir(cli.data_dir.as_deref())?;
    paths::ensure_dirs()?;
    let _logging = logging::init_logging(&paths::log_dir(), cli.verbose)?;

    let settings = Settings::load(&paths::settings_path())?.with_server_override(cli.server);
    let mut app = App::connect(settings)?;

    match cli.command {
        Command::Status { token } => cmd_status::run(&mut app, &data_dir, token).await,
        Command::Config => cmd_catalog::config(&mut app).await,
        Command::Instances {
            project,
            console_url,
            common,
        } => {
            let commons = to_variables(&common.commons);
            cmd_catalog::instances(&mut app, project, console_url, &commons).await
        }
        Command::Run {
            operation,
            params,
            common,
        } => cmd_run::run(&mut app, &operation, &params, &to_variables(&common.commons)).await,
        Command::Workflow { name, common } => {
            cmd_run::workflow(&mut app, &name, &to_variables(&common.commons)).await
        }
        Command::InstanceOp {
            instance,
            operation,
            project,
            common,
        } => {
            let commons = to_variables(&common.commons);
            cmd_run::instance_op(&mut app, &instance, &operation, project, &commons).await
        }
        Command::Rdp {
            instance,
            project,
            username,
            password,
            common,
        } => {
            let credentials = username
                .zip(password)
                .map(|(username, password)| cmd_rdp::Credentials { username, password });
            let commons = to_variables(&common.commons);
            cmd_rdp::run(&mut app, &instance, project, credentials, &commons).await
        }
        Command::Completions { .. } => Ok(()),
    }
}
