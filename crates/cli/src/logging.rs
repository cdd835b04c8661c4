use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,hyper=warn,reqwest=warn,tungstenite=warn";
const LOG_FILE: &str = "iapadmin.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    fn from_env(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

/// `IAPADMIN_LOG_FILTER` wins over `RUST_LOG`; `--verbose` only changes the fallback.
fn filter_directive(own: Option<String>, rust_log: Option<String>, verbose: bool) -> String {
    own.or(rust_log)
        .filter(|value| EnvFilter::try_new(value).is_ok())
        .unwrap_or_else(|| if verbose { "debug" } else { DEFAULT_FILTER }.to_string())
}

/// Log to `<log_dir>/iapadmin.log`; the terminal stays free for command output.
/// Keep the guard alive until exit so buffered lines are flushed.
pub fn init_logging(log_dir: &Path, verbose: bool) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;

    let directive = filter_directive(
        std::env::var("IAPADMIN_LOG_FILTER").ok(),
        std::env::var("RUST_LOG").ok(),
        verbose,
    );
    let format = LogFormat::from_env(std::env::var("IAPADMIN_LOG_FORMAT").ok().as_deref());

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, LOG_FILE));
    let registry = tracing_subscriber::registry().with(EnvFilter::try_new(&directive)?);
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true);
    match format {
        LogFormat::Pretty => registry.with(layer.pretty()).try_init()?,
        LogFormat::Json => registry.with(layer.json().flatten_event(true)).try_init()?,
    }

    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        log_path = %log_dir.join(LOG_FILE).display(),
        filter = %directive,
    );
    Ok(guard)
}
