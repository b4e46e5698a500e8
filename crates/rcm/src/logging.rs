//! Diagnostic log setup. Logs go to stderr so stdout stays machine-readable.

use clap::ValueEnum;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Overrides `--log-level` with a full filter, e.g. `rcm_server=debug`.
pub const LOG_ENV: &str = "RCM_LOG";

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Filter directives: the environment override when set, else the level.
fn directives(env: Option<String>, level: LogLevel) -> String {
    env.filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| level.directive().to_string())
}

fn env_filter(level: LogLevel) -> EnvFilter {
    let wanted = directives(std::env::var(LOG_ENV).ok(), level);
    EnvFilter::try_new(&wanted).unwrap_or_else(|err| {
        eprintln!("ignoring {LOG_ENV}={wanted:?}: {err}");
        EnvFilter::new(level.directive())
    })
}

/// Install the global subscriber. A second call leaves the first in place.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .with_thread_names(true);
    let registry = tracing_subscriber::registry().with(env_filter(level));

    let installed = match format {
        LogFormat::Text => registry.with(layer).try_init(),
        LogFormat::Json => registry.with(layer.json()).try_init(),
    };
    if installed.is_err() {
        tracing::debug!("log subscriber already installed");
    }
}
