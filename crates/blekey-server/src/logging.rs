//! Logging setup for the daemon.
//!
//! Production writes JSON to a daily rolling file and compact lines to stdout
//! (picked up by journald). Development prints pretty, colored output with
//! span open/close events.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LEVEL: &str = "info";
const LOG_FILE_PREFIX: &str = "blekey";

// Dropping a guard stops its background writer.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDOUT_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Logging options resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// JSON file output plus journald-friendly stdout.
    pub production: bool,
    /// Filter used when `RUST_LOG` is unset (`BLEKEY_LOG_LEVEL`).
    pub level: String,
    /// Directory for rolling log files (`BLEKEY_LOG_DIR`).
    pub directory: PathBuf,
}

impl LogSettings {
    /// Read `BLEKEY_LOG_LEVEL` and `BLEKEY_LOG_DIR`.
    #[must_use]
    pub fn from_env(production: bool) -> Self {
        Self::from_values(
            production,
            std::env::var("BLEKEY_LOG_LEVEL").ok(),
            std::env::var_os("BLEKEY_LOG_DIR").map(PathBuf::from),
        )
    }

    fn from_values(production: bool, level: Option<String>, directory: Option<PathBuf>) -> Self {
        Self {
            production,
            level: level
                .filter(|level| !level.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LEVEL.to_string()),
            directory: directory.unwrap_or_else(default_log_directory),
        }
    }

    fn filter(&self) -> anyhow::Result<EnvFilter> {
        Ok(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&self.level))?)
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the filter does not parse or, in production, if the
/// log directory cannot be created.
pub fn init(is_production: bool) -> anyhow::Result<()> {
    let settings = LogSettings::from_env(is_production);
    if settings.production {
        init_production(&settings)
    } else {
        init_development(&settings)
    }
}

fn init_production(settings: &LogSettings) -> anyhow::Result<()> {
    std::fs::create_dir_all(&settings.directory)?;

    let file_appender =
        RollingFileAppender::new(Rotation::DAILY, &settings.directory, LOG_FILE_PREFIX);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(settings.filter()?)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);

    Ok(())
}

fn init_development(settings: &LogSettings) -> anyhow::Result<()> {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(settings.filter()?)
        .with(stdout_layer)
        .init();

    Ok(())
}

fn default_log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/blekey")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "blekey")
            .map(|dirs| dirs.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("./logs"))
    }
}
