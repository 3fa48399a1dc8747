//! Dispatch construction (filters, formats).

use core::str::FromStr;

use ::tracing::Dispatch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogError {
    #[error("invalid log level '{level}': {reason}")]
    InvalidLevel { level: String, reason: String },

    #[error("unknown log format '{0}' (expected json, pretty or compact)")]
    UnknownFormat(String),
}

/// Output format of the log stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl FromStr for LogFormat {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" | "text" => Ok(LogFormat::Compact),
            other => Err(LogError::UnknownFormat(other.to_string())),
        }
    }
}

/// Resolved logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Filter directive (`info`, `debug`, `grainlify_infra=debug,info`, ...).
    pub level: String,
    pub format: LogFormat,
    /// When true, a valid `RUST_LOG` takes precedence over `level`.
    pub honor_rust_log: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            honor_rust_log: true,
        }
    }
}

impl LogSettings {
    pub fn new(level: impl Into<String>, format: LogFormat) -> Self {
        Self {
            level: level.into(),
            format,
            ..Self::default()
        }
    }

    fn filter(&self) -> Result<EnvFilter, LogError> {
        if self.honor_rust_log {
            if let Ok(filter) = EnvFilter::try_from_default_env() {
                return Ok(filter);
            }
        }

        EnvFilter::try_new(&self.level).map_err(|e| LogError::InvalidLevel {
            level: self.level.clone(),
            reason: e.to_string(),
        })
    }
}

/// Build a dispatch for the given settings.
///
/// The returned value is not installed anywhere; attach it to a future with
/// `with_subscriber` or scope it with `tracing::dispatcher::with_default`.
pub fn dispatch(settings: &LogSettings) -> Result<Dispatch, LogError> {
    let filter = settings.filter()?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(SystemTime)
        .with_target(false);

    let dispatch = match settings.format {
        LogFormat::Json => Dispatch::new(builder.json().finish()),
        LogFormat::Pretty => Dispatch::new(builder.pretty().finish()),
        LogFormat::Compact => Dispatch::new(builder.compact().finish()),
    };

    Ok(dispatch)
}

/// Logger used before configuration is available: `info`, JSON.
pub fn bootstrap_dispatch() -> Dispatch {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    Dispatch::new(
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(SystemTime)
            .with_target(false)
            .json()
            .finish(),
    )
}
