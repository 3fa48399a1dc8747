//! Configuration loading and representation.
//!
//! Everything comes from the process environment (optionally seeded from a
//! `.env` file). The loader is a pure function over a key lookup so tests can
//! feed it a map instead of mutating the real environment.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use grainlify_observability::LogFormat;

/// Environment tag under which a missing database is tolerated.
pub const DEV_ENV: &str = "dev";

pub const DEFAULT_HTTP_ADDR: &str = ":8080";
pub const DEFAULT_DB_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MIGRATION_BUDGET: Duration = Duration::from_secs(120);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Service configuration. Read-only once loaded.
#[derive(Clone)]
pub struct Config {
    pub env: String,
    /// `host:port`; the host may be a name.
    pub http_addr: String,
    pub db_url: Option<String>,
    pub bus_url: Option<String>,
    pub auto_migrate: bool,
    pub log_level: String,
    pub log_format: LogFormat,

    pub db_max_connections: u32,
    pub db_connect_timeout: Duration,
    pub migration_budget: Duration,
    pub shutdown_timeout: Duration,

    // Pass-through values the bootstrap only reports on.
    pub jwt_secret: Option<String>,
    pub github_oauth_client_id: Option<String>,
    pub github_oauth_client_secret: Option<String>,
    pub public_base_url: Option<String>,
}

/// Load `.env` from the working directory (or a parent), if present.
///
/// Returns the path that was loaded. A missing file is not an error.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an explicit key/value map.
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty and whitespace-only values count as unset.
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let env = get("ENV").unwrap_or_else(|| DEV_ENV.to_string());
        let is_dev = env == DEV_ENV;

        let http_addr = parse_listen_addr(get("HTTP_ADDR").as_deref(), get("PORT").as_deref())?;

        let auto_migrate = match get("AUTO_MIGRATE") {
            Some(v) => parse_bool("AUTO_MIGRATE", &v)?,
            None => true,
        };

        let log_format = match get("LOG_FORMAT") {
            Some(v) => v
                .parse::<LogFormat>()
                .map_err(|e| ConfigError::invalid("LOG_FORMAT", &v, e.to_string()))?,
            None if is_dev => LogFormat::Compact,
            None => LogFormat::Json,
        };

        let db_max_connections = match get("DB_MAX_CONNECTIONS") {
            Some(v) => v
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::invalid("DB_MAX_CONNECTIONS", &v, "expected a positive integer"))?,
            None => DEFAULT_DB_MAX_CONNECTIONS,
        };

        Ok(Self {
            env,
            http_addr,
            db_url: get("DB_URL"),
            bus_url: get("BUS_URL"),
            auto_migrate,
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format,
            db_max_connections,
            db_connect_timeout: DEFAULT_DB_CONNECT_TIMEOUT,
            migration_budget: DEFAULT_MIGRATION_BUDGET,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            jwt_secret: get("JWT_SECRET"),
            github_oauth_client_id: get("GITHUB_OAUTH_CLIENT_ID"),
            github_oauth_client_secret: get("GITHUB_OAUTH_CLIENT_SECRET"),
            public_base_url: get("PUBLIC_BASE_URL"),
        })
    }

    pub fn is_dev(&self) -> bool {
        self.env == DEV_ENV
    }
}

// Secrets and connection strings never reach the logs: only their presence.
impl core::fmt::Debug for Config {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Config")
            .field("env", &self.env)
            .field("http_addr", &self.http_addr)
            .field("db_url_set", &self.db_url.is_some())
            .field("bus_url_set", &self.bus_url.is_some())
            .field("auto_migrate", &self.auto_migrate)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("db_max_connections", &self.db_max_connections)
            .field("jwt_secret_set", &self.jwt_secret.is_some())
            .field("github_oauth_client_id_set", &self.github_oauth_client_id.is_some())
            .field("public_base_url", &self.public_base_url)
            .finish_non_exhaustive()
    }
}

/// Normalize the listen address to `host:port`.
///
/// Accepts a socket address (`127.0.0.1:8080`, `[::1]:8080`), a host name
/// with a port (`localhost:8080`, resolved when the listener binds), or
/// `:port` meaning all interfaces. `PORT`, when set, replaces the port
/// (platforms that inject `PORT` expect it to win).
pub fn parse_listen_addr(http_addr: Option<&str>, port: Option<&str>) -> Result<String, ConfigError> {
    let raw = http_addr.unwrap_or(DEFAULT_HTTP_ADDR);

    let (host, raw_port) = match raw.parse::<SocketAddr>() {
        Ok(addr) => (addr.ip().to_string(), addr.port().to_string()),
        Err(_) => {
            let (host, raw_port) = raw
                .rsplit_once(':')
                .ok_or_else(|| ConfigError::invalid("HTTP_ADDR", raw, "expected host:port"))?;
            if host.contains(':') || host.chars().any(char::is_whitespace) {
                return Err(ConfigError::invalid("HTTP_ADDR", raw, "invalid host"));
            }
            let host = if host.is_empty() {
                Ipv4Addr::UNSPECIFIED.to_string()
            } else {
                host.to_string()
            };
            (host, raw_port.to_string())
        }
    };

    let mut listen_port = raw_port
        .parse::<u16>()
        .map_err(|e| ConfigError::invalid("HTTP_ADDR", raw, e.to_string()))?;

    if let Some(port) = port {
        listen_port = port
            .parse::<u16>()
            .map_err(|e| ConfigError::invalid("PORT", port, e.to_string()))?;
    }

    let addr = match host.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, listen_port).to_string(),
        Err(_) => format!("{host}:{listen_port}"),
    };

    Ok(addr)
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, value, "expected a boolean")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_to_dev_with_auto_migrate() {
        let cfg = Config::from_map(&HashMap::new()).unwrap();
        assert!(cfg.is_dev());
        assert!(cfg.auto_migrate);
        assert_eq!(cfg.db_url, None);
        assert_eq!(cfg.bus_url, None);
        assert_eq!(cfg.http_addr, "0.0.0.0:8080");
        assert_eq!(cfg.db_connect_timeout, Duration::from_secs(10));
        assert_eq!(cfg.migration_budget, Duration::from_secs(120));
        assert_eq!(cfg.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(cfg.log_format, LogFormat::Compact);
    }

    #[test]
    fn blank_values_count_as_unset() {
        let cfg = Config::from_map(&vars(&[("DB_URL", "   "), ("BUS_URL", "")])).unwrap();
        assert_eq!(cfg.db_url, None);
        assert_eq!(cfg.bus_url, None);
    }

    #[test]
    fn port_overrides_http_addr_port() {
        let cfg = Config::from_map(&vars(&[("HTTP_ADDR", "127.0.0.1:3000"), ("PORT", "9090")])).unwrap();
        assert_eq!(cfg.http_addr, "127.0.0.1:9090");
    }

    #[test]
    fn http_addr_accepts_host_names_and_ipv6() {
        let cfg = Config::from_map(&vars(&[("HTTP_ADDR", "localhost:8080")])).unwrap();
        assert_eq!(cfg.http_addr, "localhost:8080");

        let cfg = Config::from_map(&vars(&[("HTTP_ADDR", "localhost:8080"), ("PORT", "9000")])).unwrap();
        assert_eq!(cfg.http_addr, "localhost:9000");

        let cfg = Config::from_map(&vars(&[("HTTP_ADDR", "[::1]:8080")])).unwrap();
        assert_eq!(cfg.http_addr, "[::1]:8080");

        let cfg = Config::from_map(&vars(&[("HTTP_ADDR", ":3000")])).unwrap();
        assert_eq!(cfg.http_addr, "0.0.0.0:3000");
    }

    #[test]
    fn non_dev_defaults_to_json_logs() {
        let cfg = Config::from_map(&vars(&[("ENV", "production")])).unwrap();
        assert!(!cfg.is_dev());
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn auto_migrate_accepts_common_spellings() {
        for (raw, expected) in [("false", false), ("0", false), ("TRUE", true), ("on", true)] {
            let cfg = Config::from_map(&vars(&[("AUTO_MIGRATE", raw)])).unwrap();
            assert_eq!(cfg.auto_migrate, expected, "AUTO_MIGRATE={raw}");
        }
    }

    #[test]
    fn malformed_values_are_config_errors() {
        let err = Config::from_map(&vars(&[("AUTO_MIGRATE", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "AUTO_MIGRATE", .. }));

        for bad in ["nowhere", "localhost:http", "::1:8080", "my host:80"] {
            let err = Config::from_map(&vars(&[("HTTP_ADDR", bad)])).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { key: "HTTP_ADDR", .. }), "HTTP_ADDR={bad}");
        }

        let err = Config::from_map(&vars(&[("PORT", "99999")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));
    }

    #[test]
    fn debug_output_masks_connection_strings() {
        let cfg = Config::from_map(&vars(&[
            ("DB_URL", "postgres://user:hunter2@db/app"),
            ("JWT_SECRET", "topsecret"),
        ]))
        .unwrap();
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("topsecret"));
        assert!(rendered.contains("db_url_set: true"));
    }
}
