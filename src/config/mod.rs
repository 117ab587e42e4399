//! Configuration module for the registry backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Output format for the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key granting the admin role
    pub admin_psk: Option<String>,
    /// Pre-shared key granting the read/poll role
    pub user_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
    /// Upper bound on a single remote content check
    pub poll_timeout: Duration,
    /// Maximum number of polls in flight during a sweep
    pub poll_concurrency: usize,
    /// Interval of the background sweep; `None` disables it
    pub poll_interval: Option<Duration>,
    /// Answer polls with a canned inventory instead of calling the server
    pub demo_mode: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let admin_psk = non_empty_var("COGNOS_ADMIN_PSK");
        let user_psk = non_empty_var("COGNOS_USER_PSK");

        let db_path = env::var("COGNOS_DB_PATH")
            .unwrap_or_else(|_| "./data/registry.sqlite".to_string())
            .into();

        let bind_addr = env::var("COGNOS_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .expect("Invalid COGNOS_BIND_ADDR format");

        let log_level = env::var("COGNOS_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let log_format = match env::var("COGNOS_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let poll_timeout = Duration::from_secs(parse_var("COGNOS_POLL_TIMEOUT_SECS", 30u64).max(1));
        let poll_concurrency = parse_var("COGNOS_POLL_CONCURRENCY", 5usize).max(1);
        let poll_interval = match parse_var("COGNOS_POLL_INTERVAL_SECS", 0u64) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let demo_mode = parse_var("COGNOS_DEMO_MODE", true);

        Self {
            admin_psk,
            user_psk,
            db_path,
            bind_addr,
            log_level,
            log_format,
            poll_timeout,
            poll_concurrency,
            poll_interval,
            demo_mode,
        }
    }

    /// True when no PSK is configured and every caller is treated as admin.
    pub fn auth_disabled(&self) -> bool {
        self.admin_psk.is_none() && self.user_psk.is_none()
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse an env var, falling back to `default` when it is unset or malformed.
fn parse_var<T: FromStr + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            eprintln!("Ignoring invalid {key}={raw:?}, using {default}");
            default
        }),
        Err(_) => default,
    }
}
