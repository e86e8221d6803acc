use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Application-level constants
pub const APP_NAME: &str = "Medchat";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";
const DEFAULT_HEARTBEAT_SECS: u64 = 15;
const DEFAULT_MAX_MESSAGE_CHARS: usize = 2000;
const DEFAULT_LOG_FILTER: &str = "medchat_lib=info,tower_http=warn";

/// Get the application data directory.
/// Falls back to the working directory when the platform has no data dir.
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("medchat")
}

/// Default location of the message database.
pub fn default_db_path() -> PathBuf {
    app_data_dir().join("messages.db")
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Runtime configuration, read from `CHAT_*` environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub db_path: PathBuf,
    /// JSON file with `{token, user_id, display_name, role, avatar_ref}` entries.
    pub identity_file: Option<PathBuf>,
    /// Interval for both the event-stream comment frame and the live channel heartbeat.
    pub heartbeat_interval: Duration,
    pub max_message_chars: usize,
    pub log_filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8787)),
            db_path: default_db_path(),
            identity_file: None,
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            max_message_chars: DEFAULT_MAX_MESSAGE_CHARS,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unset keys use defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = parse_or(&lookup, "CHAT_BIND_ADDR", DEFAULT_BIND_ADDR)?;
        let heartbeat_secs: u64 =
            parse_or(&lookup, "CHAT_HEARTBEAT_SECS", &DEFAULT_HEARTBEAT_SECS.to_string())?;
        if heartbeat_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHAT_HEARTBEAT_SECS",
                value: "0".into(),
            });
        }
        let max_message_chars: usize = parse_or(
            &lookup,
            "CHAT_MAX_MESSAGE_CHARS",
            &DEFAULT_MAX_MESSAGE_CHARS.to_string(),
        )?;

        Ok(Self {
            bind_addr,
            db_path: lookup("CHAT_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(default_db_path),
            identity_file: lookup("CHAT_IDENTITY_FILE").map(PathBuf::from),
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            max_message_chars,
            log_filter: lookup("CHAT_LOG_FILTER")
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let raw = lookup(key).unwrap_or_else(|| {
        tracing::debug!(key, default, "Config key not set, using default");
        default.to_string()
    });
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value: raw })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = ServerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.bind_addr.port(), 8787);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.max_message_chars, 2000);
        assert!(config.identity_file.is_none());
        assert!(config.db_path.ends_with("messages.db"));
    }

    #[test]
    fn env_values_override_defaults() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("CHAT_BIND_ADDR", "0.0.0.0:9000"),
            ("CHAT_DB_PATH", "/tmp/chat.db"),
            ("CHAT_IDENTITY_FILE", "/etc/medchat/users.json"),
            ("CHAT_HEARTBEAT_SECS", "5"),
            ("CHAT_MAX_MESSAGE_CHARS", "500"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.db_path, PathBuf::from("/tmp/chat.db"));
        assert_eq!(
            config.identity_file,
            Some(PathBuf::from("/etc/medchat/users.json"))
        );
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.max_message_chars, 500);
    }

    #[test]
    fn invalid_bind_addr_is_rejected() {
        let err = ServerConfig::from_lookup(lookup_from(&[("CHAT_BIND_ADDR", "not-an-addr")]))
            .unwrap_err();
        assert!(err.to_string().contains("CHAT_BIND_ADDR"));
    }

    #[test]
    fn zero_heartbeat_is_rejected() {
        assert!(ServerConfig::from_lookup(lookup_from(&[("CHAT_HEARTBEAT_SECS", "0")])).is_err());
    }

    #[test]
    fn app_data_dir_ends_with_app_folder() {
        assert!(app_data_dir().ends_with("medchat"));
    }
}
