use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Database location; the XDG data directory when unset.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// Bound on each session's outbound queue; broadcast frames beyond it
    /// are dropped for that session.
    #[serde(default = "default_queue_depth")]
    pub outbound_queue_depth: usize,
    /// Delay between acknowledging a logout and closing the connection.
    #[serde(default = "default_logout_grace_ms")]
    pub logout_grace_ms: u64,
}

impl ServerConfig {
    /// Load from an explicit path, or from the default config location,
    /// falling back to defaults when no file exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path(),
        };
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("invalid config {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn config_path() -> PathBuf {
        config_dir().join("config.toml")
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(default_db_path)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            db_path: None,
            outbound_queue_depth: default_queue_depth(),
            logout_grace_ms: default_logout_grace_ms(),
        }
    }
}

fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(dir).join("messengerd")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".config").join("messengerd")
    } else {
        PathBuf::from("/tmp/messengerd")
    }
}

fn default_db_path() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(dir).join("messengerd").join("chat.db")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("messengerd")
            .join("chat.db")
    } else {
        PathBuf::from("/tmp/messengerd/chat.db")
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_queue_depth() -> usize {
    64
}

fn default_logout_grace_ms() -> u64 {
    50
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen.port(), 8080);
        assert_eq!(config.outbound_queue_depth, 64);
        assert_eq!(config.logout_grace_ms, 50);
        assert!(config.db_path.is_none());
    }

    #[test]
    fn partial_config_uses_defaults() {
        let config: ServerConfig = toml::from_str("listen = \"127.0.0.1:9000\"").unwrap();
        assert_eq!(config.listen.port(), 9000);
        assert_eq!(config.outbound_queue_depth, 64);
    }

    #[test]
    fn explicit_db_path_wins() {
        let config: ServerConfig = toml::from_str("db_path = \"/var/lib/chat.db\"").unwrap();
        assert_eq!(config.resolved_db_path(), PathBuf::from("/var/lib/chat.db"));
    }
}
