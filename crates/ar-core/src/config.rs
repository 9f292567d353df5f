use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration loaded from `~/.armada/config.toml`, with
/// `ARMADA_*` environment variables taking precedence over the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Deployment environment name; `development` unlocks the auth bypass.
    #[serde(default = "default_environment")]
    pub environment: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            auth: AuthConfig::default(),
            environment: default_environment(),
        }
    }
}

impl Config {
    /// Load config from `~/.armada/config.toml` (defaults when absent), then
    /// apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        let mut cfg = if path.exists() {
            let text =
                std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
            toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?
        } else {
            Config::default()
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Load from a specific path (no env overrides; useful for tests).
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("ARMADA_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("ARMADA_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(path) = std::env::var("ARMADA_DB_PATH") {
            self.store.path = path;
        }
        if let Ok(env) = std::env::var("ARMADA_ENV") {
            self.environment = env;
        }
        if let Ok(flag) = std::env::var("ARMADA_AUTH_DISABLED") {
            self.auth.disabled = matches!(flag.as_str(), "1" | "true" | "yes");
        }
    }

    /// Refuse configurations that would run without authentication outside
    /// development. Called once at daemon startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.disabled && self.environment != "development" {
            return Err(ConfigError::InsecureBypass(self.environment.clone()));
        }
        Ok(())
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".armada")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("auth bypass is enabled but environment is `{0}` (development only)")]
    InsecureBypass(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path; `:memory:` is honored for ad-hoc runs.
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Development bypass: synthesize a fixed identity for every request.
    #[serde(default)]
    pub disabled: bool,
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    7410
}

fn default_store_path() -> String {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".armada")
        .join("armada.db")
        .to_string_lossy()
        .into_owned()
}

fn default_environment() -> String {
    "development".into()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_development_with_auth_on() {
        let cfg = Config::default();
        assert_eq!(cfg.environment, "development");
        assert!(!cfg.auth.disabled);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn bypass_is_rejected_outside_development() {
        let mut cfg = Config::default();
        cfg.auth.disabled = true;
        assert!(cfg.validate().is_ok());

        cfg.environment = "production".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::InsecureBypass(_))));
    }

    #[test]
    fn load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
environment = "staging"

[server]
host = "0.0.0.0"
port = 9000

[store]
path = "/var/lib/armada/armada.db"
"#,
        )
        .unwrap();

        let cfg = Config::load_from(&path).unwrap();
        assert_eq!(cfg.environment, "staging");
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.store.path, "/var/lib/armada/armada.db");
        assert!(!cfg.auth.disabled);
    }
}
