//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use mizan_engine::EngineConfig;

/// Environment variable holding the auth token
pub const AUTH_TOKEN_ENV: &str = "MIZAN_AUTH_TOKEN";

const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Configuration for mizan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the question-answering service
    pub base_url: Option<String>,
    /// Bearer token for signed-in use (prefer MIZAN_AUTH_TOKEN)
    pub auth_token: Option<String>,
    /// Sticky guest session id, generated on first guest use
    pub guest_session_id: Option<String>,
    /// Always use guest mode
    pub guest: Option<bool>,
    /// Show thinking notes while an answer streams
    pub enable_thinking: Option<bool>,
    /// Stream answers (false waits for the whole answer)
    pub streaming: Option<bool>,
    /// Preferred answer language, e.g. "en" or "ar"
    pub language: Option<String>,
    /// Freshness window for server history, in seconds
    pub sync_ttl_secs: Option<u64>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mizan")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("MIZAN_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            base_url: Some(DEFAULT_BASE_URL.to_string()),
            enable_thinking: Some(true),
            streaming: Some(true),
            ..Default::default()
        };

        default_config.save()?;
        Ok(path)
    }

    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    /// Auth token from the given value, config, or MIZAN_AUTH_TOKEN
    pub fn auth_token(&self, provided: Option<&str>) -> Option<String> {
        let provided = provided.or(self.auth_token.as_deref());
        mizan_ai::providers::get_auth_token(provided, AUTH_TOKEN_ENV).ok()
    }

    /// Engine settings derived from this file
    pub fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        let ttl = self.sync_ttl_secs.map(Duration::from_secs);
        EngineConfig {
            enable_thinking: self.enable_thinking.unwrap_or(defaults.enable_thinking),
            streaming: self.streaming.unwrap_or(defaults.streaming),
            language_preference: self.language.clone(),
            conversations_ttl: ttl.unwrap_or(defaults.conversations_ttl),
            messages_ttl: ttl.unwrap_or(defaults.messages_ttl),
            ..defaults
        }
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# mizan configuration file
# Place at ~/.config/mizan/config.toml (Linux/Mac) or %APPDATA%\mizan\config.toml (Windows)

# Question-answering service
base_url = "http://localhost:8000"

# Bearer token for signed-in use (optional - prefer the MIZAN_AUTH_TOKEN env var)
# auth_token = "..."

# Always chat as a guest; guest conversations stay on this device
# guest = false

# Show thinking notes while an answer streams
enable_thinking = true

# Stream answers as they are written (false waits for the whole answer)
streaming = true

# Preferred answer language (optional)
# language = "en"

# How long synced history stays fresh, in seconds (default 300)
# sync_ttl_secs = 300
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(example_config()).unwrap();
        assert_eq!(config.base_url.as_deref(), Some("http://localhost:8000"));
        assert_eq!(config.streaming, Some(true));
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn test_engine_config_overrides() {
        let config = Config {
            streaming: Some(false),
            language: Some("ar".into()),
            sync_ttl_secs: Some(60),
            ..Default::default()
        };
        let engine = config.engine_config();
        assert!(!engine.streaming);
        assert!(engine.enable_thinking);
        assert_eq!(engine.language_preference.as_deref(), Some("ar"));
        assert_eq!(engine.messages_ttl, Duration::from_secs(60));
        assert_eq!(engine.title_max_chars, 50);
    }
}
