//! BLEX configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{BlexError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlexConfig {
    /// Public origin prepended to relative notification URLs.
    #[serde(default = "default_site_url")]
    pub site_url: String,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub cipher: CipherConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

fn default_site_url() -> String { "https://blex.me".into() }
fn default_database_path() -> String { "~/.blex/blex.db".into() }

impl Default for BlexConfig {
    fn default() -> Self {
        Self {
            site_url: default_site_url(),
            database_path: default_database_path(),
            cipher: CipherConfig::default(),
            telegram: TelegramConfig::default(),
        }
    }
}

impl BlexConfig {
    /// Load config from the default path (~/.blex/config.toml), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BlexError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| BlexError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Write config as TOML, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| BlexError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Override file values with `BLEX_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Override file values from an arbitrary key lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("BLEX_CIPHER_KEY").filter(|v| !v.is_empty()) {
            self.cipher.key = key;
        }
        if let Some(token) = lookup("BLEX_TELEGRAM_BOT_TOKEN").filter(|v| !v.is_empty()) {
            self.telegram.bot_token = token;
            self.telegram.enabled = true;
        }
        if let Some(url) = lookup("BLEX_SITE_URL").filter(|v| !v.is_empty()) {
            self.site_url = url;
        }
        if let Some(path) = lookup("BLEX_DATABASE_PATH").filter(|v| !v.is_empty()) {
            self.database_path = path;
        }
    }

    /// Database path with `~` expanded.
    pub fn database_file(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database_path).to_string())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the BLEX home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".blex")
    }
}

/// Secret cipher configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CipherConfig {
    /// Static key material. Changing it invalidates every stored secret.
    #[serde(default)]
    pub key: String,
}

/// Telegram Bot API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
    #[serde(default = "default_telegram_timeout")]
    pub timeout_secs: u64,
}

fn default_telegram_api_base() -> String { "https://api.telegram.org".into() }
fn default_telegram_timeout() -> u64 { 10 }

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: String::new(),
            api_base: default_telegram_api_base(),
            timeout_secs: default_telegram_timeout(),
        }
    }
}

impl TelegramConfig {
    /// Whether outbound messages can actually be sent.
    pub fn is_usable(&self) -> bool {
        self.enabled && !self.bot_token.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = BlexConfig::default();
        assert_eq!(config.site_url, "https://blex.me");
        assert_eq!(config.database_path, "~/.blex/blex.db");
        assert!(config.cipher.key.is_empty());
        assert!(!config.telegram.is_usable());
        assert_eq!(config.telegram.api_base, "https://api.telegram.org");
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            site_url = "http://localhost:8000"
            database_path = "/tmp/blex.db"

            [cipher]
            key = "s3cret"

            [telegram]
            enabled = true
            bot_token = "123:abc"
        "#;

        let config: BlexConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.site_url, "http://localhost:8000");
        assert_eq!(config.cipher.key, "s3cret");
        assert!(config.telegram.is_usable());
        assert_eq!(config.telegram.timeout_secs, 10);
        assert_eq!(config.database_file(), PathBuf::from("/tmp/blex.db"));
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: BlexConfig = toml::from_str("").unwrap();
        assert_eq!(config.site_url, "https://blex.me");
        assert!(!config.telegram.enabled);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("BLEX_CIPHER_KEY", "from-env"),
            ("BLEX_TELEGRAM_BOT_TOKEN", "999:xyz"),
            ("BLEX_SITE_URL", ""),
        ]
        .into_iter()
        .collect();

        let mut config = BlexConfig::default();
        config.apply_overrides_from(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.cipher.key, "from-env");
        assert_eq!(config.telegram.bot_token, "999:xyz");
        assert!(config.telegram.is_usable());
        // Empty values do not clobber the file value.
        assert_eq!(config.site_url, "https://blex.me");
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = BlexConfig::load_from(Path::new("/nonexistent/blex.toml")).unwrap_err();
        assert!(matches!(err, BlexError::Config(_)));
    }

    #[test]
    fn test_save_then_load() {
        let dir = std::env::temp_dir().join(format!("blex-config-{}", std::process::id()));
        let path = dir.join("nested").join("config.toml");

        let mut config = BlexConfig::default();
        config.cipher.key = "written".into();
        config.telegram.timeout_secs = 3;
        config.save_to(&path).unwrap();

        let loaded = BlexConfig::load_from(&path).unwrap();
        assert_eq!(loaded.cipher.key, "written");
        assert_eq!(loaded.telegram.timeout_secs, 3);
        assert_eq!(loaded.site_url, config.site_url);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_home_dir() {
        let home = BlexConfig::home_dir();
        assert!(home.to_string_lossy().contains(".blex"));
    }
}
