use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, Result};

const APP_DIR: &str = "article-enricher";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    pub openai_api_key: Option<String>,

    #[serde(default = "default_base_url")]
    pub openai_base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Attempts against the text service before a task falls back.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR);
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("articles.db").to_string_lossy().to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_worker_count() -> usize {
    4
}

fn default_retry_delay() -> u64 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            openai_api_key: None,
            openai_base_url: default_base_url(),
            model: default_model(),
            request_timeout_secs: default_request_timeout(),
            max_attempts: default_max_attempts(),
            worker_count: default_worker_count(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config = Self::load_from(&Self::config_path())?;
        Ok(config.with_env_overrides())
    }

    /// Reads the config at `path`, writing the defaults there first if it is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// `OPENAI_API_KEY` and `OPENAI_BASE_URL` win over the file.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                self.openai_api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            if !url.trim().is_empty() {
                self.openai_base_url = url;
            }
        }
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(AppError::Config("max_attempts must be at least 1".to_string()));
        }
        if self.worker_count == 0 {
            return Err(AppError::Config("worker_count must be at least 1".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(AppError::Config(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// A key that is present but blank counts as unconfigured.
    pub fn api_key(&self) -> Option<&str> {
        self.openai_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();

        assert!(path.exists());
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.api_key().is_none());
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "db_path = \"/tmp/a.db\"\nopenai_api_key = \"sk-test\"\nworker_count = 2\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();

        assert_eq!(config.db_path, "/tmp/a.db");
        assert_eq!(config.api_key(), Some("sk-test"));
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.model, "gpt-3.5-turbo");
        assert_eq!(config.retry_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "db_path = \"a.db\"\nmax_attempts = 0\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn blank_key_is_unconfigured() {
        let config = Config {
            openai_api_key: Some("   ".to_string()),
            ..Config::default()
        };
        assert!(config.api_key().is_none());
    }
}
