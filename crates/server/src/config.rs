use anyhow::{Context, Result};
use casabot_core::DelayRange;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Config file looked up in the working directory when `CASABOT_CONFIG` is unset.
pub const CONFIG_FILE_NAME: &str = "casabot.toml";

/// Top-level server configuration (`casabot.toml`, then environment overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub delivery: DeliverySettings,
    #[serde(default)]
    pub catalog: CatalogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Built widget assets; served as a fallback when the directory exists.
    #[serde(default = "default_web_dir")]
    pub web_dir: PathBuf,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            base_url: default_base_url(),
            data_dir: default_data_dir(),
            web_dir: default_web_dir(),
        }
    }
}

/// OpenAI-compatible chat completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: String::new(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Messages of history handed to the advisor.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Listings handed to the advisor as candidates.
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            history_limit: default_history_limit(),
            candidate_limit: default_candidate_limit(),
        }
    }
}

impl SessionSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverySettings {
    #[serde(default = "default_chunk_delay")]
    pub chunk_delay: DelayRange,
    #[serde(default = "default_item_delay")]
    pub item_delay: DelayRange,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            chunk_delay: default_chunk_delay(),
            item_delay: default_item_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CatalogSettings {
    /// JSON array of listings imported at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listings_file: Option<PathBuf>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("session.idle_timeout_secs must be greater than zero")]
    ZeroIdleTimeout,
    #[error("session.history_limit must be greater than zero")]
    ZeroHistoryLimit,
    #[error("session.candidate_limit must be greater than zero")]
    ZeroCandidateLimit,
    #[error("llm.base_url must not be empty")]
    EmptyLlmBaseUrl,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.idle_timeout_secs == 0 {
            return Err(ConfigError::ZeroIdleTimeout);
        }
        if self.session.history_limit == 0 {
            return Err(ConfigError::ZeroHistoryLimit);
        }
        if self.session.candidate_limit == 0 {
            return Err(ConfigError::ZeroCandidateLimit);
        }
        if self.llm.base_url.trim().is_empty() {
            return Err(ConfigError::EmptyLlmBaseUrl);
        }
        Ok(())
    }
}

fn default_port() -> u16 {
    3000
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_web_dir() -> PathBuf {
    PathBuf::from("web/build")
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_idle_timeout() -> u64 {
    30 * 60
}

fn default_sweep_interval() -> u64 {
    5 * 60
}

fn default_history_limit() -> usize {
    10
}

fn default_candidate_limit() -> usize {
    8
}

fn default_chunk_delay() -> DelayRange {
    DelayRange::CHUNK
}

fn default_item_delay() -> DelayRange {
    DelayRange::ITEM
}

/// Load config: `CASABOT_CONFIG` or `./casabot.toml` if present, then env overrides.
pub fn load_config() -> Result<AppConfig> {
    let explicit = std::env::var("CASABOT_CONFIG")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from);

    let mut config = match explicit {
        Some(path) => read_config_file(&path)?,
        None => {
            let path = PathBuf::from(CONFIG_FILE_NAME);
            if path.exists() {
                read_config_file(&path)?
            } else {
                AppConfig::default()
            }
        }
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

pub fn read_config_file(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config at {}", path.display()))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config at {}", path.display()))?;
    Ok(config)
}

/// Apply environment overrides. `lookup` stands in for `std::env::var`.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());

    if let Some(port) = var("PORT") {
        match port.trim().parse() {
            Ok(port) => config.server.port = port,
            Err(_) => tracing::warn!("ignoring invalid PORT value: {port}"),
        }
    }
    if let Some(url) = var("CASABOT_BASE_URL") {
        config.server.base_url = url;
    }
    if let Some(dir) = var("CASABOT_DATA_DIR") {
        config.server.data_dir = PathBuf::from(dir);
    }
    if let Some(dir) = var("CASABOT_WEB_DIR") {
        config.server.web_dir = PathBuf::from(dir);
    }
    if let Some(url) = var("CASABOT_LLM_BASE_URL") {
        config.llm.base_url = url;
    }
    if let Some(key) = var("CASABOT_LLM_API_KEY") {
        config.llm.api_key = key;
    }
    if let Some(model) = var("CASABOT_LLM_MODEL") {
        config.llm.model = model;
    }
    if let Some(path) = var("CASABOT_LISTINGS_FILE") {
        config.catalog.listings_file = Some(PathBuf::from(path));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("port = 3000"));
        assert!(toml_str.contains("idle_timeout_secs = 1800"));
        assert!(toml_str.contains("sweep_interval_secs = 300"));
        assert!(toml_str.contains("min_ms = 1000"));
        assert!(!toml_str.contains("listings_file"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
[session]
idle_timeout_secs = 60

[delivery.item_delay]
min_ms = 10
max_ms = 20
"#,
        )
        .unwrap();
        assert_eq!(parsed.session.idle_timeout(), Duration::from_secs(60));
        assert_eq!(parsed.session.sweep_interval_secs, 300);
        assert_eq!(parsed.delivery.item_delay, DelayRange::new(10, 20));
        assert_eq!(parsed.delivery.chunk_delay, DelayRange::CHUNK);
        assert_eq!(parsed.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PORT", "8081"),
            ("CASABOT_DATA_DIR", "/var/lib/casabot"),
            ("CASABOT_LLM_API_KEY", "sk-test"),
            ("CASABOT_LLM_MODEL", ""),
            ("CASABOT_LISTINGS_FILE", "listings.json"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.server.port, 8081);
        assert_eq!(config.server.data_dir, PathBuf::from("/var/lib/casabot"));
        assert_eq!(config.llm.api_key, "sk-test");
        // Empty values do not clobber defaults.
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(
            config.catalog.listings_file,
            Some(PathBuf::from("listings.json"))
        );
    }

    #[test]
    fn test_invalid_port_is_ignored() {
        let mut config = AppConfig::default();
        apply_env_overrides(&mut config, |k| (k == "PORT").then(|| "abc".to_string()));
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_validate() {
        assert_eq!(AppConfig::default().validate(), Ok(()));

        let mut config = AppConfig::default();
        config.session.history_limit = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroHistoryLimit));

        let parsed: AppConfig = toml::from_str("[session]\nidle_timeout_secs = 0\n").unwrap();
        assert_eq!(parsed.validate(), Err(ConfigError::ZeroIdleTimeout));
    }

    #[test]
    fn test_read_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[server]\nport = 4000\n").unwrap();
        let config = read_config_file(&path).unwrap();
        assert_eq!(config.server.port, 4000);
        assert!(read_config_file(&dir.path().join("missing.toml")).is_err());
    }
}
