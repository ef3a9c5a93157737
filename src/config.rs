use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Providers
    pub providers: Vec<ProviderConfig>,

    // Cache
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,

    // Requests
    pub max_text_chars: usize,

    // Storage
    pub state_db_path: String,
    #[serde(default)]
    pub audit_log_path: String,
    #[serde(default = "default_flush_interval")]
    pub state_flush_secs: u64,

    // Meta
    pub log_level: String,
}

/// Which wire protocol a provider speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// `POST {endpoint}/chat/completions` with bearer auth
    OpenAi,
    /// `POST {endpoint}/models/{model}:generateContent`
    Gemini,
}

/// Token bucket parameters; never hard-coded per provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub window_secs: u64,
}

/// Static configuration of one remote provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    pub endpoint: String,
    /// Environment variable holding the API key
    pub auth_token_env: String,
    pub model: String,
    pub rate_limit: RateLimitConfig,
    /// Lower is tried first
    pub priority: u32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_max_output_tokens() -> u32 {
    300
}

fn default_timeout() -> u64 {
    8
}

fn default_enabled() -> bool {
    true
}

fn default_flush_interval() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers: vec![
                ProviderConfig {
                    name: "groq".to_string(),
                    kind: ProviderKind::OpenAi,
                    endpoint: "https://api.groq.com/openai/v1".to_string(),
                    auth_token_env: "GROQ_API_KEY".to_string(),
                    model: "llama-3.1-8b-instant".to_string(),
                    rate_limit: RateLimitConfig {
                        capacity: 30,
                        window_secs: 60,
                    },
                    priority: 0,
                    max_output_tokens: default_max_output_tokens(),
                    timeout_secs: default_timeout(),
                    enabled: true,
                },
                ProviderConfig {
                    name: "gemini".to_string(),
                    kind: ProviderKind::Gemini,
                    endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
                    auth_token_env: "GEMINI_API_KEY".to_string(),
                    model: "gemini-1.5-flash".to_string(),
                    rate_limit: RateLimitConfig {
                        capacity: 15,
                        window_secs: 60,
                    },
                    priority: 1,
                    max_output_tokens: default_max_output_tokens(),
                    timeout_secs: default_timeout(),
                    enabled: true,
                },
            ],
            cache_ttl_secs: 600,
            cache_max_entries: 200,
            max_text_chars: 5000,
            state_db_path: dirs::data_dir()
                .unwrap_or_default()
                .join("lucid/state.db")
                .to_string_lossy()
                .to_string(),
            audit_log_path: dirs::data_dir()
                .unwrap_or_default()
                .join("lucid/audit.log")
                .to_string_lossy()
                .to_string(),
            state_flush_secs: default_flush_interval(),
            log_level: "INFO".to_string(),
        }
    }
}

impl Config {
    /// Load config from the default location, or create default
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    /// Load config from a specific file.
    ///
    /// A missing file yields defaults; a corrupt one is backed up and
    /// replaced by defaults so the service still starts.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str::<Config>(&content) {
            Ok(config) => {
                config.validate()?;
                Ok(config)
            }
            Err(e) => {
                tracing::warn!("⚠️ Config file corrupted or invalid, using defaults: {}", e);
                let backup_path = path.with_extension("json.corrupt");
                let _ = std::fs::rename(path, &backup_path);
                Ok(Self::default())
            }
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject configurations the limiter or clients cannot work with
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                bail!("provider name must not be empty");
            }
            if provider.name == crate::core::LOCAL_PROVIDER {
                bail!("provider name '{}' is reserved", provider.name);
            }
            if !names.insert(provider.name.as_str()) {
                bail!("duplicate provider name '{}'", provider.name);
            }
            if provider.rate_limit.capacity == 0 || provider.rate_limit.window_secs == 0 {
                bail!(
                    "provider '{}': rate limit capacity and window must be positive",
                    provider.name
                );
            }
            if provider.timeout_secs == 0 {
                bail!("provider '{}': timeout must be positive", provider.name);
            }
        }
        if self.cache_max_entries == 0 {
            bail!("cache_max_entries must be positive");
        }
        if self.max_text_chars == 0 {
            bail!("max_text_chars must be positive");
        }
        Ok(())
    }

    /// Enabled providers in ascending priority order, ties broken by name
    pub fn providers_by_priority(&self) -> Vec<&ProviderConfig> {
        let mut providers: Vec<&ProviderConfig> =
            self.providers.iter().filter(|p| p.enabled).collect();
        providers.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.name.cmp(&b.name)));
        providers
    }
}

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lucid")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.cache_max_entries, 200);
        assert_eq!(config.providers[0].timeout_secs, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string(&config).expect("Failed to serialize");
        let restored: Config = serde_json::from_str(&json).expect("Failed to deserialize");
        assert_eq!(config.providers[1].name, restored.providers[1].name);
        assert_eq!(restored.providers[0].kind, ProviderKind::OpenAi);
    }

    #[test]
    fn test_config_corrupt_json_handling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not valid json").unwrap();

        let config = Config::load_from(&path).expect("falls back to defaults");
        assert_eq!(config.providers.len(), 2);
        assert!(dir.path().join("config.json.corrupt").exists());
    }

    #[test]
    fn test_config_rejects_duplicate_names() {
        let mut config = Config::default();
        config.providers[1].name = "groq".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_rejects_zero_capacity() {
        let mut config = Config::default();
        config.providers[0].rate_limit.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_providers_by_priority() {
        let mut config = Config::default();
        config.providers[0].priority = 5;
        let order: Vec<&str> = config
            .providers_by_priority()
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(order, vec!["gemini", "groq"]);

        config.providers[1].enabled = false;
        assert_eq!(config.providers_by_priority().len(), 1);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.json");
        let mut config = Config::default();
        config.cache_ttl_secs = 42;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.cache_ttl_secs, 42);
    }
}
