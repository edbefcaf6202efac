use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::langpt::types::{ApiConfig, LlmProviderConfig, LlmProviderPreset};

const LOCAL_CONFIG_FILE: &str = "langpt.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub chat: ChatConfig,
    pub backend: BackendConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub preset: LlmProviderPreset,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub max_tokens: u32,
    pub temperature: f32,
    /// Answer from the offline mock instead of calling a provider.
    pub mock: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BackendConfig {
    pub url: Option<String>,
    pub anon_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    /// Load configuration with environment variable override support
    ///
    /// Loading order:
    /// 1. `./langpt.toml`, else `<config dir>/langpt/config.toml`
    /// 2. `.env` in the working directory
    /// 3. Environment variable overrides
    /// 4. Validation
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::find_config_file() {
            Some(path) => Self::from_toml(&path)?,
            None => {
                tracing::debug!("Configuration file not found, using defaults");
                Config::default()
            }
        };

        Self::load_env_file();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Reads `.env` from the working directory. Variables already set win.
    pub fn load_env_file() {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment from {}", path.display());
        }
    }

    /// Log filter to use before the config file has been read.
    pub fn startup_log_level() -> String {
        Self::startup_log_level_from(|key| std::env::var(key).ok())
    }

    fn startup_log_level_from<F>(var: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        var("LANGPT_LOG_LEVEL")
            .filter(|level| !level.trim().is_empty())
            .unwrap_or_else(|| LoggingConfig::default().level)
    }

    fn find_config_file() -> Option<PathBuf> {
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join("langpt").join("config.toml"))
            .filter(|path| path.exists())
    }

    pub fn from_toml(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - LANGPT_PROVIDER: provider preset (openai, anthropic, openrouter, ollama, lmstudio, custom)
    /// - LANGPT_MODEL: model name
    /// - LANGPT_BASE_URL: base URL of an OpenAI-compatible server
    /// - OPENAI_API_KEY / ANTHROPIC_API_KEY: key for the selected preset
    /// - SUPABASE_URL, SUPABASE_ANON_KEY: backend project
    /// - LANGPT_LOG_LEVEL: tracing filter (e.g. "info,langpt=debug")
    /// - LANGPT_MOCK: answer offline (true/false)
    pub fn apply_env_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(preset) = var("LANGPT_PROVIDER") {
            match LlmProviderPreset::parse(&preset) {
                Some(p) => {
                    self.provider.preset = p;
                    tracing::info!("Override provider.preset from env: {}", p.as_str());
                }
                None => tracing::warn!("Invalid LANGPT_PROVIDER '{}' (keep {})", preset, self.provider.preset.as_str()),
            }
        }

        if let Some(model) = var("LANGPT_MODEL") {
            tracing::info!("Override provider.model from env: {}", model);
            self.provider.model = Some(model);
        }

        if let Some(url) = var("LANGPT_BASE_URL") {
            tracing::info!("Override provider.base_url from env: {}", url);
            self.provider.base_url = Some(url);
        }

        let key_var = match self.provider.preset {
            LlmProviderPreset::Anthropic => "ANTHROPIC_API_KEY",
            _ => "OPENAI_API_KEY",
        };
        if let Some(key) = var(key_var).filter(|k| !k.trim().is_empty()) {
            self.provider.api_key = Some(key);
            tracing::info!("Override provider.api_key from env ({})", key_var);
        }

        if let Some(url) = var("SUPABASE_URL") {
            self.backend.url = Some(url);
            tracing::info!("Override backend.url from env");
        }

        if let Some(key) = var("SUPABASE_ANON_KEY") {
            self.backend.anon_key = Some(key);
            tracing::info!("Override backend.anon_key from env");
        }

        if let Some(level) = var("LANGPT_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(mock) = var("LANGPT_MOCK") {
            match mock.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.chat.mock = true,
                "0" | "false" | "no" | "off" => self.chat.mock = false,
                _ => tracing::warn!("Invalid LANGPT_MOCK '{}' (keep {})", mock, self.chat.mock),
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chat.max_tokens == 0 {
            return Err(ConfigError::Invalid("chat.max_tokens must be > 0".to_string()));
        }
        if !(0.0..=2.0).contains(&self.chat.temperature) {
            return Err(ConfigError::Invalid(format!(
                "chat.temperature must be between 0 and 2, got {}",
                self.chat.temperature
            )));
        }
        if let Some(url) = self.backend_url() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::Invalid(format!(
                    "backend.url must be an http(s) URL, got {}",
                    url
                )));
            }
        }
        Ok(())
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            provider: LlmProviderConfig {
                preset: self.provider.preset,
                api_key: self.provider.api_key.clone(),
                base_url: self.provider.base_url.clone(),
                model: self.provider.model.clone(),
            },
            max_tokens: self.chat.max_tokens,
            temperature: self.chat.temperature,
        }
    }

    fn backend_url(&self) -> Option<&str> {
        self.backend
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }

    /// URL and anon key, when both are present.
    pub fn backend_credentials(&self) -> Option<(&str, &str)> {
        let key = self
            .backend
            .anon_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())?;
        Some((self.backend_url()?, key))
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            preset: LlmProviderPreset::Openai,
            api_key: None,
            base_url: None,
            model: None,
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1000,
            temperature: 0.7,
            mock: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}
