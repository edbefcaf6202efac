use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LANGUAGE: &str = "spanish";
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderPreset {
    Anthropic,
    Openai,
    Openrouter,
    Ollama,
    Lmstudio,
    Custom,
}

impl LlmProviderPreset {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Some(Self::Anthropic),
            "openai" => Some(Self::Openai),
            "openrouter" => Some(Self::Openrouter),
            "ollama" => Some(Self::Ollama),
            "lmstudio" | "lm-studio" => Some(Self::Lmstudio),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Openai => "openai",
            Self::Openrouter => "openrouter",
            Self::Ollama => "ollama",
            Self::Lmstudio => "lmstudio",
            Self::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    pub preset: LlmProviderPreset,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for LlmProviderConfig {
    fn default() -> Self {
        Self {
            preset: LlmProviderPreset::Openai,
            api_key: None,
            base_url: None,
            model: None,
        }
    }
}

/// Everything a provider client needs to issue one completion.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub provider: LlmProviderConfig,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderConfig::default(),
            max_tokens: 1000,
            temperature: 0.7,
        }
    }
}

/// Trimmed value, or `None` when missing or blank.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("No API key set for provider: {provider}")]
    NoApiKey { provider: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned error: {status}: {message}")]
    ApiResponse { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Message is empty")]
    EmptyMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub system: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesResponse {
    pub content: Vec<ContentBlock>,
    pub usage: Option<ApiUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Self {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        }
    }
}

/// Tutoring preferences. Mirrors the `user_settings` table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TutorSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default = "default_language")]
    pub target_language: String,
    #[serde(default)]
    pub always_correct_sentences: bool,
    #[serde(default)]
    pub correct_punctuation: bool,
    #[serde(default)]
    pub correct_capitalization: bool,
    #[serde(default)]
    pub correct_accents: bool,
    #[serde(default)]
    pub suggest_natural_alternatives: bool,
    #[serde(default)]
    pub show_verb_conjugations: bool,
    #[serde(default)]
    pub explain_tense_usage: bool,
    #[serde(default)]
    pub track_vocabulary: bool,
    #[serde(default)]
    pub custom_instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

impl Default for TutorSettings {
    fn default() -> Self {
        Self {
            id: None,
            user_id: None,
            target_language: default_language(),
            always_correct_sentences: false,
            correct_punctuation: false,
            correct_capitalization: false,
            correct_accents: false,
            suggest_natural_alternatives: false,
            show_verb_conjugations: false,
            explain_tense_usage: false,
            track_vocabulary: false,
            custom_instructions: None,
            created_at: None,
            updated_at: None,
        }
    }
}

impl TutorSettings {
    /// Seed profile written for a user who has no settings row yet.
    pub fn recommended() -> Self {
        Self {
            always_correct_sentences: true,
            suggest_natural_alternatives: true,
            show_verb_conjugations: true,
            explain_tense_usage: true,
            track_vocabulary: true,
            ..Self::default()
        }
    }

    /// Every feature on, used by the example conversation.
    pub fn all_features() -> Self {
        Self {
            correct_punctuation: true,
            correct_capitalization: true,
            correct_accents: true,
            ..Self::recommended()
        }
    }

    pub fn custom_instructions(&self) -> Option<&str> {
        self.custom_instructions
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn apply(&mut self, patch: &SettingsPatch) {
        if let Some(lang) = &patch.target_language {
            self.target_language = lang.clone();
        }
        if let Some(v) = patch.always_correct_sentences {
            self.always_correct_sentences = v;
        }
        if let Some(v) = patch.correct_punctuation {
            self.correct_punctuation = v;
        }
        if let Some(v) = patch.correct_capitalization {
            self.correct_capitalization = v;
        }
        if let Some(v) = patch.correct_accents {
            self.correct_accents = v;
        }
        if let Some(v) = patch.suggest_natural_alternatives {
            self.suggest_natural_alternatives = v;
        }
        if let Some(v) = patch.show_verb_conjugations {
            self.show_verb_conjugations = v;
        }
        if let Some(v) = patch.explain_tense_usage {
            self.explain_tense_usage = v;
        }
        if let Some(v) = patch.track_vocabulary {
            self.track_vocabulary = v;
        }
        if let Some(ci) = &patch.custom_instructions {
            self.custom_instructions = ci.clone();
        }
        self.updated_at = Some(Utc::now());
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Unknown setting: {0}")]
    UnknownKey(String),

    #[error("Invalid value for {key}: {value} (expected true/false)")]
    InvalidValue { key: String, value: String },
}

/// Partial settings update. Only `Some` fields are sent / applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub always_correct_sentences: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_punctuation: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_capitalization: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_accents: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggest_natural_alternatives: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_verb_conjugations: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explain_tense_usage: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_vocabulary: Option<bool>,
    /// `Some(None)` clears the instructions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<Option<String>>,
}

pub const TOGGLE_KEYS: [&str; 8] = [
    "always_correct_sentences",
    "correct_punctuation",
    "correct_capitalization",
    "correct_accents",
    "suggest_natural_alternatives",
    "show_verb_conjugations",
    "explain_tense_usage",
    "track_vocabulary",
];

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn language(code: &str) -> Self {
        Self {
            target_language: Some(code.trim().to_lowercase()),
            ..Self::default()
        }
    }

    pub fn instructions(text: Option<&str>) -> Self {
        let text = text.map(str::trim).filter(|t| !t.is_empty());
        Self {
            custom_instructions: Some(text.map(|t| t.to_string())),
            ..Self::default()
        }
    }

    /// Builds a single-field patch from a `key value` pair typed by the user.
    pub fn from_key_value(key: &str, value: &str) -> Result<Self, SettingsError> {
        let key = key.trim();
        match key {
            "target_language" | "language" => return Ok(Self::language(value)),
            "custom_instructions" | "instructions" => return Ok(Self::instructions(Some(value))),
            _ => {}
        }

        if !TOGGLE_KEYS.contains(&key) {
            return Err(SettingsError::UnknownKey(key.to_string()));
        }

        let flag = match value.trim().to_lowercase().as_str() {
            "true" | "on" | "yes" | "1" => true,
            "false" | "off" | "no" | "0" => false,
            _ => {
                return Err(SettingsError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                })
            }
        };

        let mut patch = Self::default();
        match key {
            "always_correct_sentences" => patch.always_correct_sentences = Some(flag),
            "correct_punctuation" => patch.correct_punctuation = Some(flag),
            "correct_capitalization" => patch.correct_capitalization = Some(flag),
            "correct_accents" => patch.correct_accents = Some(flag),
            "suggest_natural_alternatives" => patch.suggest_natural_alternatives = Some(flag),
            "show_verb_conjugations" => patch.show_verb_conjugations = Some(flag),
            "explain_tense_usage" => patch.explain_tense_usage = Some(flag),
            _ => patch.track_vocabulary = Some(flag),
        }
        Ok(patch)
    }
}
