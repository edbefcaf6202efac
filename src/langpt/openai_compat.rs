use super::types::{non_blank, ApiConfig, ApiError, ChatMessage, LlmProviderPreset, Usage, DEFAULT_MODEL};

use serde_json::Value;
use std::time::Duration;

pub struct OpenAiCompatClient {
    client: reqwest::Client,
    config: ApiConfig,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

/// Base URL and model used when the config leaves them blank.
fn preset_defaults(preset: LlmProviderPreset) -> (Option<&'static str>, Option<&'static str>) {
    match preset {
        LlmProviderPreset::Openai => (Some("https://api.openai.com/v1"), Some(DEFAULT_MODEL)),
        LlmProviderPreset::Openrouter => {
            (Some("https://openrouter.ai/api/v1"), Some("openai/gpt-4.1-nano"))
        }
        LlmProviderPreset::Ollama => (Some("http://localhost:11434/v1"), Some("llama3.1")),
        LlmProviderPreset::Lmstudio => (Some("http://localhost:1234/v1"), Some("llama3.1")),
        LlmProviderPreset::Custom | LlmProviderPreset::Anthropic => (None, None),
    }
}

impl OpenAiCompatClient {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        let (default_base, default_model) = preset_defaults(config.provider.preset);
        let base_url = non_blank(config.provider.base_url.clone())
            .or_else(|| default_base.map(str::to_string))
            .map(|u| u.trim_end_matches('/').to_string())
            .ok_or_else(|| ApiError::Parse("A base URL is required for this provider".to_string()))?;
        let model = non_blank(config.provider.model.clone())
            .or_else(|| default_model.map(str::to_string))
            .ok_or_else(|| ApiError::Parse("A model name is required for this provider".to_string()))?;

        let api_key = non_blank(config.provider.api_key.clone());

        if matches!(
            config.provider.preset,
            LlmProviderPreset::Openai | LlmProviderPreset::Openrouter
        ) && api_key.is_none()
        {
            return Err(ApiError::NoApiKey {
                provider: config.provider.preset.as_str().to_string(),
            });
        }

        Ok(Self {
            client,
            config,
            base_url,
            api_key,
            model,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: &str) {
        self.model = model.trim().to_string();
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Sends the whole rolling conversation and returns the reply text.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<(String, Usage), ApiError> {
        let (text, usage) = self.send(messages, self.config.max_tokens, true).await?;
        if text.is_empty() {
            return Err(ApiError::Parse("Completion returned no content".to_string()));
        }
        Ok((text, usage))
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        json_mode: bool,
    ) -> Result<(String, Usage), ApiError> {
        let url = self.chat_completions_url();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": self.config.temperature,
        });
        // Only OpenAI proper is known to honour json_object mode.
        if json_mode && matches!(self.config.provider.preset, LlmProviderPreset::Openai) {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        let mut req = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .json(&body);

        if let Some(key) = &self.api_key {
            req = req.header("authorization", format!("Bearer {}", key));
        }

        tracing::debug!(model = %self.model, turns = messages.len(), "chat completion request");

        let response = req.send().await?;
        let status = response.status();
        let raw: Value = response.json().await?;

        if !status.is_success() {
            return Err(ApiError::ApiResponse {
                status: status.as_u16(),
                message: raw.to_string(),
            });
        }

        let text = raw
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c0| c0.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or("")
            .trim()
            .to_string();

        let usage = raw
            .get("usage")
            .and_then(|u| {
                Some(Usage {
                    input_tokens: u.get("prompt_tokens")?.as_u64()? as u32,
                    output_tokens: u.get("completion_tokens")?.as_u64()? as u32,
                })
            })
            .unwrap_or_default();

        Ok((text, usage))
    }

    pub async fn test_connection(&self) -> Result<(), ApiError> {
        let messages = [
            ChatMessage::system("You are a connectivity test. Reply with OK."),
            ChatMessage::user("ping"),
        ];
        let _ = self.send(&messages, 1, false).await?;
        Ok(())
    }
}
