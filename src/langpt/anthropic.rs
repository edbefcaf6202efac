use super::types::{
    non_blank, ApiConfig, ApiError, ChatMessage, LlmProviderPreset, MessagesRequest,
    MessagesResponse, Role, Usage,
};

use std::time::Duration;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    config: ApiConfig,
}

impl AnthropicClient {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let api_key = non_blank(config.provider.api_key.clone()).ok_or(ApiError::NoApiKey {
            provider: LlmProviderPreset::Anthropic.as_str().to_string(),
        })?;
        let model =
            non_blank(config.provider.model.clone()).unwrap_or_else(|| DEFAULT_MODEL.to_string());

        // A base_url override points at a proxy exposing the same /v1/messages route.
        let api_url = match non_blank(config.provider.base_url.clone()) {
            Some(base) => format!("{}/v1/messages", base.trim_end_matches('/')),
            None => API_URL.to_string(),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            api_url,
            api_key,
            model,
            config,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: &str) {
        self.model = model.trim().to_string();
    }

    pub async fn test_connection(&self) -> Result<(), ApiError> {
        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: 1,
            temperature: 0.0,
            system: "Reply with OK.".to_string(),
            messages: vec![ChatMessage::user("ping")],
        };
        let _ = self.send(&request).await?;
        Ok(())
    }

    /// Sends the rolling conversation. System entries are folded into the
    /// top-level `system` field, the rest keep their order.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<(String, Usage), ApiError> {
        let system = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let turns: Vec<ChatMessage> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .cloned()
            .collect();

        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            system,
            messages: turns,
        };

        let (text, usage) = self.send(&request).await?;
        if text.is_empty() {
            return Err(ApiError::Parse("Completion returned no content".to_string()));
        }
        Ok((text, usage))
    }

    async fn send(&self, request: &MessagesRequest) -> Result<(String, Usage), ApiError> {
        tracing::debug!(model = %request.model, turns = request.messages.len(), "messages request");

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::ApiResponse {
                status: status.as_u16(),
                message: body,
            });
        }

        let resp: MessagesResponse = response.json().await?;
        let text = resp
            .content
            .iter()
            .filter(|b| b.content_type == "text")
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
            .trim()
            .to_string();

        let usage = resp.usage.map(Usage::from).unwrap_or_default();
        Ok((text, usage))
    }
}
