use super::anthropic::AnthropicClient;
use super::mock;
use super::openai_compat::OpenAiCompatClient;
use super::prompts;
use super::response::{parse_structured_response, StructuredResponse};
use super::supabase::SupabaseClient;
use super::types::{ApiConfig, ApiError, ChatMessage, LlmProviderPreset, Role, TutorSettings, Usage};
use super::usage::{calculate_cost, Cost};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rolling message list sent with every turn. Entry 0 is always the system prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new(settings: &TutorSettings) -> Self {
        Self {
            messages: vec![ChatMessage::system(prompts::system_prompt(settings))],
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn system_prompt(&self) -> &str {
        self.messages
            .first()
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }

    pub fn update_settings(&mut self, settings: &TutorSettings) {
        let system = ChatMessage::system(prompts::system_prompt(settings));
        match self.messages.first_mut() {
            Some(first) if first.role == Role::System => *first = system,
            _ => self.messages.insert(0, system),
        }
    }

    pub fn reset(&mut self, settings: &TutorSettings) {
        self.messages.clear();
        self.messages.push(ChatMessage::system(prompts::system_prompt(settings)));
    }

    pub fn push_user(&mut self, text: &str) {
        self.messages.push(ChatMessage::user(text));
    }

    pub fn push_assistant(&mut self, text: &str) {
        self.messages.push(ChatMessage::assistant(text));
    }

    /// Drops the trailing user turn, if that is what the list ends with.
    pub fn pop_user(&mut self) -> Option<ChatMessage> {
        match self.messages.last() {
            Some(m) if m.role == Role::User => self.messages.pop(),
            _ => None,
        }
    }

    pub fn turn_count(&self) -> usize {
        self.messages.len().saturating_sub(1)
    }
}

/// One displayable chat bubble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: String,
    pub text: String,
    pub is_user: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<StructuredResponse>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub reply: StructuredResponse,
    pub usage: Usage,
    pub cost: Cost,
    pub model: String,
}

pub enum TutorClient {
    Anthropic(AnthropicClient),
    OpenAiCompat(OpenAiCompatClient),
    /// Offline replies generated from the input, no network.
    Mock { model: String },
}

impl TutorClient {
    pub fn new(config: ApiConfig, mock_mode: bool) -> Result<Self, ApiError> {
        if mock_mode {
            let model = config
                .provider
                .model
                .clone()
                .unwrap_or_else(|| super::types::DEFAULT_MODEL.to_string());
            return Ok(TutorClient::Mock { model });
        }
        Ok(match config.provider.preset {
            LlmProviderPreset::Anthropic => TutorClient::Anthropic(AnthropicClient::new(config)?),
            _ => TutorClient::OpenAiCompat(OpenAiCompatClient::new(config)?),
        })
    }

    pub fn is_mock(&self) -> bool {
        matches!(self, TutorClient::Mock { .. })
    }

    pub fn model(&self) -> &str {
        match self {
            TutorClient::Anthropic(c) => c.model(),
            TutorClient::OpenAiCompat(c) => c.model(),
            TutorClient::Mock { model } => model,
        }
    }

    pub fn set_model(&mut self, name: &str) {
        match self {
            TutorClient::Anthropic(c) => c.set_model(name),
            TutorClient::OpenAiCompat(c) => c.set_model(name),
            TutorClient::Mock { model } => *model = name.trim().to_string(),
        }
    }

    pub fn endpoint(&self) -> String {
        match self {
            TutorClient::Anthropic(c) => c.api_url().to_string(),
            TutorClient::OpenAiCompat(c) => c.chat_completions_url(),
            TutorClient::Mock { .. } => "mock".to_string(),
        }
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        settings: &TutorSettings,
    ) -> Result<(String, Usage), ApiError> {
        match self {
            TutorClient::Anthropic(c) => c.complete(messages).await,
            TutorClient::OpenAiCompat(c) => c.complete(messages).await,
            TutorClient::Mock { .. } => {
                let input = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or("");
                let reply = mock::mock_response(input, settings);
                let text = serde_json::to_string(&reply)
                    .map_err(|e| ApiError::Parse(e.to_string()))?;
                Ok((text, Usage::default()))
            }
        }
    }

    pub async fn test_connection(&self) -> Result<(), ApiError> {
        match self {
            TutorClient::Anthropic(c) => c.test_connection().await,
            TutorClient::OpenAiCompat(c) => c.test_connection().await,
            TutorClient::Mock { .. } => Ok(()),
        }
    }
}

/// A signed-in user's link to the backend, used for best-effort bookkeeping.
pub struct BackendLink {
    pub client: SupabaseClient,
    pub user_id: String,
}

pub struct TutorSession {
    client: TutorClient,
    settings: TutorSettings,
    conversation: Conversation,
    transcript: Vec<TranscriptEntry>,
    backend: Option<BackendLink>,
    next_id: u64,
}

impl TutorSession {
    pub fn new(client: TutorClient, settings: TutorSettings) -> Self {
        let conversation = Conversation::new(&settings);
        Self {
            client,
            settings,
            conversation,
            transcript: Vec::new(),
            backend: None,
            next_id: 1,
        }
    }

    pub fn with_backend(mut self, backend: BackendLink) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn settings(&self) -> &TutorSettings {
        &self.settings
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn client(&self) -> &TutorClient {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut TutorClient {
        &mut self.client
    }

    pub fn set_client(&mut self, client: TutorClient) {
        self.client = client;
    }

    /// Replaces the settings and rewrites the system message in place.
    pub fn update_settings(&mut self, settings: TutorSettings) {
        self.conversation.update_settings(&settings);
        self.settings = settings;
    }

    pub fn start_new_conversation(&mut self) {
        self.conversation.reset(&self.settings);
        self.transcript.clear();
    }

    /// Shows the canned conversation with every feature switched on.
    pub fn load_example(&mut self) {
        let settings = TutorSettings {
            id: self.settings.id.clone(),
            user_id: self.settings.user_id.clone(),
            ..TutorSettings::all_features()
        };
        self.update_settings(settings);
        self.transcript = mock::example_conversation();
    }

    fn next_entry_id(&mut self) -> String {
        let id = format!("msg-{}", self.next_id);
        self.next_id += 1;
        id
    }

    pub async fn send_message(&mut self, text: &str) -> Result<ChatTurn, ApiError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ApiError::EmptyMessage);
        }

        self.conversation.push_user(text);
        let user_entry = TranscriptEntry {
            id: self.next_entry_id(),
            text: text.to_string(),
            is_user: true,
            timestamp: Utc::now(),
            structured: None,
        };
        self.transcript.push(user_entry);

        let (raw, usage) = match self
            .client
            .complete(self.conversation.messages(), &self.settings)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Error calling chat API: {}", e);
                self.conversation.pop_user();
                self.transcript.pop();
                return Err(e);
            }
        };

        let reply = parse_structured_response(&raw);
        self.conversation.push_assistant(&raw);
        let bot_entry = TranscriptEntry {
            id: self.next_entry_id(),
            text: reply.response.clone(),
            is_user: false,
            timestamp: Utc::now(),
            structured: Some(reply.clone()),
        };
        self.transcript.push(bot_entry);

        let model = self.client.model().to_string();
        let cost = calculate_cost(&model, usage.input_tokens, usage.output_tokens);
        tracing::info!(
            model = %model,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            cost_usd = cost.total,
            "chat turn completed"
        );

        if !self.client.is_mock() {
            self.record_turn(&model, usage, &reply).await;
        }

        Ok(ChatTurn {
            reply,
            usage,
            cost,
            model,
        })
    }

    async fn record_turn(&self, model: &str, usage: Usage, reply: &StructuredResponse) {
        let Some(link) = &self.backend else {
            return;
        };

        if let Err(e) = link.client.record_usage(&link.user_id, model, usage).await {
            tracing::warn!("Failed to record usage: {}", e);
        }

        if !self.settings.track_vocabulary {
            return;
        }
        for entry in reply.vocabulary() {
            if entry.word.trim().is_empty() {
                continue;
            }
            if let Err(e) = link
                .client
                .add_vocabulary_word(
                    &link.user_id,
                    &entry.word,
                    entry.translation.as_deref(),
                    entry.part_of_speech.as_deref(),
                    None,
                )
                .await
            {
                tracing::warn!("Failed to track vocabulary word {}: {}", entry.word, e);
            }
        }
    }
}
