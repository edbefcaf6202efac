//! Thin client for the hosted identity + database backend (Supabase).
//!
//! Auth goes through the GoTrue endpoints under `/auth/v1`, table access
//! through PostgREST under `/rest/v1`. Every call maps the backend's error
//! body into [`BackendError`] so callers can branch on the PostgREST code.

use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::types::{non_blank, SettingsPatch, TutorSettings, Usage};
use super::usage::{aggregate_stats, UsageRecord, UserStats};

/// PostgREST code for "single row requested, zero rows found".
pub const NO_ROWS: &str = "PGRST116";

const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";
const USAGE_HISTORY_LIMIT: u32 = 50;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Backend configuration is missing (url and anon key are required)")]
    NotConfigured,

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned error: {status}: {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Failed to decode backend response: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::Api { code: Some(code), .. } if code == NO_ROWS)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_confirmed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: AuthUser,
}

impl AuthSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map(|at| at <= now.timestamp())
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

impl From<TokenResponse> for AuthSession {
    fn from(t: TokenResponse) -> Self {
        let expires_at = t
            .expires_at
            .or_else(|| t.expires_in.map(|secs| Utc::now().timestamp() + secs));
        Self {
            access_token: t.access_token,
            refresh_token: t.refresh_token,
            expires_at,
            user: t.user,
        }
    }
}

/// What became of a stored session when it was restored.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumedSession {
    Valid(AuthSession),
    /// The stored one had expired; this replacement should be saved.
    Refreshed(AuthSession),
    /// Expired and could not be refreshed. The stored copy should be dropped.
    Lapsed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    SignedIn {
        session: AuthSession,
        profile: UserProfile,
    },
    /// Account created; the user must confirm their email before signing in.
    ConfirmationRequired(AuthUser),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub total_input_tokens: u64,
    #[serde(default)]
    pub total_output_tokens: u64,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    fn fresh(user: &AuthUser) -> Self {
        Self {
            id: None,
            user_id: user.id.clone(),
            email: user.email.clone().unwrap_or_default(),
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_cost_usd: 0.0,
            created_at: None,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabularyWord {
    pub id: String,
    pub user_id: String,
    pub word: String,
    #[serde(default)]
    pub translation: Option<String>,
    #[serde(default)]
    pub part_of_speech: Option<String>,
    #[serde(default)]
    pub example_sentence: Option<String>,
    #[serde(default = "default_difficulty")]
    pub difficulty_level: u8,
    #[serde(default)]
    pub usage_count: u32,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_difficulty() -> u8 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VocabularyPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part_of_speech: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example_sentence: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty_level: Option<u8>,
}

impl VocabularyPatch {
    /// Fields given as `Some` are changed. A blank text clears its field.
    pub fn from_edits(
        translation: Option<&str>,
        part_of_speech: Option<&str>,
        example_sentence: Option<&str>,
        difficulty_level: Option<u8>,
    ) -> Self {
        let edit = |value: Option<&str>| value.map(|v| non_blank(Some(v.to_string())));
        Self {
            translation: edit(translation),
            part_of_speech: edit(part_of_speech),
            example_sentence: edit(example_sentence),
            difficulty_level,
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

pub fn normalize_word(word: &str) -> String {
    word.trim().to_lowercase()
}

pub struct SupabaseClient {
    client: reqwest::Client,
    url: String,
    anon_key: String,
    access_token: Option<String>,
}

impl SupabaseClient {
    pub fn new(url: &str, anon_key: &str) -> Result<Self, BackendError> {
        let url = url.trim().trim_end_matches('/').to_string();
        let anon_key = anon_key.trim().to_string();
        if url.is_empty() || anon_key.is_empty() {
            return Err(BackendError::NotConfigured);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            url,
            anon_key,
            access_token: None,
        })
    }

    pub fn set_session(&mut self, session: &AuthSession) {
        self.access_token = Some(session.access_token.clone());
    }

    pub fn clear_session(&mut self) {
        self.access_token = None;
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.anon_key);
        self.client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .header("authorization", format!("Bearer {}", bearer))
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.url, path)
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.url, path)
    }

    // ---- auth ----------------------------------------------------------

    pub async fn sign_up(&mut self, email: &str, password: &str) -> Result<SignUpOutcome, BackendError> {
        tracing::info!("Starting sign up for {}", email);
        let response = self
            .request(Method::POST, self.auth_url("signup"))
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;
        let body: Value = read_json(response).await?;

        // With email confirmation enabled the backend answers with the bare user.
        if body.get("access_token").is_none() {
            let user_value = body
                .get("user")
                .filter(|u| u.is_object())
                .cloned()
                .unwrap_or(body);
            let user: AuthUser = decode(user_value)?;
            tracing::info!("User {} created, email confirmation required", user.id);
            return Ok(SignUpOutcome::ConfirmationRequired(user));
        }

        let session: AuthSession = decode::<TokenResponse>(body)?.into();
        self.set_session(&session);
        let profile = self.ensure_profile(&session.user).await?;
        tracing::info!("Sign up completed for {}", session.user.id);
        Ok(SignUpOutcome::SignedIn { session, profile })
    }

    pub async fn sign_in(&mut self, email: &str, password: &str) -> Result<(AuthSession, UserProfile), BackendError> {
        tracing::info!("Starting sign in for {}", email);
        let response = self
            .request(Method::POST, self.auth_url("token"))
            .query(&[("grant_type", "password")])
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;
        let session: AuthSession = read_json::<TokenResponse>(response).await?.into();
        self.set_session(&session);

        let profile = self.ensure_profile(&session.user).await?;
        tracing::info!("Sign in completed for {}", session.user.id);
        Ok((session, profile))
    }

    pub async fn refresh_session(&mut self, refresh_token: &str) -> Result<AuthSession, BackendError> {
        let response = self
            .request(Method::POST, self.auth_url("token"))
            .query(&[("grant_type", "refresh_token")])
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        let session: AuthSession = read_json::<TokenResponse>(response).await?.into();
        self.set_session(&session);
        tracing::debug!("Session refreshed for {}", session.user.id);
        Ok(session)
    }

    /// Installs a stored session, refreshing it first when it has expired.
    pub async fn resume_session(&mut self, session: AuthSession, now: DateTime<Utc>) -> ResumedSession {
        if !session.is_expired(now) {
            self.set_session(&session);
            return ResumedSession::Valid(session);
        }

        let Some(refresh) = session.refresh_token.as_deref() else {
            tracing::warn!("Stored session expired and has no refresh token");
            return ResumedSession::Lapsed;
        };
        match self.refresh_session(refresh).await {
            Ok(fresh) => ResumedSession::Refreshed(fresh),
            Err(e) => {
                tracing::warn!("Failed to refresh session: {}", e);
                self.clear_session();
                ResumedSession::Lapsed
            }
        }
    }

    pub async fn sign_out(&mut self) -> Result<(), BackendError> {
        if self.access_token.is_none() {
            return Ok(());
        }
        let response = self
            .request(Method::POST, self.auth_url("logout"))
            .send()
            .await?;
        let result = expect_success(response).await;
        // The local token is useless either way.
        self.clear_session();
        result
    }

    pub async fn resend_confirmation(&self, email: &str) -> Result<(), BackendError> {
        let response = self
            .request(Method::POST, self.auth_url("resend"))
            .json(&serde_json::json!({ "type": "signup", "email": email }))
            .send()
            .await?;
        expect_success(response).await
    }

    pub async fn current_user(&self) -> Result<AuthUser, BackendError> {
        if self.access_token.is_none() {
            return Err(BackendError::NotAuthenticated);
        }
        let response = self.request(Method::GET, self.auth_url("user")).send().await?;
        read_json(response).await
    }

    // ---- profiles ------------------------------------------------------

    pub async fn get_profile(&self, user_id: &str) -> Result<UserProfile, BackendError> {
        let response = self
            .request(Method::GET, self.rest_url("user_profiles"))
            .header("accept", SINGLE_OBJECT)
            .query(&[("user_id", format!("eq.{}", user_id)), ("select", "*".to_string())])
            .send()
            .await?;
        read_json(response).await
    }

    /// Fetches the profile, creating it when the user confirmed their email
    /// but never got a profile row.
    pub async fn ensure_profile(&self, user: &AuthUser) -> Result<UserProfile, BackendError> {
        match self.get_profile(&user.id).await {
            Ok(profile) => Ok(profile),
            Err(e) if e.is_not_found() => {
                tracing::info!("Profile not found for {}, creating one", user.id);
                self.insert_one("user_profiles", &UserProfile::fresh(user)).await
            }
            Err(e) => Err(e),
        }
    }

    // ---- settings ------------------------------------------------------

    pub async fn get_user_settings(&self, user_id: &str) -> Result<TutorSettings, BackendError> {
        let response = self
            .request(Method::GET, self.rest_url("user_settings"))
            .header("accept", SINGLE_OBJECT)
            .query(&[("user_id", format!("eq.{}", user_id)), ("select", "*".to_string())])
            .send()
            .await?;
        match read_json(response).await {
            Ok(settings) => Ok(settings),
            Err(e) if e.is_not_found() => self.create_default_settings(user_id).await,
            Err(e) => Err(e),
        }
    }

    pub async fn create_default_settings(&self, user_id: &str) -> Result<TutorSettings, BackendError> {
        tracing::info!("Creating default settings for {}", user_id);
        let row = TutorSettings {
            user_id: Some(user_id.to_string()),
            ..TutorSettings::recommended()
        };
        self.insert_one("user_settings", &row).await
    }

    pub async fn update_settings(&self, user_id: &str, patch: &SettingsPatch) -> Result<TutorSettings, BackendError> {
        let response = self
            .request(Method::PATCH, self.rest_url("user_settings"))
            .header("accept", SINGLE_OBJECT)
            .header("prefer", "return=representation")
            .query(&[("user_id", format!("eq.{}", user_id))])
            .json(patch)
            .send()
            .await?;
        read_json(response).await
    }

    // ---- vocabulary ----------------------------------------------------

    pub async fn get_vocabulary(&self, user_id: &str) -> Result<Vec<VocabularyWord>, BackendError> {
        let response = self
            .request(Method::GET, self.rest_url("vocabulary"))
            .query(&[
                ("user_id", format!("eq.{}", user_id)),
                ("select", "*".to_string()),
                ("order", "created_at.desc".to_string()),
            ])
            .send()
            .await?;
        read_json(response).await
    }

    /// Bumps the word's usage count (inserting it if new), then fills in any
    /// details given. Detail failures are logged, not returned.
    pub async fn add_vocabulary_word(
        &self,
        user_id: &str,
        word: &str,
        translation: Option<&str>,
        part_of_speech: Option<&str>,
        example_sentence: Option<&str>,
    ) -> Result<(), BackendError> {
        let word = normalize_word(word);
        self.rpc(
            "update_vocabulary_usage",
            &serde_json::json!({ "user_id_param": user_id, "word_param": word }),
        )
        .await?;

        let translation = non_blank(translation.map(str::to_string));
        let part_of_speech = non_blank(part_of_speech.map(str::to_string));
        let example_sentence = non_blank(example_sentence.map(str::to_string));
        if translation.is_none() && part_of_speech.is_none() && example_sentence.is_none() {
            return Ok(());
        }

        let details = VocabularyPatch {
            translation: Some(translation),
            part_of_speech: Some(part_of_speech),
            example_sentence: Some(example_sentence),
            difficulty_level: None,
        };
        let result = self
            .request(Method::PATCH, self.rest_url("vocabulary"))
            .query(&[("user_id", format!("eq.{}", user_id)), ("word", format!("eq.{}", word))])
            .json(&details)
            .send()
            .await;
        let outcome = match result {
            Ok(response) => expect_success(response).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = outcome {
            tracing::warn!("Failed to update vocabulary details for {}: {}", word, e);
        }
        Ok(())
    }

    pub async fn update_vocabulary_word(&self, word_id: &str, patch: &VocabularyPatch) -> Result<(), BackendError> {
        let response = self
            .request(Method::PATCH, self.rest_url("vocabulary"))
            .query(&[("id", format!("eq.{}", word_id))])
            .json(patch)
            .send()
            .await?;
        expect_success(response).await
    }

    pub async fn delete_vocabulary_word(&self, word_id: &str) -> Result<(), BackendError> {
        let response = self
            .request(Method::DELETE, self.rest_url("vocabulary"))
            .query(&[("id", format!("eq.{}", word_id))])
            .send()
            .await?;
        expect_success(response).await
    }

    // ---- usage ---------------------------------------------------------

    pub async fn record_usage(&self, user_id: &str, model: &str, usage: Usage) -> Result<UsageRecord, BackendError> {
        let row = UsageRecord::new(user_id, model, usage);

        let response = self
            .request(Method::POST, self.rest_url("usage_stats"))
            .json(&[&row])
            .send()
            .await?;
        expect_success(response).await?;

        self.rpc(
            "update_user_profile_totals",
            &serde_json::json!({
                "user_id_param": user_id,
                "input_tokens_param": row.input_tokens,
                "output_tokens_param": row.output_tokens,
                "cost_param": row.total_cost_usd,
            }),
        )
        .await?;

        Ok(row)
    }

    pub async fn get_user_usage(&self, user_id: &str) -> Result<Vec<UsageRecord>, BackendError> {
        let response = self
            .request(Method::GET, self.rest_url("usage_stats"))
            .query(&[
                ("user_id", format!("eq.{}", user_id)),
                ("select", "*".to_string()),
                ("order", "created_at.desc".to_string()),
                ("limit", USAGE_HISTORY_LIMIT.to_string()),
            ])
            .send()
            .await?;
        read_json(response).await
    }

    pub async fn get_user_stats(&self, user_id: &str) -> Result<UserStats, BackendError> {
        let response = self
            .request(Method::GET, self.rest_url("usage_stats"))
            .query(&[("user_id", format!("eq.{}", user_id)), ("select", "*".to_string())])
            .send()
            .await?;
        let rows: Vec<UsageRecord> = read_json(response).await?;
        Ok(aggregate_stats(&rows))
    }

    // ---- helpers -------------------------------------------------------

    async fn insert_one<T, R>(&self, table: &str, row: &T) -> Result<R, BackendError>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .request(Method::POST, self.rest_url(table))
            .header("accept", SINGLE_OBJECT)
            .header("prefer", "return=representation")
            .json(row)
            .send()
            .await?;
        read_json(response).await
    }

    async fn rpc(&self, function: &str, args: &Value) -> Result<(), BackendError> {
        let response = self
            .request(Method::POST, self.rest_url(&format!("rpc/{}", function)))
            .json(args)
            .send()
            .await?;
        expect_success(response).await
    }
}

async fn error_from(response: Response) -> BackendError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

    let field = |names: &[&str]| -> Option<String> {
        names.iter().find_map(|n| match body.get(*n) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(num)) => Some(num.to_string()),
            _ => None,
        })
    };

    let code = field(&["error_code", "code", "error"]);
    let message = field(&["message", "msg", "error_description"])
        .or_else(|| code.clone())
        .unwrap_or(text);

    BackendError::Api { status, code, message }
}

async fn expect_success(response: Response) -> Result<(), BackendError> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(error_from(response).await)
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    if !response.status().is_success() {
        return Err(error_from(response).await);
    }
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| BackendError::Decode(format!("{} | body: {}", e, text)))
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, BackendError> {
    serde_json::from_value(value).map_err(|e| BackendError::Decode(e.to_string()))
}
