//! Backend client flows against a mock GoTrue + PostgREST server.

use chrono::Utc;
use httpmock::prelude::*;
use serde_json::json;

use langpt::langpt::supabase::{
    AuthSession, AuthUser, BackendError, ResumedSession, SignUpOutcome, SupabaseClient, VocabularyPatch, NO_ROWS,
};
use langpt::langpt::types::{SettingsPatch, Usage};

const ANON: &str = "anon-key";
const USER_ID: &str = "3f1c9a52-0000-4000-8000-000000000001";

fn token_body() -> serde_json::Value {
    json!({
        "access_token": "user-token",
        "refresh_token": "refresh-token",
        "expires_in": 3600,
        "token_type": "bearer",
        "user": {"id": USER_ID, "email": "ana@example.com"}
    })
}

fn profile_body() -> serde_json::Value {
    json!({
        "id": "p1",
        "user_id": USER_ID,
        "email": "ana@example.com",
        "total_input_tokens": 120,
        "total_output_tokens": 80,
        "total_cost_usd": 0.0004
    })
}

async fn signed_in_client(server: &MockServer) -> SupabaseClient {
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/auth/v1/token")
                .query_param("grant_type", "password");
            then.status(200).json_body(token_body());
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/rest/v1/user_profiles");
            then.status(200).json_body(profile_body());
        })
        .await;

    let mut client = SupabaseClient::new(&server.base_url(), ANON).unwrap();
    client.sign_in("ana@example.com", "secret").await.unwrap();
    client
}

#[tokio::test]
async fn sign_in_stores_token_and_loads_profile() {
    let server = MockServer::start_async().await;
    let token = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/auth/v1/token")
                .query_param("grant_type", "password")
                .header("apikey", ANON)
                .json_body(json!({"email": "ana@example.com", "password": "secret"}));
            then.status(200).json_body(token_body());
        })
        .await;
    let profile = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/rest/v1/user_profiles")
                .query_param("user_id", format!("eq.{}", USER_ID))
                .header("authorization", "Bearer user-token");
            then.status(200).json_body(profile_body());
        })
        .await;

    let mut client = SupabaseClient::new(&server.base_url(), ANON).unwrap();
    let (session, profile_row) = client.sign_in("ana@example.com", "secret").await.unwrap();

    assert!(client.is_authenticated());
    assert_eq!(session.user.id, USER_ID);
    assert_eq!(session.refresh_token.as_deref(), Some("refresh-token"));
    assert!(session.expires_at.is_some());
    assert_eq!(profile_row.total_input_tokens, 120);
    token.assert_calls_async(1).await;
    profile.assert_calls_async(1).await;
}

#[tokio::test]
async fn bad_credentials_keep_backend_message() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/auth/v1/token");
            then.status(400).json_body(json!({
                "error_code": "invalid_credentials",
                "msg": "Invalid login credentials"
            }));
        })
        .await;

    let mut client = SupabaseClient::new(&server.base_url(), ANON).unwrap();
    let err = client.sign_in("ana@example.com", "wrong").await.unwrap_err();
    match err {
        BackendError::Api { status, code, message } => {
            assert_eq!(status, 400);
            assert_eq!(code.as_deref(), Some("invalid_credentials"));
            assert_eq!(message, "Invalid login credentials");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!client.is_authenticated());
}

#[tokio::test]
async fn sign_up_without_session_needs_confirmation() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/auth/v1/signup");
            then.status(200).json_body(json!({
                "id": USER_ID,
                "email": "ana@example.com",
                "email_confirmed_at": null
            }));
        })
        .await;

    let mut client = SupabaseClient::new(&server.base_url(), ANON).unwrap();
    match client.sign_up("ana@example.com", "secret").await.unwrap() {
        SignUpOutcome::ConfirmationRequired(user) => {
            assert_eq!(user.id, USER_ID);
            assert!(user.email_confirmed_at.is_none());
        }
        other => panic!("expected confirmation, got {other:?}"),
    }
    assert!(!client.is_authenticated());
}

#[tokio::test]
async fn missing_profile_is_created() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/auth/v1/token");
            then.status(200).json_body(token_body());
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/rest/v1/user_profiles");
            then.status(406).json_body(json!({
                "code": NO_ROWS,
                "message": "JSON object requested, multiple (or no) rows returned"
            }));
        })
        .await;
    let insert = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/rest/v1/user_profiles")
                .header("prefer", "return=representation")
                .json_body_includes(format!(r#"{{"user_id":"{}","email":"ana@example.com"}}"#, USER_ID));
            then.status(201).json_body(profile_body());
        })
        .await;

    let mut client = SupabaseClient::new(&server.base_url(), ANON).unwrap();
    let (_, profile) = client.sign_in("ana@example.com", "secret").await.unwrap();
    assert_eq!(profile.user_id, USER_ID);
    insert.assert_calls_async(1).await;
}

#[tokio::test]
async fn missing_settings_row_is_seeded_with_recommended_defaults() {
    let server = MockServer::start_async().await;
    let client = signed_in_client(&server).await;

    server
        .mock_async(|when, then| {
            when.method(GET).path("/rest/v1/user_settings");
            then.status(406).json_body(json!({"code": NO_ROWS, "message": "no rows"}));
        })
        .await;
    let insert = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/rest/v1/user_settings")
                .json_body_includes(r#"{"always_correct_sentences":true,"track_vocabulary":true,"correct_accents":false}"#);
            then.status(201).json_body(json!({
                "id": "s1",
                "user_id": USER_ID,
                "target_language": "spanish",
                "always_correct_sentences": true,
                "suggest_natural_alternatives": true,
                "show_verb_conjugations": true,
                "explain_tense_usage": true,
                "track_vocabulary": true
            }));
        })
        .await;

    let settings = client.get_user_settings(USER_ID).await.unwrap();
    assert_eq!(settings.id.as_deref(), Some("s1"));
    assert!(settings.track_vocabulary);
    assert!(!settings.correct_punctuation);
    insert.assert_calls_async(1).await;
}

#[tokio::test]
async fn settings_patch_sends_only_changed_fields() {
    let server = MockServer::start_async().await;
    let client = signed_in_client(&server).await;

    let patch_mock = server
        .mock_async(|when, then| {
            when.method(PATCH)
                .path("/rest/v1/user_settings")
                .query_param("user_id", format!("eq.{}", USER_ID))
                .json_body(json!({"target_language": "french"}));
            then.status(200).json_body(json!({
                "user_id": USER_ID,
                "target_language": "french"
            }));
        })
        .await;

    let updated = client
        .update_settings(USER_ID, &SettingsPatch::language("French"))
        .await
        .unwrap();
    assert_eq!(updated.target_language, "french");
    patch_mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn vocabulary_add_normalizes_word_and_fills_details() {
    let server = MockServer::start_async().await;
    let client = signed_in_client(&server).await;

    let rpc = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/rest/v1/rpc/update_vocabulary_usage")
                .json_body(json!({"user_id_param": USER_ID, "word_param": "mejorar"}));
            then.status(204);
        })
        .await;
    let details = server
        .mock_async(|when, then| {
            when.method(PATCH)
                .path("/rest/v1/vocabulary")
                .query_param("word", "eq.mejorar")
                .json_body_includes(r#"{"translation":"to improve"}"#);
            then.status(204);
        })
        .await;

    client
        .add_vocabulary_word(USER_ID, "  Mejorar ", Some("to improve"), Some("verb"), None)
        .await
        .unwrap();
    rpc.assert_calls_async(1).await;
    details.assert_calls_async(1).await;
}

#[tokio::test]
async fn vocabulary_detail_failure_is_not_fatal() {
    let server = MockServer::start_async().await;
    let client = signed_in_client(&server).await;

    server
        .mock_async(|when, then| {
            when.method(POST).path("/rest/v1/rpc/update_vocabulary_usage");
            then.status(204);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(PATCH).path("/rest/v1/vocabulary");
            then.status(500).json_body(json!({"message": "boom"}));
        })
        .await;

    let result = client
        .add_vocabulary_word(USER_ID, "parque", Some("park"), None, None)
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn vocabulary_list_is_newest_first() {
    let server = MockServer::start_async().await;
    let client = signed_in_client(&server).await;

    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/rest/v1/vocabulary")
                .query_param("order", "created_at.desc");
            then.status(200).json_body(json!([
                {"id": "v2", "user_id": USER_ID, "word": "parque", "usage_count": 1},
                {"id": "v1", "user_id": USER_ID, "word": "ayer", "translation": "yesterday", "usage_count": 3, "difficulty_level": 2}
            ]));
        })
        .await;

    let words = client.get_vocabulary(USER_ID).await.unwrap();
    assert_eq!(words.len(), 2);
    assert_eq!(words[0].word, "parque");
    assert_eq!(words[0].difficulty_level, 1);
    assert_eq!(words[1].usage_count, 3);
}

#[tokio::test]
async fn recording_usage_inserts_row_then_updates_totals() {
    let server = MockServer::start_async().await;
    let client = signed_in_client(&server).await;

    let insert = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/rest/v1/usage_stats")
                .body_includes(r#""model":"gpt-4o""#)
                .body_includes(r#""total_tokens":3000"#);
            then.status(201);
        })
        .await;
    let totals = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/rest/v1/rpc/update_user_profile_totals")
                .json_body_includes(format!(
                    r#"{{"user_id_param":"{}","input_tokens_param":2000,"output_tokens_param":1000}}"#,
                    USER_ID
                ));
            then.status(204);
        })
        .await;

    let row = client
        .record_usage(USER_ID, "gpt-4o", Usage { input_tokens: 2000, output_tokens: 1000 })
        .await
        .unwrap();
    assert!((row.total_cost_usd - 0.025).abs() < 1e-12);
    insert.assert_calls_async(1).await;
    totals.assert_calls_async(1).await;
}

#[tokio::test]
async fn stats_are_aggregated_from_rows() {
    let server = MockServer::start_async().await;
    let client = signed_in_client(&server).await;

    server
        .mock_async(|when, then| {
            when.method(GET).path("/rest/v1/usage_stats");
            then.status(200).json_body(json!([
                {"user_id": USER_ID, "model": "gpt-4o", "input_tokens": 100, "output_tokens": 50, "total_cost_usd": 0.00125},
                {"user_id": USER_ID, "model": "gpt-4.1-nano", "input_tokens": 10, "output_tokens": 5, "total_cost_usd": 0.000002},
                {"user_id": USER_ID, "model": "gpt-4o", "input_tokens": 20, "output_tokens": 10, "total_cost_usd": 0.00025}
            ]));
        })
        .await;

    let stats = client.get_user_stats(USER_ID).await.unwrap();
    assert_eq!(stats.total_input_tokens, 130);
    assert_eq!(stats.total_output_tokens, 65);
    assert_eq!(stats.usage_by_model["gpt-4o"].input_tokens, 120);
    assert!((stats.total_cost_usd - 0.001502).abs() < 1e-9);
}

#[tokio::test]
async fn history_requests_latest_fifty() {
    let server = MockServer::start_async().await;
    let client = signed_in_client(&server).await;

    let history = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/rest/v1/usage_stats")
                .query_param("limit", "50")
                .query_param("order", "created_at.desc");
            then.status(200).json_body(json!([]));
        })
        .await;

    assert!(client.get_user_usage(USER_ID).await.unwrap().is_empty());
    history.assert_calls_async(1).await;
}

#[tokio::test]
async fn current_user_requires_session() {
    let client = SupabaseClient::new("http://localhost:1", ANON).unwrap();
    assert!(matches!(
        client.current_user().await,
        Err(BackendError::NotAuthenticated)
    ));
}

fn stored_session(expires_at: i64, refresh_token: Option<&str>) -> AuthSession {
    AuthSession {
        access_token: "stale-token".to_string(),
        refresh_token: refresh_token.map(str::to_string),
        expires_at: Some(expires_at),
        user: AuthUser {
            id: USER_ID.to_string(),
            email: Some("ana@example.com".to_string()),
            email_confirmed_at: None,
        },
    }
}

#[tokio::test]
async fn sign_out_clears_token_even_when_server_fails() {
    let server = MockServer::start_async().await;
    let mut client = signed_in_client(&server).await;

    let logout = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/auth/v1/logout")
                .header("authorization", "Bearer user-token");
            then.status(500).json_body(json!({"message": "unavailable"}));
        })
        .await;

    assert!(client.sign_out().await.is_err());
    assert!(!client.is_authenticated());
    logout.assert_calls_async(1).await;

    // nothing left to revoke
    assert!(client.sign_out().await.is_ok());
    logout.assert_calls_async(1).await;
}

#[tokio::test]
async fn refresh_uses_refresh_token_grant() {
    let server = MockServer::start_async().await;
    let refresh = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/auth/v1/token")
                .query_param("grant_type", "refresh_token")
                .json_body(json!({"refresh_token": "refresh-token"}));
            then.status(200).json_body(token_body());
        })
        .await;

    let mut client = SupabaseClient::new(&server.base_url(), ANON).unwrap();
    let session = client.refresh_session("refresh-token").await.unwrap();

    assert_eq!(session.access_token, "user-token");
    assert!(client.is_authenticated());
    refresh.assert_calls_async(1).await;
}

#[tokio::test]
async fn resend_confirmation_posts_signup_type() {
    let server = MockServer::start_async().await;
    let resend = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/auth/v1/resend")
                .json_body(json!({"type": "signup", "email": "ana@example.com"}));
            then.status(200).json_body(json!({}));
        })
        .await;

    let client = SupabaseClient::new(&server.base_url(), ANON).unwrap();
    client.resend_confirmation("ana@example.com").await.unwrap();
    resend.assert_calls_async(1).await;
}

#[tokio::test]
async fn valid_stored_session_is_used_as_is() {
    let server = MockServer::start_async().await;
    let token = server
        .mock_async(|when, then| {
            when.method(POST).path("/auth/v1/token");
            then.status(200).json_body(token_body());
        })
        .await;

    let mut client = SupabaseClient::new(&server.base_url(), ANON).unwrap();
    let now = Utc::now();
    let stored = stored_session(now.timestamp() + 600, Some("refresh-token"));

    assert_eq!(
        client.resume_session(stored.clone(), now).await,
        ResumedSession::Valid(stored)
    );
    assert!(client.is_authenticated());
    token.assert_calls_async(0).await;
}

#[tokio::test]
async fn expired_session_is_refreshed() {
    let server = MockServer::start_async().await;
    let refresh = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/auth/v1/token")
                .query_param("grant_type", "refresh_token")
                .json_body(json!({"refresh_token": "old-refresh"}));
            then.status(200).json_body(token_body());
        })
        .await;
    let user = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/auth/v1/user")
                .header("authorization", "Bearer user-token");
            then.status(200).json_body(json!({"id": USER_ID, "email": "ana@example.com"}));
        })
        .await;

    let mut client = SupabaseClient::new(&server.base_url(), ANON).unwrap();
    let now = Utc::now();
    match client.resume_session(stored_session(now.timestamp() - 1, Some("old-refresh")), now).await {
        ResumedSession::Refreshed(fresh) => {
            assert_eq!(fresh.access_token, "user-token");
            assert_eq!(fresh.refresh_token.as_deref(), Some("refresh-token"));
        }
        other => panic!("expected a refreshed session, got {other:?}"),
    }

    assert_eq!(client.current_user().await.unwrap().id, USER_ID);
    refresh.assert_calls_async(1).await;
    user.assert_calls_async(1).await;
}

#[tokio::test]
async fn expired_session_lapses_when_refresh_fails() {
    let server = MockServer::start_async().await;
    let refresh = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/auth/v1/token")
                .query_param("grant_type", "refresh_token");
            then.status(400).json_body(json!({
                "error_code": "refresh_token_not_found",
                "msg": "Invalid Refresh Token"
            }));
        })
        .await;

    let mut client = SupabaseClient::new(&server.base_url(), ANON).unwrap();
    let now = Utc::now();

    let resumed = client
        .resume_session(stored_session(now.timestamp() - 1, Some("revoked")), now)
        .await;
    assert_eq!(resumed, ResumedSession::Lapsed);
    assert!(!client.is_authenticated());

    let resumed = client.resume_session(stored_session(now.timestamp() - 1, None), now).await;
    assert_eq!(resumed, ResumedSession::Lapsed);
    refresh.assert_calls_async(1).await;
}

#[tokio::test]
async fn vocabulary_update_and_delete_target_the_row_id() {
    let server = MockServer::start_async().await;
    let client = signed_in_client(&server).await;

    let update = server
        .mock_async(|when, then| {
            when.method(PATCH)
                .path("/rest/v1/vocabulary")
                .query_param("id", "eq.v1")
                .header("authorization", "Bearer user-token")
                .json_body(json!({"translation": "park", "example_sentence": null}));
            then.status(204);
        })
        .await;
    let delete = server
        .mock_async(|when, then| {
            when.method(DELETE)
                .path("/rest/v1/vocabulary")
                .query_param("id", "eq.v1");
            then.status(204);
        })
        .await;

    let patch = VocabularyPatch::from_edits(Some("park"), None, Some(" "), None);
    client.update_vocabulary_word("v1", &patch).await.unwrap();
    client.delete_vocabulary_word("v1").await.unwrap();

    update.assert_calls_async(1).await;
    delete.assert_calls_async(1).await;
}

#[tokio::test]
async fn vocabulary_delete_reports_backend_error() {
    let server = MockServer::start_async().await;
    let client = signed_in_client(&server).await;

    server
        .mock_async(|when, then| {
            when.method(DELETE).path("/rest/v1/vocabulary");
            then.status(403).json_body(json!({"code": "42501", "message": "permission denied"}));
        })
        .await;

    let err = client.delete_vocabulary_word("v9").await.unwrap_err();
    assert!(matches!(err, BackendError::Api { status: 403, .. }));
}

#[tokio::test]
async fn blank_vocabulary_details_send_no_patch() {
    let server = MockServer::start_async().await;
    let client = signed_in_client(&server).await;

    let rpc = server
        .mock_async(|when, then| {
            when.method(POST).path("/rest/v1/rpc/update_vocabulary_usage");
            then.status(204);
        })
        .await;
    let details = server
        .mock_async(|when, then| {
            when.method(PATCH).path("/rest/v1/vocabulary");
            then.status(204);
        })
        .await;

    client
        .add_vocabulary_word(USER_ID, "parque", Some(""), Some("  "), Some(""))
        .await
        .unwrap();
    rpc.assert_calls_async(1).await;
    details.assert_calls_async(0).await;
}
