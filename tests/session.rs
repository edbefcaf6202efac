//! Full chat turns: provider call, parsing, and backend bookkeeping.

use httpmock::prelude::*;
use serde_json::json;

use langpt::langpt::conversation::{BackendLink, TutorClient, TutorSession};
use langpt::langpt::supabase::SupabaseClient;
use langpt::langpt::types::{ApiConfig, LlmProviderConfig, LlmProviderPreset, Role, TutorSettings};

const USER_ID: &str = "user-1";

fn provider_config(server: &MockServer) -> ApiConfig {
    ApiConfig {
        provider: LlmProviderConfig {
            preset: LlmProviderPreset::Custom,
            api_key: Some("sk-local".to_string()),
            base_url: Some(server.url("/v1")),
            model: Some("gpt-4o-mini".to_string()),
        },
        max_tokens: 1000,
        temperature: 0.7,
    }
}

fn tutor_reply() -> String {
    json!({
        "response": "¡Qué bien! ¿Adónde fuiste?",
        "corrections": [{
            "original": "Ayer voy al parque",
            "corrected": "Ayer fui al parque",
            "explanation": "Use the preterite for completed past actions.",
            "has_issue": true
        }],
        "vocabulary": [
            {"word": "Parque", "translation": "park", "part_of_speech": "noun"},
            {"word": "", "translation": "nothing"}
        ]
    })
    .to_string()
}

#[tokio::test]
async fn successful_turn_is_parsed_and_recorded() {
    let llm = MockServer::start_async().await;
    let completion = llm
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200).json_body(json!({
                "choices": [{"message": {"content": tutor_reply()}}],
                "usage": {"prompt_tokens": 1000, "completion_tokens": 500}
            }));
        })
        .await;

    let backend = MockServer::start_async().await;
    let usage_insert = backend
        .mock_async(|when, then| {
            when.method(POST).path("/rest/v1/usage_stats");
            then.status(201);
        })
        .await;
    let totals = backend
        .mock_async(|when, then| {
            when.method(POST).path("/rest/v1/rpc/update_user_profile_totals");
            then.status(204);
        })
        .await;
    let vocab = backend
        .mock_async(|when, then| {
            when.method(POST)
                .path("/rest/v1/rpc/update_vocabulary_usage")
                .json_body(json!({"user_id_param": USER_ID, "word_param": "parque"}));
            then.status(204);
        })
        .await;
    backend
        .mock_async(|when, then| {
            when.method(PATCH).path("/rest/v1/vocabulary");
            then.status(204);
        })
        .await;

    let client = TutorClient::new(provider_config(&llm), false).unwrap();
    let mut session = TutorSession::new(client, TutorSettings::recommended()).with_backend(BackendLink {
        client: SupabaseClient::new(&backend.base_url(), "anon").unwrap(),
        user_id: USER_ID.to_string(),
    });

    let turn = session.send_message("Ayer voy al parque").await.unwrap();

    assert_eq!(turn.reply.response, "¡Qué bien! ¿Adónde fuiste?");
    assert_eq!(turn.model, "gpt-4o-mini");
    assert_eq!(turn.usage.input_tokens, 1000);
    assert!((turn.cost.total - (0.00015 + 0.0003)).abs() < 1e-12);

    let messages = session.conversation().messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[2].role, Role::Assistant);
    assert_eq!(messages[2].content, tutor_reply());
    assert_eq!(session.transcript().len(), 2);

    completion.assert_calls_async(1).await;
    usage_insert.assert_calls_async(1).await;
    totals.assert_calls_async(1).await;
    // the blank word is skipped
    vocab.assert_calls_async(1).await;
}

#[tokio::test]
async fn provider_failure_rolls_back_the_user_turn() {
    let llm = MockServer::start_async().await;
    llm.mock_async(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(500).json_body(json!({"error": {"message": "overloaded"}}));
    })
    .await;

    let client = TutorClient::new(provider_config(&llm), false).unwrap();
    let mut session = TutorSession::new(client, TutorSettings::default());

    assert!(session.send_message("hola").await.is_err());
    assert_eq!(session.conversation().messages().len(), 1);
    assert!(session.transcript().is_empty());
}

#[tokio::test]
async fn backend_failures_do_not_fail_the_turn() {
    let llm = MockServer::start_async().await;
    llm.mock_async(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(200).json_body(json!({
            "choices": [{"message": {"content": "plain text reply"}}]
        }));
    })
    .await;

    let backend = MockServer::start_async().await;
    backend
        .mock_async(|when, then| {
            when.method(POST);
            then.status(500).json_body(json!({"message": "database unavailable"}));
        })
        .await;

    let client = TutorClient::new(provider_config(&llm), false).unwrap();
    let mut session = TutorSession::new(client, TutorSettings::recommended()).with_backend(BackendLink {
        client: SupabaseClient::new(&backend.base_url(), "anon").unwrap(),
        user_id: USER_ID.to_string(),
    });

    let turn = session.send_message("hola").await.unwrap();
    assert_eq!(turn.reply.response, "plain text reply");
    assert!(turn.reply.corrections.is_none());
}

#[tokio::test]
async fn settings_change_rewrites_system_prompt_for_next_turn() {
    let llm = MockServer::start_async().await;
    let french = llm
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .body_includes("specialized in teaching French");
            then.status(200).json_body(json!({
                "choices": [{"message": {"content": "{\"response\":\"Bonjour !\"}"}}]
            }));
        })
        .await;

    let client = TutorClient::new(provider_config(&llm), false).unwrap();
    let mut session = TutorSession::new(client, TutorSettings::default());

    let mut settings = TutorSettings::default();
    settings.target_language = "french".to_string();
    session.update_settings(settings);

    let turn = session.send_message("salut").await.unwrap();
    assert_eq!(turn.reply.response, "Bonjour !");
    french.assert_calls_async(1).await;
}
