//! End-to-end conversations against a mocked portfolio API

use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use portfolio_chat::{
    ApiClient, Config, ConversationManager, HttpChatBackend, ManagerSettings, NoopAnalytics,
    SendOutcome, Viewer,
};

fn manager(server: &MockServer, viewer: Viewer) -> Arc<ConversationManager> {
    let config = Config {
        api_base_url: server.uri(),
        request_timeout_secs: 5,
        ..Config::default()
    };
    let api = ApiClient::new(&config).unwrap();
    Arc::new(ConversationManager::new(
        Arc::new(HttpChatBackend::new(api)),
        Arc::new(NoopAnalytics),
        ManagerSettings::from_config(&config),
        viewer,
    ))
}

#[tokio::test]
async fn anonymous_visitor_asks_a_question() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/chat/query"))
        .and(body_partial_json(json!({
            "query": "What technologies do you use?",
            "session_id": null,
            "audience": "general",
            "depth": "medium",
            "tone": "professional"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "session_id": "7c1e2b8a-0d44-4a43-9f0e-3f4a3c9b1d21",
            "message_id": "a5",
            "response": "Mostly Rust, TypeScript and Django.",
            "sources": [],
            "response_time_ms": 350,
            "message_count": 2
        })))
        .expect(1)
        .mount(&server)
        .await;

    let chat = manager(&server, Viewer::Anonymous);
    chat.open().await;

    let messages = chat.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "welcome");

    let outcome = chat.send_message("What technologies do you use?").await;
    assert_eq!(outcome, SendOutcome::Answered);

    let messages = chat.messages().await;
    assert_eq!(messages.len(), 3);
    assert!(messages[0].is_welcome());
    assert!(messages[1].is_from_user);
    assert_eq!(messages[2].id, "a5");
    assert_eq!(
        chat.session_id().await.as_deref(),
        Some("7c1e2b8a-0d44-4a43-9f0e-3f4a3c9b1d21")
    );
}

#[tokio::test]
async fn foreign_stored_session_is_not_restored() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/chat/history"))
        .and(query_param("userId", "17"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 1,
            "next": null,
            "previous": null,
            "results": [{
                "id": "s-foreign",
                "user": 42,
                "messages": [
                    {"id": 1, "content": "hi", "is_from_user": true, "created_at": "2024-03-01T10:00:00Z"},
                    {"id": 2, "content": "hello", "is_from_user": false, "created_at": "2024-03-01T10:00:01Z"}
                ]
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let chat = manager(&server, Viewer::authenticated("17"));
    chat.open().await;

    let messages = chat.messages().await;
    assert_eq!(messages.len(), 1);
    assert!(messages[0].is_welcome());
    assert_eq!(chat.session_id().await, None);
}

#[tokio::test]
async fn own_stored_session_is_restored() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/chat/history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{
                "id": "s-mine",
                "user": "17",
                "messages": [
                    {"id": 1, "content": "hi", "is_from_user": true},
                    {"id": 2, "content": "hello", "is_from_user": false, "rating": 1}
                ]
            }]
        })))
        .mount(&server)
        .await;

    let chat = manager(&server, Viewer::authenticated("17"));
    chat.open().await;

    let messages = chat.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, "hello");
    assert_eq!(chat.session_id().await.as_deref(), Some("s-mine"));
}

#[tokio::test]
async fn backend_outage_yields_canned_reply() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/chat/query"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let chat = manager(&server, Viewer::Anonymous);
    chat.open().await;

    assert_eq!(chat.send_message("hello").await, SendOutcome::Failed);
    let messages = chat.messages().await;
    assert_eq!(messages.len(), 3);
    assert_eq!(
        messages[2].content,
        "I'm having trouble processing your request right now. Please try again in a moment."
    );
    assert!(!chat.is_sending());
}
