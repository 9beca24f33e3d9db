//! HTTP backend against a mock server

mod common;

use estimate_chat::api::{
    ApiError, ChatBackend, CreateMessageRequest, HttpChatBackend, Identity, SessionIndex,
    WireRole, GENERIC_FAILURE_MESSAGE,
};
use estimate_chat::config::BackendConfig;
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(server: &MockServer) -> HttpChatBackend {
    HttpChatBackend::new(&BackendConfig {
        base_url: server.uri(),
        ..Default::default()
    })
    .unwrap()
}

fn first_message(text: &str) -> CreateMessageRequest {
    CreateMessageRequest {
        role: WireRole::User,
        session_index: None,
        title: Some("Booking app".to_string()),
        content: json!({"text": text}),
    }
}

#[tokio::test]
async fn test_create_message_mints_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/message"))
        .and(header("X-Anonymous-Id", "anon-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::envelope(json!({
            "chatMessage": {"index": 1, "role": "USER", "sessionIndex": 12, "content": {"text": "hi"}},
            "chatSession": {"index": 12, "uuid": "u-12", "title": null, "createdTime": "2025-03-01 09:00:00"}
        }))))
        .expect(1)
        .mount(&server)
        .await;

    let response = backend(&server)
        .create_message(&common::anonymous(), &first_message("hi"))
        .await
        .unwrap();

    let session = response.chat_session.unwrap();
    assert_eq!(session.index, Some(SessionIndex(12)));
    assert_eq!(session.title, None);
    assert_eq!(response.chat_message.session_index, Some(SessionIndex(12)));

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["role"], json!("USER"));
    assert_eq!(body["title"], json!("Booking app"));
    assert!(body.get("sessionIndex").is_none());
}

#[tokio::test]
async fn test_authenticated_calls_send_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/sessions"))
        .and(query_param("offset", "20"))
        .and(header("Authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::envelope(json!([
            {"index": 3, "uuid": "u-3", "title": "Shop", "updateTime": "2025-03-01 12:00:00"}
        ]))))
        .expect(1)
        .mount(&server)
        .await;

    let identity = Identity::Authenticated {
        token: "secret".to_string(),
    };
    let sessions = backend(&server).list_sessions(&identity, 20).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].title.as_deref(), Some("Shop"));
}

#[tokio::test]
async fn test_list_messages_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/messages"))
        .and(query_param("sessionIndex", "5"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::envelope(json!([
            {"index": 1, "role": "USER", "sessionIndex": 5, "content": "plain text"},
            {"index": 2, "role": "AI", "sessionIndex": 5, "content": {"text": "reply"}}
        ]))))
        .mount(&server)
        .await;

    let messages = backend(&server)
        .list_messages(&common::anonymous(), SessionIndex(5), 0)
        .await
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, WireRole::Ai);
}

#[tokio::test]
async fn test_envelope_failure_keeps_backend_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "statusCode": 403,
            "message": "Session expired",
            "data": null,
            "metadata": null,
            "error": null
        }])))
        .mount(&server)
        .await;

    let err = backend(&server)
        .list_sessions(&common::anonymous(), 0)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ApiError::Application {
            status_code: 403,
            message: "Session expired".to_string()
        }
    );
}

#[tokio::test]
async fn test_http_failure_without_envelope_uses_generic_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/message"))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .mount(&server)
        .await;

    let err = backend(&server)
        .create_message(&common::anonymous(), &first_message("hi"))
        .await
        .unwrap_err();
    assert_eq!(err.user_message(), GENERIC_FAILURE_MESSAGE);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_missing_data_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "statusCode": 200,
            "message": "success",
            "data": null
        }])))
        .mount(&server)
        .await;

    let err = backend(&server)
        .list_sessions(&common::anonymous(), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Malformed(_)));
    assert_eq!(err.user_message(), GENERIC_FAILURE_MESSAGE);
}
