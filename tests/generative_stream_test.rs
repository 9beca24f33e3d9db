//! Streaming generation against a mock SSE endpoint

mod common;

use estimate_chat::api::generative::{Content, ContentRole, Part};
use estimate_chat::api::{ApiError, GenerationRequest, GenerativeClient, HttpGenerativeClient};
use estimate_chat::config::GenerativeConfig;
use futures::StreamExt;
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STREAM_PATH: &str = "/models/gemini-2.0-flash:streamGenerateContent";

fn client(server: &MockServer) -> HttpGenerativeClient {
    HttpGenerativeClient::new(&GenerativeConfig {
        endpoint: server.uri(),
        api_key: Some("test-key".to_string()),
        ..Default::default()
    })
    .unwrap()
}

fn request() -> GenerationRequest {
    GenerationRequest {
        system_instruction: "You are the estimate assistant.".to_string(),
        contents: vec![Content {
            role: ContentRole::User,
            parts: vec![Part::Text {
                text: "Quote a shop".to_string(),
            }],
        }],
    }
}

fn sse_event(text: &str) -> String {
    let payload = json!({
        "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]
    });
    format!("data: {}\r\n\r\n", payload)
}

#[tokio::test]
async fn test_stream_yields_text_chunks_in_order() {
    let server = MockServer::start().await;
    let body = format!(
        "{}{}{}",
        sse_event("Hello"),
        // A chunk without text parts is skipped.
        "data: {\"candidates\": [{\"finishReason\": \"STOP\"}]}\n\n",
        sse_event(" world")
    );
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .and(query_param("alt", "sse"))
        .and(header("x-goog-api-key", "test-key"))
        .and(header("X-Anonymous-Id", "anon-test"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body.into_bytes(), "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let stream = client(&server)
        .stream_generate(&common::anonymous(), &request())
        .await
        .unwrap();
    let chunks: Vec<String> = stream.map(|item| item.unwrap()).collect().await;
    assert_eq!(chunks, vec!["Hello".to_string(), " world".to_string()]);

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(
        body["systemInstruction"]["parts"][0]["text"],
        json!("You are the estimate assistant.")
    );
    assert_eq!(body["contents"][0]["role"], json!("user"));
}

#[tokio::test]
async fn test_error_status_fails_before_streaming() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"code": 429, "message": "Resource exhausted"}
        })))
        .mount(&server)
        .await;

    let err = match client(&server)
        .stream_generate(&common::anonymous(), &request())
        .await
    {
        Ok(_) => panic!("expected the stream to fail to open"),
        Err(err) => err,
    };
    assert_eq!(
        err,
        ApiError::Application {
            status_code: 429,
            message: "Resource exhausted".to_string()
        }
    );
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_error_event_mid_stream() {
    let server = MockServer::start().await;
    let body = format!(
        "{}data: {}\n\n",
        sse_event("Partial"),
        json!({"error": {"code": 500, "message": "internal"}})
    );
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body.into_bytes(), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let items: Vec<_> = client(&server)
        .stream_generate(&common::anonymous(), &request())
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0], Ok("Partial".to_string()));
    assert!(matches!(
        items[1],
        Err(ApiError::Application {
            status_code: 500,
            ..
        })
    ));
}
