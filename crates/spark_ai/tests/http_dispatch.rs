//! End-to-end dispatch through `ReqwestTransport` against a local mock server.

use std::sync::Arc;

use mockito::{Matcher, Server};
use serde_json::json;
use spark_ai::{
    ConversationMessage, CredentialStore, DispatchConfig, Dispatcher, FailureKind, Gateway,
    ProviderRegistry, StreamEvent, Vendor,
};

fn conversation() -> Vec<ConversationMessage> {
    vec![
        ConversationMessage::user("Hello"),
        ConversationMessage::assistant("Hi there"),
        ConversationMessage::user("Summarize our chat"),
    ]
}

fn gateway_for(id: &str, endpoint: String) -> Gateway {
    let registry = ProviderRegistry::builtin()
        .with_endpoint(id, endpoint)
        .unwrap();
    let credentials = Arc::new(CredentialStore::new());
    credentials.set_credentials([
        (Vendor::OpenAi, "sk-live"),
        (Vendor::Anthropic, "sk-ant-live"),
        (Vendor::Google, "g-live"),
    ]);
    Gateway::with_dispatcher(Dispatcher::new(registry, DispatchConfig::default()), credentials)
}

#[tokio::test]
async fn openai_request_carries_bearer_and_body() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .match_header("authorization", "Bearer sk-live")
        .match_header("content-type", "application/json")
        .match_body(Matcher::PartialJson(json!({
            "model": "gpt-4-turbo",
            "max_tokens": 4000,
            "messages": [
                { "role": "system", "content": "Be brief." },
                { "role": "user", "content": "Hello" },
                { "role": "assistant", "content": "Hi there" },
                { "role": "user", "content": "Summarize our chat" }
            ]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"choices":[{"message":{"role":"assistant","content":"We said hi."}}],"usage":{"total_tokens":87}}"#,
        )
        .create_async()
        .await;

    let gateway = gateway_for("gpt-4-turbo", format!("{}/v1/chat/completions", server.url()));
    let completion = gateway
        .dispatch("gpt-4-turbo", &conversation(), Some("Be brief."))
        .await
        .unwrap();

    assert_eq!(completion.content, "We said hi.");
    assert_eq!(completion.tokens_consumed, 87);
    assert_eq!(completion.provider, "GPT-4 Turbo");
    mock.assert_async().await;
}

#[tokio::test]
async fn anthropic_request_uses_api_key_header() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/messages")
        .match_header("x-api-key", "sk-ant-live")
        .match_header("anthropic-version", "2023-06-01")
        .match_header("authorization", Matcher::Missing)
        .match_body(Matcher::PartialJson(json!({
            "model": "claude-3-opus-20240229",
            "system": "Be brief.",
            "messages": [
                { "role": "user", "content": "Hello" },
                { "role": "assistant", "content": "Hi there" },
                { "role": "user", "content": "Summarize our chat" }
            ]
        })))
        .with_status(200)
        .with_body(
            r#"{"content":[{"type":"text","text":"Brief."}],"usage":{"input_tokens":120,"output_tokens":30}}"#,
        )
        .create_async()
        .await;

    let gateway = gateway_for("claude-3-opus", format!("{}/v1/messages", server.url()));
    let completion = gateway
        .dispatch("claude-3-opus", &conversation(), Some("Be brief."))
        .await
        .unwrap();

    assert_eq!(completion.content, "Brief.");
    assert_eq!(completion.tokens_consumed, 150);
    mock.assert_async().await;
}

#[tokio::test]
async fn gemini_request_puts_key_in_query() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1beta/models/gemini-pro:generateContent")
        .match_query(Matcher::UrlEncoded("key".into(), "g-live".into()))
        .match_body(Matcher::PartialJson(json!({
            "contents": [
                { "role": "user", "parts": [{ "text": "Hello" }] },
                { "role": "model", "parts": [{ "text": "Hi there" }] },
                { "role": "user", "parts": [{ "text": "Summarize our chat" }] }
            ],
            "generationConfig": { "maxOutputTokens": 4000 }
        })))
        .with_status(200)
        .with_body(r#"{"candidates":[{"content":{"parts":[{"text":"Done"}]}}]}"#)
        .create_async()
        .await;

    let gateway = gateway_for(
        "gemini-pro",
        format!("{}/v1beta/models/gemini-pro:generateContent", server.url()),
    );
    let completion = gateway
        .dispatch("gemini-pro", &conversation(), None)
        .await
        .unwrap();

    assert_eq!(completion.content, "Done");
    assert_eq!(completion.tokens_consumed, 0);
    mock.assert_async().await;
}

#[tokio::test]
async fn unparsable_error_body_falls_back_to_generic_message() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(502)
        .with_header("content-type", "text/html")
        .with_body("<html><body>Bad Gateway</body></html>")
        .create_async()
        .await;

    let gateway = gateway_for("gpt-3.5-turbo", format!("{}/v1/chat/completions", server.url()));
    let failure = gateway
        .dispatch("gpt-3.5-turbo", &conversation(), None)
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::ProviderRejected);
    assert_eq!(failure.message, "OpenAI API request failed (HTTP 502)");
    assert_eq!(failure.status, Some(502));
    assert_eq!(failure.provider, "GPT-3.5 Turbo");
    mock.assert_async().await;
}

#[tokio::test]
async fn missing_credential_sends_nothing() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let registry = ProviderRegistry::builtin()
        .with_endpoint("claude-3-sonnet", format!("{}/v1/messages", server.url()))
        .unwrap();
    let gateway = Gateway::with_dispatcher(
        Dispatcher::new(registry, DispatchConfig::default()),
        Arc::new(CredentialStore::new()),
    );
    let failure = gateway
        .dispatch("claude-3-sonnet", &conversation(), None)
        .await
        .unwrap_err();

    assert_eq!(failure.kind, FailureKind::MissingCredential);
    mock.assert_async().await;
}

#[tokio::test]
async fn refused_connection_is_a_transport_error() {
    let gateway = gateway_for("gpt-4-turbo", "http://127.0.0.1:1/v1/chat/completions".into());
    let failure = gateway
        .dispatch("gpt-4-turbo", &conversation(), None)
        .await
        .unwrap_err();
    assert_eq!(failure.kind, FailureKind::TransportError);
    assert!(!failure.message.is_empty());
}

#[tokio::test]
async fn anthropic_stream_over_http() {
    let mut server = Server::new_async().await;
    let sse = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":12,\"output_tokens\":1}}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello\"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\" world\"}}\n\n",
        "event: message_delta\n",
        "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":4}}\n\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );
    let mock = server
        .mock("POST", "/v1/messages")
        .match_body(Matcher::PartialJson(json!({ "stream": true })))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(sse)
        .create_async()
        .await;

    let gateway = gateway_for("claude-3-sonnet", format!("{}/v1/messages", server.url()));
    let mut rx = gateway
        .stream("claude-3-sonnet", &conversation(), None)
        .await
        .unwrap();

    let mut text = String::new();
    let mut finished = None;
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Delta(chunk) => text.push_str(&chunk),
            StreamEvent::Finished { tokens_consumed } => finished = Some(tokens_consumed),
            StreamEvent::Failed(f) => panic!("stream failed: {f}"),
        }
    }

    assert_eq!(text, "Hello world");
    assert_eq!(finished, Some(16));
    mock.assert_async().await;
}

#[tokio::test]
async fn image_generation_over_http() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/images/generations")
        .match_header("authorization", "Bearer sk-live")
        .match_body(Matcher::Json(json!({
            "model": "dall-e-3",
            "prompt": "a paper crane",
            "size": "1792x1024",
            "quality": "standard",
            "n": 1
        })))
        .with_status(200)
        .with_body(r#"{"created":1700000000,"data":[{"url":"https://cdn.example/crane.png"}]}"#)
        .create_async()
        .await;

    let gateway = gateway_for("dall-e-3", format!("{}/v1/images/generations", server.url()));
    let asset = gateway
        .generate_image("a paper crane", "1792x1024")
        .await
        .unwrap();

    assert_eq!(asset.url, "https://cdn.example/crane.png");
    assert_eq!(asset.provider, "DALL-E 3");
    mock.assert_async().await;
}
