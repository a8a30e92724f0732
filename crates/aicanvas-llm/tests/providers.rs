//! HTTP-level tests for the Ollama and Groq clients.
//!
//! A wiremock server stands in for each backend.

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use aicanvas_core::error::CanvasError;
use aicanvas_core::traits::BackendClient;
use aicanvas_core::types::{BackendKind, Message, Node, NodeRequest, ParentContext};
use aicanvas_llm::streaming::collect_fragments;
use aicanvas_llm::{GroqClient, OllamaClient};

fn ollama_request() -> NodeRequest {
    let node = Node::new("b", "Summarizer", BackendKind::Ollama, "llama3")
        .with_system_message("Summarize.")
        .with_temperature(0.2)
        .with_max_tokens(64);
    NodeRequest::for_node(
        &node,
        vec![ParentContext {
            node_id: "a".into(),
            last_response: "raw notes".into(),
        }],
        vec![Message::user("go")],
    )
}

fn groq_request() -> NodeRequest {
    let node = Node::new("g", "Critic", BackendKind::Groq, "llama3-8b-8192");
    NodeRequest::for_node(&node, vec![], vec![]).with_user_input("critique this")
}

#[tokio::test]
async fn test_ollama_non_streaming_sends_options_and_context() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "model": "llama3",
            "stream": false,
            "options": {"num_predict": 64},
            "messages": [
                {"role": "system", "content": "Summarize.\n\nContext from parent node a: raw notes\n\n"},
                {"role": "user", "content": "go"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3",
            "message": {"role": "assistant", "content": "A summary."},
            "done": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(server.uri());
    let reply = client.send(ollama_request()).await.unwrap();
    assert_eq!(reply, "A summary.");
}

#[tokio::test]
async fn test_ollama_streaming_reassembles_reply() {
    let server = MockServer::start().await;
    let body = concat!(
        "{\"message\":{\"role\":\"assistant\",\"content\":\"Stream\"},\"done\":false}\n",
        "{\"message\":{\"role\":\"assistant\",\"content\":\"ed ✓\"},\"done\":false}\n",
        "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
    );

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
        .mount(&server)
        .await;

    let client = OllamaClient::new(server.uri());
    let fragments = client.send_stream(ollama_request()).await.unwrap();
    assert_eq!(collect_fragments(fragments).await.unwrap(), "Streamed ✓");

    let reply = client
        .send(ollama_request().with_streaming(true))
        .await
        .unwrap();
    assert_eq!(reply, "Streamed ✓");
}

#[tokio::test]
async fn test_ollama_stream_error_line() {
    let server = MockServer::start().await;
    let body = "{\"message\":{\"content\":\"Hal\"},\"done\":false}\n{\"error\":\"model runner crashed\"}\n";

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
        .mount(&server)
        .await;

    let client = OllamaClient::new(server.uri());
    let err = client
        .send(ollama_request().with_streaming(true))
        .await
        .unwrap_err();
    match err {
        CanvasError::StreamProtocol { message, .. } => assert_eq!(message, "model runner crashed"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_ollama_http_error_is_backend_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "model 'llama3' not found"})))
        .mount(&server)
        .await;

    let client = OllamaClient::new(server.uri());
    let err = client.send(ollama_request()).await.unwrap_err();
    match err {
        CanvasError::Backend { backend, message } => {
            assert_eq!(backend, BackendKind::Ollama);
            assert!(message.contains("404"));
            assert!(message.contains("not found"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_ollama_unexpected_shape_is_format_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .mount(&server)
        .await;

    let client = OllamaClient::new(server.uri());
    let err = client.send(ollama_request()).await.unwrap_err();
    assert!(matches!(err, CanvasError::Format { backend: BackendKind::Ollama }));
}

#[tokio::test]
async fn test_ollama_models_from_tags() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "llama3:latest"}, {"name": "mistral:7b"}]
        })))
        .mount(&server)
        .await;

    let client = OllamaClient::new(server.uri());
    assert_eq!(
        client.available_models().await,
        vec!["llama3:latest".to_string(), "mistral:7b".to_string()]
    );
}

#[tokio::test]
async fn test_ollama_models_fallback_when_daemon_fails() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = OllamaClient::new(server.uri());
    let models = client.available_models().await;
    assert_eq!(models, vec!["llama3", "llama2", "mistral", "qwen2.5", "llama3.2"]);
}

#[tokio::test]
async fn test_groq_success_with_bearer_key() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/openai/v1/chat/completions"))
        .and(header("Authorization", "Bearer gsk_test"))
        .and(body_partial_json(json!({
            "model": "llama3-8b-8192",
            "max_completion_tokens": 1024,
            "messages": [
                {"role": "system", "content": "\n\n"},
                {"role": "user", "content": "critique this"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Solid."}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/openai/v1/chat/completions", server.uri());
    let client = GroqClient::new(url, Some("gsk_test".into()));
    assert_eq!(client.send(groq_request()).await.unwrap(), "Solid.");
}

#[tokio::test]
async fn test_groq_error_payload() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Invalid API Key", "type": "invalid_request_error"}
        })))
        .mount(&server)
        .await;

    let client = GroqClient::new(server.uri(), Some("bad".into()));
    let err = client.send(groq_request()).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(err.to_string().contains("Invalid API Key"));
}

#[tokio::test]
async fn test_groq_missing_choices_is_format_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "chatcmpl-1"})))
        .mount(&server)
        .await;

    let client = GroqClient::new(server.uri(), Some("k".into()));
    let err = client.send(groq_request()).await.unwrap_err();
    assert_eq!(err.to_string(), "No response or unexpected format from groq");
}
