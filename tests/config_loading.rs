use std::io::Write;

use aicanvas_core::config::AppConfig;
use aicanvas_core::error::CanvasError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[engine]
timeout_secs = 120
stream_ollama = false
default_prompt = "Summarize your inputs."
max_retries = 2
initial_backoff_ms = 250
max_backoff_ms = 4000
event_capacity = 64

[ollama]
base_url = "http://gpu-box:11434"

[groq]
base_url = "https://groq.test/v1/chat/completions"
api_key = "gsk-test-key"

[gateway]
bind = "0.0.0.0:8080"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.timeout_secs, 120);
    assert!(!config.engine.stream_ollama);
    assert_eq!(config.engine.default_prompt, "Summarize your inputs.");
    assert_eq!(config.engine.max_retries, 2);
    assert_eq!(config.engine.initial_backoff_ms, 250);
    assert_eq!(config.engine.max_backoff_ms, 4000);
    assert_eq!(config.engine.event_capacity, 64);
    assert_eq!(config.ollama.base_url, "http://gpu-box:11434");
    assert_eq!(config.groq.resolved_api_key(), Some("gsk-test-key".to_string()));
    assert_eq!(config.gateway.bind, "0.0.0.0:8080");
}

#[test]
fn test_partial_config_keeps_defaults() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[gateway]\nbind = \"127.0.0.1:7000\"\n")
        .expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.gateway.bind, "127.0.0.1:7000");
    assert_eq!(config.engine.timeout_secs, 300);
    assert!(config.engine.stream_ollama);
    assert_eq!(config.ollama.base_url, "http://localhost:11434");
    assert_eq!(
        config.engine.default_prompt,
        "Process the context from parent nodes and provide insights."
    );
}

#[test]
fn test_env_var_expansion_in_file() {
    std::env::set_var("AICANVAS_TEST_GROQ_KEY", "gsk-from-env");
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[groq]\napi_key = \"${AICANVAS_TEST_GROQ_KEY}\"\n")
        .expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.groq.api_key.as_deref(), Some("gsk-from-env"));
    std::env::remove_var("AICANVAS_TEST_GROQ_KEY");
}

#[test]
fn test_missing_and_invalid_files() {
    let err = AppConfig::load(std::path::Path::new("/nonexistent/aicanvas.toml")).unwrap_err();
    assert!(matches!(err, CanvasError::ConfigNotFound(_)));

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[engine\ntimeout_secs = ").expect("write toml");
    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, CanvasError::Config(_)));
}
