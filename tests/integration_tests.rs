//! HTTP-level tests against a local mock of the provider API

mod common;

use std::sync::Arc;
use futures_util::StreamExt;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use claude_relay::config::{ClientConfig, ProviderConfig};
use claude_relay::error::{ConfigError, ProviderError};
use claude_relay::providers::anthropic::{
  BlockDelta, MessagesRequest, StreamEvent, WireResult,
};
use claude_relay::providers::{AnthropicClient, Provider};
use claude_relay::request::{Message, RequestPayload};
use claude_relay::{MemoryCredentialStore, MemoryUsageSink, RelayClient};
use common::{init_logger, key};

const OPUS: &str = "claude-opus-4-5-20250514";

fn client_for(server: &MockServer) -> AnthropicClient
{   init_logger();
    AnthropicClient::new(&ProviderConfig
    {   api_base: server.uri()
      , ..ProviderConfig::default()
    })
}

fn config_for(server: &MockServer) -> ClientConfig
{   let mut config = ClientConfig::default();
    config.provider.api_base = server.uri();
    config.failover.initial_backoff_ms = 0;
    config
}

fn request(model: &str) -> MessagesRequest
{   let mut config = ClientConfig::default();
    config.generation.model = model.to_string();
    RequestPayload::new(&config.generation, "Be brief.", vec![Message::user("hi")])
      .to_wire(false)
}

fn message_body(text: &str) -> serde_json::Value
{   json!({
      "id": "msg_01",
      "type": "message",
      "role": "assistant",
      "model": OPUS,
      "content": [
        { "type": "thinking", "thinking": "let me see", "signature": "sig" },
        { "type": "text", "text": text }
      ],
      "stop_reason": "end_turn",
      "usage": { "input_tokens": 5, "output_tokens": 7 }
    })
}

fn error_body(kind: &str, message: &str) -> serde_json::Value
{   json!({ "type": "error", "error": { "type": kind, "message": message } })
}

fn sse_body(pieces: &[&str]) -> String
{   let mut frames = vec![
      ("message_start", json!({
        "type": "message_start",
        "message": { "id": "msg_01", "usage": { "input_tokens": 4, "output_tokens": 1 } }
      }))
    , ("content_block_start", json!({
        "type": "content_block_start", "index": 0,
        "content_block": { "type": "text", "text": "" }
      }))
    , ("ping", json!({ "type": "ping" }))
    ];
    for piece in pieces
    {   frames.push(("content_block_delta", json!({
          "type": "content_block_delta", "index": 0,
          "delta": { "type": "text_delta", "text": piece }
        })));
    }
    frames.push(("content_block_stop", json!({ "type": "content_block_stop", "index": 0 })));
    frames.push(("message_delta", json!({
      "type": "message_delta",
      "delta": { "stop_reason": "end_turn" },
      "usage": { "output_tokens": 9 }
    })));
    frames.push(("message_stop", json!({ "type": "message_stop" })));

    frames
      .into_iter()
      .map(|(event, data)| format!("event: {}\ndata: {}\n\n", event, data))
      .collect()
}

#[tokio::test]
async fn test_create_message_sends_headers_and_reasoning()
{   let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/v1/messages"))
      .and(header("x-api-key", "sk-test"))
      .and(header("anthropic-version", "2023-06-01"))
      .and(body_partial_json(json!({
        "model": OPUS,
        "system": "Be brief.",
        "temperature": 1.0,
        "thinking": { "type": "enabled", "budget_tokens": 10000 }
      })))
      .respond_with(ResponseTemplate::new(200).set_body_json(message_body("Xin chào")))
      .expect(1)
      .mount(&server)
      .await;

    let client = client_for(&server);
    let response = assert_ok!(client.create_message("sk-test", &request(OPUS)).await);
    assert_eq!(response.text(), "Xin chào");
    assert_eq!(response.usage.output_tokens, 7);
}

#[tokio::test]
async fn test_error_statuses_are_classified()
{   let cases = [
      (429u16, "rate_limit_error", ProviderError::RateLimited("slow down".into()))
    , (401, "authentication_error", ProviderError::Authentication("slow down".into()))
    , (529, "overloaded_error", ProviderError::Transient("slow down".into()))
    , (400, "invalid_request_error", ProviderError::Rejected
      {   status: 400
        , message: "slow down".into()
      })
    ];

    for (status, kind, expected) in cases
    {   let server = MockServer::start().await;
        Mock::given(method("POST"))
          .and(path("/v1/messages"))
          .respond_with(ResponseTemplate::new(status).set_body_json(error_body(kind, "slow down")))
          .mount(&server)
          .await;

        let client = client_for(&server);
        let err = assert_err!(client.create_message("sk", &request(OPUS)).await);
        assert_eq!(err, expected, "status {}", status);
    }
}

#[tokio::test]
async fn test_stream_events_are_decoded()
{   let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/v1/messages"))
      .and(header("accept", "text/event-stream"))
      .and(body_partial_json(json!({ "stream": true })))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_raw(sse_body(&["Hello", ", world"]), "text/event-stream")
      )
      .mount(&server)
      .await;

    let client = client_for(&server);
    let mut body = request(OPUS);
    body.stream = Some(true);
    let events: Vec<StreamEvent> = assert_ok!(client.stream_message("sk", &body).await)
      .map(|e| e.unwrap())
      .collect()
      .await;

    let text: String = events
      .iter()
      .filter_map(|e| match e
      {   StreamEvent::ContentBlockDelta { delta: BlockDelta::TextDelta { text }, .. } => {
            Some(text.as_str())
          }
        , _ => None
      })
      .collect();
    assert_eq!(text, "Hello, world");
    assert!(events.contains(&StreamEvent::Ping));
    assert_eq!(events.last(), Some(&StreamEvent::MessageStop));
}

#[tokio::test]
async fn test_batch_results_are_read_as_json_lines()
{   let server = MockServer::start().await;
    let lines = [
      json!({
        "custom_id": "a",
        "result": { "type": "succeeded", "message": message_body("one") }
      })
    , json!({
        "custom_id": "b",
        "result": { "type": "errored", "error": error_body("invalid_request_error", "bad") }
      })
    , json!({ "custom_id": "c", "result": { "type": "expired" } })
    ];
    let body: String = lines.iter().map(|l| format!("{}\n", l)).collect();
    Mock::given(method("GET"))
      .and(path("/v1/messages/batches/msgbatch_01/results"))
      .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
      .mount(&server)
      .await;

    let client = client_for(&server);
    let results = assert_ok!(client.batch_results("sk", "msgbatch_01").await);
    assert_eq!(results.len(), 3);
    match &results[1].result
    {   WireResult::Errored { error } => {
          assert_eq!(WireResult::error_message(error), "bad")
        }
      , other => panic!("unexpected result {:?}", other)
    }
    assert_eq!(results[2].result, WireResult::Expired);
}

#[tokio::test]
async fn test_batch_create_and_status_parse()
{   let server = MockServer::start().await;
    let batch = json!({
      "id": "msgbatch_01",
      "type": "message_batch",
      "processing_status": "in_progress",
      "request_counts": {
        "processing": 2, "succeeded": 0, "errored": 0, "canceled": 0, "expired": 0
      },
      "created_at": "2026-10-18T08:00:00Z",
      "ended_at": null,
      "cancel_initiated_at": null,
      "results_url": null
    });
    Mock::given(method("POST"))
      .and(path("/v1/messages/batches"))
      .and(body_partial_json(json!({ "requests": [{ "custom_id": "a" }, { "custom_id": "b" }] })))
      .respond_with(ResponseTemplate::new(200).set_body_json(batch.clone()))
      .expect(1)
      .mount(&server)
      .await;

    let client = client_for(&server);
    let entries: Vec<_> = ["a", "b"]
      .iter()
      .map(|id| claude_relay::providers::anthropic::BatchRequestEntry
      {   custom_id: id.to_string()
        , params: request(OPUS)
      })
      .collect();
    let wire = assert_ok!(client.create_batch("sk", &entries).await);
    assert_eq!(wire.id, "msgbatch_01");
    assert_eq!(wire.request_counts.total(), 2);
    assert!(wire.created_at.is_some());
}

#[tokio::test]
async fn test_models_are_listed()
{   let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/v1/models"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "data": [
          { "type": "model", "id": "claude-sonnet-4-20250514", "display_name": "Claude Sonnet 4" },
          { "type": "model", "id": "claude-opus-4-20250514", "display_name": "Claude Opus 4" }
        ],
        "has_more": false
      })))
      .mount(&server)
      .await;

    let client = client_for(&server);
    let models = assert_ok!(client.list_models("sk").await);
    assert_eq!(models.len(), 2);
    assert_eq!(models[0].display_name.as_deref(), Some("Claude Sonnet 4"));
}

#[tokio::test]
async fn test_relay_client_fails_over_between_keys()
{   let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/v1/messages"))
      .and(header("x-api-key", "sk-1"))
      .respond_with(ResponseTemplate::new(429).set_body_json(error_body("rate_limit_error", "busy")))
      .expect(3)
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/v1/messages"))
      .and(header("x-api-key", "sk-2"))
      .respond_with(ResponseTemplate::new(200).set_body_json(message_body("from K2")))
      .expect(1)
      .mount(&server)
      .await;

    init_logger();
    let store = Arc::new(MemoryCredentialStore::with_credentials(vec![key(1, 5), key(2, 1)]));
    let usage = Arc::new(MemoryUsageSink::new());
    let client = RelayClient::new(config_for(&server), store.clone(), usage.clone());

    let payload = client.payload("", vec![Message::user("hi")]);
    assert_eq!(assert_ok!(client.send(&payload).await), "from K2");
    assert_eq!(store.get(1).map(|c| c.error_count), Some(3));
    assert_eq!(usage.today().output_tokens, 7);

    let status = client.pool_status();
    assert_eq!(status.usable_keys, 1);
    assert_eq!(status.current_key_id, Some(2));
}

#[tokio::test]
async fn test_relay_client_streams_text()
{   let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/v1/messages"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_raw(sse_body(&["Một ", "hai ", "ba"]), "text/event-stream")
      )
      .mount(&server)
      .await;

    init_logger();
    let store = Arc::new(MemoryCredentialStore::with_credentials(vec![key(1, 0)]));
    let usage = Arc::new(MemoryUsageSink::new());
    let client = RelayClient::new(config_for(&server), store, usage.clone());

    let payload = client.payload("", vec![Message::user("count")]);
    let text = assert_ok!(client.stream(&payload).collect_text().await);
    assert_eq!(text, "Một hai ba");

    let today = usage.today();
    assert_eq!(today.request_count, 1);
    assert_eq!(today.input_tokens, 4);
    assert_eq!(today.output_tokens, 9);
}

#[test]
fn test_config_defaults_fill_missing_fields()
{   claude_relay::init_logging();
    let config = assert_ok!(ClientConfig::from_json_str(
      r#"{ "generation": { "model": "claude-sonnet-4-20250514" },
           "failover": { "max_attempts": 5 } }"#
    ));
    assert_eq!(config.generation.model, "claude-sonnet-4-20250514");
    assert_eq!(config.generation.max_tokens, 8192);
    assert_eq!(config.failover.max_attempts, 5);
    assert_eq!(config.failover.quarantine_threshold, 3);
    assert_eq!(config.provider.api_base, "https://api.anthropic.com");
}

#[test]
fn test_config_file_loading()
{   let path = std::env::temp_dir()
      .join(format!("claude-relay-config-{}.json", std::process::id()));
    std::fs::write(&path, r#"{ "provider": { "timeout_secs": 30 } }"#).unwrap();
    let config = ClientConfig::from_json_file(&path);
    let _ = std::fs::remove_file(&path);
    assert_eq!(assert_ok!(config).provider.timeout_secs, Some(30));

    let missing = ClientConfig::from_json_file("/nonexistent/relay.json");
    assert!(matches!(missing, Err(ConfigError::Io(_))));
    assert!(matches!(
      ClientConfig::from_json_str("{ not json"),
      Err(ConfigError::Parse(_))
    ));
}
