//! Integration tests for the OpenAI-compatible runner against a mock upstream.
//!
//! Verifies that:
//! - Non-streamed calls send a chat-completions request and parse the reply
//! - The API key is sent as a bearer token
//! - Route reasoning overrides reach the upstream request body
//! - Streamed calls decode SSE into backend events ending in `done`
//! - Upstream error statuses surface with the upstream's message

use futures::StreamExt;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use msgbridge::bridge::{normalize_request, BackendEvent, ContentBlock, SequentialIds, StopReason};
use msgbridge::config::ApiKey;
use msgbridge::router::{ModelRouter, RoutingTable};
use msgbridge::runner::{OpenAiRunner, RunArgs, Runner};
use msgbridge::Error;

fn runner_for(server: &MockServer) -> OpenAiRunner {
    OpenAiRunner::new(
        reqwest::Client::new(),
        format!("{}/v1/", server.uri()),
        Some(ApiKey::from("sk-test-key")),
        true,
    )
}

fn run_args(body: Value) -> RunArgs {
    let router = ModelRouter::new(
        RoutingTable::from_value(&json!({
            "claude-sonnet-4-5": {"model": "gpt-5", "reasoning": "max"}
        })),
        "openai-codex",
        "codex-mini-latest",
    );
    let route = router.resolve(body["model"].as_str(), &body);
    RunArgs {
        model_id: route.model_id.clone(),
        route,
        conversation: normalize_request(&body, &SequentialIds::new()),
        request_body: body,
    }
}

fn request() -> Value {
    json!({
        "model": "claude-sonnet-4-5",
        "max_tokens": 512,
        "system": "You are terse.",
        "messages": [{"role": "user", "content": "What is 2+2?"}]
    })
}

#[tokio::test]
async fn test_complete_parses_chat_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test-key"))
        .and(body_partial_json(json!({
            "model": "gpt-5",
            "reasoning_effort": "xhigh",
            "max_completion_tokens": 512,
            "messages": [
                {"role": "system", "content": "You are terse."},
                {"role": "user", "content": "What is 2+2?"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "4"},
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 30,
                "completion_tokens": 1,
                "prompt_tokens_details": {"cached_tokens": 10}
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let completion = runner_for(&server).complete(run_args(request())).await.unwrap();

    assert_eq!(completion.content, vec![ContentBlock::text("4")]);
    assert_eq!(completion.stop_reason, StopReason::Stop);
    assert_eq!(completion.usage.input, 20);
    assert_eq!(completion.usage.cache_read, 10);
    assert_eq!(completion.usage.output, 1);
}

#[tokio::test]
async fn test_complete_with_tool_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_42",
                        "type": "function",
                        "function": {"name": "Bash", "arguments": "{\"command\":\"ls\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        })))
        .mount(&server)
        .await;

    let completion = runner_for(&server).complete(run_args(request())).await.unwrap();

    assert_eq!(completion.stop_reason, StopReason::ToolUse);
    assert_eq!(
        completion.content,
        vec![ContentBlock::ToolCall {
            id: "call_42".to_string(),
            name: "Bash".to_string(),
            arguments: json!({"command": "ls"}),
        }]
    );
}

#[tokio::test]
async fn test_upstream_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "Rate limit reached", "type": "rate_limit_error"}
        })))
        .mount(&server)
        .await;

    let err = runner_for(&server)
        .complete(run_args(request()))
        .await
        .unwrap_err();

    match err {
        Error::UpstreamStatus { status, message } => {
            assert_eq!(status, 429);
            assert_eq!(message, "Rate limit reached");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_stream_decodes_events() {
    let sse = [
        r#"data: {"choices":[{"index":0,"delta":{"role":"assistant","reasoning_content":"Adding."}}]}"#,
        r#"data: {"choices":[{"index":0,"delta":{"content":"2+2"}}]}"#,
        r#"data: {"choices":[{"index":0,"delta":{"content":" is 4"},"finish_reason":"stop"}]}"#,
        r#"data: {"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":4}}"#,
        "data: [DONE]",
    ]
    .iter()
    .map(|line| format!("{}\n\n", line))
    .collect::<String>();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({
            "stream": true,
            "stream_options": {"include_usage": true}
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse),
        )
        .expect(1)
        .mount(&server)
        .await;

    let events: Vec<BackendEvent> = runner_for(&server)
        .stream(run_args(request()))
        .await
        .unwrap()
        .collect()
        .await;

    let kinds: Vec<&str> = events.iter().map(BackendEvent::kind).collect();
    assert_eq!(
        kinds,
        vec![
            "start",
            "thinking_start",
            "thinking_delta",
            "thinking_end",
            "text_start",
            "text_delta",
            "text_delta",
            "text_end",
            "done",
        ]
    );

    match events.last().unwrap() {
        BackendEvent::Done { reason, message } => {
            assert_eq!(*reason, Some(StopReason::Stop));
            assert_eq!(message.usage.input, 12);
            assert_eq!(message.usage.output, 4);
            assert_eq!(
                message.content,
                vec![
                    ContentBlock::Thinking {
                        thinking: "Adding.".to_string()
                    },
                    ContentBlock::text("2+2 is 4"),
                ]
            );
        }
        other => panic!("expected done, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stream_open_failure_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let result = runner_for(&server).stream(run_args(request())).await;

    match result {
        Err(Error::UpstreamStatus { status, message }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "upstream down");
        }
        Err(other) => panic!("unexpected error: {:?}", other),
        Ok(_) => panic!("expected the stream to fail to open"),
    }
}
