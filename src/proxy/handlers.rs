//! HTTP request handlers.

use std::convert::Infallible;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::recovery::{collect_stream, needs_recovery};
use super::redact::redact_for_logging;
use super::server::AppState;
use crate::bridge::{
    estimate_input_tokens, map_stop_reason, normalize_request, synthesize_response, BackendEvent,
    Completion, SseRecord, StreamTranslator, SynthesisOptions, WireMessage,
};
use crate::error::Error;
use crate::runner::RunArgs;

/// Message written when the upstream stream cannot be opened.
const STREAM_OPEN_FAILED: &str = "Upstream stream failed";
/// Message used when a failed completion carries no error text.
const EMPTY_UPSTREAM_RESPONSE: &str = "Upstream returned empty response";

/// Frames buffered between the translator task and the response body.
const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Parse a request body that must be a JSON object.
fn parse_body(bytes: &[u8]) -> Result<Value, Error> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| Error::BadRequest(format!("Request body is not valid JSON: {}", e)))?;
    if !value.is_object() {
        return Err(Error::BadRequest(
            "Request body must be a JSON object".to_string(),
        ));
    }
    Ok(value)
}

/// Structured output requests must not carry thinking blocks.
fn suppress_thinking(body: &Value) -> bool {
    body.pointer("/output_config/format/type")
        .and_then(Value::as_str)
        .is_some_and(|t| t.trim().eq_ignore_ascii_case("json_schema"))
}

fn requested_model(body: &Value) -> Option<String> {
    body.get("model")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

/// Handle POST /v1/messages
pub async fn messages(State(state): State<AppState>, body: Bytes) -> Result<Response, Error> {
    let body = parse_body(&body)?;
    let request_id = uuid::Uuid::new_v4().to_string();

    let requested = requested_model(&body);
    let route = state.router.resolve(requested.as_deref(), &body);
    let is_streaming = body.get("stream").and_then(Value::as_bool) == Some(true);
    let suppress = suppress_thinking(&body);
    let conversation = normalize_request(&body, state.ids.as_ref());

    tracing::info!(
        request_id = %request_id,
        stream = is_streaming,
        requested_model = requested.as_deref().unwrap_or(""),
        resolved_model = %route.model_id,
        source_effort = ?route.source_effort,
        mapped_reasoning = route.reasoning_override().unwrap_or(""),
        model_match = %route.matched_by,
        "request"
    );
    tracing::debug!(request_id = %request_id, body = %redact_for_logging(&body), "request body");

    let display_model = requested.unwrap_or_else(|| route.model_id.clone());
    let args = RunArgs {
        model_id: route.model_id.clone(),
        route,
        conversation,
        request_body: body,
    };

    if is_streaming {
        return Ok(stream_messages(state, args, display_model, suppress, request_id));
    }

    match complete_messages(&state, args, display_model, suppress, &request_id).await {
        Ok(message) => Ok(Json(message).into_response()),
        Err(e) => {
            tracing::error!(request_id = %request_id, stream = false, error = %e, "response_error");
            Err(e)
        }
    }
}

/// Non-streamed path: complete, retry as a stream when the completion came
/// back empty and failed, then synthesize one message.
async fn complete_messages(
    state: &AppState,
    args: RunArgs,
    display_model: String,
    suppress_thinking: bool,
    request_id: &str,
) -> Result<WireMessage, Error> {
    let resolved_model = args.model_id.clone();
    let mut completion = state.runner.complete(args.clone()).await?;

    if !completion.has_visible_content() {
        tracing::warn!(
            request_id = %request_id,
            stream = false,
            reason = "empty_completion_from_complete",
            stop_reason = ?completion.stop_reason,
            error_message = completion.error_text().unwrap_or(""),
            "response_warning"
        );

        if needs_recovery(&completion) {
            let events = state.runner.stream(args).await?;
            if let Some(recovered) = collect_stream(events).await {
                completion = recovered;
            }
        }
    }

    if !completion.has_visible_content() && completion.stop_reason.is_failure() {
        let message = completion
            .error_text()
            .unwrap_or(EMPTY_UPSTREAM_RESPONSE)
            .to_string();
        return Err(Error::UpstreamEmpty(message));
    }

    let options = SynthesisOptions {
        requested_model: Some(display_model),
        resolved_model,
        suppress_thinking,
        message_id: None,
    };
    let message = synthesize_response(&completion, &options, state.ids.as_ref());

    tracing::info!(
        request_id = %request_id,
        stream = false,
        stop_reason = %message.stop_reason,
        "response"
    );
    if tracing::enabled!(tracing::Level::DEBUG) {
        if let Ok(value) = serde_json::to_value(&message) {
            tracing::debug!(request_id = %request_id, response = %redact_for_logging(&value), "response body");
        }
    }

    Ok(message)
}

/// Streamed path: one translator per response, driven by a background task
/// that writes SSE frames into the body channel.
fn stream_messages(
    state: AppState,
    args: RunArgs,
    display_model: String,
    suppress_thinking: bool,
    request_id: String,
) -> Response {
    let (tx, rx) = mpsc::channel::<String>(STREAM_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut events = match state.runner.stream(args).await {
            Ok(events) => events,
            Err(e) => {
                tracing::error!(request_id = %request_id, stream = true, error = %e, "response_error");
                let record = SseRecord {
                    event: "error",
                    data: json!({
                        "type": "error",
                        "error": {"type": "api_error", "message": STREAM_OPEN_FAILED}
                    }),
                };
                let _ = tx.send(record.to_frame()).await;
                return;
            }
        };

        let mut translator =
            StreamTranslator::new(display_model, suppress_thinking, state.ids.clone());

        while let Some(event) = events.next().await {
            log_stream_event(&request_id, &event);
            for record in translator.translate(&event) {
                if tx.send(record.to_frame()).await.is_err() {
                    tracing::debug!(request_id = %request_id, "Client disconnected mid-stream");
                    return;
                }
            }
        }
    });

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn log_stream_event(request_id: &str, event: &BackendEvent) {
    match event {
        BackendEvent::Done { reason, message } => {
            let stop = reason.unwrap_or(message.stop_reason);
            tracing::info!(
                request_id = %request_id,
                stream = true,
                stop_reason = map_stop_reason(stop),
                "response"
            );
            log_completion_body(request_id, message);
        }
        BackendEvent::Error { error, .. } => {
            tracing::error!(
                request_id = %request_id,
                stream = true,
                error_message = error.error_text().unwrap_or("stream error"),
                "response_error"
            );
        }
        _ => {}
    }
}

fn log_completion_body(request_id: &str, completion: &Completion) {
    if tracing::enabled!(tracing::Level::DEBUG) {
        if let Ok(value) = serde_json::to_value(completion) {
            tracing::debug!(request_id = %request_id, response = %redact_for_logging(&value), "response body");
        }
    }
}

/// Handle POST /v1/messages/count_tokens
pub async fn count_tokens(body: Bytes) -> Result<Json<Value>, Error> {
    let body = parse_body(&body)?;
    Ok(Json(json!({ "input_tokens": estimate_input_tokens(&body) })))
}

/// Handle GET /v1/models - the advertised model catalog
pub async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    let models: Vec<Value> = state
        .router
        .catalog()
        .into_iter()
        .map(|id| {
            json!({
                "id": id,
                "type": "model",
                "display_name": id,
                "created_at": "1970-01-01T00:00:00Z",
            })
        })
        .collect();

    Json(json!({
        "object": "list",
        "data": models
    }))
}

/// Handle GET /health
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "msgbridge"
    }))
}
