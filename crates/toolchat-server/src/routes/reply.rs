use crate::routes::error_response;
use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::{stream::StreamExt, Stream};
use serde::Deserialize;
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use toolchat::{
    conversation::{validate_history, TurnEvent},
    models::{message::Message, role::Role},
};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
}

/// Split a request into the prior history and the new user turn
pub fn split_request(mut messages: Vec<Message>) -> Result<(Vec<Message>, Message), Response> {
    let user = match messages.pop() {
        Some(message) if message.role == Role::User => message,
        _ => {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                "the last message must be a user message",
            ))
        }
    };
    if let Err(err) = validate_history(&messages) {
        return Err(error_response(StatusCode::BAD_REQUEST, err));
    }
    Ok((messages, user))
}

// Server-sent events, one JSON event per data line
pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> Response {
        let body = axum::body::Body::from_stream(self);

        (
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
            ],
            body,
        )
            .into_response()
    }
}

fn format_event(event: &TurnEvent) -> String {
    match serde_json::to_string(event) {
        Ok(json) => format!("data: {}\n\n", json),
        Err(e) => {
            tracing::error!("Failed to serialize event: {}", e);
            "data: {\"type\":\"error\",\"message\":\"Failed to serialize event\",\"pending_tool_calls\":[]}\n\n"
                .to_string()
        }
    }
}

fn format_done() -> String {
    "data: [DONE]\n\n".to_string()
}

async fn handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<SseResponse, Response> {
    let (history, user) = split_request(request.messages)?;

    // Create channel for streaming
    let (tx, rx) = mpsc::channel(100);
    let stream = ReceiverStream::new(rx);

    let orchestrator = state.orchestrator.clone();

    // Spawn task to handle streaming
    tokio::spawn(async move {
        let mut events = orchestrator.reply(&history, user);

        loop {
            match timeout(Duration::from_millis(500), events.next()).await {
                Ok(Some(event)) => {
                    if let Err(e) = tx.send(format_event(&event)).await {
                        tracing::error!("Error sending event through channel: {}", e);
                        break;
                    }
                }
                Ok(None) => {
                    let _ = tx.send(format_done()).await;
                    break;
                }
                // Heartbeat, used to detect disconnected clients and then drop the turn.
                Err(_) => {
                    if tx.is_closed() {
                        tracing::info!("client disconnected, dropping turn");
                        break;
                    }
                }
            }
        }
    });

    Ok(SseResponse::new(stream))
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/reply", post(handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{app_state, ScriptedProvider};
    use axum::{body::Body, http::Request};
    use serde_json::{json, Value};
    use toolchat::models::tool::ToolCall;
    use toolchat::providers::base::ModelReply;
    use tower::ServiceExt;

    async fn post_reply(app: Router, body: Value) -> Response {
        let request = Request::builder()
            .uri("/reply")
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        app.oneshot(request).await.unwrap()
    }

    fn data_lines(body: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(body)
            .split("\n\n")
            .filter_map(|chunk| chunk.strip_prefix("data: "))
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_reply_streams_events() {
        let provider = ScriptedProvider::new(vec![
            ModelReply::ToolCalls {
                content: None,
                tool_calls: vec![ToolCall::new("call_1", "echo", r#"{"word":"hi"}"#)],
            },
            ModelReply::Text {
                content: "It said hi.".into(),
            },
        ]);
        let (state, _) = app_state(provider, false).await;
        let app = routes(state);

        let response = post_reply(
            app,
            json!({"messages": [{"role": "user", "content": "Echo hi"}]}),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let lines = data_lines(&body);

        assert_eq!(lines.last().map(String::as_str), Some("[DONE]"));
        let types: Vec<String> = lines[..lines.len() - 1]
            .iter()
            .map(|line| {
                let event: Value = serde_json::from_str(line).unwrap();
                event["type"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(
            types,
            vec!["assistant_message", "tool_call_start", "tool_call_result", "final_response"]
        );

        let result: Value = serde_json::from_str(&lines[2]).unwrap();
        assert_eq!(result["status"], "completed");
        assert_eq!(result["message"]["role"], "tool");
        assert_eq!(result["message"]["tool_call_id"], "call_1");
    }

    #[tokio::test]
    async fn test_reply_error_event() {
        let (state, _) = app_state(ScriptedProvider::failing(), false).await;
        let app = routes(state);

        let response = post_reply(
            app,
            json!({"messages": [{"role": "user", "content": "Hello"}]}),
        )
        .await;

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let lines = data_lines(&body);
        assert_eq!(lines.len(), 2);
        let event: Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(event["type"], "error");
        assert_eq!(event["message"], "Network error: connection refused");
        assert_eq!(lines[1], "[DONE]");
    }

    #[tokio::test]
    async fn test_reply_rejects_bad_history() {
        let (state, _) = app_state(ScriptedProvider::new(vec![]), false).await;

        let response = post_reply(
            routes(state.clone()),
            json!({"messages": [{"role": "assistant", "content": "hi"}]}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = post_reply(
            routes(state),
            json!({"messages": [
                {"role": "tool", "tool_call_id": "nope", "content": "1"},
                {"role": "user", "content": "hi"}
            ]}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_disconnected_client_drops_turn() {
        let (provider, dropped) = ScriptedProvider::hanging();
        let (state, _) = app_state(provider, false).await;
        let app = routes(state);

        let response = post_reply(
            app,
            json!({"messages": [{"role": "user", "content": "Hello"}]}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!dropped.load(std::sync::atomic::Ordering::SeqCst));

        // Closing the body is all a client does when it navigates away
        drop(response);

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert!(dropped.load(std::sync::atomic::Ordering::SeqCst));
    }
}
