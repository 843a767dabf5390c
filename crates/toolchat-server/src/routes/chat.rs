use crate::routes::reply::{split_request, ChatRequest};
use crate::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use toolchat::{conversation::TurnState, models::message::Message};

#[derive(Debug, Serialize)]
struct ChatResponse {
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

// request/response variant of /reply
async fn handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, Response> {
    let (history, user) = split_request(request.messages)?;

    let outcome = state.orchestrator.run_turn(&history, user).await;

    let status = match outcome.state {
        TurnState::Errored => StatusCode::BAD_GATEWAY,
        _ => StatusCode::OK,
    };
    Ok((
        status,
        Json(ChatResponse {
            messages: outcome.messages,
            error: outcome.error,
        }),
    )
        .into_response())
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(handler))
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
    use toolchat::registry::ToolRegistry;
    use tower::ServiceExt;

    async fn post_chat(app: Router, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .uri("/chat")
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_chat_returns_full_history() {
        let provider = ScriptedProvider::new(vec![
            ModelReply::ToolCalls {
                content: Some("Running the query.".into()),
                tool_calls: vec![ToolCall::new("call_1", "echo", r#"{"word":"SELECT 1"}"#)],
            },
            ModelReply::Text {
                content: "Done.".into(),
            },
        ]);
        let (state, registry) = app_state(provider, true).await;

        let (status, body) = post_chat(
            routes(state),
            json!({"messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"},
                {"role": "user", "content": "run it"}
            ]}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.get("error").is_none());
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[3]["content"], "Running the query.");
        assert_eq!(messages[3]["tool_calls"][0]["status"], "completed");
        assert_eq!(messages[4]["role"], "tool");
        assert_eq!(messages[5]["content"], "Done.");
        assert_eq!(registry.list_executions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_chat_provider_failure() {
        let (state, _) = app_state(ScriptedProvider::failing(), false).await;

        let (status, body) = post_chat(
            routes(state),
            json!({"messages": [{"role": "user", "content": "hi"}]}),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "Network error: connection refused");
        assert_eq!(body["messages"], json!([{"role": "user", "content": "hi"}]));
    }
}
