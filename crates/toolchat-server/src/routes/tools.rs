use crate::routes::error_response;
use crate::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use toolchat::{
    errors::RegistryError,
    models::tool::{NewTool, Tool, ToolExecution},
    registry::ToolRegistry,
};

fn registry_error(err: RegistryError) -> Response {
    let status = match err {
        RegistryError::DuplicateName(_) => StatusCode::CONFLICT,
        RegistryError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    error_response(status, err)
}

async fn list_tools(State(state): State<AppState>) -> Result<Json<Vec<Tool>>, Response> {
    state.registry.list_tools().await.map(Json).map_err(registry_error)
}

async fn create_tool(
    State(state): State<AppState>,
    Json(tool): Json<NewTool>,
) -> Result<Response, Response> {
    let tool = state.registry.register(tool).await.map_err(registry_error)?;
    Ok((StatusCode::CREATED, Json(tool)).into_response())
}

async fn list_executions(
    State(state): State<AppState>,
) -> Result<Json<Vec<ToolExecution>>, Response> {
    state
        .registry
        .list_executions()
        .await
        .map(Json)
        .map_err(registry_error)
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/tools", get(list_tools).post(create_tool))
        .route("/tools/executions", get(list_executions))
        .with_state(state)
}
