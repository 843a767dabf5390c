// Export route modules
pub mod chat;
pub mod reply;
pub mod tools;

#[cfg(test)]
pub(crate) mod test_support;

use crate::state::AppState;
use axum::{http::StatusCode, response::IntoResponse, Json, Router};
use serde::Serialize;

// Function to configure all routes
pub fn configure(state: AppState) -> Router {
    Router::new()
        .merge(reply::routes(state.clone()))
        .merge(chat::routes(state.clone()))
        .merge(tools::routes(state))
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub fn error_response(status: StatusCode, error: impl ToString) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}
