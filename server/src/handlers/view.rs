use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::services::shell::Page;
use crate::state::AppState;
use crate::utils::response::success;

#[derive(Debug, Deserialize)]
pub struct NavigateRequest {
    pub page: Page,
}

pub async fn current_view(State(state): State<AppState>) -> Response {
    let view = state.navigator.view_state(&state.session.snapshot()).await;
    success(view, "View resolved").into_response()
}

/// Selecting a gated page is never an error; the view falls back to the catalog.
pub async fn navigate(
    State(state): State<AppState>,
    Json(body): Json<NavigateRequest>,
) -> Response {
    state.navigator.navigate(body.page).await;
    let view = state.navigator.view_state(&state.session.snapshot()).await;
    success(view, "View resolved").into_response()
}
