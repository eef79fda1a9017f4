use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::services::shell::Page;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

pub async fn session(State(state): State<AppState>) -> Response {
    success(state.session.snapshot(), "Session retrieved").into_response()
}

pub async fn sign_up(
    State(state): State<AppState>,
    Json(body): Json<SignUpRequest>,
) -> Result<Response, AppError> {
    let identity = state
        .session
        .sign_up(&body.email, &body.password, &body.name)
        .await?;
    state.tickets.clear().await;
    state.navigator.navigate(Page::Events).await;

    let message = if state.session.current_identity().is_some() {
        "Account created"
    } else {
        "Account created; confirm your e-mail to sign in"
    };
    Ok(created(identity, message).into_response())
}

pub async fn sign_in(
    State(state): State<AppState>,
    Json(body): Json<SignInRequest>,
) -> Result<Response, AppError> {
    state.session.sign_in(&body.email, &body.password).await?;
    state.navigator.navigate(Page::Events).await;

    let snapshot = state.session.snapshot();
    if let Err(e) = state.tickets.refresh(snapshot.identity.as_ref()).await {
        tracing::warn!(error = %e.detail(), "Ticket history not loaded after sign-in");
    }

    Ok(success(snapshot, "Signed in").into_response())
}

pub async fn sign_out(State(state): State<AppState>) -> Result<Response, AppError> {
    let result = state.session.sign_out().await;
    state.tickets.clear().await;
    state.navigator.navigate(Page::Events).await;
    result?;

    Ok(success(state.session.snapshot(), "Signed out").into_response())
}
