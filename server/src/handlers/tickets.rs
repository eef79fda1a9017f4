use axum::extract::State;
use axum::response::{IntoResponse, Response};

use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

pub async fn my_tickets(State(state): State<AppState>) -> Result<Response, AppError> {
    let identity = state.session.current_identity();
    let tickets = state.tickets.refresh(identity.as_ref()).await?;
    Ok(success(tickets, "Tickets retrieved").into_response())
}
