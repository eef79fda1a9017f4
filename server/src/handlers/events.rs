use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::models::EventDraft;
use crate::services::purchase::InventorySync;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

/// Falls back to the last listing when the store cannot be reached.
pub async fn list_events(State(state): State<AppState>) -> Result<Response, AppError> {
    match state.catalog.list_events().await {
        Ok(events) => Ok(success(events, "Events retrieved").into_response()),
        Err(e) => {
            let cached = state.catalog.cached_events().await;
            if cached.is_empty() {
                return Err(e);
            }
            tracing::warn!(error = %e.detail(), cached = cached.len(), "Serving cached events");
            Ok(success(cached, "Events retrieved from cache").into_response())
        }
    }
}

pub async fn create_event(
    State(state): State<AppState>,
    Json(draft): Json<EventDraft>,
) -> Result<Response, AppError> {
    let identity = state.session.current_identity();
    let event = state.catalog.create_event(identity.as_ref(), &draft).await?;
    Ok(created(event, "Event created").into_response())
}

pub async fn purchase_ticket(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Response, AppError> {
    let event_id = Uuid::parse_str(&event_id)
        .map_err(|_| AppError::ValidationError(format!("'{event_id}' is not a valid event id")))?;

    let identity = state.session.current_identity();
    let receipt = state.purchases.purchase(identity.as_ref(), event_id).await?;

    state.tickets.prepend(receipt.ticket.clone()).await;
    if let Err(e) = state.catalog.list_events().await {
        tracing::warn!(error = %e.detail(), "Event list not refreshed after purchase");
    }

    let message = match receipt.inventory {
        InventorySync::Decremented => "Ticket purchased",
        InventorySync::Drifted { .. } => "Ticket purchased; availability may be out of date",
    };
    Ok(success(receipt, message).into_response())
}
