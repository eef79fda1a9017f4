use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Not authorized: {0}")]
    AuthorizationError(String),

    #[error("Profile creation failed: {0}")]
    ProfileCreationError(String),

    #[error("Payment declined: {0}")]
    PaymentError(String),

    #[error("Ticket could not be saved: {0}")]
    PersistError(String),

    #[error("Inventory update failed: {0}")]
    InventoryUpdateError(String),

    #[error("Sold out: {0}")]
    SoldOut(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    pub fn not_signed_in() -> Self {
        AppError::AuthorizationError("not signed in".to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::AuthorizationError(_) => StatusCode::FORBIDDEN,
            AppError::ProfileCreationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::PaymentError(_) => StatusCode::PAYMENT_REQUIRED,
            AppError::PersistError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InventoryUpdateError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::SoldOut(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::AuthError(_) => "AUTH_ERROR",
            AppError::AuthorizationError(_) => "AUTHORIZATION_ERROR",
            AppError::ProfileCreationError(_) => "PROFILE_CREATION_ERROR",
            AppError::PaymentError(_) => "PAYMENT_ERROR",
            AppError::PersistError(_) => "PERSIST_ERROR",
            AppError::InventoryUpdateError(_) => "INVENTORY_UPDATE_ERROR",
            AppError::SoldOut(_) => "SOLD_OUT",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::ExternalServiceError(_) => "EXTERNAL_SERVICE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Full internal description, including the database cause. For logs and
    /// for wrapping into another variant, never for response bodies.
    pub fn detail(&self) -> String {
        match self {
            AppError::DatabaseError(e) => format!("database error: {e}"),
            AppError::InternalServerError(msg) => format!("internal error: {msg}"),
            other => other.to_string(),
        }
    }

    fn log(&self) {
        match self {
            // Caller mistakes; not worth an error-level line.
            AppError::ValidationError(msg)
            | AppError::AuthError(msg)
            | AppError::AuthorizationError(msg)
            | AppError::PaymentError(msg)
            | AppError::SoldOut(msg)
            | AppError::NotFound(msg) => {
                warn!(code = self.code(), message = %msg, "Request rejected");
            }
            AppError::ProfileCreationError(msg)
            | AppError::PersistError(msg)
            | AppError::InventoryUpdateError(msg)
            | AppError::ExternalServiceError(msg)
            | AppError::InternalServerError(msg) => {
                error!(error = ?self, message = %msg, "Application error");
            }
            AppError::DatabaseError(e) => {
                error!(error = ?e, "Database error");
            }
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::ExternalServiceError(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log internal details
        self.log();

        // Only expose high-level message to the client
        let public_message = match &self {
            AppError::ValidationError(msg)
            | AppError::AuthError(msg)
            | AppError::AuthorizationError(msg)
            | AppError::PaymentError(msg)
            | AppError::SoldOut(msg)
            | AppError::NotFound(msg) => msg.clone(),
            AppError::ProfileCreationError(_) => {
                "Your account was created but its profile could not be saved".to_string()
            }
            AppError::PersistError(_) => "The ticket could not be saved".to_string(),
            AppError::InventoryUpdateError(_) => {
                "The ticket was saved but availability could not be updated".to_string()
            }
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::ExternalServiceError(_) => "An upstream service failed".to_string(),
            AppError::InternalServerError(_) => "An internal error occurred".to_string(),
        };

        // Do not expose internal details in the API response
        let details = None;

        error_response(code, public_message, details, status)
    }
}
