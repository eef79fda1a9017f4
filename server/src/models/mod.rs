pub mod event;
pub mod identity;
pub mod payment;
pub mod ticket;

pub use event::{Event, EventDraft, NewEvent};
pub use identity::{AuthChange, AuthSession, AuthStateChange, AuthUser, Identity, Role};
pub use payment::{PaymentOutcome, PaymentReceipt, PaymentRequest, DEFAULT_CURRENCY};
pub use ticket::{NewTicket, PaymentStatus, Ticket, TicketWithEvent};

use thiserror::Error;

/// Raised when a stored column or request names a variant this build does not know.
#[derive(Debug, Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}
