use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::backend::TicketRepository;
use crate::models::{Identity, TicketWithEvent};
use crate::services::session::require_signed_in;
use crate::utils::error::AppError;

#[derive(Debug, Default)]
struct OwnedTickets {
    owner: Option<Uuid>,
    tickets: Vec<TicketWithEvent>,
}

/// Purchase history of the signed-in identity, newest first.
///
/// The cached list always belongs to a single owner; a ticket for someone
/// else replaces it instead of joining it.
pub struct TicketHistory {
    repo: Arc<dyn TicketRepository>,
    cache: RwLock<OwnedTickets>,
}

impl TicketHistory {
    pub fn new(repo: Arc<dyn TicketRepository>) -> Self {
        Self {
            repo,
            cache: RwLock::new(OwnedTickets::default()),
        }
    }

    /// Re-fetches the caller's tickets. Ownership filtering is done by the
    /// repository query, never here.
    pub async fn refresh(&self, identity: Option<&Identity>) -> Result<Vec<TicketWithEvent>, AppError> {
        let identity = require_signed_in(identity)?;
        let tickets = self.repo.list_for_user(identity.id).await?;
        *self.cache.write().await = OwnedTickets {
            owner: Some(identity.id),
            tickets: tickets.clone(),
        };
        Ok(tickets)
    }

    pub async fn tickets(&self) -> Vec<TicketWithEvent> {
        self.cache.read().await.tickets.clone()
    }

    /// Puts a just-purchased ticket in front without a round trip.
    pub async fn prepend(&self, ticket: TicketWithEvent) {
        let mut cache = self.cache.write().await;
        let buyer = ticket.ticket.user_id;
        if cache.owner != Some(buyer) {
            tracing::debug!(previous_owner = ?cache.owner, %buyer, "Ticket cache changed owner");
            *cache = OwnedTickets {
                owner: Some(buyer),
                tickets: Vec::new(),
            };
        }
        cache.tickets.insert(0, ticket);
    }

    pub async fn clear(&self) {
        *self.cache.write().await = OwnedTickets::default();
    }
}
