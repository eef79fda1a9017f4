use std::sync::Arc;

use crate::backend::Backend;
use crate::services::catalog::Catalog;
use crate::services::payment::PaymentGateway;
use crate::services::purchase::{PurchaseOrchestrator, PurchasePolicy};
use crate::services::session::SessionStore;
use crate::services::shell::Navigator;
use crate::services::tickets::TicketHistory;

/// Everything the handlers share, passed through axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<SessionStore>,
    pub catalog: Arc<Catalog>,
    pub tickets: Arc<TicketHistory>,
    pub purchases: Arc<PurchaseOrchestrator>,
    pub navigator: Arc<Navigator>,
}

impl AppState {
    pub fn new(backend: Backend, payments: Arc<dyn PaymentGateway>, policy: PurchasePolicy) -> Self {
        Self {
            session: SessionStore::new(backend.auth, backend.profiles),
            catalog: Arc::new(Catalog::new(backend.catalog.clone())),
            tickets: Arc::new(TicketHistory::new(backend.tickets.clone())),
            purchases: Arc::new(PurchaseOrchestrator::new(
                payments,
                backend.catalog,
                backend.tickets,
                policy,
            )),
            navigator: Arc::new(Navigator::new()),
        }
    }

    /// Resolves any existing session and warms the event cache.
    pub async fn start(&self) {
        self.session.start().await;
        if let Err(e) = self.catalog.list_events().await {
            tracing::warn!(error = %e.detail(), "Initial event load failed");
        }
        if let Some(identity) = self.session.current_identity() {
            if let Err(e) = self.tickets.refresh(Some(&identity)).await {
                tracing::warn!(error = %e.detail(), "Initial ticket load failed");
            }
        }
    }

    pub fn shutdown(&self) {
        self.session.shutdown();
    }
}
