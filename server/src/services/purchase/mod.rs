//! Ticket purchase: simulated payment, ticket record, inventory decrement.
//!
//! The three steps are independent backend calls with no surrounding
//! transaction. What happens when a later step fails after an earlier one
//! succeeded:
//!
//! - payment approved, ticket insert fails: the buyer is charged without a
//!   ticket. Logged with the payment reference; the call fails.
//! - ticket saved, decrement reports nothing left: another buyer took the
//!   last unit first. The ticket is deleted again and the call fails with
//!   `SoldOut`, so the last unit is never sold twice.
//! - ticket saved, decrement errors: the ticket stands and the receipt says
//!   the inventory drifted, unless [`PurchasePolicy::surface_inventory_errors`]
//!   turns it into an `InventoryUpdateError`.

mod state;

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

pub use state::{PurchaseState, PurchaseTracker};

use crate::backend::{CatalogRepository, TicketRepository};
use crate::models::{
    Identity, NewTicket, PaymentRequest, PaymentStatus, TicketWithEvent, DEFAULT_CURRENCY,
};
use crate::services::payment::PaymentGateway;
use crate::services::session::require_signed_in;
use crate::utils::error::AppError;

#[derive(Debug, Clone)]
pub struct PurchasePolicy {
    pub currency: String,
    pub surface_inventory_errors: bool,
}

impl Default for PurchasePolicy {
    fn default() -> Self {
        Self {
            currency: DEFAULT_CURRENCY.to_string(),
            surface_inventory_errors: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InventorySync {
    Decremented,
    /// The ticket exists but the event count was not lowered.
    Drifted { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseReceipt {
    pub ticket: TicketWithEvent,
    pub inventory: InventorySync,
    pub states: Vec<PurchaseState>,
}

pub struct PurchaseOrchestrator {
    payments: Arc<dyn PaymentGateway>,
    catalog: Arc<dyn CatalogRepository>,
    tickets: Arc<dyn TicketRepository>,
    policy: PurchasePolicy,
}

impl PurchaseOrchestrator {
    pub fn new(
        payments: Arc<dyn PaymentGateway>,
        catalog: Arc<dyn CatalogRepository>,
        tickets: Arc<dyn TicketRepository>,
        policy: PurchasePolicy,
    ) -> Self {
        Self {
            payments,
            catalog,
            tickets,
            policy,
        }
    }

    /// Buys one ticket for `event_id` on behalf of `identity`.
    ///
    /// Nothing is called, not even the payment gateway, unless someone is
    /// signed in and the event still has tickets.
    pub async fn purchase(
        &self,
        identity: Option<&Identity>,
        event_id: Uuid,
    ) -> Result<PurchaseReceipt, AppError> {
        let identity = require_signed_in(identity)?;

        let event = self
            .catalog
            .find_event(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("event '{event_id}' was not found")))?;
        if event.is_sold_out() {
            return Err(AppError::SoldOut(format!("'{}' has no tickets left", event.title)));
        }

        let mut tracker = PurchaseTracker::new(identity.id, event_id);

        tracker.advance(PurchaseState::AwaitingPayment)?;
        let request = PaymentRequest {
            amount: event.price,
            currency: self.policy.currency.clone(),
            event_id,
        };
        let receipt = match self.payments.attempt(&request).await {
            Ok(receipt) if receipt.is_success() => receipt,
            Ok(declined) => {
                tracker.advance(PurchaseState::PaymentFailed)?;
                // Declines leave no row anywhere; this line is the audit trail.
                tracing::warn!(
                    event_id = %event_id,
                    user_id = %identity.id,
                    reference_id = %declined.reference_id,
                    "Payment declined"
                );
                return Err(AppError::PaymentError(format!(
                    "payment {} was declined",
                    declined.reference_id
                )));
            }
            Err(e) => {
                tracker.advance(PurchaseState::PaymentFailed)?;
                tracing::warn!(event_id = %event_id, user_id = %identity.id, error = %e.detail(), "Payment gateway failed");
                return Err(AppError::PaymentError(
                    "payment could not be processed".to_string(),
                ));
            }
        };
        tracker.advance(PurchaseState::PaymentSucceeded)?;

        tracker.advance(PurchaseState::AwaitingPersist)?;
        let new_ticket = NewTicket {
            user_id: identity.id,
            event_id,
            payment_status: PaymentStatus::Completed,
            payment_id: receipt.reference_id.clone(),
        };
        let ticket = match self.tickets.insert_ticket(&new_ticket).await {
            Ok(ticket) => ticket,
            Err(e) => {
                tracker.advance(PurchaseState::PersistFailed)?;
                tracing::error!(
                    event_id = %event_id,
                    user_id = %identity.id,
                    reference_id = %receipt.reference_id,
                    error = %e.detail(),
                    "Payment taken but ticket insert failed"
                );
                return Err(AppError::PersistError(e.detail()));
            }
        };
        tracker.advance(PurchaseState::TicketCreated)?;

        tracker.advance(PurchaseState::AwaitingInventoryUpdate)?;
        let inventory = match self.catalog.decrement_available(event_id).await {
            Ok(true) => {
                tracker.advance(PurchaseState::Committed)?;
                InventorySync::Decremented
            }
            Ok(false) => {
                tracker.advance(PurchaseState::InventoryUpdateFailed)?;
                return Err(self.release_oversold(identity, &ticket, &receipt.reference_id).await);
            }
            Err(e) => {
                tracker.advance(PurchaseState::InventoryUpdateFailed)?;
                let reason = e.detail();
                tracing::warn!(
                    event_id = %event_id,
                    ticket_id = %ticket.ticket.id,
                    error = %reason,
                    "Ticket saved but inventory was not decremented"
                );
                if self.policy.surface_inventory_errors {
                    return Err(AppError::InventoryUpdateError(reason));
                }
                InventorySync::Drifted { reason }
            }
        };

        tracing::info!(
            event_id = %event_id,
            user_id = %identity.id,
            ticket_id = %ticket.ticket.id,
            final_state = ?tracker.state(),
            "Ticket purchased"
        );

        Ok(PurchaseReceipt {
            ticket,
            inventory,
            states: tracker.into_history(),
        })
    }

    /// Undoes a ticket written for a unit another buyer took first.
    async fn release_oversold(
        &self,
        identity: &Identity,
        ticket: &TicketWithEvent,
        reference_id: &str,
    ) -> AppError {
        let ticket_id = ticket.ticket.id;
        if let Err(e) = self.tickets.delete_ticket(ticket_id).await {
            tracing::error!(%ticket_id, error = %e.detail(), "Could not remove oversold ticket");
            return AppError::InventoryUpdateError(format!(
                "event sold out and ticket {ticket_id} could not be withdrawn: {}",
                e.detail()
            ));
        }
        tracing::warn!(
            event_id = %ticket.event.id,
            user_id = %identity.id,
            %ticket_id,
            reference_id,
            "Event sold out before inventory update; ticket withdrawn, payment needs refund"
        );
        AppError::SoldOut(format!("'{}' sold out during checkout", ticket.event.title))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use tokio::sync::Mutex;

    use super::*;
    use crate::backend::memory::fixtures::new_event;
    use crate::backend::memory::{Fault, MemoryBackend};
    use crate::models::{PaymentOutcome, PaymentReceipt};

    /// Gateway that answers from a script and counts calls.
    #[derive(Default)]
    struct ScriptedGateway {
        outcomes: Mutex<VecDeque<PaymentOutcome>>,
        calls: AtomicUsize,
        requests: Mutex<Vec<PaymentRequest>>,
        delay: Duration,
    }

    impl ScriptedGateway {
        fn with(outcomes: &[PaymentOutcome]) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.iter().copied().collect()),
                ..Self::default()
            })
        }

        fn slow(outcomes: &[PaymentOutcome], delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.iter().copied().collect()),
                delay,
                ..Self::default()
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PaymentGateway for ScriptedGateway {
        async fn attempt(&self, request: &PaymentRequest) -> Result<PaymentReceipt, AppError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().await.push(request.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let outcome = self
                .outcomes
                .lock()
                .await
                .pop_front()
                .unwrap_or(PaymentOutcome::Success);
            Ok(PaymentReceipt {
                outcome,
                reference_id: format!("pay_test_{call}"),
            })
        }
    }

    fn orchestrator(
        backend: &Arc<MemoryBackend>,
        gateway: Arc<ScriptedGateway>,
        policy: PurchasePolicy,
    ) -> PurchaseOrchestrator {
        PurchaseOrchestrator::new(gateway, backend.clone(), backend.clone(), policy)
    }

    fn buyer(name: &str) -> Identity {
        Identity::new_user(Uuid::new_v4(), format!("{name}@example.com"), name)
    }

    #[tokio::test]
    async fn test_requires_identity_before_any_payment() {
        let backend = MemoryBackend::shared();
        let event = backend.seed_event(new_event("gig", 1, 2000, 5)).await;
        let gateway = ScriptedGateway::with(&[]);
        let orchestrator = orchestrator(&backend, gateway.clone(), PurchasePolicy::default());

        let err = orchestrator.purchase(None, event.id).await.unwrap_err();
        assert!(matches!(err, AppError::AuthorizationError(_)));
        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_successful_purchase_commits() {
        let backend = MemoryBackend::shared();
        let event = backend.seed_event(new_event("gig", 1, 2000, 5)).await;
        let gateway = ScriptedGateway::with(&[PaymentOutcome::Success]);
        let orchestrator = orchestrator(&backend, gateway.clone(), PurchasePolicy::default());
        let ada = buyer("ada");

        let receipt = orchestrator.purchase(Some(&ada), event.id).await.unwrap();

        assert_eq!(receipt.ticket.ticket.event_id, event.id);
        assert_eq!(receipt.ticket.ticket.user_id, ada.id);
        assert_eq!(receipt.ticket.ticket.payment_status, PaymentStatus::Completed);
        assert_eq!(receipt.ticket.ticket.payment_id, "pay_test_0");
        assert_eq!(receipt.inventory, InventorySync::Decremented);
        assert_eq!(receipt.states.last(), Some(&PurchaseState::Committed));
        assert_eq!(backend.ticket_count().await, 1);
        assert_eq!(backend.event(event.id).await.unwrap().available_tickets, 4);

        let requests = gateway.requests.lock().await;
        assert_eq!(requests[0].amount, Decimal::new(2000, 2));
        assert_eq!(requests[0].currency, "EUR");
        assert_eq!(requests[0].event_id, event.id);
    }

    #[tokio::test]
    async fn test_declined_payment_changes_nothing() {
        let backend = MemoryBackend::shared();
        let event = backend.seed_event(new_event("gig", 1, 2000, 5)).await;
        let gateway = ScriptedGateway::with(&[PaymentOutcome::Failure]);
        let orchestrator = orchestrator(&backend, gateway.clone(), PurchasePolicy::default());

        let err = orchestrator.purchase(Some(&buyer("ada")), event.id).await.unwrap_err();
        assert!(matches!(err, AppError::PaymentError(_)));
        assert_eq!(backend.ticket_count().await, 0);
        assert_eq!(backend.ticket_writes.load(Ordering::SeqCst), 0);
        assert_eq!(backend.event(event.id).await.unwrap().available_tickets, 5);
    }

    #[tokio::test]
    async fn test_sold_out_event_is_rejected_without_charging() {
        let backend = MemoryBackend::shared();
        let event = backend.seed_event(new_event("gig", 1, 2000, 0)).await;
        let gateway = ScriptedGateway::with(&[]);
        let orchestrator = orchestrator(&backend, gateway.clone(), PurchasePolicy::default());

        let err = orchestrator.purchase(Some(&buyer("ada")), event.id).await.unwrap_err();
        assert!(matches!(err, AppError::SoldOut(_)));
        assert_eq!(gateway.calls(), 0);
        assert_eq!(backend.event(event.id).await.unwrap().available_tickets, 0);
    }

    #[tokio::test]
    async fn test_unknown_event_is_not_found() {
        let backend = MemoryBackend::shared();
        let gateway = ScriptedGateway::with(&[]);
        let orchestrator = orchestrator(&backend, gateway.clone(), PurchasePolicy::default());

        let err = orchestrator
            .purchase(Some(&buyer("ada")), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_persist_failure_leaves_inventory_alone() {
        let backend = MemoryBackend::shared();
        backend.set_fault(Fault::TicketInsert, true);
        let event = backend.seed_event(new_event("gig", 1, 2000, 5)).await;
        let orchestrator = orchestrator(&backend, ScriptedGateway::with(&[]), PurchasePolicy::default());

        let err = orchestrator.purchase(Some(&buyer("ada")), event.id).await.unwrap_err();
        assert!(matches!(err, AppError::PersistError(_)));
        assert_eq!(backend.event(event.id).await.unwrap().available_tickets, 5);
    }

    #[tokio::test]
    async fn test_inventory_failure_is_reported_in_receipt() {
        let backend = MemoryBackend::shared();
        backend.set_fault(Fault::InventoryUpdate, true);
        let event = backend.seed_event(new_event("gig", 1, 2000, 5)).await;
        let orchestrator = orchestrator(&backend, ScriptedGateway::with(&[]), PurchasePolicy::default());

        let receipt = orchestrator.purchase(Some(&buyer("ada")), event.id).await.unwrap();
        assert!(matches!(receipt.inventory, InventorySync::Drifted { .. }));
        assert_eq!(receipt.states.last(), Some(&PurchaseState::InventoryUpdateFailed));
        assert_eq!(backend.ticket_count().await, 1);
        assert_eq!(backend.event(event.id).await.unwrap().available_tickets, 5);
    }

    #[tokio::test]
    async fn test_inventory_failure_can_be_surfaced() {
        let backend = MemoryBackend::shared();
        backend.set_fault(Fault::InventoryUpdate, true);
        let event = backend.seed_event(new_event("gig", 1, 2000, 5)).await;
        let policy = PurchasePolicy {
            surface_inventory_errors: true,
            ..PurchasePolicy::default()
        };
        let orchestrator = orchestrator(&backend, ScriptedGateway::with(&[]), policy);

        let err = orchestrator.purchase(Some(&buyer("ada")), event.id).await.unwrap_err();
        assert!(matches!(err, AppError::InventoryUpdateError(_)));
        // The ticket itself is kept; only the count is off.
        assert_eq!(backend.ticket_count().await, 1);
    }

    #[tokio::test]
    async fn test_last_ticket_sold_once_under_concurrency() {
        let backend = MemoryBackend::shared();
        let event = backend.seed_event(new_event("E1", 1, 2000, 1)).await;
        // Both buyers pass the availability check before either pays.
        let gateway = ScriptedGateway::slow(
            &[PaymentOutcome::Success, PaymentOutcome::Success],
            Duration::from_millis(20),
        );
        let orchestrator = orchestrator(&backend, gateway.clone(), PurchasePolicy::default());
        let ada = buyer("ada");
        let bob = buyer("bob");

        let (first, second) = tokio::join!(
            orchestrator.purchase(Some(&ada), event.id),
            orchestrator.purchase(Some(&bob), event.id)
        );

        assert_eq!(gateway.calls(), 2);
        let outcomes = [first, second];
        let succeeded = outcomes.iter().filter(|r| r.is_ok()).count();
        assert_eq!(succeeded, 1);
        for outcome in &outcomes {
            if let Err(e) = outcome {
                assert!(
                    matches!(e, AppError::SoldOut(_) | AppError::PaymentError(_)),
                    "{e:?}"
                );
            }
        }
        assert_eq!(backend.ticket_count().await, 1);
        assert_eq!(backend.event(event.id).await.unwrap().available_tickets, 0);
    }

    #[tokio::test]
    async fn test_count_never_negative_over_many_attempts() {
        let backend = MemoryBackend::shared();
        let event = backend.seed_event(new_event("small room", 1, 1000, 3)).await;
        let script: Vec<PaymentOutcome> = (0..10)
            .map(|i| if i % 3 == 0 { PaymentOutcome::Failure } else { PaymentOutcome::Success })
            .collect();
        let orchestrator = orchestrator(&backend, ScriptedGateway::with(&script), PurchasePolicy::default());

        let mut sold = 0;
        for i in 0..10 {
            if orchestrator
                .purchase(Some(&buyer(&format!("buyer{i}"))), event.id)
                .await
                .is_ok()
            {
                sold += 1;
            }
            assert!(backend.event(event.id).await.unwrap().available_tickets >= 0);
        }
        assert_eq!(sold, 3);
        assert_eq!(backend.ticket_count().await, 3);
        assert_eq!(backend.event(event.id).await.unwrap().available_tickets, 0);
    }
}
