use serde::Serialize;
use uuid::Uuid;

use crate::utils::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseState {
    Idle,
    AwaitingPayment,
    PaymentFailed,
    PaymentSucceeded,
    AwaitingPersist,
    PersistFailed,
    TicketCreated,
    AwaitingInventoryUpdate,
    InventoryUpdateFailed,
    Committed,
}

impl PurchaseState {
    pub fn can_transition_to(self, next: PurchaseState) -> bool {
        use PurchaseState::*;
        matches!(
            (self, next),
            (Idle, AwaitingPayment)
                | (AwaitingPayment, PaymentFailed)
                | (AwaitingPayment, PaymentSucceeded)
                | (PaymentSucceeded, AwaitingPersist)
                | (AwaitingPersist, PersistFailed)
                | (AwaitingPersist, TicketCreated)
                | (TicketCreated, AwaitingInventoryUpdate)
                | (AwaitingInventoryUpdate, Committed)
                | (AwaitingInventoryUpdate, InventoryUpdateFailed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PurchaseState::PaymentFailed
                | PurchaseState::PersistFailed
                | PurchaseState::InventoryUpdateFailed
                | PurchaseState::Committed
        )
    }
}

/// Walks one purchase through [`PurchaseState`], logging every step.
#[derive(Debug)]
pub struct PurchaseTracker {
    event_id: Uuid,
    user_id: Uuid,
    history: Vec<PurchaseState>,
}

impl PurchaseTracker {
    pub fn new(user_id: Uuid, event_id: Uuid) -> Self {
        Self {
            event_id,
            user_id,
            history: vec![PurchaseState::Idle],
        }
    }

    pub fn state(&self) -> PurchaseState {
        // history always holds at least `Idle`
        self.history.last().copied().unwrap_or(PurchaseState::Idle)
    }

    pub fn advance(&mut self, next: PurchaseState) -> Result<(), AppError> {
        let current = self.state();
        if !current.can_transition_to(next) {
            return Err(AppError::InternalServerError(format!(
                "illegal purchase transition {current:?} -> {next:?}"
            )));
        }
        tracing::debug!(
            event_id = %self.event_id,
            user_id = %self.user_id,
            from = ?current,
            to = ?next,
            terminal = next.is_terminal(),
            "Purchase state transition"
        );
        self.history.push(next);
        Ok(())
    }

    pub fn into_history(self) -> Vec<PurchaseState> {
        self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PurchaseState::*;

    #[test]
    fn test_happy_path_is_legal() {
        let mut tracker = PurchaseTracker::new(Uuid::new_v4(), Uuid::new_v4());
        for next in [
            AwaitingPayment,
            PaymentSucceeded,
            AwaitingPersist,
            TicketCreated,
            AwaitingInventoryUpdate,
            Committed,
        ] {
            tracker.advance(next).unwrap();
        }
        assert_eq!(tracker.state(), Committed);
        assert!(tracker.state().is_terminal());
        assert_eq!(tracker.into_history().len(), 7);
    }

    #[test]
    fn test_cannot_skip_payment() {
        let mut tracker = PurchaseTracker::new(Uuid::new_v4(), Uuid::new_v4());
        let err = tracker.advance(AwaitingPersist).unwrap_err();
        assert!(matches!(err, AppError::InternalServerError(_)));
        assert_eq!(tracker.state(), Idle);
    }

    #[test]
    fn test_terminal_states_go_nowhere() {
        let all = [
            Idle,
            AwaitingPayment,
            PaymentFailed,
            PaymentSucceeded,
            AwaitingPersist,
            PersistFailed,
            TicketCreated,
            AwaitingInventoryUpdate,
            InventoryUpdateFailed,
            Committed,
        ];
        for from in all.iter().copied().filter(|s| s.is_terminal()) {
            assert!(all.iter().all(|to| !from.can_transition_to(*to)), "{from:?}");
        }
    }

    #[test]
    fn test_failed_payment_never_reaches_persist() {
        assert!(!PaymentFailed.can_transition_to(AwaitingPersist));
        assert!(!PersistFailed.can_transition_to(AwaitingInventoryUpdate));
    }
}
