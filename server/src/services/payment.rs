use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;

use crate::config::PaymentConfig;
use crate::models::{PaymentOutcome, PaymentReceipt, PaymentRequest};
use crate::utils::error::AppError;

const REFERENCE_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const REFERENCE_SUFFIX_LEN: usize = 9;

/// Something that can take money for a ticket.
///
/// A declined payment is a successful call with a `Failure` outcome; `Err`
/// is reserved for the gateway itself being unavailable.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn attempt(&self, request: &PaymentRequest) -> Result<PaymentReceipt, AppError>;
}

/// Stand-in gateway: waits a bounded random delay, then approves with a fixed
/// probability. Holds no state between calls.
#[derive(Debug, Clone)]
pub struct PaymentSimulator {
    success_rate: f64,
    min_delay: Duration,
    max_delay: Duration,
}

impl PaymentSimulator {
    pub fn new(success_rate: f64, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            success_rate: success_rate.clamp(0.0, 1.0),
            min_delay: min_delay.min(max_delay),
            max_delay: min_delay.max(max_delay),
        }
    }

    pub fn from_config(config: &PaymentConfig) -> Self {
        Self::new(config.success_rate, config.min_delay, config.max_delay)
    }

    fn pick_delay(&self) -> Duration {
        if self.min_delay == self.max_delay {
            return self.min_delay;
        }
        let min = self.min_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

#[async_trait]
impl PaymentGateway for PaymentSimulator {
    async fn attempt(&self, request: &PaymentRequest) -> Result<PaymentReceipt, AppError> {
        tokio::time::sleep(self.pick_delay()).await;

        let (approved, reference_id) = {
            let mut rng = rand::thread_rng();
            let suffix: String = (0..REFERENCE_SUFFIX_LEN)
                .map(|_| REFERENCE_ALPHABET[rng.gen_range(0..REFERENCE_ALPHABET.len())] as char)
                .collect();
            (
                rng.gen_bool(self.success_rate),
                format!("pay_{}_{}", Utc::now().timestamp_millis(), suffix),
            )
        };

        let outcome = if approved {
            PaymentOutcome::Success
        } else {
            PaymentOutcome::Failure
        };
        tracing::info!(
            event_id = %request.event_id,
            amount = %request.amount,
            currency = %request.currency,
            reference_id = %reference_id,
            ?outcome,
            "Simulated payment processed"
        );

        Ok(PaymentReceipt {
            outcome,
            reference_id,
        })
    }
}
