use super::account::Amount;
use super::payment::{PaymentId, PaymentMethod};
use thiserror::Error;

/// A single settlement attempt handed to an external processor.
#[derive(Debug, Clone)]
pub struct ProcessorRequest {
    pub payment_id: PaymentId,
    pub amount: Amount,
    pub method: PaymentMethod,
}

/// Terminal answer from a processor. Neither variant is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorOutcome {
    Approved,
    Declined(String),
}

/// A retryable processor failure. The processor guarantees no external
/// effect happened when this is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransientError {
    #[error("processor timed out")]
    Timeout,
    #[error("processor unreachable: {0}")]
    Unavailable(String),
}
