use crate::domain::account::{Amount, UserId};
use crate::domain::payment::{IdempotencyKey, PaymentId, PaymentStatus, RefundId};
use thiserror::Error;

/// How a failure should be treated by callers, following the error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before any state was created.
    Validation,
    /// Recorded outcome; retrying the same request returns the same answer.
    BusinessDecline,
    /// The processor could not be reached within the retry budget.
    Transient,
    /// A store contract was broken. Never expected.
    Invariant,
    /// I/O or decoding failure outside the ledger core.
    Infrastructure,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PaymentError {
    #[error("Unknown payment method: {0}")]
    UnknownMethod(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Insufficient funds{}", fmt_payment(.payment_id))]
    InsufficientFunds { payment_id: Option<PaymentId> },
    #[error("Processor declined payment {payment_id}: {reason}")]
    ProcessorDeclined { payment_id: PaymentId, reason: String },
    #[error("Processor unavailable for payment {payment_id} after {attempts} attempts")]
    ProcessorUnavailable { payment_id: PaymentId, attempts: u32 },
    #[error("Balance of {0} would leave the representable range")]
    BalanceOverflow(UserId),
    #[error("Payment not found: {0}")]
    PaymentNotFound(PaymentId),
    #[error("Payment {payment_id} is {status}, not processed")]
    PaymentNotProcessed {
        payment_id: PaymentId,
        status: PaymentStatus,
    },
    #[error("Payment {payment_id} already refunded{}", fmt_refund(.refund_id))]
    AlreadyRefunded {
        payment_id: PaymentId,
        refund_id: Option<RefundId>,
    },
    #[error("Refund of {requested} exceeds payment {payment_id} amount {original}")]
    AmountMismatch {
        payment_id: PaymentId,
        requested: Amount,
        original: Amount,
    },
    #[error("Invalid transition for payment {payment_id}: expected {expected}, found {actual}")]
    InvalidTransition {
        payment_id: PaymentId,
        expected: PaymentStatus,
        actual: PaymentStatus,
    },
    #[error("Idempotency key {0} was already used for a different request")]
    IdempotencyConflict(IdempotencyKey),
    #[error("Internal inconsistency: {0}")]
    InternalInconsistency(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("CSV error: {0}")]
    CsvError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

fn fmt_payment(payment_id: &Option<PaymentId>) -> String {
    payment_id
        .as_ref()
        .map(|id| format!(" for payment {}", id))
        .unwrap_or_default()
}

fn fmt_refund(refund_id: &Option<RefundId>) -> String {
    refund_id
        .as_ref()
        .map(|id| format!(" by {}", id))
        .unwrap_or_default()
}

impl PaymentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PaymentError::UnknownMethod(_)
            | PaymentError::ValidationError(_)
            | PaymentError::PaymentNotFound(_)
            | PaymentError::AmountMismatch { .. }
            | PaymentError::BalanceOverflow(_)
            | PaymentError::IdempotencyConflict(_) => ErrorKind::Validation,
            PaymentError::InsufficientFunds { .. }
            | PaymentError::ProcessorDeclined { .. }
            | PaymentError::PaymentNotProcessed { .. }
            | PaymentError::AlreadyRefunded { .. } => ErrorKind::BusinessDecline,
            PaymentError::ProcessorUnavailable { .. } => ErrorKind::Transient,
            PaymentError::InvalidTransition { .. } | PaymentError::InternalInconsistency(_) => {
                ErrorKind::Invariant
            }
            PaymentError::IoError(_)
            | PaymentError::CsvError(_)
            | PaymentError::SerializationError(_) => ErrorKind::Infrastructure,
        }
    }

    /// The payment this failure refers to, if one exists.
    pub fn payment_id(&self) -> Option<&PaymentId> {
        match self {
            PaymentError::InsufficientFunds { payment_id } => payment_id.as_ref(),
            PaymentError::ProcessorDeclined { payment_id, .. }
            | PaymentError::ProcessorUnavailable { payment_id, .. }
            | PaymentError::PaymentNotProcessed { payment_id, .. }
            | PaymentError::AlreadyRefunded { payment_id, .. }
            | PaymentError::AmountMismatch { payment_id, .. }
            | PaymentError::InvalidTransition { payment_id, .. } => Some(payment_id),
            PaymentError::PaymentNotFound(payment_id) => Some(payment_id),
            _ => None,
        }
    }

    pub fn refund_id(&self) -> Option<&RefundId> {
        match self {
            PaymentError::AlreadyRefunded { refund_id, .. } => refund_id.as_ref(),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PaymentError {
    fn from(err: std::io::Error) -> Self {
        PaymentError::IoError(err.to_string())
    }
}

impl From<csv::Error> for PaymentError {
    fn from(err: csv::Error) -> Self {
        PaymentError::CsvError(err.to_string())
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(err: serde_json::Error) -> Self {
        PaymentError::SerializationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_insufficient_funds_message_carries_reference() {
        let bare = PaymentError::InsufficientFunds { payment_id: None };
        assert_eq!(bare.to_string(), "Insufficient funds");

        let with_ref = PaymentError::InsufficientFunds {
            payment_id: Some(PaymentId::from("pay_3")),
        };
        assert_eq!(with_ref.to_string(), "Insufficient funds for payment pay_3");
        assert_eq!(with_ref.payment_id(), Some(&PaymentId::from("pay_3")));
    }

    #[test]
    fn test_kinds_follow_taxonomy() {
        let payment_id = PaymentId::from("pay_1");
        assert_eq!(
            PaymentError::UnknownMethod("cash".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            PaymentError::AmountMismatch {
                payment_id: payment_id.clone(),
                requested: Amount::new(dec!(2)).unwrap(),
                original: Amount::new(dec!(1)).unwrap(),
            }
            .kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            PaymentError::ProcessorDeclined {
                payment_id: payment_id.clone(),
                reason: "bad card".into()
            }
            .kind(),
            ErrorKind::BusinessDecline
        );
        assert_eq!(
            PaymentError::ProcessorUnavailable {
                payment_id,
                attempts: 3
            }
            .kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            PaymentError::InternalInconsistency("dup".into()).kind(),
            ErrorKind::Invariant
        );
    }

    #[test]
    fn test_already_refunded_exposes_refund_reference() {
        let payment_id = PaymentId::from("pay_9");
        let err = PaymentError::AlreadyRefunded {
            refund_id: Some(RefundId::for_payment(&payment_id)),
            payment_id,
        };
        assert_eq!(err.refund_id().map(|r| r.as_str()), Some("refund_pay_9"));
        assert_eq!(
            err.to_string(),
            "Payment pay_9 already refunded by refund_pay_9"
        );
    }
}
