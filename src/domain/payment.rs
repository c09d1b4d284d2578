use super::account::{Amount, UserId};
use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Ledger-assigned payment identifier (`pay_<n>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PaymentId(String);

impl PaymentId {
    pub fn from_sequence(seq: u64) -> Self {
        Self(format!("pay_{}", seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PaymentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Refund identifier. A payment has at most one refund, so the id is derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RefundId(String);

impl RefundId {
    pub fn for_payment(payment_id: &PaymentId) -> Self {
        Self(format!("refund_{}", payment_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RefundId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RefundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-supplied token used to deduplicate retried requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for IdempotencyKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    CreditCard,
    PayPal,
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodKind::CreditCard => f.write_str("credit_card"),
            MethodKind::PayPal => f.write_str("paypal"),
        }
    }
}

/// Full method details as supplied by the client and forwarded to the processor.
///
/// Only the [`MethodRef`] derived from it is ever stored on a record.
#[derive(Clone, PartialEq, Eq)]
pub enum PaymentMethod {
    CreditCard {
        card_number: String,
        cvv: Option<String>,
        expiry: Option<String>,
    },
    PayPal {
        email: String,
    },
}

impl fmt::Debug for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::CreditCard { card_number, .. } => f
                .debug_struct("CreditCard")
                .field("card", &mask_card(card_number))
                .finish_non_exhaustive(),
            PaymentMethod::PayPal { email } => {
                f.debug_struct("PayPal").field("email", email).finish()
            }
        }
    }
}

impl PaymentMethod {
    /// Builds a method from its wire name and a bag of detail fields.
    pub fn from_parts(kind: &str, details: &HashMap<String, String>) -> Result<Self, PaymentError> {
        let field = |name: &str| -> Result<String, PaymentError> {
            details
                .get(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    PaymentError::ValidationError(format!("{} payment requires '{}'", kind, name))
                })
        };

        match kind.trim() {
            "credit_card" => Ok(PaymentMethod::CreditCard {
                card_number: field("card_number")?,
                cvv: details.get("cvv").cloned(),
                expiry: details.get("expiry").cloned(),
            }),
            "paypal" => Ok(PaymentMethod::PayPal {
                email: field("email")?,
            }),
            other => Err(PaymentError::UnknownMethod(other.to_string())),
        }
    }

    pub fn kind(&self) -> MethodKind {
        match self {
            PaymentMethod::CreditCard { .. } => MethodKind::CreditCard,
            PaymentMethod::PayPal { .. } => MethodKind::PayPal,
        }
    }

    pub fn reference(&self) -> MethodRef {
        match self {
            PaymentMethod::CreditCard { card_number, .. } => MethodRef::CreditCard {
                card_ref: mask_card(card_number),
            },
            PaymentMethod::PayPal { email } => MethodRef::PayPal {
                email_ref: email.clone(),
            },
        }
    }
}

fn mask_card(card_number: &str) -> String {
    let digits: Vec<char> = card_number.chars().filter(|c| c.is_ascii_digit()).collect();
    let tail: String = digits[digits.len().saturating_sub(4)..].iter().collect();
    format!("****{}", tail)
}

/// The stored, non-sensitive reference to how a payment was made.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MethodRef {
    CreditCard { card_ref: String },
    PayPal { email_ref: String },
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    /// Status edges a record may take. `Processed -> Refunded` is the only
    /// edge out of a completed state.
    pub fn can_transition(self, to: PaymentStatus) -> bool {
        matches!(
            (self, to),
            (PaymentStatus::Pending, PaymentStatus::Processed)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
                | (PaymentStatus::Processed, PaymentStatus::Refunded)
        )
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processed => "processed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum RefundStatus {
    Processed,
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("processed")
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PaymentRecord {
    pub payment_id: PaymentId,
    pub idempotency_key: Option<IdempotencyKey>,
    pub user_id: UserId,
    pub amount: Amount,
    pub method: MethodRef,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct RefundRecord {
    pub refund_id: RefundId,
    pub payment_id: PaymentId,
    pub user_id: UserId,
    pub amount: Amount,
    pub status: RefundStatus,
    pub created_at: DateTime<Utc>,
}

/// One row of a user's transaction history.
#[derive(Debug, Serialize, PartialEq, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LedgerEntry {
    Payment(PaymentRecord),
    Refund(RefundRecord),
}

impl LedgerEntry {
    pub fn user_id(&self) -> &UserId {
        match self {
            LedgerEntry::Payment(p) => &p.user_id,
            LedgerEntry::Refund(r) => &r.user_id,
        }
    }

    pub fn payment_id(&self) -> &PaymentId {
        match self {
            LedgerEntry::Payment(p) => &p.payment_id,
            LedgerEntry::Refund(r) => &r.payment_id,
        }
    }

    pub fn amount(&self) -> Amount {
        match self {
            LedgerEntry::Payment(p) => p.amount,
            LedgerEntry::Refund(r) => r.amount,
        }
    }
}

/// What the caller gets back from a successful payment submission.
#[derive(Debug, Serialize, PartialEq, Eq, Clone)]
pub struct PaymentReceipt {
    pub payment_id: PaymentId,
    pub status: PaymentStatus,
}

/// What the caller gets back from a successful refund submission.
#[derive(Debug, Serialize, PartialEq, Eq, Clone)]
pub struct RefundReceipt {
    pub refund_id: RefundId,
    pub payment_id: PaymentId,
    pub status: RefundStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_status_transitions() {
        use PaymentStatus::*;
        assert!(Pending.can_transition(Processed));
        assert!(Pending.can_transition(Failed));
        assert!(Processed.can_transition(Refunded));

        assert!(!Processed.can_transition(Failed));
        assert!(!Failed.can_transition(Processed));
        assert!(!Refunded.can_transition(Processed));
        assert!(!Failed.can_transition(Refunded));
        assert!(!Pending.can_transition(Refunded));
        assert!(!Processed.can_transition(Processed));
    }

    #[test]
    fn test_method_from_parts_credit_card() {
        let method = PaymentMethod::from_parts(
            "credit_card",
            &details(&[("card_number", "4111 1111 1111 1111"), ("cvv", "123")]),
        )
        .unwrap();
        assert_eq!(method.kind(), MethodKind::CreditCard);
        assert_eq!(
            method.reference(),
            MethodRef::CreditCard {
                card_ref: "****1111".to_string()
            }
        );
    }

    #[test]
    fn test_method_from_parts_unknown_kind() {
        let result = PaymentMethod::from_parts("bitcoin", &HashMap::new());
        assert_eq!(result, Err(PaymentError::UnknownMethod("bitcoin".to_string())));
    }

    #[test]
    fn test_method_from_parts_missing_detail() {
        let result = PaymentMethod::from_parts("paypal", &HashMap::new());
        assert!(matches!(result, Err(PaymentError::ValidationError(_))));
    }

    #[test]
    fn test_debug_never_prints_card_number() {
        let method = PaymentMethod::CreditCard {
            card_number: "4111111111111111".to_string(),
            cvv: Some("123".to_string()),
            expiry: None,
        };
        let printed = format!("{:?}", method);
        assert!(!printed.contains("4111111111111111"));
        assert!(!printed.contains("123"));
        assert!(printed.contains("****1111"));
    }

    #[test]
    fn test_refund_id_derived_from_payment() {
        let payment_id = PaymentId::from_sequence(7);
        assert_eq!(payment_id.as_str(), "pay_7");
        assert_eq!(RefundId::for_payment(&payment_id).as_str(), "refund_pay_7");
    }
}
