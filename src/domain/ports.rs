use super::account::{Account, Amount, Balance, BalanceConstraint, UserId};
use super::payment::{
    IdempotencyKey, LedgerEntry, MethodRef, PaymentId, PaymentRecord, PaymentStatus, RefundId,
    RefundRecord,
};
use super::processor::{ProcessorOutcome, ProcessorRequest, TransientError};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Owner of all account balances.
///
/// `adjust_balance` is the only way a balance changes and is linearizable per user.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Latest committed balance; unknown users read as zero.
    async fn get_balance(&self, user_id: &UserId) -> Result<Balance>;

    /// Applies `delta` atomically if the result satisfies `constraint`.
    ///
    /// Creates the account on first reference. Fails with `InsufficientFunds`
    /// and applies nothing when the constraint does not hold.
    async fn adjust_balance(
        &self,
        user_id: &UserId,
        delta: Balance,
        constraint: BalanceConstraint,
    ) -> Result<Balance>;

    async fn get(&self, user_id: &UserId) -> Result<Option<Account>>;

    async fn get_all(&self) -> Result<Vec<Account>>;
}

/// Owner of payment and refund records.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Allocates a fresh id and inserts a `Pending` record in one step.
    async fn create_payment(
        &self,
        user_id: &UserId,
        amount: Amount,
        method: MethodRef,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<PaymentId>;

    /// Compare-and-set on status. Fails with `InvalidTransition` if the
    /// current status is not `from` or the edge is not allowed.
    async fn transition_payment(
        &self,
        payment_id: &PaymentId,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> Result<PaymentRecord>;

    /// Verifies the payment is `Processed` and unrefunded, inserts the refund
    /// and flips the payment to `Refunded`, all in one step.
    async fn create_refund(&self, payment_id: &PaymentId, amount: Amount) -> Result<RefundRecord>;

    async fn get(&self, payment_id: &PaymentId) -> Result<Option<PaymentRecord>>;

    async fn get_refund(&self, refund_id: &RefundId) -> Result<Option<RefundRecord>>;

    /// Payments and refunds of one user in creation order.
    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<LedgerEntry>>;

    /// Every entry in creation order.
    async fn list_all(&self) -> Result<Vec<LedgerEntry>>;
}

/// External settlement capability for one payment method.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn execute(
        &self,
        request: &ProcessorRequest,
    ) -> std::result::Result<ProcessorOutcome, TransientError>;
}

pub type AccountStoreRef = Arc<dyn AccountStore>;
pub type LedgerStoreRef = Arc<dyn LedgerStore>;
pub type PaymentProcessorRef = Arc<dyn PaymentProcessor>;
