use crate::domain::account::{Account, Amount, Balance, BalanceConstraint, UserId};
use crate::domain::payment::{
    IdempotencyKey, LedgerEntry, MethodRef, PaymentId, PaymentRecord, PaymentStatus, RefundId,
    RefundRecord, RefundStatus,
};
use crate::domain::ports::{AccountStore, LedgerStore};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// A thread-safe in-memory store for accounts.
///
/// Every adjustment runs under the map's write lock, so read-modify-write on a
/// single account can never interleave with another one.
#[derive(Default, Clone)]
pub struct InMemoryAccountStore {
    accounts: Arc<RwLock<HashMap<UserId, Account>>>,
}

impl InMemoryAccountStore {
    /// Creates a new, empty in-memory account store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn get_balance(&self, user_id: &UserId) -> Result<Balance> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .get(user_id)
            .map(|a| a.balance)
            .unwrap_or(Balance::ZERO))
    }

    async fn adjust_balance(
        &self,
        user_id: &UserId,
        delta: Balance,
        constraint: BalanceConstraint,
    ) -> Result<Balance> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .entry(user_id.clone())
            .or_insert_with(|| Account::new(user_id.clone()));
        let balance = account.apply(delta, constraint)?;
        debug!(user = %user_id, %delta, %balance, version = account.version, "balance adjusted");
        Ok(balance)
    }

    async fn get(&self, user_id: &UserId) -> Result<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(user_id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<Account>> {
        let accounts = self.accounts.read().await;
        let mut all: Vec<Account> = accounts.values().cloned().collect();
        all.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(all)
    }
}

#[derive(Debug, Clone)]
enum JournalRef {
    Payment(PaymentId),
    Refund(RefundId),
}

#[derive(Default)]
struct LedgerData {
    payments: HashMap<PaymentId, PaymentRecord>,
    refunds: HashMap<RefundId, RefundRecord>,
    refund_by_payment: HashMap<PaymentId, RefundId>,
    journal: Vec<JournalRef>,
    journal_by_user: HashMap<UserId, Vec<usize>>,
    sequence_counter: u64,
}

impl LedgerData {
    fn record(&mut self, user_id: &UserId, entry: JournalRef) {
        let position = self.journal.len();
        self.journal.push(entry);
        self.journal_by_user
            .entry(user_id.clone())
            .or_default()
            .push(position);
    }

    fn resolve(&self, entry: &JournalRef) -> Option<LedgerEntry> {
        match entry {
            JournalRef::Payment(id) => self.payments.get(id).cloned().map(LedgerEntry::Payment),
            JournalRef::Refund(id) => self.refunds.get(id).cloned().map(LedgerEntry::Refund),
        }
    }
}

/// A thread-safe in-memory store for payment and refund records.
///
/// Id allocation, inserts, and status changes all happen under one write lock.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    data: Arc<RwLock<LedgerData>>,
}

impl InMemoryLedgerStore {
    /// Creates a new, empty in-memory ledger store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_payment(
        &self,
        user_id: &UserId,
        amount: Amount,
        method: MethodRef,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<PaymentId> {
        let mut data = self.data.write().await;

        data.sequence_counter += 1;
        let payment_id = PaymentId::from_sequence(data.sequence_counter);
        if data.payments.contains_key(&payment_id) {
            return Err(PaymentError::InternalInconsistency(format!(
                "payment id {} allocated twice",
                payment_id
            )));
        }

        let record = PaymentRecord {
            payment_id: payment_id.clone(),
            idempotency_key,
            user_id: user_id.clone(),
            amount,
            method,
            status: PaymentStatus::Pending,
            created_at: Utc::now(),
            processed_at: None,
        };
        data.payments.insert(payment_id.clone(), record);
        data.record(user_id, JournalRef::Payment(payment_id.clone()));

        debug!(payment = %payment_id, user = %user_id, %amount, "payment created");
        Ok(payment_id)
    }

    async fn transition_payment(
        &self,
        payment_id: &PaymentId,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> Result<PaymentRecord> {
        let mut data = self.data.write().await;
        let record = data
            .payments
            .get_mut(payment_id)
            .ok_or_else(|| PaymentError::PaymentNotFound(payment_id.clone()))?;

        if record.status != from || !from.can_transition(to) {
            return Err(PaymentError::InvalidTransition {
                payment_id: payment_id.clone(),
                expected: from,
                actual: record.status,
            });
        }

        record.status = to;
        if matches!(to, PaymentStatus::Processed | PaymentStatus::Failed) {
            record.processed_at = Some(Utc::now());
        }

        debug!(payment = %payment_id, %from, %to, "payment transitioned");
        Ok(record.clone())
    }

    async fn create_refund(&self, payment_id: &PaymentId, amount: Amount) -> Result<RefundRecord> {
        let mut data = self.data.write().await;

        if let Some(existing) = data.refund_by_payment.get(payment_id) {
            return Err(PaymentError::AlreadyRefunded {
                payment_id: payment_id.clone(),
                refund_id: Some(existing.clone()),
            });
        }

        let payment = data
            .payments
            .get_mut(payment_id)
            .ok_or_else(|| PaymentError::PaymentNotFound(payment_id.clone()))?;

        match payment.status {
            PaymentStatus::Processed => {}
            PaymentStatus::Refunded => {
                return Err(PaymentError::AlreadyRefunded {
                    payment_id: payment_id.clone(),
                    refund_id: None,
                });
            }
            status => {
                return Err(PaymentError::PaymentNotProcessed {
                    payment_id: payment_id.clone(),
                    status,
                });
            }
        }

        if amount > payment.amount {
            return Err(PaymentError::AmountMismatch {
                payment_id: payment_id.clone(),
                requested: amount,
                original: payment.amount,
            });
        }

        payment.status = PaymentStatus::Refunded;
        let user_id = payment.user_id.clone();

        let refund = RefundRecord {
            refund_id: RefundId::for_payment(payment_id),
            payment_id: payment_id.clone(),
            user_id: user_id.clone(),
            amount,
            status: RefundStatus::Processed,
            created_at: Utc::now(),
        };
        data.refund_by_payment
            .insert(payment_id.clone(), refund.refund_id.clone());
        data.refunds.insert(refund.refund_id.clone(), refund.clone());
        data.record(&user_id, JournalRef::Refund(refund.refund_id.clone()));

        debug!(payment = %payment_id, refund = %refund.refund_id, %amount, "refund created");
        Ok(refund)
    }

    async fn get(&self, payment_id: &PaymentId) -> Result<Option<PaymentRecord>> {
        let data = self.data.read().await;
        Ok(data.payments.get(payment_id).cloned())
    }

    async fn get_refund(&self, refund_id: &RefundId) -> Result<Option<RefundRecord>> {
        let data = self.data.read().await;
        Ok(data.refunds.get(refund_id).cloned())
    }

    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<LedgerEntry>> {
        let data = self.data.read().await;
        Ok(data
            .journal_by_user
            .get(user_id)
            .map(|positions| {
                positions
                    .iter()
                    .filter_map(|&pos| data.resolve(&data.journal[pos]))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_all(&self) -> Result<Vec<LedgerEntry>> {
        let data = self.data.read().await;
        Ok(data
            .journal
            .iter()
            .filter_map(|entry| data.resolve(entry))
            .collect())
    }
}
