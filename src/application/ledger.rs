use super::commit_lock::AccountLocks;
use super::history::TransactionHistory;
use super::idempotency::{Claim, IdempotencyRegistry, Reservation};
use super::processors::ProcessorRegistry;
use crate::config::LedgerConfig;
use crate::domain::account::{Account, Amount, Balance, BalanceConstraint, UserId};
use crate::domain::payment::{
    IdempotencyKey, LedgerEntry, MethodRef, PaymentId, PaymentMethod, PaymentReceipt,
    PaymentRecord, PaymentStatus, RefundId, RefundReceipt, RefundRecord,
};
use crate::domain::ports::{AccountStoreRef, LedgerStoreRef, PaymentProcessorRef};
use crate::domain::processor::{ProcessorOutcome, ProcessorRequest, TransientError};
use crate::error::{ErrorKind, PaymentError, Result};
use crate::infrastructure::in_memory::{InMemoryAccountStore, InMemoryLedgerStore};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span, warn};

/// The payment/refund ledger.
///
/// `PaymentLedger` accepts payment and refund intents, settles payments through
/// the processor registered for their method, and commits record status and
/// balance change together. It never mutates stored state itself; every change
/// goes through the owning store's atomic operation.
///
/// Cloning is cheap and shares all state.
#[derive(Clone)]
pub struct PaymentLedger {
    inner: Arc<LedgerInner>,
}

struct LedgerInner {
    accounts: AccountStoreRef,
    ledger: LedgerStoreRef,
    processors: ProcessorRegistry,
    payment_keys: IdempotencyRegistry<PaymentReceipt>,
    refund_keys: IdempotencyRegistry<RefundReceipt>,
    locks: AccountLocks,
    config: LedgerConfig,
}

impl PaymentLedger {
    /// Creates a new `PaymentLedger`.
    ///
    /// # Arguments
    ///
    /// * `accounts` - The store owning account balances.
    /// * `ledger` - The store owning payment and refund records.
    /// * `processors` - One settlement capability per supported method.
    /// * `config` - Retry, timeout, and overdraft settings.
    pub fn new(
        accounts: AccountStoreRef,
        ledger: LedgerStoreRef,
        processors: ProcessorRegistry,
        config: LedgerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(LedgerInner {
                accounts,
                ledger,
                processors,
                payment_keys: IdempotencyRegistry::new(),
                refund_keys: IdempotencyRegistry::new(),
                locks: AccountLocks::new(),
                config,
            }),
        }
    }

    /// A ledger backed by fresh in-memory stores.
    pub fn in_memory(processors: ProcessorRegistry, config: LedgerConfig) -> Self {
        Self::new(
            Arc::new(InMemoryAccountStore::new()),
            Arc::new(InMemoryLedgerStore::new()),
            processors,
            config,
        )
    }

    /// Charges `amount` to `user_id` through the processor for `method`.
    ///
    /// With an idempotency key, every submission of the same request returns
    /// the outcome of the first one, and concurrent duplicates wait for it.
    /// Once the key is claimed the request runs to completion even if the
    /// returned future is dropped.
    pub async fn submit_payment(
        &self,
        user_id: UserId,
        amount: Amount,
        method: PaymentMethod,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<PaymentReceipt> {
        let span = info_span!(
            "submit_payment",
            user = %user_id,
            %amount,
            method = %method.kind(),
            key = ?idempotency_key.as_ref().map(IdempotencyKey::as_str),
        );
        async move {
            let processor = self.inner.processors.resolve(method.kind())?;
            let fingerprint = serde_json::to_string(&RequestFingerprint::Payment {
                user_id: &user_id,
                amount,
                method: method.reference(),
            })?;

            let claim = match self
                .inner
                .payment_keys
                .reserve(idempotency_key.as_ref(), &fingerprint)
                .await?
            {
                Reservation::Completed(outcome) => {
                    info!("returning recorded outcome");
                    return outcome;
                }
                Reservation::Fresh(claim) => claim,
            };

            let inner = Arc::clone(&self.inner);
            run_detached(claim, settles_payment, async move {
                inner
                    .run_payment(processor, user_id, amount, method, idempotency_key)
                    .await
            })
            .await
        }
        .instrument(span)
        .await
    }

    /// Refunds `amount` of a processed payment back to its owner.
    ///
    /// At most one refund exists per payment. Repeating a refund without a
    /// key fails with `AlreadyRefunded` carrying the existing refund id.
    pub async fn submit_refund(
        &self,
        payment_id: PaymentId,
        amount: Amount,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<RefundReceipt> {
        let span = info_span!(
            "submit_refund",
            payment = %payment_id,
            %amount,
            key = ?idempotency_key.as_ref().map(IdempotencyKey::as_str),
        );
        async move {
            let payment = self
                .inner
                .ledger
                .get(&payment_id)
                .await?
                .ok_or_else(|| PaymentError::PaymentNotFound(payment_id.clone()))?;
            if amount > payment.amount {
                return Err(PaymentError::AmountMismatch {
                    payment_id,
                    requested: amount,
                    original: payment.amount,
                });
            }

            let fingerprint = serde_json::to_string(&RequestFingerprint::Refund {
                payment_id: &payment_id,
                amount,
            })?;
            let claim = match self
                .inner
                .refund_keys
                .reserve(idempotency_key.as_ref(), &fingerprint)
                .await?
            {
                Reservation::Completed(outcome) => {
                    info!("returning recorded outcome");
                    return outcome;
                }
                Reservation::Fresh(claim) => claim,
            };

            let inner = Arc::clone(&self.inner);
            run_detached(claim, Result::is_ok, async move {
                inner.run_refund(payment.user_id, payment_id, amount).await
            })
            .await
        }
        .instrument(span)
        .await
    }

    /// Credits an account outside of any payment.
    pub async fn deposit(&self, user_id: &UserId, amount: Amount) -> Result<Balance> {
        let _guard = self.inner.locks.acquire(user_id).await;
        let balance = self
            .inner
            .accounts
            .adjust_balance(user_id, amount.into(), BalanceConstraint::Unconstrained)
            .await?;
        info!(user = %user_id, %amount, %balance, "deposit applied");
        Ok(balance)
    }

    pub async fn get_payment_status(&self, payment_id: &PaymentId) -> Result<Option<PaymentStatus>> {
        Ok(self.inner.ledger.get(payment_id).await?.map(|p| p.status))
    }

    pub async fn get_payment(&self, payment_id: &PaymentId) -> Result<Option<PaymentRecord>> {
        self.inner.ledger.get(payment_id).await
    }

    pub async fn get_refund(&self, refund_id: &RefundId) -> Result<Option<RefundRecord>> {
        self.inner.ledger.get_refund(refund_id).await
    }

    pub async fn get_balance(&self, user_id: &UserId) -> Result<Balance> {
        self.inner.accounts.get_balance(user_id).await
    }

    /// Snapshot of the user's payments and refunds in creation order.
    pub async fn list_transactions(&self, user_id: &UserId) -> Result<TransactionHistory> {
        Ok(TransactionHistory::new(
            self.inner.ledger.list_by_user(user_id).await?,
        ))
    }

    pub async fn all_transactions(&self) -> Result<Vec<LedgerEntry>> {
        self.inner.ledger.list_all().await
    }

    pub async fn accounts(&self) -> Result<Vec<Account>> {
        self.inner.accounts.get_all().await
    }
}

/// What a keyed request asked for. Reusing a key for a request with a
/// different fingerprint is a conflict.
#[derive(Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum RequestFingerprint<'a> {
    Payment {
        user_id: &'a UserId,
        amount: Amount,
        method: MethodRef,
    },
    Refund {
        payment_id: &'a PaymentId,
        amount: Amount,
    },
}

/// A payment outcome is durable once a record reached a terminal status.
fn settles_payment(outcome: &Result<PaymentReceipt>) -> bool {
    match outcome {
        Ok(_) => true,
        Err(err) => matches!(err.kind(), ErrorKind::BusinessDecline | ErrorKind::Transient),
    }
}

/// Runs the claimed part of a request on its own task so that dropping the
/// caller cannot stop it halfway. Durable outcomes are committed to the
/// claim; anything else releases the key.
async fn run_detached<T, F>(
    claim: Claim<T>,
    durable: fn(&Result<T>) -> bool,
    work: F,
) -> Result<T>
where
    T: Clone + Send + Sync + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    let task = tokio::spawn(
        async move {
            let outcome = work.await;
            if durable(&outcome) {
                claim.commit(outcome.clone());
            } else {
                claim.release();
            }
            outcome
        }
        .in_current_span(),
    );

    task.await.unwrap_or_else(|err| {
        error!(error = %err, "ledger task did not complete");
        Err(PaymentError::InternalInconsistency(format!(
            "ledger task did not complete: {}",
            err
        )))
    })
}

impl LedgerInner {
    async fn run_payment(
        &self,
        processor: PaymentProcessorRef,
        user_id: UserId,
        amount: Amount,
        method: PaymentMethod,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<PaymentReceipt> {
        let payment_id = self
            .ledger
            .create_payment(&user_id, amount, method.reference(), idempotency_key)
            .await?;

        let request = ProcessorRequest {
            payment_id: payment_id.clone(),
            amount,
            method,
        };

        match self.execute_with_retry(&processor, &request).await {
            Ok(ProcessorOutcome::Approved) => self.commit_debit(&user_id, payment_id, amount).await,
            Ok(ProcessorOutcome::Declined(reason)) => {
                self.fail_payment(&payment_id).await?;
                info!(payment = %payment_id, %reason, "payment declined");
                Err(PaymentError::ProcessorDeclined { payment_id, reason })
            }
            Err(attempts) => {
                self.fail_payment(&payment_id).await?;
                warn!(payment = %payment_id, attempts, "processor unavailable, payment failed");
                Err(PaymentError::ProcessorUnavailable {
                    payment_id,
                    attempts,
                })
            }
        }
    }

    /// Calls the processor until it gives a terminal answer or the retry
    /// budget runs out. Returns the number of attempts made on exhaustion.
    async fn execute_with_retry(
        &self,
        processor: &PaymentProcessorRef,
        request: &ProcessorRequest,
    ) -> std::result::Result<ProcessorOutcome, u32> {
        let policy = &self.config.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result =
                match tokio::time::timeout(self.config.processor_timeout, processor.execute(request))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(TransientError::Timeout),
                };

            match result {
                Ok(outcome) => return Ok(outcome),
                Err(err) if attempt < max_attempts => {
                    let delay = policy.backoff_for(attempt);
                    warn!(
                        payment = %request.payment_id,
                        attempt,
                        error = %err,
                        ?delay,
                        "transient processor error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(payment = %request.payment_id, attempt, error = %err, "retries exhausted");
                    return Err(attempt);
                }
            }
        }
    }

    /// Debits the account and marks the payment processed as one step with
    /// respect to other commits on the same account.
    ///
    /// The debit goes first: the record only becomes `Processed` once the
    /// money has moved, and a refused debit turns it `Failed` instead.
    async fn commit_debit(
        &self,
        user_id: &UserId,
        payment_id: PaymentId,
        amount: Amount,
    ) -> Result<PaymentReceipt> {
        let _guard = self.locks.acquire(user_id).await;

        let debit = -Balance::from(amount);
        match self
            .accounts
            .adjust_balance(user_id, debit, self.config.overdraft.debit_constraint())
            .await
        {
            Ok(balance) => {
                match self
                    .ledger
                    .transition_payment(&payment_id, PaymentStatus::Pending, PaymentStatus::Processed)
                    .await
                {
                    Ok(record) => {
                        info!(payment = %payment_id, %balance, "payment processed");
                        Ok(PaymentReceipt {
                            payment_id,
                            status: record.status,
                        })
                    }
                    Err(err) => {
                        // Undo the debit; the record could not follow it.
                        let restored = self
                            .accounts
                            .adjust_balance(user_id, amount.into(), BalanceConstraint::Unconstrained)
                            .await;
                        Err(invariant(format!(
                            "payment {} debited but not marked processed ({}); debit reversal: {:?}",
                            payment_id,
                            err,
                            restored.map(|b| b.to_string())
                        )))
                    }
                }
            }
            Err(PaymentError::InsufficientFunds { .. }) => {
                self.fail_payment(&payment_id).await?;
                info!(payment = %payment_id, "insufficient funds");
                Err(PaymentError::InsufficientFunds {
                    payment_id: Some(payment_id),
                })
            }
            Err(err) => {
                self.fail_payment(&payment_id).await?;
                Err(err)
            }
        }
    }

    async fn fail_payment(&self, payment_id: &PaymentId) -> Result<()> {
        self.ledger
            .transition_payment(payment_id, PaymentStatus::Pending, PaymentStatus::Failed)
            .await
            .map(|_| ())
            .map_err(|err| {
                invariant(format!(
                    "payment {} could not be marked failed: {}",
                    payment_id, err
                ))
            })
    }

    async fn run_refund(
        &self,
        user_id: UserId,
        payment_id: PaymentId,
        amount: Amount,
    ) -> Result<RefundReceipt> {
        let _guard = self.locks.acquire(&user_id).await;

        // The credit must be known to fit before the refund is recorded.
        let current = self.accounts.get_balance(&user_id).await?;
        if current.checked_add(amount.into()).is_none() {
            return Err(PaymentError::BalanceOverflow(user_id));
        }

        let refund = self.ledger.create_refund(&payment_id, amount).await?;
        let balance = self
            .accounts
            .adjust_balance(&refund.user_id, amount.into(), BalanceConstraint::Unconstrained)
            .await
            .map_err(|err| {
                invariant(format!(
                    "refund {} recorded but credit failed: {}",
                    refund.refund_id, err
                ))
            })?;

        info!(payment = %payment_id, refund = %refund.refund_id, %balance, "refund processed");
        Ok(RefundReceipt {
            refund_id: refund.refund_id,
            payment_id,
            status: refund.status,
        })
    }
}

fn invariant(message: String) -> PaymentError {
    error!(%message, "ledger invariant violated");
    PaymentError::InternalInconsistency(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::MethodKind;
    use crate::infrastructure::simulated::{CardNetworkStub, PayPalStub};
    use rust_decimal_macros::dec;

    fn ledger() -> PaymentLedger {
        let processors = ProcessorRegistry::new()
            .with(MethodKind::CreditCard, Arc::new(CardNetworkStub::new()))
            .with(MethodKind::PayPal, Arc::new(PayPalStub::new()));
        PaymentLedger::in_memory(processors, LedgerConfig::default())
    }

    fn paypal() -> PaymentMethod {
        PaymentMethod::PayPal {
            email: "test@example.com".to_string(),
        }
    }

    fn amount(value: rust_decimal::Decimal) -> Amount {
        Amount::new(value).unwrap()
    }

    #[tokio::test]
    async fn test_payment_debits_and_processes() {
        let ledger = ledger();
        let alice = UserId::from("alice");
        ledger.deposit(&alice, amount(dec!(1000))).await.unwrap();

        let receipt = ledger
            .submit_payment(alice.clone(), amount(dec!(100)), paypal(), None)
            .await
            .unwrap();

        assert_eq!(receipt.status, PaymentStatus::Processed);
        assert_eq!(
            ledger.get_balance(&alice).await.unwrap(),
            Balance::new(dec!(900))
        );
        let record = ledger.get_payment(&receipt.payment_id).await.unwrap().unwrap();
        assert!(record.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_insufficient_funds_fails_record() {
        let ledger = ledger();
        let alice = UserId::from("alice");
        ledger.deposit(&alice, amount(dec!(50))).await.unwrap();

        let err = ledger
            .submit_payment(alice.clone(), amount(dec!(100)), paypal(), None)
            .await
            .unwrap_err();

        let payment_id = err.payment_id().cloned().unwrap();
        assert!(matches!(err, PaymentError::InsufficientFunds { .. }));
        assert_eq!(
            ledger.get_payment_status(&payment_id).await.unwrap(),
            Some(PaymentStatus::Failed)
        );
        assert_eq!(
            ledger.get_balance(&alice).await.unwrap(),
            Balance::new(dec!(50))
        );
    }

    #[tokio::test]
    async fn test_unknown_method_creates_nothing() {
        let processors =
            ProcessorRegistry::new().with(MethodKind::PayPal, Arc::new(PayPalStub::new()));
        let ledger = PaymentLedger::in_memory(processors, LedgerConfig::default());
        let alice = UserId::from("alice");

        let err = ledger
            .submit_payment(
                alice.clone(),
                amount(dec!(1)),
                PaymentMethod::CreditCard {
                    card_number: "4111111111111111".into(),
                    cvv: None,
                    expiry: None,
                },
                None,
            )
            .await
            .unwrap_err();

        assert_eq!(err, PaymentError::UnknownMethod("credit_card".into()));
        assert!(ledger.list_transactions(&alice).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refund_restores_balance() {
        let ledger = ledger();
        let alice = UserId::from("alice");
        ledger.deposit(&alice, amount(dec!(1000))).await.unwrap();
        let receipt = ledger
            .submit_payment(alice.clone(), amount(dec!(100)), paypal(), None)
            .await
            .unwrap();

        let refund = ledger
            .submit_refund(receipt.payment_id.clone(), amount(dec!(100)), None)
            .await
            .unwrap();

        assert_eq!(refund.refund_id, RefundId::for_payment(&receipt.payment_id));
        assert_eq!(
            ledger.get_payment_status(&receipt.payment_id).await.unwrap(),
            Some(PaymentStatus::Refunded)
        );
        assert_eq!(
            ledger.get_balance(&alice).await.unwrap(),
            Balance::new(dec!(1000))
        );
        assert!(ledger.get_refund(&refund.refund_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_refund_of_unknown_payment() {
        let ledger = ledger();
        let err = ledger
            .submit_refund(PaymentId::from("pay_404"), amount(dec!(1)), None)
            .await
            .unwrap_err();
        assert_eq!(err, PaymentError::PaymentNotFound(PaymentId::from("pay_404")));
    }

    #[tokio::test]
    async fn test_deposit_overflow_is_an_error() {
        let ledger = ledger();
        let alice = UserId::from("alice");
        ledger
            .deposit(&alice, amount(rust_decimal::Decimal::MAX))
            .await
            .unwrap();

        let err = ledger.deposit(&alice, amount(dec!(1))).await.unwrap_err();

        assert_eq!(err, PaymentError::BalanceOverflow(alice.clone()));
        assert_eq!(
            ledger.get_balance(&alice).await.unwrap(),
            Balance::new(rust_decimal::Decimal::MAX)
        );
    }

    #[tokio::test]
    async fn test_history_is_restartable() {
        let ledger = ledger();
        let alice = UserId::from("alice");
        ledger.deposit(&alice, amount(dec!(10))).await.unwrap();
        ledger
            .submit_payment(alice.clone(), amount(dec!(1)), paypal(), None)
            .await
            .unwrap();
        ledger
            .submit_payment(alice.clone(), amount(dec!(2)), paypal(), None)
            .await
            .unwrap();

        let history = ledger.list_transactions(&alice).await.unwrap();
        let first: Vec<Amount> = history.iter().map(LedgerEntry::amount).collect();
        let second: Vec<Amount> = history.iter().map(LedgerEntry::amount).collect();
        assert_eq!(first, vec![amount(dec!(1)), amount(dec!(2))]);
        assert_eq!(first, second);
    }
}
