use payledger::domain::account::{Amount, Balance, BalanceConstraint, UserId};
use payledger::domain::payment::{MethodRef, PaymentStatus};
use payledger::domain::ports::{AccountStoreRef, LedgerStoreRef};
use payledger::infrastructure::in_memory::{InMemoryAccountStore, InMemoryLedgerStore};
use rust_decimal_macros::dec;
use std::sync::Arc;

#[tokio::test]
async fn test_stores_as_trait_objects() {
    let account_store: AccountStoreRef = Arc::new(InMemoryAccountStore::new());
    let ledger_store: LedgerStoreRef = Arc::new(InMemoryLedgerStore::new());
    let user = UserId::from("alice");

    // Verify Send + Sync by spawning tasks
    let as_handle = {
        let user = user.clone();
        tokio::spawn(async move {
            account_store
                .adjust_balance(&user, Balance::new(dec!(100)), BalanceConstraint::Unconstrained)
                .await
                .unwrap();
            account_store.get(&user).await.unwrap().unwrap()
        })
    };

    let ts_handle = tokio::spawn(async move {
        let payment_id = ledger_store
            .create_payment(
                &user,
                Amount::new(dec!(10)).unwrap(),
                MethodRef::PayPal {
                    email_ref: "alice@example.com".to_string(),
                },
                None,
            )
            .await
            .unwrap();
        ledger_store.get(&payment_id).await.unwrap().unwrap()
    });

    let retrieved_account = as_handle.await.unwrap();
    assert_eq!(retrieved_account.balance, Balance::new(dec!(100)));
    assert_eq!(retrieved_account.version, 1);

    let retrieved_payment = ts_handle.await.unwrap();
    assert_eq!(retrieved_payment.status, PaymentStatus::Pending);
    assert_eq!(retrieved_payment.payment_id.as_str(), "pay_1");
}
