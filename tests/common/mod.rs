#![allow(dead_code)]

use async_trait::async_trait;
use payledger::application::ledger::PaymentLedger;
use payledger::application::processors::ProcessorRegistry;
use payledger::config::{LedgerConfig, RetryPolicy};
use payledger::domain::account::{Amount, UserId};
use payledger::domain::payment::{MethodKind, PaymentMethod};
use payledger::domain::ports::PaymentProcessor;
use payledger::domain::processor::{ProcessorOutcome, ProcessorRequest, TransientError};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted processor response.
#[derive(Debug, Clone)]
pub enum Step {
    Approve,
    Decline(&'static str),
    Transient,
    /// Sleeps past any reasonable processor timeout.
    Hang,
}

/// A processor that answers from a script, then repeats `fallback`.
pub struct ScriptedProcessor {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    delay: Duration,
    calls: AtomicU32,
}

impl ScriptedProcessor {
    pub fn new(script: Vec<Step>, fallback: Step) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    pub fn approving() -> Self {
        Self::new(Vec::new(), Step::Approve)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProcessor for ScriptedProcessor {
    async fn execute(
        &self,
        _request: &ProcessorRequest,
    ) -> Result<ProcessorOutcome, TransientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        tokio::time::sleep(self.delay).await;
        match step {
            Step::Approve => Ok(ProcessorOutcome::Approved),
            Step::Decline(reason) => Ok(ProcessorOutcome::Declined(reason.to_string())),
            Step::Transient => Err(TransientError::Unavailable("connection reset".to_string())),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ProcessorOutcome::Approved)
            }
        }
    }
}

/// Config with short retry delays so tests stay fast.
pub fn fast_config() -> LedgerConfig {
    LedgerConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        },
        processor_timeout: Duration::from_millis(200),
        ..LedgerConfig::default()
    }
}

/// A ledger whose PayPal payments all go through `processor`.
pub fn ledger_with(processor: Arc<ScriptedProcessor>) -> PaymentLedger {
    ledger_with_config(processor, fast_config())
}

pub fn ledger_with_config(processor: Arc<ScriptedProcessor>, config: LedgerConfig) -> PaymentLedger {
    let processors = ProcessorRegistry::new()
        .with(MethodKind::PayPal, processor.clone())
        .with(MethodKind::CreditCard, processor);
    PaymentLedger::in_memory(processors, config)
}

pub async fn funded(ledger: &PaymentLedger, user: &str, balance: Decimal) -> UserId {
    let user_id = UserId::from(user);
    ledger
        .deposit(&user_id, Amount::new(balance).unwrap())
        .await
        .unwrap();
    user_id
}

pub fn paypal() -> PaymentMethod {
    PaymentMethod::PayPal {
        email: "test@example.com".to_string(),
    }
}

pub fn amount(value: Decimal) -> Amount {
    Amount::new(value).unwrap()
}

/// Writes a request file funding one user and paying `rows` times.
pub fn generate_requests_csv(path: &Path, rows: usize) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(["op", "user", "amount", "method", "details", "key", "payment"])?;
    wtr.write_record(["deposit", "bulk", &rows.to_string(), "", "", "", ""])?;

    for i in 1..=rows {
        wtr.write_record([
            "payment",
            "bulk",
            "1.0",
            "paypal",
            "email=bulk@example.com",
            &format!("bulk-{}", i),
            "",
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
