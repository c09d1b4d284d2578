use clap::Parser;
use miette::{IntoDiagnostic, Result};
use payledger::application::ledger::PaymentLedger;
use payledger::application::processors::ProcessorRegistry;
use payledger::config::{LedgerConfig, OverdraftPolicy, RetryPolicy};
use payledger::domain::account::Balance;
use payledger::domain::payment::MethodKind;
use payledger::infrastructure::simulated::{CardNetworkStub, PayPalStub};
use payledger::interfaces::csv::account_writer::AccountWriter;
use payledger::interfaces::csv::request_reader::{LedgerRequest, RequestReader};
use rust_decimal::Decimal;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input requests CSV file
    input: PathBuf,

    /// Print ledger entries instead of account balances
    #[arg(long)]
    transactions: bool,

    /// Processor calls per payment, including the first
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,

    /// Initial retry backoff in milliseconds
    #[arg(long, default_value_t = 50)]
    backoff_ms: u64,

    /// Processor call timeout in milliseconds
    #[arg(long, default_value_t = 2000)]
    processor_timeout_ms: u64,

    /// Allow balances down to minus this amount
    #[arg(long)]
    overdraft_limit: Option<Decimal>,

    /// Simulated processor latency in milliseconds
    #[arg(long, default_value_t = 0)]
    latency_ms: u64,
}

impl Cli {
    fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                initial_backoff: Duration::from_millis(self.backoff_ms),
                ..RetryPolicy::default()
            },
            processor_timeout: Duration::from_millis(self.processor_timeout_ms),
            overdraft: self
                .overdraft_limit
                .map(|limit| OverdraftPolicy::Limit(Balance::new(limit.abs())))
                .unwrap_or_default(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let latency = Duration::from_millis(cli.latency_ms);
    let processors = ProcessorRegistry::new()
        .with(
            MethodKind::CreditCard,
            Arc::new(CardNetworkStub::with_latency(latency)),
        )
        .with(MethodKind::PayPal, Arc::new(PayPalStub::with_latency(latency)));
    let ledger = PaymentLedger::in_memory(processors, cli.ledger_config());

    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = RequestReader::new(file);
    for request in reader.requests() {
        let request = match request {
            Ok(request) => request,
            Err(e) => {
                eprintln!("Error reading request: {}", e);
                continue;
            }
        };

        let outcome = match request {
            LedgerRequest::Deposit { user_id, amount } => {
                ledger.deposit(&user_id, amount).await.map(|_| ())
            }
            LedgerRequest::Payment {
                user_id,
                amount,
                method,
                idempotency_key,
            } => ledger
                .submit_payment(user_id, amount, method, idempotency_key)
                .await
                .map(|_| ()),
            LedgerRequest::Refund {
                payment_id,
                amount,
                idempotency_key,
            } => ledger
                .submit_refund(payment_id, amount, idempotency_key)
                .await
                .map(|_| ()),
        };
        if let Err(e) = outcome {
            eprintln!("Error processing request: {}", e);
        }
    }

    let stdout = io::stdout();
    let mut writer = AccountWriter::new(stdout.lock());
    if cli.transactions {
        let entries = ledger.all_transactions().await.into_diagnostic()?;
        writer.write_entries(entries).into_diagnostic()?;
    } else {
        let accounts = ledger.accounts().await.into_diagnostic()?;
        writer.write_accounts(accounts).into_diagnostic()?;
    }

    Ok(())
}
