use crate::domain::account::{Amount, UserId};
use crate::domain::payment::{IdempotencyKey, PaymentId, PaymentMethod};
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Deposit,
    Payment,
    Refund,
}

/// One raw row of a batch request file.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct RequestRow {
    pub op: RequestType,
    pub user: Option<String>,
    pub amount: Option<Decimal>,
    pub method: Option<String>,
    /// `name=value` pairs separated by `;`.
    pub details: Option<String>,
    pub key: Option<String>,
    pub payment: Option<String>,
}

/// A validated request ready to hand to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerRequest {
    Deposit {
        user_id: UserId,
        amount: Amount,
    },
    Payment {
        user_id: UserId,
        amount: Amount,
        method: PaymentMethod,
        idempotency_key: Option<IdempotencyKey>,
    },
    Refund {
        payment_id: PaymentId,
        amount: Amount,
        idempotency_key: Option<IdempotencyKey>,
    },
}

impl TryFrom<RequestRow> for LedgerRequest {
    type Error = PaymentError;

    fn try_from(row: RequestRow) -> Result<Self> {
        let amount = Amount::new(
            row.amount
                .ok_or_else(|| missing(row.op, "amount"))?,
        )?;
        let idempotency_key = non_empty(row.key).map(IdempotencyKey::new);

        match row.op {
            RequestType::Deposit => Ok(LedgerRequest::Deposit {
                user_id: UserId::new(non_empty(row.user).ok_or_else(|| missing(row.op, "user"))?),
                amount,
            }),
            RequestType::Payment => {
                let user = non_empty(row.user).ok_or_else(|| missing(row.op, "user"))?;
                let kind = non_empty(row.method).ok_or_else(|| missing(row.op, "method"))?;
                let details = parse_details(row.details.as_deref().unwrap_or_default())?;
                Ok(LedgerRequest::Payment {
                    user_id: UserId::new(user),
                    amount,
                    method: PaymentMethod::from_parts(&kind, &details)?,
                    idempotency_key,
                })
            }
            RequestType::Refund => {
                let payment = non_empty(row.payment).ok_or_else(|| missing(row.op, "payment"))?;
                Ok(LedgerRequest::Refund {
                    payment_id: PaymentId::from(payment.as_str()),
                    amount,
                    idempotency_key,
                })
            }
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn missing(op: RequestType, field: &str) -> PaymentError {
    PaymentError::ValidationError(format!("{:?} request is missing '{}'", op, field))
}

fn parse_details(raw: &str) -> Result<HashMap<String, String>> {
    raw.split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| {
                    PaymentError::ValidationError(format!("malformed method detail '{}'", pair))
                })
        })
        .collect()
}

/// Reads ledger requests from a CSV source.
///
/// Handles whitespace trimming and flexible record lengths automatically.
pub struct RequestReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> RequestReader<R> {
    /// Creates a new `RequestReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and validates requests.
    pub fn requests(self) -> impl Iterator<Item = Result<LedgerRequest>> {
        self.reader.into_deserialize().map(|result: std::result::Result<RequestRow, csv::Error>| {
            result
                .map_err(PaymentError::from)
                .and_then(LedgerRequest::try_from)
        })
    }
}
