//! Deterministic stand-ins for external payment networks.

use crate::domain::payment::PaymentMethod;
use crate::domain::ports::PaymentProcessor;
use crate::domain::processor::{ProcessorOutcome, ProcessorRequest, TransientError};
use async_trait::async_trait;
use std::time::Duration;

/// Card network stub. Declines card numbers that fail the Luhn check.
#[derive(Debug, Clone, Default)]
pub struct CardNetworkStub {
    latency: Duration,
}

impl CardNetworkStub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl PaymentProcessor for CardNetworkStub {
    async fn execute(
        &self,
        request: &ProcessorRequest,
    ) -> Result<ProcessorOutcome, TransientError> {
        tokio::time::sleep(self.latency).await;
        match &request.method {
            PaymentMethod::CreditCard { card_number, .. } if luhn_valid(card_number) => {
                Ok(ProcessorOutcome::Approved)
            }
            PaymentMethod::CreditCard { .. } => {
                Ok(ProcessorOutcome::Declined("card number rejected".to_string()))
            }
            _ => Ok(ProcessorOutcome::Declined(
                "card network cannot settle this method".to_string(),
            )),
        }
    }
}

/// PayPal stub. Declines addresses without an `@`.
#[derive(Debug, Clone, Default)]
pub struct PayPalStub {
    latency: Duration,
}

impl PayPalStub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl PaymentProcessor for PayPalStub {
    async fn execute(
        &self,
        request: &ProcessorRequest,
    ) -> Result<ProcessorOutcome, TransientError> {
        tokio::time::sleep(self.latency).await;
        match &request.method {
            PaymentMethod::PayPal { email } if email.contains('@') => {
                Ok(ProcessorOutcome::Approved)
            }
            PaymentMethod::PayPal { .. } => {
                Ok(ProcessorOutcome::Declined("unknown paypal account".to_string()))
            }
            _ => Ok(ProcessorOutcome::Declined(
                "paypal cannot settle this method".to_string(),
            )),
        }
    }
}

fn luhn_valid(card_number: &str) -> bool {
    let digits: Vec<u32> = card_number
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_digit(10))
        .collect::<Option<Vec<u32>>>()
        .unwrap_or_default();
    if digits.len() < 12 {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::Amount;
    use crate::domain::payment::PaymentId;
    use rust_decimal_macros::dec;

    fn request(method: PaymentMethod) -> ProcessorRequest {
        ProcessorRequest {
            payment_id: PaymentId::from("pay_1"),
            amount: Amount::new(dec!(10)).unwrap(),
            method,
        }
    }

    #[test]
    fn test_luhn() {
        assert!(luhn_valid("4111 1111 1111 1111"));
        assert!(luhn_valid("5555-5555-5555-4444"));
        assert!(!luhn_valid("4111 1111 1111 1112"));
        assert!(!luhn_valid("4111"));
        assert!(!luhn_valid("4111x1111x1111x1111"));
    }

    #[tokio::test]
    async fn test_card_stub() {
        let stub = CardNetworkStub::new();
        let approved = stub
            .execute(&request(PaymentMethod::CreditCard {
                card_number: "4111111111111111".into(),
                cvv: None,
                expiry: None,
            }))
            .await;
        assert_eq!(approved, Ok(ProcessorOutcome::Approved));

        let declined = stub
            .execute(&request(PaymentMethod::CreditCard {
                card_number: "1234567812345678".into(),
                cvv: None,
                expiry: None,
            }))
            .await;
        assert!(matches!(declined, Ok(ProcessorOutcome::Declined(_))));
    }

    #[tokio::test]
    async fn test_paypal_stub() {
        let stub = PayPalStub::new();
        let approved = stub
            .execute(&request(PaymentMethod::PayPal {
                email: "a@example.com".into(),
            }))
            .await;
        assert_eq!(approved, Ok(ProcessorOutcome::Approved));

        let declined = stub
            .execute(&request(PaymentMethod::PayPal {
                email: "nobody".into(),
            }))
            .await;
        assert!(matches!(declined, Ok(ProcessorOutcome::Declined(_))));
    }
}
