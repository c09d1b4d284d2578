use crate::domain::account::{Balance, BalanceConstraint};
use std::time::Duration;

/// Bounded retry schedule for transient processor failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls made to the processor, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows `attempt` (1-based). Doubles each time.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Whether payments may take an account below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverdraftPolicy {
    #[default]
    Reject,
    /// Allow the balance down to `-limit`.
    Limit(Balance),
}

impl OverdraftPolicy {
    pub fn debit_constraint(&self) -> BalanceConstraint {
        match self {
            OverdraftPolicy::Reject => BalanceConstraint::NonNegative,
            OverdraftPolicy::Limit(limit) => BalanceConstraint::AtLeast(-*limit),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub retry: RetryPolicy,
    /// A processor call running longer than this counts as a transient error.
    pub processor_timeout: Duration,
    pub overdraft: OverdraftPolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            processor_timeout: Duration::from_secs(2),
            overdraft: OverdraftPolicy::Reject,
        }
    }
}
