use crate::domain::payment::IdempotencyKey;
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::debug;

/// A finished request: either its receipt or the business failure it ended with.
pub type Settled<T> = Result<T>;

/// A write-once record of how a keyed request ended.
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyEntry<T> {
    pub key: IdempotencyKey,
    pub outcome: Settled<T>,
    pub created_at: DateTime<Utc>,
}

enum Slot<T> {
    InFlight {
        fingerprint: String,
        notify: watch::Sender<Option<Settled<T>>>,
    },
    Done {
        fingerprint: String,
        entry: IdempotencyEntry<T>,
    },
}

impl<T> Slot<T> {
    fn fingerprint(&self) -> &str {
        match self {
            Slot::InFlight { fingerprint, .. } | Slot::Done { fingerprint, .. } => fingerprint,
        }
    }
}

type Entries<T> = Arc<Mutex<HashMap<IdempotencyKey, Slot<T>>>>;

fn lock<T>(entries: &Entries<T>) -> MutexGuard<'_, HashMap<IdempotencyKey, Slot<T>>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Result of [`IdempotencyRegistry::reserve`].
pub enum Reservation<T: Clone> {
    /// The caller holds the exclusive right to compute the result.
    Fresh(Claim<T>),
    /// The request already ran; this is how it ended.
    Completed(Settled<T>),
}

/// Maps idempotency keys to the outcome of the request that first used them.
///
/// A key is claimed before any work starts. Concurrent duplicates wait for the
/// claim to settle instead of running the request again.
///
/// Settled entries are kept for the life of the registry so a retry arriving
/// at any later point still replays its outcome. Memory grows with the number
/// of distinct keys; released claims leave nothing behind.
pub struct IdempotencyRegistry<T> {
    entries: Entries<T>,
}

impl<T> Default for IdempotencyRegistry<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> Clone for IdempotencyRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> IdempotencyRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `key`, or returns the outcome recorded for it.
    ///
    /// Waits while another caller holds the claim. If that claim is released
    /// without a result, the key is contested again. Without a key every call
    /// is `Fresh`. A key seen before with a different `fingerprint` fails with
    /// `IdempotencyConflict`.
    pub async fn reserve(
        &self,
        key: Option<&IdempotencyKey>,
        fingerprint: &str,
    ) -> Result<Reservation<T>> {
        let Some(key) = key else {
            return Ok(Reservation::Fresh(Claim {
                key: None,
                entries: Arc::clone(&self.entries),
                settled: false,
            }));
        };

        loop {
            let mut waiter = {
                let mut entries = lock(&self.entries);
                match entries.get(key) {
                    Some(slot) if slot.fingerprint() != fingerprint => {
                        return Err(PaymentError::IdempotencyConflict(key.clone()));
                    }
                    Some(Slot::Done { entry, .. }) => {
                        return Ok(Reservation::Completed(entry.outcome.clone()));
                    }
                    Some(Slot::InFlight { notify, .. }) => notify.subscribe(),
                    None => {
                        let (notify, _) = watch::channel(None);
                        entries.insert(
                            key.clone(),
                            Slot::InFlight {
                                fingerprint: fingerprint.to_string(),
                                notify,
                            },
                        );
                        debug!(key = %key, "idempotency key claimed");
                        return Ok(Reservation::Fresh(Claim {
                            key: Some(key.clone()),
                            entries: Arc::clone(&self.entries),
                            settled: false,
                        }));
                    }
                }
            };

            debug!(key = %key, "waiting for in-flight request");
            let settled = waiter
                .wait_for(Option::is_some)
                .await
                .map(|outcome| outcome.clone())
                .ok()
                .flatten();
            if let Some(outcome) = settled {
                return Ok(Reservation::Completed(outcome));
            }
        }
    }

    /// The settled entry for `key`, if any.
    pub fn get(&self, key: &IdempotencyKey) -> Option<IdempotencyEntry<T>> {
        match lock(&self.entries).get(key) {
            Some(Slot::Done { entry, .. }) => Some(entry.clone()),
            _ => None,
        }
    }

    pub fn is_in_flight(&self, key: &IdempotencyKey) -> bool {
        matches!(lock(&self.entries).get(key), Some(Slot::InFlight { .. }))
    }
}

/// Exclusive right to compute the result for one key.
///
/// Dropping a claim without committing releases the key so a retry can run.
pub struct Claim<T: Clone> {
    key: Option<IdempotencyKey>,
    entries: Entries<T>,
    settled: bool,
}

impl<T: Clone> Claim<T> {
    pub fn key(&self) -> Option<&IdempotencyKey> {
        self.key.as_ref()
    }

    /// Stores the final outcome and wakes every waiter. Later writes to the
    /// same key are no-ops that observe this outcome.
    pub fn commit(mut self, outcome: Settled<T>) {
        self.settled = true;
        let Some(key) = self.key.take() else {
            return;
        };

        let mut entries = lock(&self.entries);
        if let Some(Slot::InFlight { fingerprint, notify }) = entries.remove(&key) {
            notify.send_replace(Some(outcome.clone()));
            entries.insert(
                key.clone(),
                Slot::Done {
                    fingerprint,
                    entry: IdempotencyEntry {
                        key,
                        outcome,
                        created_at: Utc::now(),
                    },
                },
            );
        }
    }

    /// Gives the key up without a result.
    pub fn release(self) {}

    fn release_key(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        let mut entries = lock(&self.entries);
        if matches!(entries.get(&key), Some(Slot::InFlight { .. })) {
            // Dropping the sender wakes waiters so they can contest the key.
            entries.remove(&key);
            debug!(key = %key, "idempotency key released");
        }
    }
}

impl<T: Clone> Drop for Claim<T> {
    fn drop(&mut self) {
        if !self.settled {
            self.release_key();
        }
    }
}
