// src/coalesce.rs
//! Keyed singleflight over content hashes.
//!
//! Grounded on the teacher's `federation/coalesce.rs::RequestCoalescer`,
//! which coalesces concurrent chunk fetches behind a `DashMap` + broadcast
//! channel. This adapts that shape to the spec's contract in two ways:
//!
//! - The admission gate is a plain `std::sync::Mutex<HashMap<..>>` rather
//!   than a `DashMap`, since the spec calls for a single gate that is held
//!   only across the check-and-insert (the teacher's source held a
//!   one-permit semaphore the same way but released it unconditionally
//!   after scheduling work, which the spec flags as equivalent to a mutex
//!   and asks to be re-expressed as one; see DESIGN.md).
//! - Waiters use a `watch` channel instead of the teacher's `broadcast`
//!   channel, so that a caller who obtains a handle and only *then*
//!   subscribes (after the transfer has already finished) still observes
//!   the terminal state rather than missing it — `broadcast` only
//!   delivers messages sent after a receiver subscribes, which would
//!   violate the spec's "late joiners see the active handle or a
//!   completed absence" invariant.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::hash::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferState {
    Pending,
    Succeeded,
    Failed,
}

/// One per in-flight peer fetch; shared among all waiters for that hash.
pub struct TransferHandle {
    rx: watch::Receiver<TransferState>,
}

impl TransferHandle {
    /// Awaits the transfer's terminal state with a deadline.
    ///
    /// Returns `Ok(true)` on success, `Ok(false)` on failure, and
    /// `Err(Error::Timeout)` if `timeout` elapses first. On timeout the
    /// underlying fetch is not cancelled; it may complete later to the
    /// benefit of other callers.
    pub async fn wait(&self, timeout: Duration) -> Result<bool> {
        let mut rx = self.rx.clone();
        let waited = tokio::time::timeout(
            timeout,
            rx.wait_for(|state| *state != TransferState::Pending),
        )
        .await;

        match waited {
            Ok(Ok(state)) => Ok(*state == TransferState::Succeeded),
            // Sender dropped without ever reaching a terminal state.
            Ok(Err(_)) => Ok(false),
            Err(_) => Err(Error::Timeout),
        }
    }
}

type Inflight = Arc<Mutex<HashMap<Hash, Arc<TransferHandle>>>>;

/// Per-hash singleflight coordinator: guarantees at most one in-flight
/// fetch per hash, with multiple waiters sharing the outcome.
pub struct CoalescingFetchCoordinator {
    inflight: Inflight,
}

impl Default for CoalescingFetchCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl CoalescingFetchCoordinator {
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// If no fetch for `hash` is in flight, installs a new handle and
    /// schedules `work` on the current runtime; otherwise returns the
    /// existing handle. `work` runs exactly once per handle.
    ///
    /// The admission gate is held only across the check-and-insert; `work`
    /// itself runs outside the gate. Terminal marking and handle removal
    /// happen in the same critical section so a caller who locks the gate
    /// afterwards sees either the still-active handle or a definitive
    /// absence, never a half-finished state.
    pub fn start_or_join<F, Fut>(&self, hash: &Hash, work: F) -> Arc<TransferHandle>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let mut guard = self.inflight.lock().unwrap();
        if let Some(existing) = guard.get(hash) {
            return existing.clone();
        }

        let (tx, rx) = watch::channel(TransferState::Pending);
        let handle = Arc::new(TransferHandle { rx });
        guard.insert(hash.clone(), handle.clone());
        drop(guard);

        let inflight = self.inflight.clone();
        let key = hash.clone();
        tokio::spawn(async move {
            let succeeded = work().await;
            let mut guard = inflight.lock().unwrap();
            let _ = tx.send(if succeeded {
                TransferState::Succeeded
            } else {
                TransferState::Failed
            });
            guard.remove(&key);
        });

        handle
    }

    /// True iff any of `hashes` is currently a key in the in-flight map.
    pub fn contains(&self, hashes: &[Hash]) -> bool {
        let guard = self.inflight.lock().unwrap();
        hashes.iter().any(|h| guard.contains_key(h))
    }

    /// Looks up the handle for `hash` without starting a new transfer.
    pub fn get(&self, hash: &Hash) -> Option<Arc<TransferHandle>> {
        self.inflight.lock().unwrap().get(hash).cloned()
    }

    pub fn in_flight_count(&self) -> usize {
        self.inflight.lock().unwrap().len()
    }
}
