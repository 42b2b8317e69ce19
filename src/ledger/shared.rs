use std::sync::{Arc, Mutex, MutexGuard};

use super::FractionalLedger;

/// Thread-safe handle to a single ledger.
///
/// One lock covers balances, prices and pooled funds, so every operation's
/// check-then-mutate sequence runs without interleaving.
pub struct SharedLedger<R, G, P> {
    inner: Arc<Mutex<FractionalLedger<R, G, P>>>,
}

impl<R, G, P> Clone for SharedLedger<R, G, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R, G, P> SharedLedger<R, G, P> {
    pub fn new(ledger: FractionalLedger<R, G, P>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ledger)),
        }
    }

    /// Run `f` with exclusive access to the ledger.
    pub fn with<T>(&self, f: impl FnOnce(&mut FractionalLedger<R, G, P>) -> T) -> T {
        f(&mut self.lock())
    }

    // Operations never leave the ledger half-updated, so a poisoned lock still
    // guards consistent state.
    fn lock(&self) -> MutexGuard<'_, FractionalLedger<R, G, P>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
