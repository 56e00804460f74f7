//! Atomically published view of the current live backend addresses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

/// Thread-safe published snapshot of backend addresses.
///
/// Writers replace the whole list in one atomic swap; readers always observe
/// either the previous complete set or the new one, never a mix, and never
/// block a writer.
#[derive(Debug, Default)]
pub struct AddressRegistry {
    addrs: ArcSwap<Vec<String>>,
    published: AtomicBool,
}

impl AddressRegistry {
    /// Creates an empty, never-published registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a new complete address snapshot.
    pub fn store(&self, addrs: Vec<String>) {
        self.addrs.store(Arc::new(addrs));
        self.published.store(true, Ordering::Release);
    }

    /// Returns the last published snapshot.
    pub fn load(&self) -> Arc<Vec<String>> {
        self.addrs.load_full()
    }

    /// Returns whether a snapshot has ever been published.
    ///
    /// Distinguishes "no discovery has completed yet" from "discovery
    /// legitimately produced an empty fleet".
    pub fn is_published(&self) -> bool {
        self.published.load(Ordering::Acquire)
    }
}
