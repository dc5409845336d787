//! Striped lock table
//!
//! A fixed array of read/write locks, key hashed to a stripe. Two keys may
//! share a stripe (acceptable false contention), but a key's own disk
//! operations are always serialized against themselves without any global
//! writer lock.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::RwLock;

/// Number of lock stripes
pub const STRIPE_COUNT: usize = 128;

/// Fixed-size table of read/write lock stripes
pub struct StripedLocks {
    stripes: Vec<RwLock<()>>,
}

impl StripedLocks {
    pub fn new() -> Self {
        Self {
            stripes: (0..STRIPE_COUNT).map(|_| RwLock::new(())).collect(),
        }
    }

    /// The stripe guarding a key's primary/backup file pair.
    /// Deterministic: the same key always maps to the same stripe.
    pub fn stripe_for(&self, key: &str) -> &RwLock<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.stripes[(hasher.finish() % STRIPE_COUNT as u64) as usize]
    }
}

impl Default for StripedLocks {
    fn default() -> Self {
        Self::new()
    }
}
