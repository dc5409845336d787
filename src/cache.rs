//! Record cache
//!
//! Bounded in-memory mapping from key to live record instance. Bounds are a
//! maximum entry count and an access-based idle window. Evicted records that
//! still carry unsaved changes are handed to the flush channel, never written
//! synchronously from inside the cache — the engine's drain task re-enters
//! `save` on its own schedule, which keeps the cache free of reentrant calls.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::record::Record;

/// Channel carrying dirty evictees back to the engine for an async save
pub type EvictionSender = mpsc::UnboundedSender<(String, Arc<dyn Record>)>;

struct CacheSlot {
    record: Arc<dyn Record>,
    last_access: Instant,
}

/// Concurrent bounded cache of live records
///
/// At most one live entry exists per key. Supports concurrent
/// get/insert/remove without external synchronization.
pub struct RecordCache {
    slots: DashMap<String, CacheSlot>,
    capacity: usize,
    idle_timeout: Duration,
    evict_tx: EvictionSender,
}

impl RecordCache {
    pub fn new(capacity: usize, idle_timeout: Duration, evict_tx: EvictionSender) -> Self {
        Self {
            slots: DashMap::new(),
            capacity: capacity.max(1),
            idle_timeout,
            evict_tx,
        }
    }

    /// Look up a key, refreshing its access time. An entry idle past the
    /// expiry window misses (and is flushed if dirty) rather than being
    /// resurrected.
    pub fn get(&self, key: &str) -> Option<Arc<dyn Record>> {
        if let Some((key, slot)) = self
            .slots
            .remove_if(key, |_, slot| slot.last_access.elapsed() >= self.idle_timeout)
        {
            self.flush_if_dirty(&key, slot.record);
            return None;
        }

        let mut slot = self.slots.get_mut(key)?;
        slot.last_access = Instant::now();
        Some(Arc::clone(&slot.record))
    }

    /// Upsert an entry, replacing any previous instance for the key.
    /// A replaced instance is superseded, not flushed.
    pub fn insert(&self, key: &str, record: Arc<dyn Record>) {
        self.reserve_slot(key);
        self.slots.insert(
            key.to_string(),
            CacheSlot {
                record,
                last_access: Instant::now(),
            },
        );
    }

    /// Insert only when the key is absent and return the resident record,
    /// so racing disk loads for one key converge on a single instance.
    pub fn insert_if_absent(&self, key: &str, record: Arc<dyn Record>) -> Arc<dyn Record> {
        self.reserve_slot(key);
        match self.slots.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                occupied.get_mut().last_access = Instant::now();
                Arc::clone(&occupied.get().record)
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(CacheSlot {
                    record: Arc::clone(&record),
                    last_access: Instant::now(),
                });
                record
            }
        }
    }

    /// Drop an entry without flushing (explicit delete / invalidate)
    pub fn remove(&self, key: &str) -> Option<Arc<dyn Record>> {
        self.slots.remove(key).map(|(_, slot)| slot.record)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Make room before inserting a new key: age out idle entries first,
    /// then drop least-recently-accessed entries until under capacity.
    fn reserve_slot(&self, incoming: &str) {
        if self.slots.contains_key(incoming) || self.slots.len() < self.capacity {
            return;
        }

        let expired: Vec<String> = self
            .slots
            .iter()
            .filter(|entry| entry.value().last_access.elapsed() >= self.idle_timeout)
            .map(|entry| entry.key().clone())
            .collect();
        for key in expired {
            if let Some((key, slot)) = self
                .slots
                .remove_if(&key, |_, slot| slot.last_access.elapsed() >= self.idle_timeout)
            {
                self.flush_if_dirty(&key, slot.record);
            }
        }

        while self.slots.len() >= self.capacity {
            let victim = self
                .slots
                .iter()
                .min_by_key(|entry| entry.value().last_access)
                .map(|entry| entry.key().clone());
            match victim {
                Some(key) => {
                    if let Some((key, slot)) = self.slots.remove(&key) {
                        self.flush_if_dirty(&key, slot.record);
                    }
                }
                None => break,
            }
        }
    }

    /// Hand a dirty evictee to the engine's flush channel. Never blocks and
    /// never calls back into the engine from the eviction path.
    fn flush_if_dirty(&self, key: &str, record: Arc<dyn Record>) {
        if record.is_dirty() {
            debug!(key, "flushing dirty record evicted from cache");
            let _ = self.evict_tx.send((key.to_string(), record));
        }
    }
}
