//! Store Module
//!
//! The core storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Public save/load/delete/exists surface, all off the caller's thread
//! - Atomic write pipeline: encode → temp file → fsync → backup rotation →
//!   atomic rename, under the key's write stripe
//! - Write coalescing: at most one in-flight disk write per key
//! - Corruption-tolerant recovery: primary frame falls back to backup
//! - Graceful shutdown with a bounded drain of in-flight writes
//!
//! ## Concurrency Model
//!
//! - **Cache** absorbs reads and optimistic writes without any disk I/O
//! - **Pending-save tickets** collapse rapid saves for one key into one write;
//!   later callers attach to the in-flight ticket's completion signal
//! - **Striped locks** guard only the primary/backup rename sequence; unrelated
//!   keys' writes proceed in full parallel — there is no global writer lock
//! - All disk I/O runs on the blocking pool; locks are never held across awaits

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio::task;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::RecordCache;
use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::frame;
use crate::locks::StripedLocks;
use crate::record::Record;

/// Suffix of a primary frame file
const PRIMARY_SUFFIX: &str = ".var";

/// Suffix of a rotated backup frame file
const BACKUP_SUFFIX: &str = ".var.bak";

/// Suffix of a transient write scratch file
const TMP_SUFFIX: &str = ".tmp";

/// Completion signal shared by every save call attached to one disk write
type SaveTicket = watch::Receiver<Option<Result<()>>>;

/// The storage engine handle
///
/// Cheap to clone; construct one per process with [`Store::open`] and pass it
/// by reference or clone to consumers. There is no global instance.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    /// Engine configuration
    config: Config,

    /// Live records keyed by caller-supplied id (internal concurrency)
    cache: RecordCache,

    /// Guards the primary/backup rename sequence per key hash stripe
    locks: StripedLocks,

    /// At most one outstanding disk write per key; later saves attach here
    pending: DashMap<String, SaveTicket>,

    /// Set by shutdown; saves are rejected afterwards
    closed: AtomicBool,
}

impl Store {
    /// Open or create a store rooted at the configured directory.
    ///
    /// Must be called from within a tokio runtime: the store spawns a
    /// background task that re-saves dirty records evicted from the cache.
    ///
    /// On startup, scratch files orphaned by a crash (`*.tmp`) are removed;
    /// primary and backup frames are never touched by the sweep.
    pub fn open(config: Config) -> Result<Self> {
        fs::create_dir_all(&config.root_dir)?;
        Self::sweep_orphaned_temps(&config.root_dir)?;

        let (evict_tx, evict_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(StoreInner {
            cache: RecordCache::new(
                config.cache_capacity,
                config.cache_idle_timeout,
                evict_tx,
            ),
            locks: StripedLocks::new(),
            pending: DashMap::new(),
            closed: AtomicBool::new(false),
            config,
        });

        StoreInner::spawn_eviction_drain(&inner, evict_rx);
        debug!(root = %inner.config.root_dir.display(), "store opened");
        Ok(Self { inner })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses the default config with the specified root directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().root_dir(path).build())
    }

    /// Persist a record under `key`.
    ///
    /// Returns immediately-completed success when the record reports itself
    /// clean. Otherwise the cache entry is upserted and exactly one disk
    /// write is ensured for the key: if one is already in flight, this call
    /// attaches to its completion signal instead of scheduling a second
    /// write. The write snapshots whatever is cached for the key at
    /// execution time, so the latest of a burst of saves is what lands on
    /// disk.
    pub async fn save(&self, key: &str, record: Arc<dyn Record>) -> Result<()> {
        StoreInner::save(Arc::clone(&self.inner), key, record).await
    }

    /// Load the record stored under `key`, or `None` when absent.
    ///
    /// A live cache entry of the right type is returned without touching
    /// disk; a type mismatch invalidates the stale entry and falls through.
    /// On disk, a primary frame that is missing, corrupt, or unreadable
    /// falls back to the backup frame.
    ///
    /// ## Caveat
    ///
    /// When both frames are corrupt the call still resolves `Ok(None)` —
    /// indistinguishable from "never saved". Corruption never surfaces as an
    /// error from this method; it is only logged. Callers that must tell the
    /// two cases apart need to track key existence themselves.
    pub async fn load<R, F>(&self, key: &str, factory: F) -> Result<Option<Arc<R>>>
    where
        R: Record,
        F: Fn() -> R + Send + 'static,
    {
        if let Some(cached) = self.inner.cache.get(key) {
            match cached.downcast_arc::<R>() {
                Some(typed) => return Ok(Some(typed)),
                None => {
                    warn!(key, "cached record has a different type; invalidating stale entry");
                    self.inner.cache.remove(key);
                }
            }
        }

        let inner = Arc::clone(&self.inner);
        let owned_key = key.to_string();
        let decoded = task::spawn_blocking(move || inner.read_frame(&owned_key, factory))
            .await
            .map_err(|e| StoreError::Task(format!("load task failed: {}", e)))?;

        let record = match decoded {
            Some(record) => record,
            None => return Ok(None),
        };
        record.mark_clean();

        let shared = Arc::new(record);
        let resident = self
            .inner
            .cache
            .insert_if_absent(key, Arc::clone(&shared) as Arc<dyn Record>);
        // First decoder to finish wins a load race; serve the resident
        // instance unless a racing different-typed fill got there first.
        Ok(Some(resident.downcast_arc::<R>().unwrap_or(shared)))
    }

    /// Remove the cache entry, the primary frame, and any stray scratch
    /// files for `key`. The backup frame is deliberately left in place.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.inner.cache.remove(key);

        let inner = Arc::clone(&self.inner);
        let owned_key = key.to_string();
        task::spawn_blocking(move || inner.delete_files(&owned_key))
            .await
            .map_err(|e| StoreError::Task(format!("delete task failed: {}", e)))?
    }

    /// True if the key is cached or a primary frame exists on disk.
    /// The disk probe checks presence only, without validating content.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        if self.inner.cache.get(key).is_some() {
            return Ok(true);
        }
        let path = self.inner.primary_path(key);
        task::spawn_blocking(move || path.exists())
            .await
            .map_err(|e| StoreError::Task(format!("exists task failed: {}", e)))
    }

    /// Drop the cache entry for `key` without touching disk
    pub fn invalidate_cache(&self, key: &str) {
        self.inner.cache.remove(key);
    }

    /// Stop accepting saves and wait, up to the configured timeout, for
    /// in-flight writes to complete. Writes still outstanding when the
    /// timeout elapses are abandoned to the runtime.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("store shutdown: draining in-flight writes");

        let tickets: Vec<(String, SaveTicket)> = self
            .inner
            .pending
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let deadline = Instant::now() + self.inner.config.shutdown_timeout;
        for (key, mut ticket) in tickets {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, ticket.wait_for(|o| o.is_some()))
                .await
                .is_err()
            {
                warn!(key = %key, "shutdown drain timed out; abandoning remaining writes");
                return;
            }
        }
        debug!("all in-flight writes drained");
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Root directory holding every frame file
    pub fn root_dir(&self) -> &Path {
        &self.inner.config.root_dir
    }

    /// Number of records currently cached
    pub fn cached_count(&self) -> usize {
        self.inner.cache.len()
    }

    /// Remove scratch files a crashed process left behind
    fn sweep_orphaned_temps(root: &Path) -> Result<()> {
        let mut removed = 0usize;
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(TMP_SUFFIX) {
                let _ = fs::remove_file(entry.path());
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "swept orphaned scratch files");
        }
        Ok(())
    }
}

impl StoreInner {
    async fn save(this: Arc<Self>, key: &str, record: Arc<dyn Record>) -> Result<()> {
        if this.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Shutdown);
        }
        // Unchanged records have nothing to persist
        if !record.is_dirty() {
            return Ok(());
        }

        this.cache.insert(key, Arc::clone(&record));

        let mut ticket = Self::schedule_write(&this, key, record);
        let outcome = ticket
            .wait_for(|outcome| outcome.is_some())
            .await
            .map_err(|_| StoreError::Task("save task exited without reporting".to_string()))?
            .clone();
        outcome.unwrap_or_else(|| Err(StoreError::Task("save outcome missing".to_string())))
    }

    /// Ensure exactly one write task is in flight for `key` and return its
    /// completion signal. `initiator` is what gets written if the cache
    /// entry disappears before the task snapshots it (eviction flushes must
    /// survive their own eviction).
    fn schedule_write(this: &Arc<Self>, key: &str, initiator: Arc<dyn Record>) -> SaveTicket {
        match this.pending.entry(key.to_string()) {
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(vacant) => {
                let (tx, rx) = watch::channel(None);
                vacant.insert(rx.clone());

                let inner = Arc::clone(this);
                let owned_key = key.to_string();
                tokio::spawn(async move {
                    let result = Self::write_once(&inner, &owned_key, initiator).await;
                    // Ticket comes out of the map before completion is
                    // signalled, so a save racing with completion starts a
                    // fresh write instead of attaching to a finished one.
                    inner.pending.remove(&owned_key);
                    let _ = tx.send(Some(result));
                });
                rx
            }
        }
    }

    /// One coalesced disk write: snapshot the current cached value and run
    /// the blocking pipeline
    async fn write_once(this: &Arc<Self>, key: &str, initiator: Arc<dyn Record>) -> Result<()> {
        let record = this.cache.get(key).unwrap_or(initiator);

        let inner = Arc::clone(this);
        let owned_key = key.to_string();
        task::spawn_blocking(move || inner.write_frame(&owned_key, record))
            .await
            .map_err(|e| StoreError::Task(format!("write task failed: {}", e)))?
    }

    /// The atomic write pipeline. Runs on the blocking pool.
    fn write_frame(&self, key: &str, record: Arc<dyn Record>) -> Result<()> {
        // Free-space guard: abort before touching any file rather than risk
        // leaving a truncated primary behind
        let available = fs2::available_space(&self.config.root_dir)?;
        if available < self.config.min_free_bytes {
            return Err(StoreError::DiskFull {
                available,
                required: self.config.min_free_bytes,
            });
        }

        let bytes = frame::encode_record(record.as_ref())?;

        let tmp_path = self
            .config
            .root_dir
            .join(format!("{}.{}{}", key, Uuid::new_v4().simple(), TMP_SUFFIX));
        let _cleanup = TempFileGuard(tmp_path.clone());

        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            // Durable before it can become the primary
            file.sync_all()?;
        }

        let primary = self.primary_path(key);
        let backup = self.backup_path(key);
        {
            let _stripe = self.locks.stripe_for(key).write();
            if primary.exists() {
                fs::rename(&primary, &backup)?;
            }
            fs::rename(&tmp_path, &primary)?;
        }

        record.mark_clean();
        debug!(key, bytes = bytes.len(), "persisted frame");
        Ok(())
    }

    /// The decode pipeline: primary frame, then backup, then absent.
    /// Runs on the blocking pool. Never fails — unrecoverable data reads as
    /// absent (see [`Store::load`]).
    fn read_frame<R, F>(&self, key: &str, factory: F) -> Option<R>
    where
        R: Record,
        F: Fn() -> R,
    {
        let _stripe = self.locks.stripe_for(key).read();

        match self.decode_file(&self.primary_path(key), &factory) {
            Ok(Some(record)) => return Some(record),
            Ok(None) => {}
            Err(err) => warn!(key, error = %err, "failed to decode primary frame"),
        }

        match self.decode_file(&self.backup_path(key), &factory) {
            Ok(Some(record)) => {
                info!(key, "backup frame restored");
                Some(record)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(key, error = %err, "backup frame also unreadable");
                None
            }
        }
    }

    fn decode_file<R, F>(&self, path: &Path, factory: &F) -> Result<Option<R>>
    where
        R: Record,
        F: Fn() -> R,
    {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        Ok(Some(frame::decode_record(&bytes, factory)?))
    }

    fn delete_files(&self, key: &str) -> Result<()> {
        let _stripe = self.locks.stripe_for(key).write();

        match fs::remove_file(self.primary_path(key)) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        // Stray scratch files for this key only
        let prefix = format!("{}.", key);
        for entry in fs::read_dir(&self.config.root_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&prefix) && name.ends_with(TMP_SUFFIX) {
                let _ = fs::remove_file(entry.path());
            }
        }
        Ok(())
    }

    fn primary_path(&self, key: &str) -> PathBuf {
        self.config.root_dir.join(format!("{}{}", key, PRIMARY_SUFFIX))
    }

    fn backup_path(&self, key: &str) -> PathBuf {
        self.config.root_dir.join(format!("{}{}", key, BACKUP_SUFFIX))
    }

    /// Re-save dirty records the cache evicted. Holds only a weak handle so
    /// the drain task cannot keep a dropped store alive.
    fn spawn_eviction_drain(
        inner: &Arc<Self>,
        mut evict_rx: mpsc::UnboundedReceiver<(String, Arc<dyn Record>)>,
    ) {
        let weak = Arc::downgrade(inner);
        tokio::spawn(async move {
            while let Some((key, record)) = evict_rx.recv().await {
                let inner = match weak.upgrade() {
                    Some(inner) => inner,
                    None => break,
                };
                if let Err(err) = Self::save(inner, &key, record).await {
                    warn!(key = %key, error = %err, "eviction-triggered save failed");
                }
            }
        });
    }
}

/// Removes the scratch file on drop, whether it became the new primary
/// (rename already consumed it) or the write failed partway.
struct TempFileGuard(PathBuf);

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}
