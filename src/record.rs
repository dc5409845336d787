//! Record contract
//!
//! A storable type defines its own wire schema: a version integer, a `write`
//! that emits fields in a fixed declared order, and a `read` that consumes
//! them back in that same order, skipping fields introduced after the version
//! found on disk.
//!
//! ## Version skipping
//!
//! ```text
//! fn read(&mut self, r: &mut VarReader, version: u32) -> Result<()> {
//!     self.coins = r.read_var_u64()?;          // since v1
//!     self.name = r.read_str()?;               // since v1
//!     if version >= 2 {
//!         self.title = r.read_opt(|r| r.read_str().map(Some))?.flatten();
//!     }                                        // since v2 — defaults on old data
//!     Ok(())
//! }
//! ```

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::codec::{VarReader, VarWriter};
use crate::error::Result;

/// The contract a storable type implements.
///
/// ## Fragility warning
///
/// The encoding embeds no per-value type tags, as a deliberate space/speed
/// tradeoff. `write` and `read` MUST touch the same fields in the same order,
/// and a field's "introduced in version N" threshold MUST never change across
/// releases. A mismatch is an application programming error the format cannot
/// detect at runtime — decoding will misinterpret bytes or fail with
/// `MalformedEncoding` at an unrelated field.
pub trait Record: Any + Send + Sync {
    /// Current schema version for newly written data.
    /// Use simple integers: 1, 2, 3...
    fn version(&self) -> u32 {
        1
    }

    /// Write this record's fields in their fixed declared order
    fn write(&self, out: &mut VarWriter) -> Result<()>;

    /// Read fields back in the same order. `version` is the schema version
    /// found on disk; skip any field introduced later, leaving its default.
    fn read(&mut self, input: &mut VarReader<'_>, version: u32) -> Result<()>;

    /// Whether this record has unsaved changes. Types without dirty tracking
    /// keep the default (always dirty), so every save call writes.
    fn is_dirty(&self) -> bool {
        true
    }

    /// Clear the dirty flag after a successful write. No-op without tracking.
    fn mark_clean(&self) {}

    /// Upcast for the cache's typed downcast on load. Implement as:
    ///
    /// ```text
    /// fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> { self }
    /// ```
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl dyn Record {
    /// Downcast a shared record to its concrete type
    pub fn downcast_arc<R: Record>(self: Arc<Self>) -> Option<Arc<R>> {
        self.as_any_arc().downcast::<R>().ok()
    }
}

/// Atomic "has unsaved changes" marker for records that opt into dirty
/// tracking. Starts dirty: a freshly built record has never been written.
#[derive(Debug)]
pub struct DirtyFlag(AtomicBool);

impl DirtyFlag {
    pub fn new() -> Self {
        Self(AtomicBool::new(true))
    }

    /// Mark the record changed; call after any mutation that must be saved
    pub fn mark_dirty(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Reset after a successful write of this exact instance
    pub fn mark_clean(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for DirtyFlag {
    fn default() -> Self {
        Self::new()
    }
}
