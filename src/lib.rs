//! # varstore
//!
//! A per-key, crash-safe, asynchronous flat-file storage engine with:
//! - One atomic frame file per key (temp → fsync → rename, backup rotation)
//! - A compact variable-width binary encoding with schema versioning
//! - Write coalescing (one in-flight disk write per key, ever)
//! - Corruption-tolerant recovery (checksum validation, backup fallback)
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Caller                                │
//! │           save / load / delete / exists (async)              │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        Store                                 │
//! │        (cache short-circuit, pending-save tickets)           │
//! └──────────┬──────────────────────────────┬───────────────────┘
//!            │                              │
//!            ▼                              ▼
//!     ┌─────────────┐               ┌──────────────┐
//!     │ RecordCache │               │ Write task   │
//!     │  (bounded)  │               │ (coalesced)  │
//!     └─────────────┘               └──────┬───────┘
//!                                          │  codec → frame
//!                                          ▼
//!                                  ┌──────────────┐
//!                                  │  Frame file  │
//!                                  │ (.var/.bak)  │
//!                                  └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::any::Any;
//! use std::sync::Arc;
//!
//! use varstore::{Config, DirtyFlag, Record, Result, Store, VarReader, VarWriter};
//!
//! #[derive(Default)]
//! struct UserStats {
//!     coins: u64,
//!     name: String,
//!     dirty: DirtyFlag,
//! }
//!
//! impl Record for UserStats {
//!     fn write(&self, out: &mut VarWriter) -> Result<()> {
//!         out.write_var_u64(self.coins);
//!         out.write_str(&self.name);
//!         Ok(())
//!     }
//!
//!     fn read(&mut self, input: &mut VarReader<'_>, _version: u32) -> Result<()> {
//!         self.coins = input.read_var_u64()?;
//!         self.name = input.read_str()?;
//!         Ok(())
//!     }
//!
//!     fn is_dirty(&self) -> bool {
//!         self.dirty.is_dirty()
//!     }
//!     fn mark_clean(&self) {
//!         self.dirty.mark_clean()
//!     }
//!     fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
//!         self
//!     }
//! }
//!
//! # async fn demo() -> Result<()> {
//! let store = Store::open(Config::builder().root_dir("./data").build())?;
//! store.save("p1", Arc::new(UserStats { coins: 5, ..Default::default() })).await?;
//! let stats = store.load("p1", UserStats::default).await?;
//! assert_eq!(stats.map(|s| s.coins), Some(5));
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod codec;
pub mod record;
pub mod frame;
pub mod cache;
pub mod locks;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use codec::{VarReader, VarWriter};
pub use config::Config;
pub use error::{Result, StoreError};
pub use record::{DirtyFlag, Record};
pub use store::Store;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of varstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
