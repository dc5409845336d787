//! Binary codec
//!
//! Deterministic, compact encoding of primitive and composite values.
//!
//! ## Wire Format
//!
//! Integers are variable-width: 7 data bits per byte, least significant group
//! first, high bit set while more bytes follow.
//!
//! ```text
//! ┌─────────────┬─────────────┬──────
//! │ 1 d6..d0    │ 1 d13..d7   │ ...     (max 5 bytes for 32-bit,
//! └─────────────┴─────────────┴──────    max 10 bytes for 64-bit)
//! ```
//!
//! ### Composite layouts
//! - String:   var count + UTF-8 bytes (count 0 ⇒ `""`, never an absent marker)
//! - Bytes:    var count + raw bytes
//! - Sequence: var length, or −1 for absent, then that many elements
//! - Map:      var length, or −1 for absent, then (key, value) pairs
//! - Optional: bool flag + payload only when present
//! - Record:   bool flag + recursive field write under the parent's version
//!
//! No per-value type tags are embedded: the reader must consume fields with
//! exactly the counterpart writer's framing. The record schema alone
//! determines how many bytes to consume and how to interpret them.

mod reader;
mod writer;

pub use reader::VarReader;
pub use writer::VarWriter;

/// Max encoded size of a 32-bit variable-width integer
pub const MAX_VAR32_BYTES: usize = 5;

/// Max encoded size of a 64-bit variable-width integer
pub const MAX_VAR64_BYTES: usize = 10;
