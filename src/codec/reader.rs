//! Codec reader
//!
//! Mirror of the writer. Every read is bounds-checked against the remaining
//! input; running out of bytes, an over-long variable-width integer, an
//! impossible length, or invalid UTF-8 all fail with `MalformedEncoding`.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::record::Record;

use super::{MAX_VAR32_BYTES, MAX_VAR64_BYTES};

/// Cursor-based reader over one encoded payload
///
/// A reader is one decode session: the string de-duplication table lives and
/// dies with it and never leaks allocations across sessions.
pub struct VarReader<'a> {
    buf: &'a [u8],
    pos: usize,
    /// Per-session string intern table (see [`read_interned_str`](Self::read_interned_str))
    interned: HashSet<Arc<str>>,
}

impl<'a> VarReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            interned: HashSet::new(),
        }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Consume exactly `count` bytes
    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        if count > self.remaining() {
            return Err(StoreError::MalformedEncoding(format!(
                "unexpected end of input: needed {} bytes, {} remain",
                count,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    // =========================================================================
    // Primitives
    // =========================================================================

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Fixed-width 64-bit integer, big-endian
    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        Ok(u64::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        let bytes = self.take(4)?;
        Ok(f32::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        let bytes = self.take(8)?;
        Ok(f64::from_be_bytes(bytes.try_into().unwrap()))
    }

    /// Variable-width 32-bit integer; fails after 5 bytes without termination
    pub fn read_var_u32(&mut self) -> Result<u32> {
        let mut value: u32 = 0;
        for i in 0..MAX_VAR32_BYTES {
            let byte = self.read_u8()?;
            value |= u32::from(byte & 0x7F) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(StoreError::MalformedEncoding(
            "variable-width integer exceeds 5 bytes".to_string(),
        ))
    }

    pub fn read_var_i32(&mut self) -> Result<i32> {
        Ok(self.read_var_u32()? as i32)
    }

    /// Variable-width 64-bit integer; fails after 10 bytes without termination
    pub fn read_var_u64(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        for i in 0..MAX_VAR64_BYTES {
            let byte = self.read_u8()?;
            value |= u64::from(byte & 0x7F) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(StoreError::MalformedEncoding(
            "variable-width integer exceeds 10 bytes".to_string(),
        ))
    }

    pub fn read_var_i64(&mut self) -> Result<i64> {
        Ok(self.read_var_u64()? as i64)
    }

    /// String: var byte count + UTF-8 bytes. A zero count decodes to the
    /// empty string, never an absent marker.
    pub fn read_str(&mut self) -> Result<String> {
        let len = self.read_var_u32()? as usize;
        if len == 0 {
            return Ok(String::new());
        }
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| StoreError::MalformedEncoding(format!("invalid UTF-8 in string: {}", e)))
    }

    /// String with per-session de-duplication: repeated identical strings in
    /// one decode session share a single backing allocation. Observable
    /// values are identical to [`read_str`](Self::read_str).
    pub fn read_interned_str(&mut self) -> Result<Arc<str>> {
        let s = self.read_str()?;
        if let Some(existing) = self.interned.get(s.as_str()) {
            return Ok(Arc::clone(existing));
        }
        let shared: Arc<str> = Arc::from(s);
        self.interned.insert(Arc::clone(&shared));
        Ok(shared)
    }

    /// Raw byte array: var count + bytes
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_var_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    // =========================================================================
    // Composites
    // =========================================================================

    /// Optional value: bool flag + payload only when present
    pub fn read_opt<T>(
        &mut self,
        read: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<Option<T>> {
        if self.read_bool()? {
            Ok(Some(read(self)?))
        } else {
            Ok(None)
        }
    }

    /// Ordered sequence: −1 decodes to `None`, 0 to `Some(vec![])`
    pub fn read_seq<T>(
        &mut self,
        mut read: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<Option<Vec<T>>> {
        let len = match self.read_len()? {
            Some(len) => len,
            None => return Ok(None),
        };
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(read(self)?);
        }
        Ok(Some(items))
    }

    /// Key-unique mapping: −1 decodes to `None`, 0 to an empty map
    pub fn read_map<K: Eq + Hash, V>(
        &mut self,
        mut read_key: impl FnMut(&mut Self) -> Result<K>,
        mut read_value: impl FnMut(&mut Self) -> Result<V>,
    ) -> Result<Option<HashMap<K, V>>> {
        let len = match self.read_len()? {
            Some(len) => len,
            None => return Ok(None),
        };
        let mut map = HashMap::with_capacity(len);
        for _ in 0..len {
            let key = read_key(self)?;
            let value = read_value(self)?;
            map.insert(key, value);
        }
        Ok(Some(map))
    }

    /// Nested record: presence bool + recursive read under `version`.
    /// The nested value is built by `factory` and consumes the enclosing
    /// record's version context.
    pub fn read_record<R: Record>(
        &mut self,
        version: u32,
        factory: impl FnOnce() -> R,
    ) -> Result<Option<R>> {
        if !self.read_bool()? {
            return Ok(None);
        }
        let mut record = factory();
        record.read(self, version)?;
        Ok(Some(record))
    }

    /// Shared length-or-sentinel decoding for sequences and maps.
    /// Lengths that cannot fit in the remaining input are rejected up front
    /// (every element consumes at least one byte).
    fn read_len(&mut self) -> Result<Option<usize>> {
        let len = self.read_var_i32()?;
        if len == -1 {
            return Ok(None);
        }
        if len < 0 {
            return Err(StoreError::MalformedEncoding(format!(
                "negative collection length: {}",
                len
            )));
        }
        let len = len as usize;
        if len > self.remaining() {
            return Err(StoreError::MalformedEncoding(format!(
                "collection length {} exceeds {} remaining bytes",
                len,
                self.remaining()
            )));
        }
        Ok(Some(len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::VarWriter;

    #[test]
    fn var_u32_round_trip_boundaries() {
        for value in [0u32, 1, 127, 128, 300, 16_383, 16_384, u32::MAX] {
            let mut w = VarWriter::new();
            w.write_var_u32(value);
            let bytes = w.into_bytes();
            let mut r = VarReader::new(&bytes);
            assert_eq!(r.read_var_u32().unwrap(), value);
            assert_eq!(r.remaining(), 0);
        }
    }

    #[test]
    fn var_i32_negative_uses_five_byte_pattern() {
        let mut w = VarWriter::new();
        w.write_var_i32(-1);
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), 5);
        let mut r = VarReader::new(&bytes);
        assert_eq!(r.read_var_i32().unwrap(), -1);
    }

    #[test]
    fn var_u64_round_trip_boundaries() {
        for value in [0u64, 1, u32::MAX as u64, u64::MAX] {
            let mut w = VarWriter::new();
            w.write_var_u64(value);
            let bytes = w.into_bytes();
            let mut r = VarReader::new(&bytes);
            assert_eq!(r.read_var_u64().unwrap(), value);
        }
    }

    #[test]
    fn overlong_var_u32_is_malformed() {
        // Six continuation bytes: terminates neither within 5 bytes nor at all
        let bytes = [0x80u8, 0x80, 0x80, 0x80, 0x80, 0x00];
        let mut r = VarReader::new(&bytes);
        assert!(matches!(
            r.read_var_u32(),
            Err(StoreError::MalformedEncoding(_))
        ));
    }

    #[test]
    fn overlong_var_u64_is_malformed() {
        let bytes = [0x80u8; 11];
        let mut r = VarReader::new(&bytes);
        assert!(matches!(
            r.read_var_u64(),
            Err(StoreError::MalformedEncoding(_))
        ));
    }

    #[test]
    fn truncated_input_is_malformed() {
        let mut w = VarWriter::new();
        w.write_str("hello");
        let bytes = w.into_bytes();
        let mut r = VarReader::new(&bytes[..3]);
        assert!(matches!(r.read_str(), Err(StoreError::MalformedEncoding(_))));
    }

    #[test]
    fn string_round_trip() {
        for value in ["", "hello", "ünïcødé ✓"] {
            let mut w = VarWriter::new();
            w.write_str(value);
            let bytes = w.into_bytes();
            let mut r = VarReader::new(&bytes);
            assert_eq!(r.read_str().unwrap(), value);
        }
    }

    #[test]
    fn interned_strings_share_one_allocation() {
        let mut w = VarWriter::new();
        w.write_str("repeated");
        w.write_str("repeated");
        let bytes = w.into_bytes();

        let mut r = VarReader::new(&bytes);
        let first = r.read_interned_str().unwrap();
        let second = r.read_interned_str().unwrap();
        assert_eq!(first, second);
        assert!(Arc::ptr_eq(&first, &second));

        // A fresh session must not share the old table
        let mut r2 = VarReader::new(&bytes);
        let third = r2.read_interned_str().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn seq_distinguishes_empty_from_absent() {
        let mut w = VarWriter::new();
        w.write_seq(Some::<&[u32]>(&[]), |w, v| {
            w.write_var_u32(*v);
            Ok(())
        })
        .unwrap();
        w.write_seq(None::<&[u32]>, |w, v| {
            w.write_var_u32(*v);
            Ok(())
        })
        .unwrap();
        w.write_seq(Some(&[7u32, 8, 9][..]), |w, v| {
            w.write_var_u32(*v);
            Ok(())
        })
        .unwrap();
        let bytes = w.into_bytes();

        let mut r = VarReader::new(&bytes);
        assert_eq!(r.read_seq(|r| r.read_var_u32()).unwrap(), Some(vec![]));
        assert_eq!(r.read_seq(|r| r.read_var_u32()).unwrap(), None);
        assert_eq!(
            r.read_seq(|r| r.read_var_u32()).unwrap(),
            Some(vec![7, 8, 9])
        );
    }

    #[test]
    fn map_round_trip() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), 1u32);
        map.insert("b".to_string(), 2u32);

        let mut w = VarWriter::new();
        w.write_map(
            Some(&map),
            |w, k: &String| {
                w.write_str(k);
                Ok(())
            },
            |w, v| {
                w.write_var_u32(*v);
                Ok(())
            },
        )
        .unwrap();
        let bytes = w.into_bytes();

        let mut r = VarReader::new(&bytes);
        let decoded = r
            .read_map(|r| r.read_str(), |r| r.read_var_u32())
            .unwrap()
            .unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn optional_round_trip() {
        let mut w = VarWriter::new();
        w.write_opt(Some(&42u32), |w, v| {
            w.write_var_u32(*v);
            Ok(())
        })
        .unwrap();
        w.write_opt(None::<&u32>, |w, v| {
            w.write_var_u32(*v);
            Ok(())
        })
        .unwrap();
        let bytes = w.into_bytes();

        let mut r = VarReader::new(&bytes);
        assert_eq!(r.read_opt(|r| r.read_var_u32()).unwrap(), Some(42));
        assert_eq!(r.read_opt(|r| r.read_var_u32()).unwrap(), None);
    }

    #[test]
    fn var_i32_round_trip_boundaries() {
        for value in [0i32, -1, i32::MAX, i32::MIN] {
            let mut w = VarWriter::new();
            w.write_var_i32(value);
            let bytes = w.into_bytes();
            let mut r = VarReader::new(&bytes);
            assert_eq!(r.read_var_i32().unwrap(), value);
        }
    }

    #[test]
    fn fixed_width_primitives_round_trip() {
        let mut w = VarWriter::new();
        w.write_bool(true);
        w.write_bool(false);
        w.write_u64(u64::MAX);
        w.write_f32(1.5);
        w.write_f64(-2.25);
        let bytes = w.into_bytes();

        let mut r = VarReader::new(&bytes);
        assert!(r.read_bool().unwrap());
        assert!(!r.read_bool().unwrap());
        assert_eq!(r.read_u64().unwrap(), u64::MAX);
        assert_eq!(r.read_f32().unwrap(), 1.5);
        assert_eq!(r.read_f64().unwrap(), -2.25);
        assert_eq!(r.remaining(), 0);
    }

    #[derive(Default)]
    struct Badge {
        label: String,
        // Only present in payloads written at schema version 2 or later
        tier: u32,
    }

    impl Record for Badge {
        fn version(&self) -> u32 {
            2
        }
        fn write(&self, out: &mut VarWriter) -> Result<()> {
            out.write_str(&self.label);
            out.write_var_u32(self.tier);
            Ok(())
        }
        fn read(&mut self, input: &mut VarReader<'_>, version: u32) -> Result<()> {
            self.label = input.read_str()?;
            if version >= 2 {
                self.tier = input.read_var_u32()?;
            }
            Ok(())
        }
        fn as_any_arc(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
            self
        }
    }

    #[derive(Default)]
    struct Profile {
        id: i32,
        badge: Option<Badge>,
    }

    impl Record for Profile {
        fn version(&self) -> u32 {
            2
        }
        fn write(&self, out: &mut VarWriter) -> Result<()> {
            out.write_var_i32(self.id);
            out.write_record(self.badge.as_ref())
        }
        fn read(&mut self, input: &mut VarReader<'_>, version: u32) -> Result<()> {
            self.id = input.read_var_i32()?;
            self.badge = input.read_record(version, Badge::default)?;
            Ok(())
        }
        fn as_any_arc(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
            self
        }
    }

    #[derive(Default)]
    struct Account {
        name: String,
        profile: Option<Profile>,
    }

    impl Record for Account {
        fn version(&self) -> u32 {
            2
        }
        fn write(&self, out: &mut VarWriter) -> Result<()> {
            out.write_str(&self.name);
            out.write_record(self.profile.as_ref())
        }
        fn read(&mut self, input: &mut VarReader<'_>, version: u32) -> Result<()> {
            self.name = input.read_str()?;
            self.profile = input.read_record(version, Profile::default)?;
            Ok(())
        }
        fn as_any_arc(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
            self
        }
    }

    #[test]
    fn nested_records_round_trip_two_levels_deep() {
        let account = Account {
            name: "root".to_string(),
            profile: Some(Profile {
                id: -7,
                badge: Some(Badge {
                    label: "gold".to_string(),
                    tier: 3,
                }),
            }),
        };

        let mut w = VarWriter::new();
        account.write(&mut w).unwrap();
        let bytes = w.into_bytes();

        let mut r = VarReader::new(&bytes);
        let mut decoded = Account::default();
        decoded.read(&mut r, 2).unwrap();

        assert_eq!(decoded.name, "root");
        let profile = decoded.profile.expect("nested record should be present");
        assert_eq!(profile.id, -7);
        let badge = profile.badge.expect("doubly nested record should be present");
        assert_eq!(badge.label, "gold");
        assert_eq!(badge.tier, 3);
    }

    #[test]
    fn absent_nested_records_round_trip() {
        let account = Account {
            name: "bare".to_string(),
            profile: None,
        };

        let mut w = VarWriter::new();
        account.write(&mut w).unwrap();
        let bytes = w.into_bytes();

        let mut r = VarReader::new(&bytes);
        let mut decoded = Account::default();
        decoded.read(&mut r, 2).unwrap();
        assert!(decoded.profile.is_none());
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn nested_records_inherit_the_parent_version_context() {
        // Hand-encode a version-1 payload: a badge back then had only a label
        let mut w = VarWriter::new();
        w.write_var_i32(12); // Profile.id
        w.write_bool(true); // badge present
        w.write_str("bronze"); // Badge.label; no tier at v1
        let bytes = w.into_bytes();

        let mut r = VarReader::new(&bytes);
        let mut decoded = Profile::default();
        decoded.read(&mut r, 1).unwrap();

        let badge = decoded.badge.expect("badge should be present");
        assert_eq!(badge.label, "bronze");
        // The nested reader saw version 1, so the v2 field keeps its default
        assert_eq!(badge.tier, 0);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn impossible_collection_length_is_malformed() {
        let mut w = VarWriter::new();
        w.write_var_i32(1_000_000);
        let bytes = w.into_bytes();
        let mut r = VarReader::new(&bytes);
        assert!(matches!(
            r.read_seq(|r| r.read_u8()),
            Err(StoreError::MalformedEncoding(_))
        ));
    }
}
