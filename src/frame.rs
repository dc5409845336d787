//! Framed file format
//!
//! Defines the exact bytes on disk for one key's record and validates them on
//! read. A frame is either fully valid or treated as absent; there is no
//! partially-trusted state.
//!
//! ## Frame layout (big-endian)
//! ```text
//! ┌───────────┬──────────┬───────────────────┬──────────────┐
//! │ Magic (4) │ Flag (1) │    Payload (N)    │ Checksum (8) │
//! └───────────┴──────────┴───────────────────┴──────────────┘
//! ```
//! - Magic: `VARS`
//! - Flag: 0 = raw payload, 1 = zstd-compressed payload
//! - Payload: var-width schema version, then codec-encoded record fields
//! - Checksum: CRC-32C (Castagnoli) of flag byte + payload, zero-extended
//!   to 8 bytes. The magic and the checksum itself are not covered.
//!
//! Compression is applied only when the uncompressed payload exceeds
//! [`COMPRESSION_THRESHOLD`]; the flag records which path was taken so
//! decoding never has to guess.

use std::borrow::Cow;

use bytes::{BufMut, Bytes, BytesMut};
use crc32c::{crc32c, crc32c_append};

use crate::codec::{VarReader, VarWriter};
use crate::error::{Result, StoreError};
use crate::record::Record;

/// Magic constant identifying this format
pub const MAGIC: [u8; 4] = *b"VARS";

/// Payloads larger than this are compressed; smaller ones skip the CPU cost
pub const COMPRESSION_THRESHOLD: usize = 512;

/// Smallest possible frame: magic + flag + empty payload + checksum
pub const MIN_FRAME_LEN: usize = 4 + 1 + 8;

const FLAG_RAW: u8 = 0;
const FLAG_COMPRESSED: u8 = 1;

/// zstd compression level
const ZSTD_LEVEL: i32 = 3;

/// Serialize a record into a complete frame: version prefix, fields,
/// optional compression, checksum.
pub fn encode_record(record: &dyn Record) -> Result<Bytes> {
    let mut out = VarWriter::new();
    out.write_var_u32(record.version());
    record.write(&mut out)?;
    seal(&out.into_bytes())
}

/// Decode a complete frame back into a record built by `factory`.
/// The schema version found in the payload drives field skipping.
pub fn decode_record<R: Record>(frame: &[u8], factory: impl FnOnce() -> R) -> Result<R> {
    let raw = open(frame)?;
    let mut input = VarReader::new(&raw);
    let version = input.read_var_u32()?;
    let mut record = factory();
    record.read(&mut input, version)?;
    Ok(record)
}

/// Wrap an encoded payload in the frame layout
pub fn seal(raw: &[u8]) -> Result<Bytes> {
    let (flag, payload): (u8, Cow<'_, [u8]>) = if raw.len() > COMPRESSION_THRESHOLD {
        (FLAG_COMPRESSED, Cow::Owned(zstd::encode_all(raw, ZSTD_LEVEL)?))
    } else {
        (FLAG_RAW, Cow::Borrowed(raw))
    };

    let mut frame = BytesMut::with_capacity(MIN_FRAME_LEN + payload.len());
    frame.put_slice(&MAGIC);
    frame.put_u8(flag);
    frame.put_slice(&payload);

    // Checksum covers the flag byte plus the payload exactly as stored
    let checksum = crc32c_append(crc32c(&[flag]), &payload);
    frame.put_u64(u64::from(checksum));

    Ok(frame.freeze())
}

/// Validate a frame and return its decompressed payload
pub fn open(frame: &[u8]) -> Result<Vec<u8>> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(StoreError::CorruptFrame(format!(
            "frame too short: {} bytes",
            frame.len()
        )));
    }

    if frame[0..4] != MAGIC {
        return Err(StoreError::CorruptFrame(format!(
            "bad magic: expected {:02x?}, got {:02x?}",
            MAGIC,
            &frame[0..4]
        )));
    }

    let flag = frame[4];
    let payload = &frame[5..frame.len() - 8];
    let stored = u64::from_be_bytes(frame[frame.len() - 8..].try_into().unwrap());
    let computed = u64::from(crc32c_append(crc32c(&[flag]), payload));

    if stored != computed {
        return Err(StoreError::CorruptFrame(format!(
            "checksum mismatch: stored {:016x}, computed {:016x}",
            stored, computed
        )));
    }

    match flag {
        FLAG_RAW => Ok(payload.to_vec()),
        FLAG_COMPRESSED => zstd::decode_all(payload)
            .map_err(|e| StoreError::CorruptFrame(format!("decompression failed: {}", e))),
        other => Err(StoreError::CorruptFrame(format!(
            "unknown compression flag: {}",
            other
        ))),
    }
}
