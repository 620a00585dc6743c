//! Log record codec.
//!
//! Every mutation is persisted as one framed record:
//!
//! ```text
//! [crc32 u32 le]
//! [kind u8]
//! [key_len varint][value_len varint][txn_seq varint]
//! [key bytes][value bytes]
//! ```
//!
//! Varints are unsigned little-endian LEB128. The checksum covers every
//! byte after the checksum field, so a torn tail fails validation no
//! matter where the tear lands. Readers recompute the total record length
//! from the header alone.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Checksum field plus kind byte.
pub const RECORD_PREFIX: usize = 5;

/// Upper bound on an encoded header: prefix, two u32-bounded lengths and
/// one u64 sequence number at maximum varint width.
pub const MAX_HEADER_SIZE: usize = RECORD_PREFIX + 5 + 5 + 10;

/// Sequence number carried by records outside any batch.
pub const NO_TXN_SEQ: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// A live key/value pair.
    Normal = 1,
    /// Key deletion marker.
    Tombstone = 2,
    /// Commit marker sealing all records of one `txn_seq`.
    TxnCommit = 3,
}

impl RecordKind {
    fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(RecordKind::Normal),
            2 => Some(RecordKind::Tombstone),
            3 => Some(RecordKind::TxnCommit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub kind: RecordKind,
    pub key: Bytes,
    pub value: Bytes,
    pub txn_seq: u64,
}

impl Record {
    pub fn normal(key: Bytes, value: Bytes, txn_seq: u64) -> Self {
        Self {
            kind: RecordKind::Normal,
            key,
            value,
            txn_seq,
        }
    }

    pub fn tombstone(key: Bytes, txn_seq: u64) -> Self {
        Self {
            kind: RecordKind::Tombstone,
            key,
            value: Bytes::new(),
            txn_seq,
        }
    }

    pub fn txn_commit(txn_seq: u64) -> Self {
        Self {
            kind: RecordKind::TxnCommit,
            key: Bytes::new(),
            value: Bytes::new(),
            txn_seq,
        }
    }

    /// Encoded length without materializing the buffer.
    pub fn encoded_len(&self) -> u64 {
        let header = RECORD_PREFIX
            + varint_len(self.key.len() as u64)
            + varint_len(self.value.len() as u64)
            + varint_len(self.txn_seq);
        (header + self.key.len() + self.value.len()) as u64
    }
}

/// Location of one record in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPos {
    pub file_id: u32,
    pub offset: u64,
    /// Total encoded size, so reclaim accounting never re-reads the log.
    pub size: u32,
}

impl RecordPos {
    pub fn new(file_id: u32, offset: u64, size: u32) -> Self {
        Self {
            file_id,
            offset,
            size,
        }
    }
}

pub fn encode(record: &Record) -> Vec<u8> {
    let mut buf = Vec::with_capacity(record.encoded_len() as usize);
    buf.extend_from_slice(&[0u8; 4]);
    buf.push(record.kind as u8);
    encode_varint(&mut buf, record.key.len() as u64);
    encode_varint(&mut buf, record.value.len() as u64);
    encode_varint(&mut buf, record.txn_seq);
    buf.extend_from_slice(&record.key);
    buf.extend_from_slice(&record.value);

    let crc = crc32c::crc32c(&buf[4..]);
    buf[0..4].copy_from_slice(&crc.to_le_bytes());
    buf
}

/// Decodes one record from the front of `data`.
///
/// Returns the record and the number of bytes it occupies. `data` may
/// extend past the record; it must not end before it.
pub fn decode(data: &[u8]) -> Result<(Record, usize)> {
    let (kind, key_len, value_len, txn_seq, header_len) = decode_header(data)?;

    let total = header_len as u64 + key_len + value_len;
    if (data.len() as u64) < total {
        return Err(Error::CorruptRecord("record overruns buffer"));
    }
    let total = total as usize;

    let crc_stored = u32::from_le_bytes(data[0..4].try_into().unwrap());
    if crc32c::crc32c(&data[4..total]) != crc_stored {
        return Err(Error::CorruptRecord("crc mismatch"));
    }

    let key_start = header_len;
    let key_end = key_start + key_len as usize;
    let record = Record {
        kind,
        key: Bytes::copy_from_slice(&data[key_start..key_end]),
        value: Bytes::copy_from_slice(&data[key_end..total]),
        txn_seq,
    };
    Ok((record, total))
}

/// Parses the fixed prefix and the three varints.
///
/// Returns `(kind, key_len, value_len, txn_seq, header_len)`. Fails on a
/// short buffer so callers can size a second read from the header alone.
pub fn decode_header(data: &[u8]) -> Result<(RecordKind, u64, u64, u64, usize)> {
    if data.len() < RECORD_PREFIX {
        return Err(Error::CorruptRecord("short header"));
    }
    let kind =
        RecordKind::from_wire(data[4]).ok_or(Error::CorruptRecord("unknown record kind"))?;

    let mut at = RECORD_PREFIX;
    let (key_len, n) =
        decode_varint(&data[at..]).ok_or(Error::CorruptRecord("bad key length varint"))?;
    at += n;
    let (value_len, n) =
        decode_varint(&data[at..]).ok_or(Error::CorruptRecord("bad value length varint"))?;
    at += n;
    let (txn_seq, n) =
        decode_varint(&data[at..]).ok_or(Error::CorruptRecord("bad txn_seq varint"))?;
    at += n;

    if key_len > u32::MAX as u64 || value_len > u32::MAX as u64 {
        return Err(Error::CorruptRecord("length field out of range"));
    }
    Ok((kind, key_len, value_len, txn_seq, at))
}

pub fn encode_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Returns the decoded value and consumed byte count, or `None` on a
/// truncated or over-long encoding.
pub fn decode_varint(data: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, &byte) in data.iter().take(10).enumerate() {
        let low = (byte & 0x7f) as u64;
        if i == 9 && byte > 1 {
            return None;
        }
        value |= low << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

pub fn varint_len(value: u64) -> usize {
    (64 - value.max(1).leading_zeros() as usize).div_ceil(7)
}
