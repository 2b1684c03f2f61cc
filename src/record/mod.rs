// Copyright (c) 2024-present, reftable-rs
// This source code is licensed under the MIT License
// (found in the LICENSE file in the repository)

//! The four record variants stored in reftable blocks.
//!
//! All records share one key encoding: inside a block, a key is stored as
//! the length of the prefix shared with the previous key, followed by the
//! remaining suffix. Three extra bits piggy-back on the suffix length and
//! select the value layout of the record.

mod index;
mod log;
mod obj;
mod reference;

pub use index::IndexRecord;
pub use log::{LogRecord, LogUpdate, LogValue};
pub use obj::ObjRecord;
pub use reference::{RefRecord, RefValue};

pub(crate) use log::append_log_key;

use crate::{
    coding::{common_prefix_len, get_var_int, put_var_int},
    format::BlockType,
    Error, Result,
};

/// A record of any of the four on-disk record types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// A reference
    Ref(RefRecord),

    /// A reflog entry
    Log(LogRecord),

    /// A reverse object-id index entry
    Obj(ObjRecord),

    /// An index entry pointing at a block
    Index(IndexRecord),
}

impl Record {
    /// Creates an empty record of the given block type, ready to be decoded
    /// into.
    #[must_use]
    pub fn new(typ: BlockType) -> Self {
        match typ {
            BlockType::Ref => Self::Ref(RefRecord::default()),
            BlockType::Log => Self::Log(LogRecord::default()),
            BlockType::Obj => Self::Obj(ObjRecord::default()),
            BlockType::Index => Self::Index(IndexRecord::default()),
        }
    }

    /// The block type this record is stored in.
    #[must_use]
    pub fn block_type(&self) -> BlockType {
        match self {
            Self::Ref(_) => BlockType::Ref,
            Self::Log(_) => BlockType::Log,
            Self::Obj(_) => BlockType::Obj,
            Self::Index(_) => BlockType::Index,
        }
    }

    /// Writes the sort key of this record into `out` (cleared first).
    pub fn key(&self, out: &mut Vec<u8>) {
        out.clear();
        match self {
            Self::Ref(rec) => out.extend_from_slice(rec.refname.as_bytes()),
            Self::Log(rec) => append_log_key(out, &rec.refname, rec.update_index),
            Self::Obj(rec) => out.extend_from_slice(&rec.hash_prefix),
            Self::Index(rec) => out.extend_from_slice(&rec.last_key),
        }
    }

    /// Whether this record is a deletion marker.
    #[must_use]
    pub fn is_deletion(&self) -> bool {
        match self {
            Self::Ref(rec) => rec.is_deletion(),
            Self::Log(rec) => rec.is_deletion(),
            Self::Obj(_) | Self::Index(_) => false,
        }
    }

    /// Compares two records of the same type by their sort key.
    ///
    /// Note that for log records this means a *larger* update index under
    /// the same refname compares as smaller.
    pub fn cmp_key(&self, other: &Self) -> Result<std::cmp::Ordering> {
        if self.block_type() != other.block_type() {
            return Err(Error::Api("cannot compare records of different types"));
        }

        let mut a = Vec::new();
        let mut b = Vec::new();
        self.key(&mut a);
        other.key(&mut b);
        Ok(a.cmp(&b))
    }

    /// The value of the 3 extra bits stored next to the key.
    pub(crate) fn val_type(&self) -> u8 {
        match self {
            Self::Ref(rec) => rec.val_type(),
            Self::Log(rec) => rec.val_type(),
            Self::Obj(rec) => rec.val_type(),
            Self::Index(_) => 0,
        }
    }

    /// Appends the encoded record value to `out`.
    pub(crate) fn encode(&self, out: &mut Vec<u8>, hash_size: usize) -> Result<()> {
        match self {
            Self::Ref(rec) => rec.encode(out, hash_size),
            Self::Log(rec) => rec.encode(out, hash_size),
            Self::Obj(rec) => {
                rec.encode(out);
                Ok(())
            }
            Self::Index(rec) => {
                rec.encode(out);
                Ok(())
            }
        }
    }

    /// Decodes the record value for `key` from the front of `input`.
    ///
    /// `scratch` is reused across calls to avoid per-record allocations.
    pub(crate) fn decode(
        &mut self,
        key: &[u8],
        val_type: u8,
        input: &mut &[u8],
        hash_size: usize,
        scratch: &mut Vec<u8>,
    ) -> Result<()> {
        match self {
            Self::Ref(rec) => rec.decode(key, val_type, input, hash_size, scratch),
            Self::Log(rec) => rec.decode(key, val_type, input, hash_size, scratch),
            Self::Obj(rec) => rec.decode(key, val_type, input),
            Self::Index(rec) => rec.decode(key, input),
        }
    }
}

/// Appends the delta encoding of `key` against `prev_key` to `out`.
///
/// Returns whether the record is a restart point (`prefix_len == 0`).
pub(crate) fn encode_key(out: &mut Vec<u8>, prev_key: &[u8], key: &[u8], extra: u8) -> bool {
    let prefix_len = common_prefix_len(prev_key, key);
    let suffix_len = key.len() - prefix_len;

    put_var_int(out, prefix_len as u64);
    put_var_int(out, (suffix_len as u64) << 3 | u64::from(extra));
    out.extend_from_slice(&key[prefix_len..]);

    prefix_len == 0
}

pub(crate) struct KeyHead {
    pub prefix_len: usize,
    pub suffix_len: usize,
    pub extra: u8,
}

/// Reads the two length varints of a delta-encoded key.
pub(crate) fn decode_key_head(input: &mut &[u8]) -> Result<KeyHead> {
    let prefix_len = get_var_int(input)? as usize;
    let packed = get_var_int(input)?;

    Ok(KeyHead {
        prefix_len,
        suffix_len: (packed >> 3) as usize,
        extra: (packed & 0x7) as u8,
    })
}

/// Reconstructs the next key into `last_key` (which must hold the previous
/// key) and returns the record's extra bits.
pub(crate) fn decode_key(last_key: &mut Vec<u8>, input: &mut &[u8]) -> Result<u8> {
    let head = decode_key_head(input)?;

    if head.prefix_len > last_key.len() {
        return Err(Error::Format("key prefix exceeds the previous key"));
    }
    let suffix = input
        .get(..head.suffix_len)
        .ok_or(Error::Format("truncated key suffix"))?;

    last_key.truncate(head.prefix_len);
    last_key.extend_from_slice(suffix);
    *input = &input[head.suffix_len..];

    Ok(head.extra)
}

/// Appends `len` as a varint followed by the string bytes.
pub(crate) fn encode_string(out: &mut Vec<u8>, s: &str) {
    put_var_int(out, s.len() as u64);
    out.extend_from_slice(s.as_bytes());
}

/// Reads a length-prefixed string into `scratch` (cleared first).
pub(crate) fn decode_string(input: &mut &[u8], scratch: &mut Vec<u8>) -> Result<()> {
    let len = get_var_int(input)? as usize;
    let bytes = input.get(..len).ok_or(Error::Format("truncated string"))?;

    scratch.clear();
    scratch.extend_from_slice(bytes);
    *input = &input[len..];

    Ok(())
}

pub(crate) fn scratch_to_string(scratch: &[u8]) -> Result<String> {
    std::str::from_utf8(scratch)
        .map(str::to_owned)
        .map_err(|_| Error::Format("string is not valid UTF-8"))
}

pub(crate) fn set_string_from_bytes(dst: &mut String, bytes: &[u8]) -> Result<()> {
    let s = std::str::from_utf8(bytes).map_err(|_| Error::Format("string is not valid UTF-8"))?;
    dst.clear();
    dst.push_str(s);
    Ok(())
}

/// Reads `hash_size` opaque object-id bytes.
pub(crate) fn take_hash(input: &mut &[u8], hash_size: usize) -> Result<Vec<u8>> {
    let bytes = input
        .get(..hash_size)
        .ok_or(Error::Format("truncated object id"))?;
    let hash = bytes.to_vec();
    *input = &input[hash_size..];
    Ok(hash)
}

pub(crate) fn set_hash(dst: &mut Vec<u8>, input: &mut &[u8], hash_size: usize) -> Result<()> {
    let bytes = input
        .get(..hash_size)
        .ok_or(Error::Format("truncated object id"))?;
    dst.clear();
    dst.extend_from_slice(bytes);
    *input = &input[hash_size..];
    Ok(())
}

pub(crate) fn check_hash_len(hash: &[u8], hash_size: usize) -> Result<()> {
    if hash.len() == hash_size {
        Ok(())
    } else {
        Err(Error::Api("object id length does not match the table hash"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_roundtrip(prev: &[u8], key: &[u8], extra: u8) {
        let mut encoded = Vec::new();
        encode_key(&mut encoded, prev, key, extra);

        let mut last_key = prev.to_vec();
        let mut input = encoded.as_slice();
        let got_extra = decode_key(&mut last_key, &mut input).expect("should decode");

        assert_eq!(key, last_key.as_slice());
        assert_eq!(extra, got_extra);
        assert!(input.is_empty());
    }

    #[test]
    fn delta_key_roundtrip() {
        key_roundtrip(b"", b"refs/heads/main", 1);
        key_roundtrip(b"refs/heads/main", b"refs/heads/master", 2);
        key_roundtrip(b"refs/heads/master", b"refs/heads/master-2", 0);
        key_roundtrip(b"refs/tags/v1", b"refs/tags/v1", 3);
        key_roundtrip(b"zz", b"aa", 7);
    }

    #[test]
    fn restart_is_empty_prefix() {
        let mut encoded = Vec::new();
        assert!(encode_key(&mut encoded, b"", b"refs/heads/main", 1));

        encoded.clear();
        assert!(!encode_key(&mut encoded, b"refs/heads", b"refs/tags", 1));
    }

    #[test]
    fn corrupt_prefix_is_rejected() {
        let mut encoded = Vec::new();
        encode_key(&mut encoded, b"refs/heads/main", b"refs/heads/other", 0);

        // decoding against a shorter previous key cannot reconstruct
        let mut last_key = b"refs".to_vec();
        let mut input = encoded.as_slice();
        assert!(decode_key(&mut last_key, &mut input).is_err());
    }

    #[test]
    fn records_compare_by_key() {
        let a = Record::Ref(RefRecord {
            refname: "refs/heads/a".to_string(),
            update_index: 9,
            value: RefValue::Deletion,
        });
        let b = Record::Ref(RefRecord {
            refname: "refs/heads/b".to_string(),
            update_index: 1,
            value: RefValue::Deletion,
        });

        assert_eq!(std::cmp::Ordering::Less, a.cmp_key(&b).expect("same type"));
        assert_eq!(std::cmp::Ordering::Equal, a.cmp_key(&a).expect("same type"));

        let log = Record::new(crate::format::BlockType::Log);
        assert!(a.cmp_key(&log).is_err());
    }

    #[test]
    fn string_roundtrip() {
        let mut out = Vec::new();
        encode_string(&mut out, "A Name");

        let mut scratch = Vec::new();
        let mut input = out.as_slice();
        decode_string(&mut input, &mut scratch).expect("should decode");
        assert_eq!(b"A Name", scratch.as_slice());
        assert!(input.is_empty());
    }
}
