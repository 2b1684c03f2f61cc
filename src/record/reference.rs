// Copyright (c) 2024-present, reftable-rs
// This source code is licensed under the MIT License
// (found in the LICENSE file in the repository)

use super::{
    check_hash_len, decode_string, encode_string, scratch_to_string, set_string_from_bytes,
    take_hash,
};
use crate::{coding::get_var_int, coding::put_var_int, Error, Result};

/// A reference record, keyed by refname.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefRecord {
    /// Name of the reference (slash-separated path).
    pub refname: String,

    /// Update index of the transaction that wrote this record.
    pub update_index: u64,

    /// The value this reference has.
    pub value: RefValue,
}

/// The value carried by a [`RefRecord`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RefValue {
    /// Tombstone hiding any record of the same refname in older tables.
    #[default]
    Deletion,

    /// A direct reference to one object id.
    Val1(Vec<u8>),

    /// A reference plus the object it peels to (annotated tags).
    Val2 {
        /// Object id the ref points at.
        value: Vec<u8>,

        /// Object id the tag ultimately resolves to.
        peeled: Vec<u8>,
    },

    /// A symbolic reference to another refname.
    Symref(String),
}

impl RefRecord {
    /// Whether this record is a deletion marker.
    #[must_use]
    pub fn is_deletion(&self) -> bool {
        matches!(self.value, RefValue::Deletion)
    }

    pub(crate) fn val_type(&self) -> u8 {
        match self.value {
            RefValue::Deletion => 0,
            RefValue::Val1(_) => 1,
            RefValue::Val2 { .. } => 2,
            RefValue::Symref(_) => 3,
        }
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>, hash_size: usize) -> Result<()> {
        put_var_int(out, self.update_index);

        match &self.value {
            RefValue::Deletion => {}
            RefValue::Val1(hash) => {
                check_hash_len(hash, hash_size)?;
                out.extend_from_slice(hash);
            }
            RefValue::Val2 { value, peeled } => {
                check_hash_len(value, hash_size)?;
                check_hash_len(peeled, hash_size)?;
                out.extend_from_slice(value);
                out.extend_from_slice(peeled);
            }
            RefValue::Symref(target) => encode_string(out, target),
        }

        Ok(())
    }

    pub(crate) fn decode(
        &mut self,
        key: &[u8],
        val_type: u8,
        input: &mut &[u8],
        hash_size: usize,
        scratch: &mut Vec<u8>,
    ) -> Result<()> {
        set_string_from_bytes(&mut self.refname, key)?;
        self.update_index = get_var_int(input)?;

        self.value = match val_type {
            0 => RefValue::Deletion,
            1 => RefValue::Val1(take_hash(input, hash_size)?),
            2 => RefValue::Val2 {
                value: take_hash(input, hash_size)?,
                peeled: take_hash(input, hash_size)?,
            },
            3 => {
                decode_string(input, scratch)?;
                RefValue::Symref(scratch_to_string(scratch)?)
            }
            _ => return Err(Error::Format("unknown ref value type")),
        };

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(rec: &RefRecord, hash_size: usize) -> RefRecord {
        let mut encoded = Vec::new();
        rec.encode(&mut encoded, hash_size).expect("should encode");

        let mut out = RefRecord::default();
        let mut input = encoded.as_slice();
        let mut scratch = Vec::new();
        out.decode(
            rec.refname.as_bytes(),
            rec.val_type(),
            &mut input,
            hash_size,
            &mut scratch,
        )
        .expect("should decode");
        assert!(input.is_empty());

        out
    }

    #[test]
    fn ref_record_roundtrip() {
        let records = [
            RefRecord {
                refname: "refs/heads/main".to_string(),
                update_index: 42,
                value: RefValue::Val1(vec![0x01; 20]),
            },
            RefRecord {
                refname: "refs/tags/v1.0".to_string(),
                update_index: 3,
                value: RefValue::Val2 {
                    value: vec![0x02; 20],
                    peeled: vec![0x03; 20],
                },
            },
            RefRecord {
                refname: "HEAD".to_string(),
                update_index: 7,
                value: RefValue::Symref("refs/heads/main".to_string()),
            },
            RefRecord {
                refname: "refs/heads/gone".to_string(),
                update_index: 8,
                value: RefValue::Deletion,
            },
        ];

        for rec in &records {
            assert_eq!(*rec, roundtrip(rec, 20));
        }
    }

    #[test]
    fn ref_record_roundtrip_wide_hash() {
        let rec = RefRecord {
            refname: "refs/heads/main".to_string(),
            update_index: 1,
            value: RefValue::Val1(vec![0xaa; 32]),
        };
        assert_eq!(rec, roundtrip(&rec, 32));
    }

    #[test]
    fn hash_length_mismatch_is_api_error() {
        let rec = RefRecord {
            refname: "refs/heads/main".to_string(),
            update_index: 1,
            value: RefValue::Val1(vec![0x01; 20]),
        };
        let mut out = Vec::new();
        assert!(matches!(rec.encode(&mut out, 32), Err(Error::Api(_))));
    }

    #[test]
    fn clone_compares_equal() {
        let rec = RefRecord {
            refname: "refs/heads/main".to_string(),
            update_index: 9,
            value: RefValue::Symref("refs/heads/other".to_string()),
        };
        assert_eq!(rec, rec.clone());
    }
}
