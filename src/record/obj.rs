// Copyright (c) 2024-present, reftable-rs
// This source code is licensed under the MIT License
// (found in the LICENSE file in the repository)

use super::{get_var_int, put_var_int};
use crate::{Error, Result};

/// A reverse-index record mapping an abbreviated object id to the ref
/// blocks that mention it.
///
/// Offsets are stored ascending; the first one absolute, the rest as
/// deltas. An offset count of 1..=7 is packed into the key's extra bits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjRecord {
    /// Fixed-width prefix of an object id; the width is recorded in the
    /// table footer.
    pub hash_prefix: Vec<u8>,

    /// Start offsets of the ref blocks holding refs that point at matching
    /// object ids. Empty when there were too many to list.
    pub offsets: Vec<u64>,
}

impl ObjRecord {
    pub(crate) fn val_type(&self) -> u8 {
        if !self.offsets.is_empty() && self.offsets.len() < 8 {
            self.offsets.len() as u8
        } else {
            0
        }
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        if self.offsets.is_empty() || self.offsets.len() >= 8 {
            put_var_int(out, self.offsets.len() as u64);
        }

        let Some(first) = self.offsets.first() else {
            return;
        };
        put_var_int(out, *first);

        let mut last = *first;
        for offset in self.offsets.iter().skip(1) {
            put_var_int(out, offset - last);
            last = *offset;
        }
    }

    pub(crate) fn decode(&mut self, key: &[u8], val_type: u8, input: &mut &[u8]) -> Result<()> {
        self.hash_prefix.clear();
        self.hash_prefix.extend_from_slice(key);

        let count = if val_type == 0 {
            get_var_int(input)?
        } else {
            u64::from(val_type)
        };

        self.offsets.clear();
        if count == 0 {
            return Ok(());
        }

        let mut last = get_var_int(input)?;
        self.offsets.push(last);
        for _ in 1..count {
            let delta = get_var_int(input)?;
            last = last
                .checked_add(delta)
                .ok_or(Error::Format("object offset overflow"))?;
            self.offsets.push(last);
        }

        Ok(())
    }
}
