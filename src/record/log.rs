// Copyright (c) 2024-present, reftable-rs
// This source code is licensed under the MIT License
// (found in the LICENSE file in the repository)

use super::{check_hash_len, decode_string, encode_string, set_hash, set_string_from_bytes};
use crate::{coding::get_var_int, coding::put_var_int, Error, Result};

/// A reflog record, keyed by `(refname, bitwise-inverted update index)`.
///
/// Inverting the update index makes newer entries sort *before* older ones
/// under the same refname, so the first entry found for a name is always
/// the most recent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogRecord {
    /// Name of the reference this entry belongs to.
    pub refname: String,

    /// Update index of the transaction that wrote this entry.
    pub update_index: u64,

    /// The logged change, or a tombstone.
    pub value: LogValue,
}

/// The value carried by a [`LogRecord`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LogValue {
    /// Tombstone hiding the entry of the same key in older tables.
    #[default]
    Deletion,

    /// One recorded ref update.
    Update(LogUpdate),
}

/// The payload of a [`LogValue::Update`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogUpdate {
    /// Object id before the update.
    pub old_hash: Vec<u8>,

    /// Object id after the update.
    pub new_hash: Vec<u8>,

    /// Committer name.
    pub name: String,

    /// Committer email.
    pub email: String,

    /// Seconds since the epoch.
    pub time: u64,

    /// Timezone offset in minutes.
    pub tz_offset: i16,

    /// Reflog message.
    pub message: String,
}

/// Appends the log key `refname || NUL || ~update_index` to `out`.
pub(crate) fn append_log_key(out: &mut Vec<u8>, refname: &str, update_index: u64) {
    out.extend_from_slice(refname.as_bytes());
    out.push(0);
    out.extend_from_slice(&(u64::MAX - update_index).to_be_bytes());
}

impl LogRecord {
    /// Whether this record is a deletion marker.
    #[must_use]
    pub fn is_deletion(&self) -> bool {
        matches!(self.value, LogValue::Deletion)
    }

    pub(crate) fn val_type(&self) -> u8 {
        if self.is_deletion() {
            0
        } else {
            1
        }
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>, hash_size: usize) -> Result<()> {
        let LogValue::Update(update) = &self.value else {
            return Ok(());
        };

        check_hash_len(&update.old_hash, hash_size)?;
        check_hash_len(&update.new_hash, hash_size)?;
        out.extend_from_slice(&update.old_hash);
        out.extend_from_slice(&update.new_hash);

        encode_string(out, &update.name);
        encode_string(out, &update.email);
        put_var_int(out, update.time);
        out.extend_from_slice(&update.tz_offset.to_be_bytes());
        encode_string(out, &update.message);

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
        // key = refname, NUL, 8 bytes of inverted update index
        if key.len() < 10 || key[key.len() - 9] != 0 {
            return Err(Error::Format("malformed log key"));
        }
        set_string_from_bytes(&mut self.refname, &key[..key.len() - 9])?;

        let ts_bytes: [u8; 8] = key[key.len() - 8..]
            .try_into()
            .map_err(|_| Error::Format("malformed log key"))?;
        self.update_index = u64::MAX - u64::from_be_bytes(ts_bytes);

        if val_type == 0 {
            self.value = LogValue::Deletion;
            return Ok(());
        }
        if val_type != 1 {
            return Err(Error::Format("unknown log value type"));
        }

        // keep the previous allocation around; reflog identities rarely
        // change between entries
        let mut update = match std::mem::take(&mut self.value) {
            LogValue::Update(update) => update,
            LogValue::Deletion => LogUpdate::default(),
        };

        set_hash(&mut update.old_hash, input, hash_size)?;
        set_hash(&mut update.new_hash, input, hash_size)?;

        decode_string(input, scratch)?;
        if update.name.as_bytes() != scratch.as_slice() {
            set_string_from_bytes(&mut update.name, scratch)?;
        }

        decode_string(input, scratch)?;
        if update.email.as_bytes() != scratch.as_slice() {
            set_string_from_bytes(&mut update.email, scratch)?;
        }

        update.time = get_var_int(input)?;

        let tz = input
            .get(..2)
            .ok_or(Error::Format("truncated timezone offset"))?;
        update.tz_offset = i16::from_be_bytes([tz[0], tz[1]]);
        *input = &input[2..];

        decode_string(input, scratch)?;
        set_string_from_bytes(&mut update.message, scratch)?;

        self.value = LogValue::Update(update);
        Ok(())
    }
}
