// Copyright (c) 2024-present, reftable-rs
// This source code is licensed under the MIT License
// (found in the LICENSE file in the repository)

//! Varint codec used by all record encodings.
//!
//! Reftable varints are written most-significant group first, with the
//! continuation bit set on every byte but the last, and every non-terminal
//! group biased by +1 so each value has exactly one encoding.

use crate::{Error, Result};

pub(crate) const MAX_VARINT_LEN: usize = 10;

/// Appends the varint encoding of `val` to `out`, returning the number of
/// bytes written (at most [`MAX_VARINT_LEN`]).
pub(crate) fn put_var_int(out: &mut Vec<u8>, mut val: u64) -> usize {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let mut i = MAX_VARINT_LEN - 1;

    buf[i] = (val & 0x7f) as u8;
    loop {
        val >>= 7;
        if val == 0 {
            break;
        }
        val -= 1;
        i -= 1;
        buf[i] = 0x80 | (val & 0x7f) as u8;
    }

    out.extend_from_slice(&buf[i..]);
    MAX_VARINT_LEN - i
}

/// Reads one varint from the front of `input`, consuming its bytes.
///
/// Unterminated input and values that do not fit into a u64 are format
/// errors.
pub(crate) fn get_var_int(input: &mut &[u8]) -> Result<u64> {
    let first = *input.first().ok_or(Error::Format("truncated varint"))?;
    let mut val = u64::from(first & 0x7f);
    let mut ptr = 0;

    while input.get(ptr).is_some_and(|byte| byte & 0x80 != 0) {
        ptr += 1;
        let byte = *input.get(ptr).ok_or(Error::Format("unterminated varint"))?;
        val = val
            .checked_add(1)
            .and_then(|v| v.checked_mul(1 << 7))
            .ok_or(Error::Format("varint does not fit into a u64"))?
            | u64::from(byte & 0x7f);
    }

    *input = &input[ptr + 1..];
    Ok(val)
}

/// Number of leading bytes shared by `a` and `b`.
pub(crate) fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}
