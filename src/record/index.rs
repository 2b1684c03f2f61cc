// Copyright (c) 2024-present, reftable-rs
// This source code is licensed under the MIT License
// (found in the LICENSE file in the repository)

use super::{get_var_int, put_var_int};
use crate::Result;

/// An index record, keyed by the last key of the block it points at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexRecord {
    /// Last key of the indexed block.
    pub last_key: Vec<u8>,

    /// Start offset of the indexed block.
    pub offset: u64,
}

impl IndexRecord {
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        put_var_int(out, self.offset);
    }

    pub(crate) fn decode(&mut self, key: &[u8], input: &mut &[u8]) -> Result<()> {
        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.offset = get_var_int(input)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_record_roundtrip() {
        let rec = IndexRecord {
            last_key: b"refs/heads/main".to_vec(),
            offset: 123_456,
        };

        let mut encoded = Vec::new();
        rec.encode(&mut encoded);

        let mut out = IndexRecord::default();
        let mut input = encoded.as_slice();
        out.decode(&rec.last_key, &mut input).expect("should decode");

        assert_eq!(rec, out);
        assert!(input.is_empty());
    }
}
