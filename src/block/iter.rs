// Copyright (c) 2024-present, reftable-rs
// This source code is licensed under the MIT License
// (found in the LICENSE file in the repository)

use super::Block;
use crate::{
    record::{decode_key, decode_key_head, Record},
    Error, Result,
};

/// Cursor over the records of one [`Block`].
pub(crate) struct BlockIter {
    block: Block,
    next_off: usize,
    last_key: Vec<u8>,
    scratch: Vec<u8>,
}

impl BlockIter {
    pub(crate) fn new(block: Block) -> Self {
        let next_off = block.header_off() + 4;
        Self {
            block,
            next_off,
            last_key: Vec::new(),
            scratch: Vec::new(),
        }
    }

    pub(crate) fn block(&self) -> &Block {
        &self.block
    }

    /// Decodes the next record into `rec`. Returns `Ok(false)` at the end
    /// of the block.
    pub(crate) fn next(&mut self, rec: &mut Record) -> Result<bool> {
        if rec.block_type() != self.block.block_type() {
            return Err(Error::Api("record type does not match the block type"));
        }
        if self.next_off >= self.block.record_end() {
            return Ok(false);
        }

        let mut input = self
            .block
            .data()
            .get(self.next_off..self.block.record_end())
            .ok_or(Error::Format("block cursor out of range"))?;
        let remaining = input.len();

        let extra = decode_key(&mut self.last_key, &mut input)?;
        rec.decode(
            &self.last_key,
            extra,
            &mut input,
            self.block.hash_size(),
            &mut self.scratch,
        )?;

        self.next_off += remaining - input.len();
        Ok(true)
    }

    /// Full key of the `i`-th restart record; restart records carry no
    /// prefix, so no reconstruction is needed.
    fn restart_key(&self, i: usize) -> Result<&[u8]> {
        let off = self.block.restart_offset(i)?;
        let mut input = self
            .block
            .data()
            .get(off..self.block.record_end())
            .ok_or(Error::Format("restart offset out of range"))?;

        let head = decode_key_head(&mut input)?;
        if head.prefix_len != 0 {
            return Err(Error::Format("restart record has a key prefix"));
        }
        input
            .get(..head.suffix_len)
            .ok_or(Error::Format("truncated restart key"))
    }

    /// Positions the cursor so that the next record has the smallest key
    /// `>= want`. Seeking past every record leaves the cursor at the end.
    pub(crate) fn seek_key(&mut self, want: &[u8]) -> Result<()> {
        // binary search for the first restart point past `want`, then scan
        // forward from the one before it
        let mut lo = 0usize;
        let mut hi = self.block.restart_count() as usize;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.restart_key(mid)? > want {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }

        self.next_off = if lo > 0 {
            self.block.restart_offset(lo - 1)?
        } else {
            self.block.header_off() + 4
        };
        self.last_key.clear();

        let mut rec = Record::new(self.block.block_type());
        loop {
            let prev_off = self.next_off;
            if !self.next(&mut rec)? {
                return Ok(());
            }

            if self.last_key.as_slice() >= want {
                // stepping back is safe: `last_key` already holds the key
                // of the record at `prev_off`, so re-decoding it
                // reconstructs against itself
                self.next_off = prev_off;
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block::writer::BlockWriter,
        block_source::BlockData,
        format::BlockType,
        record::{LogRecord, LogUpdate, LogValue, RefRecord, RefValue},
    };

    fn ref_record(name: &str, index: u64) -> Record {
        Record::Ref(RefRecord {
            refname: name.to_string(),
            update_index: index,
            value: RefValue::Val1(vec![index as u8; 20]),
        })
    }

    fn build_ref_block(names: &[&str]) -> Block {
        let mut writer = BlockWriter::new(BlockType::Ref, 4_096, 0, 20);
        for (i, name) in names.iter().enumerate() {
            assert!(writer.add(&ref_record(name, i as u64)).expect("fits"));
        }
        let buf = writer.finish().expect("should finish");
        Block::parse(BlockData::from(buf), 0, 20, Some(BlockType::Ref))
            .expect("should parse")
            .expect("type matches")
    }

    #[test]
    fn block_roundtrip() {
        let names: Vec<String> = (0..100).map(|i| format!("refs/heads/branch-{i:03}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();

        let mut iter = BlockIter::new(build_ref_block(&refs));
        let mut rec = Record::new(BlockType::Ref);

        for (i, name) in refs.iter().enumerate() {
            assert!(iter.next(&mut rec).expect("should iterate"));
            let Record::Ref(got) = &rec else { unreachable!() };
            assert_eq!(*name, got.refname);
            assert_eq!(i as u64, got.update_index);
            assert_eq!(RefValue::Val1(vec![i as u8; 20]), got.value);
        }
        assert!(!iter.next(&mut rec).expect("should finish"));
    }

    #[test]
    fn seek_finds_existing_and_missing_keys() {
        let names: Vec<String> = (0..100).map(|i| format!("refs/heads/branch-{i:03}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut iter = BlockIter::new(build_ref_block(&refs));
        let mut rec = Record::new(BlockType::Ref);

        // exact hit, also across restart boundaries
        for want in ["refs/heads/branch-000", "refs/heads/branch-047", "refs/heads/branch-099"] {
            iter.seek_key(want.as_bytes()).expect("should seek");
            assert!(iter.next(&mut rec).expect("should yield"));
            let Record::Ref(got) = &rec else { unreachable!() };
            assert_eq!(want, got.refname);
        }

        // between two keys: lands on the next larger one
        iter.seek_key(b"refs/heads/branch-0471").expect("should seek");
        assert!(iter.next(&mut rec).expect("should yield"));
        let Record::Ref(got) = &rec else { unreachable!() };
        assert_eq!("refs/heads/branch-048", got.refname);

        // before the first key
        iter.seek_key(b"refs/heads/aaa").expect("should seek");
        assert!(iter.next(&mut rec).expect("should yield"));
        let Record::Ref(got) = &rec else { unreachable!() };
        assert_eq!("refs/heads/branch-000", got.refname);

        // past the last key: iterator is drained
        iter.seek_key(b"refs/heads/zzz").expect("should seek");
        assert!(!iter.next(&mut rec).expect("should be at end"));
    }

    #[test]
    fn seek_is_repeatable() {
        let mut iter = BlockIter::new(build_ref_block(&["refs/heads/a", "refs/heads/b"]));
        let mut rec = Record::new(BlockType::Ref);

        for _ in 0..3 {
            iter.seek_key(b"refs/heads/b").expect("should seek");
            assert!(iter.next(&mut rec).expect("should yield"));
            let Record::Ref(got) = &rec else { unreachable!() };
            assert_eq!("refs/heads/b", got.refname);
        }
    }

    #[test]
    fn wrong_record_type_is_api_error() {
        let mut iter = BlockIter::new(build_ref_block(&["refs/heads/a"]));
        let mut rec = Record::new(BlockType::Log);
        assert!(matches!(iter.next(&mut rec), Err(Error::Api(_))));
    }

    #[test]
    fn log_block_roundtrip_through_compression() {
        let mut writer = BlockWriter::new(BlockType::Log, 4_096, 0, 20);

        // ascending key order means descending update index per name
        for index in [9u64, 7, 5] {
            let rec = Record::Log(LogRecord {
                refname: "refs/heads/main".to_string(),
                update_index: index,
                value: LogValue::Update(LogUpdate {
                    old_hash: vec![0x0a; 20],
                    new_hash: vec![0x0b; 20],
                    name: "A Committer".to_string(),
                    email: "committer@example.com".to_string(),
                    time: 1_700_000_000 + index,
                    tz_offset: 60,
                    message: "update\n".to_string(),
                }),
            });
            assert!(writer.add(&rec).expect("fits"));
        }

        let buf = writer.finish().expect("should finish");
        let block = Block::parse(BlockData::from(buf), 0, 20, Some(BlockType::Log))
            .expect("should parse")
            .expect("type matches");

        let mut iter = BlockIter::new(block);
        let mut rec = Record::new(BlockType::Log);

        // newest entry first
        for expected in [9u64, 7, 5] {
            assert!(iter.next(&mut rec).expect("should iterate"));
            let Record::Log(got) = &rec else { unreachable!() };
            assert_eq!("refs/heads/main", got.refname);
            assert_eq!(expected, got.update_index);
        }
        assert!(!iter.next(&mut rec).expect("should finish"));
    }
}
