// Copyright (c) 2024-present, reftable-rs
// This source code is licensed under the MIT License
// (found in the LICENSE file in the repository)

use crate::{
    format::BlockType,
    record::{append_log_key, LogRecord, Record, RefRecord},
    table::{Table, TableIter},
    Error, Result,
};
use std::{cmp::Reverse, collections::BinaryHeap};

struct HeapItem {
    /// Position of the source table in the stack; higher = newer.
    index: usize,
    key: Vec<u8>,
    rec: Record,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.index == other.index
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // keys ascending; on equal keys the newest table goes first
        self.key
            .cmp(&other.key)
            .then_with(|| other.index.cmp(&self.index))
    }
}

/// Merge-sorted view over one record type across all tables of a stack.
///
/// Tables are merged newest-wins: of several records with the same key,
/// only the one from the newest table surfaces. Deletion records are
/// yielded or suppressed depending on how the iterator was created.
pub struct MergedIter {
    typ: BlockType,
    /// Oldest table first, matching the stack order.
    iters: Vec<TableIter>,
    heap: BinaryHeap<Reverse<HeapItem>>,
    started: bool,
    suppress_deletions: bool,
}

impl MergedIter {
    pub(crate) fn new(
        tables: &[Table],
        typ: BlockType,
        suppress_deletions: bool,
    ) -> Result<Self> {
        let iters = tables
            .iter()
            .map(|table| table.iter(typ))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            typ,
            iters,
            heap: BinaryHeap::new(),
            started: false,
            suppress_deletions,
        })
    }

    /// Repositions every table at the first key `>= key`.
    pub(crate) fn seek_key(&mut self, key: &[u8]) -> Result<()> {
        for iter in &mut self.iters {
            iter.seek_key(key)?;
        }
        self.heap.clear();
        self.started = false;
        Ok(())
    }

    /// Positions a ref iterator at `refname` (or the next name after it).
    pub fn seek_ref(&mut self, refname: &str) -> Result<()> {
        if self.typ != BlockType::Ref {
            return Err(Error::Api("not a ref iterator"));
        }
        self.seek_key(refname.as_bytes())
    }

    /// Positions a log iterator at the newest entry for `refname`.
    pub fn seek_log(&mut self, refname: &str) -> Result<()> {
        self.seek_log_at(refname, u64::MAX)
    }

    /// Positions a log iterator at the newest entry for `refname` whose
    /// update index is `<= update_index`.
    pub fn seek_log_at(&mut self, refname: &str, update_index: u64) -> Result<()> {
        if self.typ != BlockType::Log {
            return Err(Error::Api("not a log iterator"));
        }
        let mut key = Vec::new();
        append_log_key(&mut key, refname, update_index);
        self.seek_key(&key)
    }

    /// Yields the next merged ref record.
    pub fn next_ref(&mut self) -> Result<Option<RefRecord>> {
        if self.typ != BlockType::Ref {
            return Err(Error::Api("not a ref iterator"));
        }
        let mut rec = Record::new(BlockType::Ref);
        if self.next_record(&mut rec)? {
            if let Record::Ref(r) = rec {
                return Ok(Some(r));
            }
        }
        Ok(None)
    }

    /// Yields the next merged log record.
    pub fn next_log(&mut self) -> Result<Option<LogRecord>> {
        if self.typ != BlockType::Log {
            return Err(Error::Api("not a log iterator"));
        }
        let mut rec = Record::new(BlockType::Log);
        if self.next_record(&mut rec)? {
            if let Record::Log(r) = rec {
                return Ok(Some(r));
            }
        }
        Ok(None)
    }

    pub(crate) fn next_record(&mut self, out: &mut Record) -> Result<bool> {
        if !self.started {
            for index in 0..self.iters.len() {
                self.advance(index)?;
            }
            self.started = true;
        }

        loop {
            let Some(Reverse(entry)) = self.heap.pop() else {
                return Ok(false);
            };

            // discard the shadowed records of older tables
            loop {
                let same_key = self
                    .heap
                    .peek()
                    .is_some_and(|top| top.0.key == entry.key);
                if !same_key {
                    break;
                }
                if let Some(Reverse(top)) = self.heap.pop() {
                    self.advance(top.index)?;
                }
            }

            self.advance(entry.index)?;

            if self.suppress_deletions && entry.rec.is_deletion() {
                continue;
            }
            *out = entry.rec;
            return Ok(true);
        }
    }

    fn advance(&mut self, index: usize) -> Result<()> {
        let Some(iter) = self.iters.get_mut(index) else {
            return Ok(());
        };

        let mut rec = Record::new(self.typ);
        if iter.next(&mut rec)? {
            let mut key = Vec::new();
            rec.key(&mut key);
            self.heap.push(Reverse(HeapItem { index, key, rec }));
        }
        Ok(())
    }
}
