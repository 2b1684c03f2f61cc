// Copyright (c) 2024-present, reftable-rs
// This source code is licensed under the MIT License
// (found in the LICENSE file in the repository)

use super::Table;
use crate::{
    block::iter::BlockIter,
    format::BlockType,
    record::{Record, RefRecord, RefValue},
    Error, Result,
};

/// Cursor over one section of a [`Table`].
///
/// Freshly created iterators are positioned at the start of their section;
/// [`TableIter::seek_key`] repositions them in O(log n) block reads when
/// the section has an index and by scanning block heads otherwise.
pub struct TableIter {
    table: Table,
    /// The record type this iterator yields.
    section_type: BlockType,
    /// The type of the block currently under the cursor; differs from
    /// `section_type` while walking index levels.
    typ: BlockType,
    block_off: u64,
    iter: Option<BlockIter>,
    finished: bool,
}

impl TableIter {
    pub(crate) fn new(table: Table, typ: BlockType) -> Result<Self> {
        let mut iter = Self {
            table,
            section_type: typ,
            typ,
            block_off: 0,
            iter: None,
            finished: true,
        };
        if iter.table.section(typ).present {
            iter.seek_section_start(false)?;
        }
        Ok(iter)
    }

    fn seek_section_start(&mut self, index: bool) -> Result<()> {
        let section = self.table.section(self.section_type);
        let (off, typ) = if index {
            (section.index_offset, BlockType::Index)
        } else {
            (section.offset, self.section_type)
        };
        self.seek_block(off, Some(typ))
    }

    /// Points the cursor at the block starting at `off`.
    fn seek_block(&mut self, off: u64, want: Option<BlockType>) -> Result<()> {
        match self.table.read_block(off, want)? {
            Some(block) => {
                self.typ = block.block_type();
                self.block_off = off;
                self.iter = Some(BlockIter::new(block));
                self.finished = false;
                Ok(())
            }
            None => {
                self.iter = None;
                self.finished = true;
                Ok(())
            }
        }
    }

    /// Decodes the next record into `rec`. Returns `Ok(false)` once the
    /// section is exhausted.
    pub fn next(&mut self, rec: &mut Record) -> Result<bool> {
        if self.finished {
            return Ok(false);
        }
        if rec.block_type() != self.typ {
            return Err(Error::Api("record type does not match the iterator type"));
        }

        loop {
            if let Some(iter) = &mut self.iter {
                if iter.next(rec)? {
                    if let Record::Ref(r) = rec {
                        // stored relative to the table's base index
                        r.update_index += self.table.min_update_index();
                    }
                    return Ok(true);
                }
            }
            if !self.next_block()? {
                self.finished = true;
                return Ok(false);
            }
        }
    }

    fn next_block(&mut self) -> Result<bool> {
        let Some(iter) = &self.iter else {
            return Ok(false);
        };
        let next_off = self.block_off + iter.block().full_block_size() as u64;

        match self.table.read_block(next_off, Some(self.typ))? {
            Some(block) => {
                self.block_off = next_off;
                self.iter = Some(BlockIter::new(block));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Positions the cursor so that the next record has the smallest key
    /// `>= want`. Seeking past every record drains the iterator.
    pub fn seek_key(&mut self, want: &[u8]) -> Result<()> {
        let section = self.table.section(self.section_type);
        if !section.present {
            self.iter = None;
            self.finished = true;
            return Ok(());
        }

        if section.index_offset > 0 {
            self.seek_section_start(true)?;
            self.seek_indexed(want)
        } else {
            self.seek_section_start(false)?;
            self.seek_linear(want)
        }
    }

    /// Scans block heads until the next block starts past `want`, then
    /// seeks inside the current block.
    ///
    /// Only the first key of a block can be read cheaply, so the scan peeks
    /// at the following block and backs off by one.
    fn seek_linear(&mut self, want: &[u8]) -> Result<()> {
        let mut first_key = Vec::new();

        loop {
            let Some(iter) = &self.iter else {
                return Ok(());
            };
            let next_off = self.block_off + iter.block().full_block_size() as u64;

            let Some(block) = self.table.read_block(next_off, Some(self.typ))? else {
                break;
            };
            block.first_key(&mut first_key)?;
            if first_key.as_slice() > want {
                break;
            }

            self.block_off = next_off;
            self.iter = Some(BlockIter::new(block));
        }

        if let Some(iter) = &mut self.iter {
            iter.seek_key(want)?;
        }
        Ok(())
    }

    /// Walks the index levels down to the data block containing `want`.
    fn seek_indexed(&mut self, want: &[u8]) -> Result<()> {
        // the top level sits at the end of the index section, so a linear
        // scan across it never touches lower levels
        self.seek_linear(want)?;

        let mut rec = Record::new(BlockType::Index);
        loop {
            // a drained index level means the key is past everything the
            // section indexes
            if !self.next(&mut rec)? {
                return Ok(());
            }
            let Record::Index(index_rec) = &rec else {
                return Err(Error::Api("record type does not match the iterator type"));
            };

            self.seek_block(index_rec.offset, None)?;
            if self.finished {
                return Err(Error::Format("index record points past the table"));
            }
            if let Some(iter) = &mut self.iter {
                iter.seek_key(want)?;
            }

            if self.typ == self.section_type {
                return Ok(());
            }
            if self.typ != BlockType::Index {
                return Err(Error::Format("unexpected block type below an index"));
            }
        }
    }
}

enum RefsForState {
    /// Walking the block offsets listed in an obj record.
    Indexed {
        offsets: Vec<u64>,
        next: usize,
        cur: Option<BlockIter>,
    },

    /// No obj section (or an overlong obj record): filter a full scan.
    Scan(TableIter),

    /// The oid is not mentioned by this table.
    Empty,
}

/// Iterator over the refs of one table that point at a given object id.
pub struct RefsForIter {
    table: Table,
    oid: Vec<u8>,
    state: RefsForState,
}

impl RefsForIter {
    pub(crate) fn new(table: Table, oid: &[u8]) -> Result<Self> {
        if oid.len() != table.hash_id().size() {
            return Err(Error::Api("oid length does not match the table hash"));
        }

        let state = if table.section(BlockType::Obj).present {
            Self::indexed_state(&table, oid)?
        } else {
            RefsForState::Scan(table.iter(BlockType::Ref)?)
        };

        Ok(Self {
            table,
            oid: oid.to_vec(),
            state,
        })
    }

    fn indexed_state(table: &Table, oid: &[u8]) -> Result<RefsForState> {
        let prefix = oid
            .get(..table.object_id_len())
            .ok_or(Error::Format("object id width exceeds the hash size"))?;

        let mut iter = table.iter(BlockType::Obj)?;
        iter.seek_key(prefix)?;

        let mut rec = Record::new(BlockType::Obj);
        if !iter.next(&mut rec)? {
            return Ok(RefsForState::Empty);
        }
        let Record::Obj(obj) = rec else {
            return Err(Error::Api("record type does not match the iterator type"));
        };
        if obj.hash_prefix != prefix {
            return Ok(RefsForState::Empty);
        }

        if obj.offsets.is_empty() {
            // the writer dropped the positions because there were too many
            return Ok(RefsForState::Scan(table.iter(BlockType::Ref)?));
        }

        Ok(RefsForState::Indexed {
            offsets: obj.offsets,
            next: 0,
            cur: None,
        })
    }

    /// Yields the next matching ref record.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<RefRecord>> {
        let mut rec = Record::new(BlockType::Ref);

        match &mut self.state {
            RefsForState::Empty => Ok(None),

            RefsForState::Scan(iter) => {
                while iter.next(&mut rec)? {
                    let Record::Ref(r) = &rec else { continue };
                    if oid_matches(&self.oid, r) {
                        return Ok(Some(r.clone()));
                    }
                }
                Ok(None)
            }

            RefsForState::Indexed { offsets, next, cur } => loop {
                if let Some(iter) = cur.as_mut() {
                    while iter.next(&mut rec)? {
                        let Record::Ref(r) = &mut rec else { continue };
                        if oid_matches(&self.oid, r) {
                            // block-level records store the relative index
                            r.update_index += self.table.min_update_index();
                            return Ok(Some(r.clone()));
                        }
                    }
                    *cur = None;
                }

                if *next >= offsets.len() {
                    return Ok(None);
                }
                let off = offsets[*next];
                *next += 1;

                let block = self
                    .table
                    .read_block(off, Some(BlockType::Ref))?
                    .ok_or(Error::Format("object index points at a non-ref block"))?;
                *cur = Some(BlockIter::new(block));
            },
        }
    }
}

fn oid_matches(oid: &[u8], rec: &RefRecord) -> bool {
    match &rec.value {
        RefValue::Val1(hash) => hash.as_slice() == oid,
        RefValue::Val2 { value, peeled } => value.as_slice() == oid || peeled.as_slice() == oid,
        RefValue::Deletion | RefValue::Symref(_) => false,
    }
}
