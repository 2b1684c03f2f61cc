// Copyright (c) 2024-present, reftable-rs
// This source code is licensed under the MIT License
// (found in the LICENSE file in the repository)

use crate::{
    block::writer::BlockWriter,
    coding::common_prefix_len,
    config::Options,
    format::{header_size, BlockType, MAGIC},
    record::{IndexRecord, LogRecord, ObjRecord, Record, RefRecord, RefValue},
    Error, Result,
};
use byteorder::{BigEndian, WriteBytesExt};
use std::{collections::BTreeMap, io::Write};

/// An index section is only worth writing once a section spans more blocks
/// than this; smaller sections are seeked linearly.
const INDEX_THRESHOLD: usize = 3;

/// Counters for one section of a finished table.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockStats {
    /// Number of records.
    pub entries: u64,

    /// Number of data blocks.
    pub blocks: u64,

    /// Number of index blocks covering the section.
    pub index_blocks: u64,

    /// Depth of the index tree; 0 means the section has no index.
    pub max_index_level: u64,

    /// Byte offset where the section starts.
    pub offset: u64,

    /// Byte offset of the top index level, 0 when there is no index.
    pub index_offset: u64,
}

/// Counters describing a finished table.
#[derive(Debug, Default, Clone, Copy)]
pub struct WriterStats {
    /// The ref section.
    pub ref_stats: BlockStats,

    /// The object index section.
    pub obj_stats: BlockStats,

    /// The log section.
    pub log_stats: BlockStats,

    /// All index blocks, across sections.
    pub idx_stats: BlockStats,

    /// Width of the abbreviated object ids in the obj section.
    pub object_id_len: usize,
}

/// Streams records into a new reftable.
///
/// Records must arrive in section order (refs, then logs) and in strictly
/// ascending key order within each section. The object index is derived
/// from the ref section and emitted automatically.
pub struct TableWriter<W: Write> {
    out: W,
    opts: Options,
    hash_size: usize,
    version: u8,

    /// Offset at which the next block will start.
    next: u64,
    limits_set: bool,
    min_update_index: u64,
    max_update_index: u64,

    block: Option<BlockWriter>,
    current_section: Option<BlockType>,
    /// One entry per flushed block of the section being written.
    index: Vec<IndexRecord>,
    last_key: Vec<u8>,
    key: Vec<u8>,

    /// Object id -> ref block offsets, for the obj section.
    obj_index: BTreeMap<Vec<u8>, Vec<u64>>,

    stats: WriterStats,
}

impl<W: Write> TableWriter<W> {
    /// Creates a writer that streams a table into `out`.
    pub fn new(out: W, opts: Options) -> Result<Self> {
        if opts.block_size == 0 || opts.block_size >= 1 << 24 {
            return Err(Error::Api("block size must be positive and smaller than 16 MiB"));
        }

        Ok(Self {
            out,
            hash_size: opts.hash_id.size(),
            version: opts.hash_id.version(),
            opts,
            next: 0,
            limits_set: false,
            min_update_index: 0,
            max_update_index: 0,
            block: None,
            current_section: None,
            index: Vec::new(),
            last_key: Vec::new(),
            key: Vec::new(),
            obj_index: BTreeMap::new(),
            stats: WriterStats::default(),
        })
    }

    /// Declares the update index range of this table. Must be called before
    /// the first ref record.
    pub fn set_limits(&mut self, min: u64, max: u64) -> Result<()> {
        if self.next > 0 || self.block.is_some() {
            return Err(Error::Api("limits must be set before any record is added"));
        }
        if min > max {
            return Err(Error::Api("min update index exceeds max update index"));
        }

        self.min_update_index = min;
        self.max_update_index = max;
        self.limits_set = true;
        Ok(())
    }

    /// Adds one ref record; keys must be strictly ascending.
    pub fn add_ref(&mut self, rec: &RefRecord) -> Result<()> {
        if !self.limits_set {
            return Err(Error::Api("limits must be set before adding refs"));
        }
        if rec.refname.is_empty() {
            return Err(Error::Api("refname must not be empty"));
        }
        if rec.update_index < self.min_update_index || rec.update_index > self.max_update_index {
            return Err(Error::Api("ref update index outside the declared limits"));
        }
        if self.current_section.is_some_and(|typ| typ != BlockType::Ref) {
            return Err(Error::Api("refs must be added before logs"));
        }
        self.current_section = Some(BlockType::Ref);

        // refs are stored relative to the table's min update index
        let mut stored = rec.clone();
        stored.update_index -= self.min_update_index;
        self.add_record(&Record::Ref(stored))?;

        if !self.opts.skip_index_objects {
            match &rec.value {
                RefValue::Val1(hash) => self.index_oid(hash),
                RefValue::Val2 { value, peeled } => {
                    self.index_oid(value);
                    self.index_oid(peeled);
                }
                RefValue::Deletion | RefValue::Symref(_) => {}
            }
        }

        Ok(())
    }

    /// Adds one log record; keys (refname, descending update index) must be
    /// strictly ascending.
    pub fn add_log(&mut self, rec: &LogRecord) -> Result<()> {
        if rec.refname.is_empty() || rec.refname.contains('\0') {
            return Err(Error::InvalidRefname(rec.refname.clone()));
        }

        if self.current_section == Some(BlockType::Ref) {
            self.finish_public_section()?;
        }
        self.current_section = Some(BlockType::Log);

        self.add_record(&Record::Log(rec.clone()))
    }

    /// Finalizes the table: remaining sections, footer, flush.
    ///
    /// Returns the output sink and the accumulated statistics. A table
    /// without a single record is reported as [`Error::EmptyTable`].
    pub fn finish(mut self) -> Result<(W, WriterStats)> {
        self.finish_public_section()?;

        if self.next == 0 {
            return Err(Error::EmptyTable);
        }

        let mut footer = self.file_header()?;
        footer.write_u64::<BigEndian>(self.stats.ref_stats.index_offset)?;
        footer.write_u64::<BigEndian>(
            self.stats.obj_stats.offset << 5 | self.stats.object_id_len as u64,
        )?;
        footer.write_u64::<BigEndian>(self.stats.obj_stats.index_offset)?;
        footer.write_u64::<BigEndian>(self.stats.log_stats.offset)?;
        footer.write_u64::<BigEndian>(self.stats.log_stats.index_offset)?;
        footer.write_u32::<BigEndian>(crc32fast::hash(&footer))?;

        self.out.write_all(&footer)?;
        self.out.flush()?;

        Ok((self.out, self.stats))
    }

    fn index_oid(&mut self, hash: &[u8]) {
        let offsets = self.obj_index.entry(hash.to_vec()).or_default();
        if offsets.last() != Some(&self.next) {
            offsets.push(self.next);
        }
    }

    fn add_record(&mut self, rec: &Record) -> Result<()> {
        rec.key(&mut self.key);
        if !self.last_key.is_empty() && self.key <= self.last_key {
            return Err(Error::Api("records must be added in ascending key order"));
        }
        self.last_key.clone_from(&self.key);

        if self.add_record_unchecked(rec)? {
            Ok(())
        } else {
            Err(Error::Api("record does not fit into a single block"))
        }
    }

    fn new_block(&self, typ: BlockType) -> BlockWriter {
        let header_off = if self.next == 0 {
            header_size(self.version)
        } else {
            0
        };
        BlockWriter::new(typ, self.opts.block_size as usize, header_off, self.hash_size)
    }

    /// Adds a record without the cross-block ordering check, flushing and
    /// retrying once when the open block is full. Returns whether the
    /// record fit at all.
    fn add_record_unchecked(&mut self, rec: &Record) -> Result<bool> {
        let typ = rec.block_type();

        if self.block.is_none() {
            self.block = Some(self.new_block(typ));
        }
        let block = self.block.as_mut().ok_or(Error::Api("no open block"))?;
        if block.block_type() != typ {
            return Err(Error::Api("record type does not match the open section"));
        }
        if block.add(rec)? {
            return Ok(true);
        }

        self.flush_block()?;
        self.block = Some(self.new_block(typ));
        let block = self.block.as_mut().ok_or(Error::Api("no open block"))?;
        block.add(rec)
    }

    /// Writes the open block out, padded to the block size unless it holds
    /// logs, and records it in the pending section index.
    fn flush_block(&mut self) -> Result<()> {
        let Some(block) = self.block.take() else {
            return Ok(());
        };
        if block.entries() == 0 {
            return Ok(());
        }

        let typ = block.block_type();
        let entries = block.entries() as u64;
        let last_key = block.last_key().to_vec();

        let mut buf = block.finish()?;
        if self.next == 0 {
            let header = self.file_header()?;
            buf[..header.len()].copy_from_slice(&header);
        }

        let padding = if typ == BlockType::Log {
            0
        } else {
            self.opts.block_size as usize - buf.len()
        };

        let next = self.next;
        let section = self.stats_mut(typ);
        if section.blocks == 0 {
            section.offset = next;
        }
        section.blocks += 1;
        section.entries += entries;

        self.out.write_all(&buf)?;
        if padding > 0 {
            self.out.write_all(&vec![0u8; padding])?;
        }

        self.index.push(IndexRecord {
            last_key,
            offset: self.next,
        });
        self.next += (buf.len() + padding) as u64;

        Ok(())
    }

    /// Flushes the section and emits its index, stacking index levels until
    /// the top level fits a handful of blocks.
    fn finish_section(&mut self, typ: BlockType) -> Result<()> {
        self.flush_block()?;

        let mut index_start = 0;
        let mut max_level = 0;
        let index_blocks_before = self.stats.idx_stats.blocks;

        while self.index.len() > INDEX_THRESHOLD {
            max_level += 1;
            index_start = self.next;

            // flushing the index blocks repopulates `self.index` with one
            // entry per index block, forming the next level up
            let entries = std::mem::take(&mut self.index);
            for entry in &entries {
                if !self.add_record_unchecked(&Record::Index(entry.clone()))? {
                    return Err(Error::Api("index record does not fit into a single block"));
                }
            }
            self.flush_block()?;
        }
        self.index.clear();

        let index_blocks = self.stats.idx_stats.blocks - index_blocks_before;
        let section = self.stats_mut(typ);
        section.index_blocks = index_blocks;
        section.index_offset = index_start;
        section.max_index_level = max_level;

        self.last_key.clear();
        Ok(())
    }

    fn finish_public_section(&mut self) -> Result<()> {
        match self.current_section.take() {
            Some(BlockType::Ref) => {
                self.finish_section(BlockType::Ref)?;
                if !self.opts.skip_index_objects && !self.obj_index.is_empty() {
                    self.write_object_index()?;
                }
                Ok(())
            }
            Some(typ) => self.finish_section(typ),
            None => Ok(()),
        }
    }

    fn write_object_index(&mut self) -> Result<()> {
        // use the shortest prefix that still tells all indexed ids apart
        let mut max_common = 1;
        let mut prev: Option<&Vec<u8>> = None;
        for hash in self.obj_index.keys() {
            if let Some(prev) = prev {
                max_common = max_common.max(common_prefix_len(prev, hash));
            }
            prev = Some(hash);
        }
        let prefix_len = (max_common + 1).min(self.hash_size);
        self.stats.object_id_len = prefix_len;

        for (hash, offsets) in std::mem::take(&mut self.obj_index) {
            let mut hash_prefix = hash;
            hash_prefix.truncate(prefix_len);

            let rec = ObjRecord {
                hash_prefix: hash_prefix.clone(),
                offsets,
            };
            if !self.add_record_unchecked(&Record::Obj(rec))? {
                // too many positions to spell out; record the prefix alone
                let rec = ObjRecord {
                    hash_prefix,
                    offsets: Vec::new(),
                };
                if !self.add_record_unchecked(&Record::Obj(rec))? {
                    return Err(Error::Api("object record does not fit into a single block"));
                }
            }
        }

        self.finish_section(BlockType::Obj)
    }

    fn file_header(&self) -> Result<Vec<u8>> {
        let mut header = Vec::with_capacity(header_size(self.version));
        header.extend_from_slice(&MAGIC);
        header.push(self.version);
        header.write_u24::<BigEndian>(self.opts.block_size)?;
        header.write_u64::<BigEndian>(self.min_update_index)?;
        header.write_u64::<BigEndian>(self.max_update_index)?;
        if self.version == 2 {
            header.write_u32::<BigEndian>(self.opts.hash_id.format_id())?;
        }
        Ok(header)
    }

    fn stats_mut(&mut self, typ: BlockType) -> &mut BlockStats {
        match typ {
            BlockType::Ref => &mut self.stats.ref_stats,
            BlockType::Obj => &mut self.stats.obj_stats,
            BlockType::Log => &mut self.stats.log_stats,
            BlockType::Index => &mut self.stats.idx_stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn val1(name: &str, index: u64, byte: u8) -> RefRecord {
        RefRecord {
            refname: name.to_string(),
            update_index: index,
            value: RefValue::Val1(vec![byte; 20]),
        }
    }

    #[test]
    fn empty_table_is_an_error() {
        let writer = TableWriter::new(Vec::new(), Options::default()).expect("should create");
        assert!(matches!(writer.finish(), Err(Error::EmptyTable)));
    }

    #[test]
    fn limits_are_enforced() {
        let mut writer = TableWriter::new(Vec::new(), Options::default()).expect("should create");
        assert!(matches!(
            writer.add_ref(&val1("refs/heads/main", 1, 1)),
            Err(Error::Api(_))
        ));

        writer.set_limits(5, 6).expect("should set limits");
        assert!(matches!(
            writer.add_ref(&val1("refs/heads/main", 4, 1)),
            Err(Error::Api(_))
        ));
        writer.add_ref(&val1("refs/heads/main", 5, 1)).expect("in range");
    }

    #[test]
    fn rejects_unsorted_refs() {
        let mut writer = TableWriter::new(Vec::new(), Options::default()).expect("should create");
        writer.set_limits(1, 1).expect("should set limits");
        writer.add_ref(&val1("refs/heads/b", 1, 1)).expect("should add");
        assert!(matches!(
            writer.add_ref(&val1("refs/heads/a", 1, 1)),
            Err(Error::Api(_))
        ));
    }

    #[test]
    fn single_ref_table_layout() {
        let mut writer = TableWriter::new(Vec::new(), Options::default()).expect("should create");
        writer.set_limits(1, 1).expect("should set limits");
        writer.add_ref(&val1("refs/heads/main", 1, 0xab)).expect("should add");

        let (buf, stats) = writer.finish().expect("should finish");

        assert_eq!(1, stats.ref_stats.blocks);
        assert_eq!(1, stats.ref_stats.entries);
        assert_eq!(0, stats.ref_stats.index_offset);
        assert_eq!(1, stats.obj_stats.blocks);

        // header + first ref block padded to the block size, obj block,
        // then the footer
        assert_eq!(&MAGIC, &buf[..4]);
        assert_eq!(1, buf[4]);
        assert_eq!(b'r', buf[24]);
        assert_eq!(b'o', buf[4_096]);
        assert_eq!(&MAGIC, &buf[buf.len() - 68..][..4]);
    }

    #[test]
    fn footer_crc_matches_content() {
        let mut writer = TableWriter::new(Vec::new(), Options::default()).expect("should create");
        writer.set_limits(1, 1).expect("should set limits");
        writer.add_ref(&val1("refs/heads/main", 1, 0xab)).expect("should add");

        let (buf, _) = writer.finish().expect("should finish");
        let footer = &buf[buf.len() - 68..];
        let expected = u32::from_be_bytes([footer[64], footer[65], footer[66], footer[67]]);
        assert_eq!(expected, crc32fast::hash(&footer[..64]));
    }

    #[test]
    fn large_ref_section_gets_an_index() {
        let mut writer = TableWriter::new(Vec::new(), Options::default()).expect("should create");
        writer.set_limits(1, 1).expect("should set limits");

        for i in 0..2_000u64 {
            writer
                .add_ref(&val1(&format!("refs/heads/branch-{i:05}"), 1, (i % 251) as u8))
                .expect("should add");
        }

        let (_, stats) = writer.finish().expect("should finish");
        assert!(stats.ref_stats.blocks > INDEX_THRESHOLD as u64);
        assert!(stats.ref_stats.index_offset > 0);
        assert!(stats.ref_stats.index_blocks > 0);
        assert!(stats.ref_stats.max_index_level >= 1);
    }

    #[test]
    fn deletions_are_not_object_indexed() {
        let mut writer = TableWriter::new(Vec::new(), Options::default()).expect("should create");
        writer.set_limits(2, 2).expect("should set limits");
        writer
            .add_ref(&RefRecord {
                refname: "refs/heads/gone".to_string(),
                update_index: 2,
                value: RefValue::Deletion,
            })
            .expect("should add");

        let (_, stats) = writer.finish().expect("should finish");
        assert_eq!(0, stats.obj_stats.blocks);
        assert_eq!(0, stats.object_id_len);
    }
}
