// Copyright (c) 2024-present, reftable-rs
// This source code is licensed under the MIT License
// (found in the LICENSE file in the repository)

//! Reading whole reftable files.

pub(crate) mod iter;
pub(crate) mod writer;

pub use iter::{RefsForIter, TableIter};
pub use writer::{BlockStats, TableWriter, WriterStats};

use crate::{
    block::Block,
    block_source::BlockSource,
    format::{footer_size, header_size, BlockType, HashId, MAGIC},
    Error, Result,
};
use byteorder::{BigEndian, ReadBytesExt};
use std::sync::Arc;

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Section {
    pub present: bool,
    pub offset: u64,
    pub index_offset: u64,
}

struct Footer {
    hash_id: HashId,
    block_size: u32,
    min_update_index: u64,
    max_update_index: u64,
    object_id_len: usize,
    ref_section: Section,
    obj_section: Section,
    log_section: Section,
}

struct TableInner {
    source: Box<dyn BlockSource>,
    name: String,
    version: u8,
    hash_id: HashId,
    block_size: u32,
    min_update_index: u64,
    max_update_index: u64,
    object_id_len: usize,
    file_size: u64,
    /// File size minus the footer; blocks live below this offset.
    size: u64,
    ref_section: Section,
    obj_section: Section,
    log_section: Section,
}

/// One immutable reftable file.
///
/// A `Table` is a cheap handle; clones share the underlying block source,
/// so iterators keep a table alive across stack reloads and compactions.
#[derive(Clone)]
pub struct Table {
    inner: Arc<TableInner>,
}

impl Table {
    /// Opens the table backed by `source`, verifying header, footer and
    /// footer checksum.
    pub fn new(source: Box<dyn BlockSource>, name: &str) -> Result<Self> {
        let file_size = source.size();

        // probe with the larger v2 header plus the first block's type byte
        let probe_len = header_size(2) + 1;
        if file_size < (probe_len + footer_size(1)) as u64 {
            return Err(Error::Format("file is too small to be a reftable"));
        }
        let header = source.read_block(0, probe_len)?;

        if header[..4] != MAGIC {
            return Err(Error::Format("bad magic"));
        }
        let version = header[4];
        if version != 1 && version != 2 {
            return Err(Error::Format("unsupported format version"));
        }

        let footer_len = footer_size(version);
        let size = file_size
            .checked_sub(footer_len as u64)
            .ok_or(Error::Format("file is too small to be a reftable"))?;
        let footer = parse_footer(&source.read_block(size, footer_len)?, &header, version)?;

        Ok(Self {
            inner: Arc::new(TableInner {
                source,
                name: name.to_string(),
                version,
                hash_id: footer.hash_id,
                block_size: footer.block_size,
                min_update_index: footer.min_update_index,
                max_update_index: footer.max_update_index,
                object_id_len: footer.object_id_len,
                file_size,
                size,
                ref_section: footer.ref_section,
                obj_section: footer.obj_section,
                log_section: footer.log_section,
            }),
        })
    }

    /// Name this table is listed under in the stack manifest.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The object id flavor of this table.
    #[must_use]
    pub fn hash_id(&self) -> HashId {
        self.inner.hash_id
    }

    /// Smallest update index covered by this table.
    #[must_use]
    pub fn min_update_index(&self) -> u64 {
        self.inner.min_update_index
    }

    /// Largest update index covered by this table.
    #[must_use]
    pub fn max_update_index(&self) -> u64 {
        self.inner.max_update_index
    }

    pub(crate) fn file_size(&self) -> u64 {
        self.inner.file_size
    }

    pub(crate) fn section(&self, typ: BlockType) -> Section {
        match typ {
            BlockType::Ref => self.inner.ref_section,
            BlockType::Obj => self.inner.obj_section,
            BlockType::Log => self.inner.log_section,
            BlockType::Index => Section::default(),
        }
    }

    pub(crate) fn object_id_len(&self) -> usize {
        self.inner.object_id_len
    }

    /// Iterator over the ref section.
    pub fn ref_iter(&self) -> Result<TableIter> {
        TableIter::new(self.clone(), BlockType::Ref)
    }

    /// Iterator over the log section.
    pub fn log_iter(&self) -> Result<TableIter> {
        TableIter::new(self.clone(), BlockType::Log)
    }

    pub(crate) fn iter(&self, typ: BlockType) -> Result<TableIter> {
        TableIter::new(self.clone(), typ)
    }

    /// Iterator over the refs whose value points at `oid`, using the object
    /// index when the table has one and a filtered scan otherwise.
    pub fn refs_for(&self, oid: &[u8]) -> Result<RefsForIter> {
        RefsForIter::new(self.clone(), oid)
    }

    /// Reads one block starting at `off`.
    ///
    /// Returns `Ok(None)` past the last block, or when the block there is
    /// not of the wanted type (the end of a section).
    pub(crate) fn read_block(&self, off: u64, want: Option<BlockType>) -> Result<Option<Block>> {
        let inner = &self.inner;
        if off >= inner.size {
            return Ok(None);
        }

        let header_off = if off == 0 {
            header_size(inner.version)
        } else {
            0
        };
        let window = u64::from(inner.block_size).min(inner.size - off) as usize;
        let data = inner.source.read_block(off, window)?;

        Block::parse(data, header_off, inner.hash_id.size(), want)
    }
}

fn parse_footer(footer: &[u8], header: &[u8], version: u8) -> Result<Footer> {
    let head_len = header_size(version);

    if footer[..4] != MAGIC {
        return Err(Error::Format("bad footer magic"));
    }
    if footer[..head_len] != header[..head_len] {
        return Err(Error::Format("footer does not repeat the file header"));
    }

    let crc_pos = footer.len() - 4;
    let mut crc_bytes = &footer[crc_pos..];
    let expected = crc_bytes.read_u32::<BigEndian>()?;
    if crc32fast::hash(&footer[..crc_pos]) != expected {
        return Err(Error::Format("footer checksum mismatch"));
    }

    let mut rd = &footer[5..];
    let block_size = rd.read_u24::<BigEndian>()?;
    let min_update_index = rd.read_u64::<BigEndian>()?;
    let max_update_index = rd.read_u64::<BigEndian>()?;

    let hash_id = if version == 1 {
        HashId::Sha1
    } else {
        HashId::from_format_id(rd.read_u32::<BigEndian>()?)
            .ok_or(Error::Format("unknown hash format id"))?
    };

    let ref_index_offset = rd.read_u64::<BigEndian>()?;
    let obj_word = rd.read_u64::<BigEndian>()?;
    let object_id_len = (obj_word & 0x1f) as usize;
    let obj_offset = obj_word >> 5;
    let obj_index_offset = rd.read_u64::<BigEndian>()?;
    let log_offset = rd.read_u64::<BigEndian>()?;
    let log_index_offset = rd.read_u64::<BigEndian>()?;

    let first_block_type = header[head_len];

    let obj_section = Section {
        present: obj_offset > 0,
        offset: obj_offset,
        index_offset: obj_index_offset,
    };
    if obj_section.present && object_id_len == 0 {
        return Err(Error::Format("object section without an object id width"));
    }

    Ok(Footer {
        hash_id,
        block_size,
        min_update_index,
        max_update_index,
        object_id_len,
        ref_section: Section {
            present: first_block_type == b'r',
            offset: 0,
            index_offset: ref_index_offset,
        },
        obj_section,
        log_section: Section {
            present: first_block_type == b'g' || log_offset > 0,
            offset: log_offset,
            index_offset: log_index_offset,
        },
    })
}
