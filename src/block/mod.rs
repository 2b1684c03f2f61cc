// Copyright (c) 2024-present, reftable-rs
// This source code is licensed under the MIT License
// (found in the LICENSE file in the repository)

//! Parsing and iteration of single blocks.

pub(crate) mod iter;
pub(crate) mod writer;

use crate::{
    block_source::BlockData,
    format::BlockType,
    record::decode_key,
    Error, Result,
};
use flate2::{Decompress, FlushDecompress};

enum BlockBuf {
    /// Borrowed from the block source (ref, obj, index blocks).
    Raw(BlockData),

    /// Inflated copy owned by the block (log blocks).
    Inflated(Vec<u8>),
}

impl BlockBuf {
    fn as_slice(&self) -> &[u8] {
        match self {
            Self::Raw(data) => data,
            Self::Inflated(data) => data,
        }
    }
}

/// One parsed block.
pub(crate) struct Block {
    typ: BlockType,
    header_off: usize,
    buf: BlockBuf,
    /// Where the restart table begins; record data ends here.
    restart_off: usize,
    restart_count: u16,
    /// Bytes this block occupies on disk.
    full_block_size: usize,
    hash_size: usize,
}

impl Block {
    /// Parses the block at the start of `data`.
    ///
    /// `data` is the read window for this block: up to one block size, less
    /// at the end of the file. Returns `Ok(None)` when the block exists but
    /// has a different type than `want`, which marks the end of a section.
    pub(crate) fn parse(
        data: BlockData,
        header_off: usize,
        hash_size: usize,
        want: Option<BlockType>,
    ) -> Result<Option<Self>> {
        let raw: &[u8] = &data;

        let type_byte = *raw
            .get(header_off)
            .ok_or(Error::Format("truncated block header"))?;
        let typ =
            BlockType::from_u8(type_byte).ok_or(Error::Format("unknown block type"))?;
        if want.is_some_and(|want| want != typ) {
            return Ok(None);
        }

        let len_bytes = raw
            .get(header_off + 1..header_off + 4)
            .ok_or(Error::Format("truncated block header"))?;
        let block_len = u32::from_be_bytes([0, len_bytes[0], len_bytes[1], len_bytes[2]]) as usize;

        let skip = header_off + 4;
        let (buf, full_block_size) = if typ == BlockType::Log {
            // the length field of a log block counts the *uncompressed*
            // bytes; everything after the plain 4-byte prefix is one zlib
            // stream
            if block_len < skip {
                return Err(Error::Format("log block shorter than its header"));
            }

            let mut out = Vec::with_capacity(block_len + 1);
            out.extend_from_slice(raw.get(..skip).ok_or(Error::Format("truncated log block"))?);

            let compressed = raw.get(skip..).unwrap_or_default();
            let mut inflater = Decompress::new(true);

            // running out of buffer exactly at the block boundary is not
            // corruption; the size check decides
            let _ = inflater
                .decompress_vec(compressed, &mut out, FlushDecompress::Finish)
                .map_err(|_| Error::Zlib)?;
            if out.len() != block_len {
                return Err(Error::Zlib);
            }

            let consumed = inflater.total_in() as usize;
            (BlockBuf::Inflated(out), skip + consumed)
        } else {
            let full = data.len();
            (BlockBuf::Raw(data), full)
        };

        let slice = buf.as_slice();
        if block_len > slice.len() || block_len < skip + 2 {
            return Err(Error::Format("block length out of range"));
        }

        let count_bytes = slice
            .get(block_len - 2..block_len)
            .ok_or(Error::Format("truncated restart count"))?;
        let restart_count = u16::from_be_bytes([count_bytes[0], count_bytes[1]]);

        let restart_off = block_len
            .checked_sub(2 + 3 * restart_count as usize)
            .filter(|off| *off >= skip)
            .ok_or(Error::Format("restart table overflows the block"))?;

        Ok(Some(Self {
            typ,
            header_off,
            buf,
            restart_off,
            restart_count,
            full_block_size,
            hash_size,
        }))
    }

    pub(crate) fn block_type(&self) -> BlockType {
        self.typ
    }

    pub(crate) fn header_off(&self) -> usize {
        self.header_off
    }

    pub(crate) fn data(&self) -> &[u8] {
        self.buf.as_slice()
    }

    /// Offset one past the last record byte.
    pub(crate) fn record_end(&self) -> usize {
        self.restart_off
    }

    pub(crate) fn restart_count(&self) -> u16 {
        self.restart_count
    }

    pub(crate) fn full_block_size(&self) -> usize {
        self.full_block_size
    }

    pub(crate) fn hash_size(&self) -> usize {
        self.hash_size
    }

    /// Absolute in-block offset of the `i`-th restart record.
    pub(crate) fn restart_offset(&self, i: usize) -> Result<usize> {
        let pos = self.restart_off + 3 * i;
        let bytes = self
            .data()
            .get(pos..pos + 3)
            .ok_or(Error::Format("restart index out of range"))?;
        Ok(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]) as usize)
    }

    /// Reads the key of the first record into `out`.
    pub(crate) fn first_key(&self, out: &mut Vec<u8>) -> Result<()> {
        out.clear();
        let mut input = self
            .data()
            .get(self.header_off + 4..self.record_end())
            .ok_or(Error::Format("block record area out of range"))?;
        decode_key(out, &mut input)?;
        Ok(())
    }
}
