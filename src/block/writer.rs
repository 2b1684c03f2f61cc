// Copyright (c) 2024-present, reftable-rs
// This source code is licensed under the MIT License
// (found in the LICENSE file in the repository)

use crate::{
    format::{BlockType, MAX_RESTARTS, RESTART_INTERVAL},
    record::{encode_key, Record},
    Error, Result,
};
use flate2::{write::ZlibEncoder, Compression};
use std::io::Write;

/// Assembles records into one fixed-size block.
///
/// Records are delta-encoded against their predecessor; every
/// `RESTART_INTERVAL`-th record is written with a full key and registered
/// as a restart point for seeking.
pub(crate) struct BlockWriter {
    typ: BlockType,
    buf: Vec<u8>,
    block_size: usize,
    header_off: usize,
    hash_size: usize,
    restarts: Vec<u32>,
    last_key: Vec<u8>,
    entries: usize,

    // staging buffers reused across `add` calls
    encoded: Vec<u8>,
    key: Vec<u8>,
}

impl BlockWriter {
    /// `header_off` reserves space for the file header in block 0.
    pub(crate) fn new(
        typ: BlockType,
        block_size: usize,
        header_off: usize,
        hash_size: usize,
    ) -> Self {
        let mut buf = Vec::with_capacity(block_size);
        buf.resize(header_off, 0);
        buf.push(typ.as_u8());
        buf.extend_from_slice(&[0, 0, 0]); // length, patched in finish()

        Self {
            typ,
            buf,
            block_size,
            header_off,
            hash_size,
            restarts: Vec::new(),
            last_key: Vec::new(),
            entries: 0,
            encoded: Vec::new(),
            key: Vec::new(),
        }
    }

    pub(crate) fn block_type(&self) -> BlockType {
        self.typ
    }

    pub(crate) fn entries(&self) -> usize {
        self.entries
    }

    pub(crate) fn last_key(&self) -> &[u8] {
        &self.last_key
    }

    /// Adds a record. Returns `Ok(false)` when the block has no room left,
    /// leaving the block unchanged.
    pub(crate) fn add(&mut self, rec: &Record) -> Result<bool> {
        rec.key(&mut self.key);
        if self.key.is_empty() {
            return Err(Error::Api("records must have a non-empty key"));
        }
        if !self.last_key.is_empty() && self.key <= self.last_key {
            return Err(Error::Api("records must be added in ascending key order"));
        }

        let prev: &[u8] = if self.entries % RESTART_INTERVAL == 0 {
            &[]
        } else {
            &self.last_key
        };

        self.encoded.clear();
        let restart = encode_key(&mut self.encoded, prev, &self.key, rec.val_type());
        rec.encode(&mut self.encoded, self.hash_size)?;

        // restart anchors stop once the u16 count would overflow; the
        // record itself still carries its full key
        let is_restart = restart && self.restarts.len() < MAX_RESTARTS;
        let restart_len = self.restarts.len() + usize::from(is_restart);

        if self.buf.len() + self.encoded.len() + 3 * restart_len + 2 > self.block_size {
            return Ok(false);
        }

        if is_restart {
            self.restarts.push(self.buf.len() as u32);
        }
        self.buf.extend_from_slice(&self.encoded);
        std::mem::swap(&mut self.last_key, &mut self.key);
        self.entries += 1;

        Ok(true)
    }

    /// Finalizes the block and returns its bytes, deflated for log blocks.
    ///
    /// The length field counts the uncompressed bytes up to and including
    /// the restart count; callers pad non-log blocks up to the block size.
    pub(crate) fn finish(mut self) -> Result<Vec<u8>> {
        for restart in &self.restarts {
            let bytes = restart.to_be_bytes();
            self.buf.extend_from_slice(&bytes[1..]);
        }
        let count = (self.restarts.len() as u16).to_be_bytes();
        self.buf.extend_from_slice(&count);

        let len_bytes = (self.buf.len() as u32).to_be_bytes();
        self.buf[self.header_off + 1..self.header_off + 4].copy_from_slice(&len_bytes[1..]);

        if self.typ == BlockType::Log {
            let skip = self.header_off + 4;
            let mut encoder =
                ZlibEncoder::new(Vec::with_capacity(self.buf.len()), Compression::default());
            encoder.write_all(&self.buf[skip..])?;
            let compressed = encoder.finish().map_err(|_| Error::Zlib)?;

            self.buf.truncate(skip);
            self.buf.extend_from_slice(&compressed);
        }

        Ok(self.buf)
    }
}
