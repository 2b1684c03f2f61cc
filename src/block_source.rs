// Copyright (c) 2024-present, reftable-rs
// This source code is licensed under the MIT License
// (found in the LICENSE file in the repository)

use crate::{Error, Result};
use std::{fs::File, ops::Range, path::Path, sync::Arc};

/// An owned, read-only view of bytes handed out by a [`BlockSource`].
#[derive(Clone)]
pub struct BlockData {
    data: Arc<[u8]>,
    range: Range<usize>,
}

impl BlockData {
    pub(crate) fn new(data: Arc<[u8]>, range: Range<usize>) -> Self {
        Self { data, range }
    }
}

impl From<Vec<u8>> for BlockData {
    fn from(value: Vec<u8>) -> Self {
        let range = 0..value.len();
        Self {
            data: value.into(),
            range,
        }
    }
}

impl std::ops::Deref for BlockData {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data.get(self.range.clone()).unwrap_or_default()
    }
}

impl AsRef<[u8]> for BlockData {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

/// Random-access reads over the bytes of one reftable file.
///
/// A source owns the underlying bytes; the [`BlockData`] views it hands out
/// stay valid independently of the source (they are dropped to release
/// them).
pub trait BlockSource: Send + Sync {
    /// Number of readable bytes.
    fn size(&self) -> u64;

    /// Reads `size` bytes starting at `offset`.
    fn read_block(&self, offset: u64, size: usize) -> Result<BlockData>;
}

/// Block source reading from a file with positional reads.
///
/// The file stays open for the lifetime of the source, so readers are not
/// disturbed when a compaction unlinks the table.
#[derive(Debug)]
pub struct FileBlockSource {
    file: File,
    size: u64,
}

impl FileBlockSource {
    /// Opens the table file at `path`.
    ///
    /// A missing file maps to [`Error::NotExist`] so the stack can
    /// distinguish a racing compaction from real I/O failure.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotExist(path.to_path_buf())
            } else {
                Error::Io(e)
            }
        })?;
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }
}

impl BlockSource for FileBlockSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_block(&self, offset: u64, size: usize) -> Result<BlockData> {
        if offset + size as u64 > self.size {
            return Err(Error::Format("read past the end of the table"));
        }

        let mut buf = vec![0u8; size];

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.read_exact_at(&mut buf, offset)?;
        }

        #[cfg(windows)]
        {
            use std::os::windows::fs::FileExt;

            let mut pos = 0;
            while pos < buf.len() {
                let read = self.file.seek_read(&mut buf[pos..], offset + pos as u64)?;
                if read == 0 {
                    return Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "table file shrank while reading",
                    )));
                }
                pos += read;
            }
        }

        Ok(BlockData::from(buf))
    }
}

/// Block source over an in-memory buffer.
///
/// Views are zero-copy slices into the shared buffer.
pub struct MemoryBlockSource {
    data: Arc<[u8]>,
}

impl MemoryBlockSource {
    /// Wraps `data` as a block source.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data: data.into() }
    }
}

impl BlockSource for MemoryBlockSource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_block(&self, offset: u64, size: usize) -> Result<BlockData> {
        let start = usize::try_from(offset).map_err(|_| Error::Format("table offset overflow"))?;
        let end = start
            .checked_add(size)
            .filter(|end| *end <= self.data.len())
            .ok_or(Error::Format("read past the end of the table"))?;
        Ok(BlockData::new(Arc::clone(&self.data), start..end))
    }
}
