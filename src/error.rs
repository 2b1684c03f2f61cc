// Copyright (c) 2024-present, reftable-rs
// This source code is licensed under the MIT License
// (found in the LICENSE file in the repository)

use std::path::PathBuf;

/// Represents errors that can occur when reading or writing reftables
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Table data does not match the on-disk format
    /// (bad magic, checksum mismatch, truncated block, ...)
    Format(&'static str),

    /// API misuse, e.g. records added out of order or an iterator
    /// driven with the wrong record type
    Api(&'static str),

    /// The manifest lock is already held by another writer
    LockTaken(PathBuf),

    /// Adding a ref would violate the refname hierarchy
    NameConflict {
        /// The refname that was being added
        name: String,

        /// The existing or pending refname it collides with
        conflicts_with: String,
    },

    /// A refname contains forbidden syntax
    InvalidRefname(String),

    /// A table listed in the manifest does not exist
    NotExist(PathBuf),

    /// Inflating or deflating a log block failed
    Zlib,

    /// The table writer was finished without any records
    EmptyTable,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReftableError: {self:?}")
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Reftable result
pub type Result<T> = std::result::Result<T, Error>;
