// Copyright (c) 2024-present, reftable-rs
// This source code is licensed under the MIT License
// (found in the LICENSE file in the repository)

use crate::format::{HashId, DEFAULT_BLOCK_SIZE};

/// Configuration for a stack and the tables it writes.
///
/// # Example
///
/// ```
/// use reftable::{HashId, Options};
///
/// let opts = Options::default()
///     .block_size(8 * 1_024)
///     .hash_id(HashId::Sha256)
///     .auto_compact(false);
/// ```
#[derive(Debug, Clone)]
pub struct Options {
    pub(crate) block_size: u32,
    pub(crate) hash_id: HashId,
    pub(crate) auto_compact: bool,
    pub(crate) skip_index_objects: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            hash_id: HashId::Sha1,
            auto_compact: true,
            skip_index_objects: false,
        }
    }
}

impl Options {
    /// Sets the block size in bytes (default 4 KiB, must be smaller than
    /// 16 MiB).
    #[must_use]
    pub fn block_size(mut self, bytes: u32) -> Self {
        self.block_size = bytes;
        self
    }

    /// Sets the object id flavor (default SHA-1).
    #[must_use]
    pub fn hash_id(mut self, hash_id: HashId) -> Self {
        self.hash_id = hash_id;
        self
    }

    /// Whether committing an addition triggers compaction when the table
    /// sizes have degenerated (default true).
    #[must_use]
    pub fn auto_compact(mut self, enabled: bool) -> Self {
        self.auto_compact = enabled;
        self
    }

    /// Skips writing the object index section, trading "which refs point
    /// at this object id" lookups for smaller tables (default false).
    #[must_use]
    pub fn skip_index_objects(mut self, skip: bool) -> Self {
        self.skip_index_objects = skip;
        self
    }
}

/// Expiry thresholds applied to log records while compacting.
///
/// A zero field disables that check.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogExpiry {
    /// Drop log entries recorded before this time (seconds since epoch).
    pub time: u64,

    /// Drop log entries below this update index.
    pub min_update_index: u64,
}
