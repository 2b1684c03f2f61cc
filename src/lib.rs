// Copyright (c) 2024-present, reftable-rs
// This source code is licensed under the MIT License
// (found in the LICENSE file in the repository)

//! An implementation of the reftable format for storing references and
//! reflogs.
//!
//! Reftables are immutable, block-structured files holding refs, reflog
//! entries and an optional reverse object-id index, with prefix-compressed
//! keys, an embedded multi-level index for O(log n) seeks, and a
//! CRC-checked footer. A directory of reftables forms a [`Stack`]: a
//! manifest lists the live tables, mutations append new tables under a
//! lock file, and compaction merges adjacent tables back together while
//! concurrent readers keep iterating their snapshot.
//!
//! Deleted refs are represented as tombstone records that hide matching
//! records in older tables, and the stack maintains the refname hierarchy
//! invariant: `refs/a` and `refs/a/b` can never coexist.
//!
//! # Example usage
//!
//! ```
//! use reftable::{Options, RefRecord, RefValue, Stack};
//!
//! # fn main() -> reftable::Result<()> {
//! let dir = tempfile::tempdir()?;
//! let stack = Stack::open(&dir, Options::default())?;
//!
//! // one transaction: a new table holding a single ref
//! let mut addition = stack.new_addition()?;
//! let update_index = addition.next_update_index();
//! addition.add(|writer| {
//!     writer.set_limits(update_index, update_index)?;
//!     writer.add_ref(&RefRecord {
//!         refname: "refs/heads/main".to_string(),
//!         update_index,
//!         value: RefValue::Val1(vec![0xaa; 20]),
//!     })
//! })?;
//! addition.commit()?;
//!
//! // read-your-writes
//! let rec = stack.read_ref("refs/heads/main")?;
//! assert_eq!(Some(RefValue::Val1(vec![0xaa; 20])), rec.map(|r| r.value));
//!
//! // iterate everything
//! let mut refs = stack.ref_iter()?;
//! while let Some(rec) = refs.next_ref()? {
//!     println!("{}: {:?}", rec.refname, rec.value);
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]

mod block;
mod block_source;
mod coding;
mod config;
mod error;
mod format;
mod merge;
mod record;
mod refname;
mod stack;
mod table;

pub use {
    block_source::{BlockData, BlockSource, FileBlockSource, MemoryBlockSource},
    config::{LogExpiry, Options},
    error::{Error, Result},
    format::{BlockType, HashId, DEFAULT_BLOCK_SIZE, MAGIC},
    merge::MergedIter,
    record::{
        IndexRecord, LogRecord, LogUpdate, LogValue, ObjRecord, Record, RefRecord, RefValue,
    },
    stack::{Addition, Stack},
    table::{BlockStats, RefsForIter, Table, TableIter, TableWriter, WriterStats},
};
