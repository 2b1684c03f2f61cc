// Copyright (c) 2024-present, reftable-rs
// This source code is licensed under the MIT License
// (found in the LICENSE file in the repository)

use super::{manifest_content, LockFile, Stack, MANIFEST_LOCK};
use crate::{
    block_source::FileBlockSource,
    format::BlockType,
    record::Record,
    refname::{validate_addition, RefUpdates},
    table::{Table, TableWriter},
    Error, Result,
};
use std::{
    fs::{File, OpenOptions},
    io::BufWriter,
    path::Path,
    sync::Arc,
};

/// An in-progress write of new tables to a [`Stack`].
///
/// Creating an addition takes the manifest lock; dropping it without
/// [`Addition::commit`] rolls everything back (written tables are
/// unlinked, the lock is released).
pub struct Addition<'a> {
    stack: &'a Stack,
    lock: Option<LockFile>,
    /// Manifest content at lock time, oldest first.
    base_names: Vec<String>,
    /// Tables visible when the addition started.
    base: Arc<Vec<Table>>,
    next_update_index: u64,
    new_tables: Vec<String>,
}

impl<'a> Addition<'a> {
    pub(crate) fn new(stack: &'a Stack) -> Result<Self> {
        let lock = LockFile::acquire(&stack.dir().join(MANIFEST_LOCK))?;

        // someone else may have committed since our last reload
        let base_names = stack.read_manifest()?;
        if base_names != stack.table_names() {
            log::debug!("stack is outdated, reloading before the addition");
            stack.reload()?;
        }

        Ok(Self {
            base: stack.snapshot(),
            next_update_index: stack.max_update_index() + 1,
            stack,
            lock: Some(lock),
            base_names,
            new_tables: Vec::new(),
        })
    }

    /// The update index the new table should use for its records.
    #[must_use]
    pub fn next_update_index(&self) -> u64 {
        self.next_update_index
    }

    /// Writes one new table. `write_fn` receives the table writer and is
    /// expected to set the update index limits and add records in key
    /// order.
    ///
    /// The table becomes visible to readers only after
    /// [`Addition::commit`]. Additions whose refs would violate the
    /// refname hierarchy fail with [`Error::NameConflict`] and leave the
    /// stack untouched; a `write_fn` that adds no records is fine and adds
    /// no table.
    #[allow(clippy::should_implement_trait)]
    pub fn add(
        &mut self,
        write_fn: impl FnOnce(&mut TableWriter<BufWriter<File>>) -> Result<()>,
    ) -> Result<()> {
        let name = format!(
            "{:016x}-{:08x}.ref",
            self.next_update_index,
            rand::random::<u32>(),
        );
        let temp_path = self.stack.dir().join(format!("{name}.lock"));

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        let mut writer = TableWriter::new(BufWriter::new(file), self.stack.options().clone())?;

        if let Err(e) = write_fn(&mut writer) {
            drop(writer);
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }

        match writer.finish() {
            Ok((out, _stats)) => {
                let file = out.into_inner().map_err(|e| Error::Io(e.into_error()))?;
                file.sync_all()?;
            }
            Err(Error::EmptyTable) => {
                let _ = std::fs::remove_file(&temp_path);
                return Ok(());
            }
            Err(e) => {
                let _ = std::fs::remove_file(&temp_path);
                return Err(e);
            }
        }

        let table = match self.validate_new_table(&temp_path) {
            Ok(table) => table,
            Err(e) => {
                let _ = std::fs::remove_file(&temp_path);
                return Err(e);
            }
        };

        std::fs::rename(&temp_path, self.stack.dir().join(&name))?;
        self.new_tables.push(name);
        self.next_update_index = self
            .next_update_index
            .max(table.max_update_index() + 1);
        Ok(())
    }

    /// Reads the finished table back and checks its ref updates against
    /// the pre-addition view.
    fn validate_new_table(&self, path: &Path) -> Result<Table> {
        let source = FileBlockSource::open(path)?;
        let table = Table::new(Box::new(source), "pending")?;

        let mut adds = Vec::new();
        let mut dels = Vec::new();
        let mut iter = table.ref_iter()?;
        let mut rec = Record::new(BlockType::Ref);
        while iter.next(&mut rec)? {
            let Record::Ref(r) = &rec else { continue };
            if r.is_deletion() {
                dels.push(r.refname.clone());
            } else {
                adds.push(r.refname.clone());
            }
        }

        validate_addition(&self.base, &RefUpdates { adds, dels })?;
        Ok(table)
    }

    /// Publishes the added tables: the held lock file receives the new
    /// manifest and is renamed over it, then the stack reloads so the
    /// addition is immediately visible.
    pub fn commit(mut self) -> Result<()> {
        let Some(lock) = self.lock.take() else {
            return Err(Error::Api("addition was already committed"));
        };

        if self.new_tables.is_empty() {
            drop(lock);
            return Ok(());
        }

        let mut names = self.base_names.clone();
        names.extend(self.new_tables.iter().cloned());
        lock.commit(&manifest_content(&names), self.stack.manifest_path())?;

        let added = self.new_tables.len();
        self.new_tables.clear();
        log::debug!("committed {added} new table(s)");

        self.stack.reload()?;

        if self.stack.options().auto_compact {
            match self.stack.auto_compact() {
                // another writer beat us to the lock; their compaction is
                // as good as ours
                Err(Error::LockTaken(_)) => {}
                other => other?,
            }
        }

        Ok(())
    }
}

impl Drop for Addition<'_> {
    fn drop(&mut self) {
        // roll back tables that never made it into the manifest; the lock
        // file (if still held) removes itself
        for name in &self.new_tables {
            let _ = std::fs::remove_file(self.stack.dir().join(name));
        }
    }
}
