// Copyright (c) 2024-present, reftable-rs
// This source code is licensed under the MIT License
// (found in the LICENSE file in the repository)

//! A stack of reftables in one directory.
//!
//! The `manifest` file lists the live tables, oldest first. Mutations
//! append new tables and rewrite the manifest under the `manifest.lock`
//! file; the lock file receives the new manifest body and is renamed over
//! the manifest, so the swap is atomic.

mod addition;

pub use addition::Addition;

use crate::{
    block_source::FileBlockSource,
    config::{LogExpiry, Options},
    format::{BlockType, HashId},
    merge::MergedIter,
    record::{LogRecord, LogValue, RefRecord},
    table::{Table, TableWriter},
    Error, Result,
};
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

pub(crate) const MANIFEST: &str = "manifest";
pub(crate) const MANIFEST_LOCK: &str = "manifest.lock";

/// Factor of the geometric sequence auto-compaction maintains across
/// table sizes.
const GEOMETRIC_FACTOR: u64 = 2;

/// An ordered collection of reftables in one directory.
///
/// Readers share the stack freely; every mutation swaps the table vector
/// under an internal mutex, and iterators created earlier keep reading
/// their snapshot through the tables' shared handles.
pub struct Stack {
    dir: PathBuf,
    manifest_path: PathBuf,
    opts: Options,
    tables: Mutex<Arc<Vec<Table>>>,
}

impl Stack {
    /// Opens the stack in `dir`, creating the directory if needed. A
    /// missing manifest means an empty stack.
    pub fn open(dir: impl AsRef<Path>, opts: Options) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let stack = Self {
            manifest_path: dir.join(MANIFEST),
            dir,
            opts,
            tables: Mutex::new(Arc::new(Vec::new())),
        };
        stack.reload()?;
        Ok(stack)
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub(crate) fn options(&self) -> &Options {
        &self.opts
    }

    /// The object id flavor of this stack.
    #[must_use]
    pub fn hash_id(&self) -> HashId {
        self.opts.hash_id
    }

    /// Number of tables currently in the stack.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.lock().len()
    }

    /// Whether the stack holds no tables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.lock().is_empty()
    }

    /// Largest update index committed to the stack (0 when empty).
    #[must_use]
    pub fn max_update_index(&self) -> u64 {
        self.snapshot().last().map_or(0, Table::max_update_index)
    }

    /// Snapshot of the tables currently in the stack, oldest first.
    ///
    /// The handles stay readable even when a later reload or compaction
    /// replaces them.
    #[must_use]
    pub fn tables(&self) -> Vec<Table> {
        self.snapshot().as_slice().to_vec()
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<Table>> {
        Arc::clone(&self.tables.lock())
    }

    pub(crate) fn table_names(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .map(|table| table.name().to_string())
            .collect()
    }

    pub(crate) fn read_manifest(&self) -> Result<Vec<String>> {
        match std::fs::read_to_string(&self.manifest_path) {
            Ok(content) => Ok(content
                .lines()
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Re-reads the manifest and (re-)opens the listed tables.
    ///
    /// A concurrent compaction may unlink a table between our manifest
    /// read and the open; retry a few times before giving up.
    pub fn reload(&self) -> Result<()> {
        let mut attempt = 0u64;
        loop {
            match self.reload_once() {
                Ok(()) => return Ok(()),
                Err(Error::NotExist(path)) if attempt < 5 => {
                    attempt += 1;
                    log::debug!(
                        "table {} vanished while reloading, retrying ({attempt})",
                        path.display(),
                    );
                    std::thread::sleep(Duration::from_millis(10 * attempt));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn reload_once(&self) -> Result<()> {
        let names = self.read_manifest()?;
        let current = self.snapshot();

        let mut tables = Vec::with_capacity(names.len());
        for name in &names {
            // keep already-open tables; reopening would invalidate nothing
            // but costs an mmap-ish probe per table
            if let Some(existing) = current.iter().find(|table| table.name() == name) {
                tables.push(existing.clone());
                continue;
            }

            let source = FileBlockSource::open(self.dir.join(name))?;
            let table = Table::new(Box::new(source), name)?;
            if table.hash_id() != self.opts.hash_id {
                return Err(Error::Format("table hash does not match the stack"));
            }
            log::trace!("opened table {name}");
            tables.push(table);
        }

        *self.tables.lock() = Arc::new(tables);
        Ok(())
    }

    /// Starts a new addition, taking the manifest lock.
    ///
    /// Fails with [`Error::LockTaken`] when another writer is active.
    pub fn new_addition(&self) -> Result<Addition<'_>> {
        Addition::new(self)
    }

    /// One-shot convenience: addition, `write_fn`, commit.
    #[allow(clippy::should_implement_trait)]
    pub fn add(
        &self,
        write_fn: impl FnOnce(&mut TableWriter<BufWriter<File>>) -> Result<()>,
    ) -> Result<()> {
        let mut addition = self.new_addition()?;
        addition.add(write_fn)?;
        addition.commit()
    }

    /// Merged iterator over all refs, with deleted refs hidden.
    pub fn ref_iter(&self) -> Result<MergedIter> {
        MergedIter::new(&self.snapshot(), BlockType::Ref, true)
    }

    /// Merged iterator over all log records, newest entry first per ref.
    pub fn log_iter(&self) -> Result<MergedIter> {
        MergedIter::new(&self.snapshot(), BlockType::Log, false)
    }

    /// Reads the current value of one ref, `None` when it does not exist
    /// or its newest record is a deletion.
    pub fn read_ref(&self, refname: &str) -> Result<Option<RefRecord>> {
        let tables = self.snapshot();
        let mut iter = MergedIter::new(&tables, BlockType::Ref, false)?;
        iter.seek_ref(refname)?;

        match iter.next_ref()? {
            Some(rec) if rec.refname == refname && !rec.is_deletion() => Ok(Some(rec)),
            _ => Ok(None),
        }
    }

    /// Reads the newest log entry of one ref.
    pub fn read_log(&self, refname: &str) -> Result<Option<LogRecord>> {
        let tables = self.snapshot();
        let mut iter = MergedIter::new(&tables, BlockType::Log, false)?;
        iter.seek_log(refname)?;

        match iter.next_log()? {
            Some(rec) if rec.refname == refname && !rec.is_deletion() => Ok(Some(rec)),
            _ => Ok(None),
        }
    }

    /// Merges every table into one, dropping deletion records and log
    /// records below the expiry thresholds.
    pub fn compact_all(&self, expiry: Option<&LogExpiry>) -> Result<()> {
        self.compact(false, expiry)
    }

    /// Compacts the shortest suffix of tables whose sizes fell out of the
    /// geometric sequence; a no-op when the sequence is intact.
    pub fn auto_compact(&self) -> Result<()> {
        self.compact(true, None)
    }

    fn compact(&self, auto: bool, expiry: Option<&LogExpiry>) -> Result<()> {
        let lock = LockFile::acquire(&self.dir.join(MANIFEST_LOCK))?;
        self.reload()?;
        let tables = self.snapshot();

        let (first, last) = if auto {
            let sizes: Vec<u64> = tables.iter().map(Table::file_size).collect();
            match suggest_compaction_segment(&sizes, GEOMETRIC_FACTOR) {
                Some(segment) => segment,
                None => return Ok(()),
            }
        } else {
            if tables.is_empty() {
                return Ok(());
            }
            (0, tables.len() - 1)
        };

        let subset = tables
            .get(first..=last)
            .ok_or(Error::Api("compaction range out of bounds"))?;
        let Some(first_table) = subset.first() else {
            return Ok(());
        };
        let Some(last_table) = subset.last() else {
            return Ok(());
        };
        log::debug!(
            "compacting tables {}..={} of {}",
            first,
            last,
            tables.len(),
        );

        let name = format!(
            "{:016x}-{:08x}.ref",
            last_table.max_update_index(),
            rand::random::<u32>(),
        );
        let temp_path = self.dir.join(format!("{name}.lock"));

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        let mut writer = TableWriter::new(BufWriter::new(file), self.opts.clone())?;
        writer.set_limits(
            first_table.min_update_index(),
            last_table.max_update_index(),
        )?;

        // tombstones still matter unless the compaction reaches the
        // bottom of the stack
        let keep_deletions = first > 0;

        let result = write_compacted(&mut writer, subset, keep_deletions, expiry)
            .and_then(|()| writer.finish());
        let new_table = match result {
            Ok((out, _stats)) => {
                let file = out
                    .into_inner()
                    .map_err(|e| Error::Io(e.into_error()))?;
                file.sync_all()?;
                std::fs::rename(&temp_path, self.dir.join(&name))?;
                Some(name)
            }
            Err(Error::EmptyTable) => {
                // everything merged away (all tombstones or expired logs)
                let _ = std::fs::remove_file(&temp_path);
                None
            }
            Err(e) => {
                let _ = std::fs::remove_file(&temp_path);
                return Err(e);
            }
        };

        let mut names = Vec::with_capacity(tables.len());
        for (i, table) in tables.iter().enumerate() {
            if i == first {
                if let Some(new_table) = &new_table {
                    names.push(new_table.clone());
                }
            }
            if (first..=last).contains(&i) {
                continue;
            }
            names.push(table.name().to_string());
        }

        lock.commit(&manifest_content(&names), &self.manifest_path)?;
        self.reload()?;

        for table in subset {
            let _ = std::fs::remove_file(self.dir.join(table.name()));
        }
        log::debug!(
            "compacted {} tables into {:?}",
            subset.len(),
            new_table.as_deref().unwrap_or("nothing"),
        );

        Ok(())
    }

    /// Removes `.ref` files in the stack directory that the manifest does
    /// not reference.
    pub fn clean(&self) -> Result<()> {
        let lock = LockFile::acquire(&self.dir.join(MANIFEST_LOCK))?;
        self.reload()?;

        let referenced: HashSet<String> = self.read_manifest()?.into_iter().collect();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".ref") && !referenced.contains(&name) {
                log::debug!("removing unreferenced table {name}");
                let _ = std::fs::remove_file(entry.path());
            }
        }

        drop(lock);
        Ok(())
    }
}

fn write_compacted<W: Write>(
    writer: &mut TableWriter<W>,
    tables: &[Table],
    keep_deletions: bool,
    expiry: Option<&LogExpiry>,
) -> Result<()> {
    let mut refs = MergedIter::new(tables, BlockType::Ref, false)?;
    while let Some(rec) = refs.next_ref()? {
        if !keep_deletions && rec.is_deletion() {
            continue;
        }
        writer.add_ref(&rec)?;
    }

    let mut logs = MergedIter::new(tables, BlockType::Log, false)?;
    while let Some(rec) = logs.next_log()? {
        if !keep_deletions && rec.is_deletion() {
            continue;
        }
        if let Some(expiry) = expiry {
            if expiry.min_update_index > 0 && rec.update_index < expiry.min_update_index {
                continue;
            }
            if expiry.time > 0 {
                if let LogValue::Update(update) = &rec.value {
                    if update.time < expiry.time {
                        continue;
                    }
                }
            }
        }
        writer.add_log(&rec)?;
    }

    Ok(())
}

pub(crate) fn manifest_content(names: &[String]) -> Vec<u8> {
    let mut content = names.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    content.into_bytes()
}

/// The manifest lock file. Its existence is the lock; committing turns it
/// into the next manifest via atomic rename, dropping it rolls back.
pub(crate) struct LockFile {
    path: PathBuf,
    file: Option<File>,
    committed: bool,
}

impl LockFile {
    pub(crate) fn acquire(path: &Path) -> Result<Self> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => Ok(Self {
                path: path.to_path_buf(),
                file: Some(file),
                committed: false,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(Error::LockTaken(path.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Writes `content`, fsyncs, and renames the lock file over `target`.
    pub(crate) fn commit(mut self, content: &[u8], target: &Path) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.write_all(content)?;
            file.sync_all()?;
        }
        std::fs::rename(&self.path, target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if !self.committed {
            self.file.take();
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Picks the range of tables (inclusive) whose merge restores
/// `size[i] >= factor * size[i + 1]` across the stack, scanning for the
/// violation closest to the newest table and then widening towards older
/// tables until the merged size fits under its predecessor again.
fn suggest_compaction_segment(sizes: &[u64], factor: u64) -> Option<(usize, usize)> {
    if sizes.len() <= 1 {
        return None;
    }

    let mut end = None;
    for i in (1..sizes.len()).rev() {
        if sizes[i - 1] < sizes[i].saturating_mul(factor) {
            end = Some(i);
            break;
        }
    }
    let end = end?;

    let mut bytes = sizes[end];
    let mut start = 0;
    for i in (1..=end).rev() {
        if sizes[i - 1] >= bytes.saturating_mul(factor) {
            start = i;
            break;
        }
        bytes += sizes[i - 1];
    }

    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometric_sequences_are_left_alone() {
        assert_eq!(None, suggest_compaction_segment(&[], GEOMETRIC_FACTOR));
        assert_eq!(None, suggest_compaction_segment(&[100], GEOMETRIC_FACTOR));
        assert_eq!(
            None,
            suggest_compaction_segment(&[64, 32, 16, 8, 4, 2, 1], GEOMETRIC_FACTOR)
        );
    }

    #[test]
    fn violating_suffix_is_merged() {
        // the newest pair violates (3 < 2 * 2) and every merge of a suffix
        // keeps violating against its predecessor, so everything merges
        assert_eq!(
            Some((0, 6)),
            suggest_compaction_segment(&[64, 32, 16, 8, 4, 3, 2], GEOMETRIC_FACTOR)
        );

        // equal sizes violate everywhere; everything merges
        assert_eq!(
            Some((0, 3)),
            suggest_compaction_segment(&[10, 10, 10, 10], GEOMETRIC_FACTOR)
        );
    }

    #[test]
    fn segment_widens_until_the_sequence_holds() {
        // merging only the last two (1 + 1 = 2) would still violate
        // against 3, so the table of size 3 joins the segment
        assert_eq!(
            Some((1, 3)),
            suggest_compaction_segment(&[100, 3, 1, 1], GEOMETRIC_FACTOR)
        );
    }

    #[test]
    fn manifest_body() {
        assert!(manifest_content(&[]).is_empty());
        assert_eq!(
            b"a.ref\nb.ref\n".to_vec(),
            manifest_content(&["a.ref".to_string(), "b.ref".to_string()])
        );
    }
}
