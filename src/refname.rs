// Copyright (c) 2024-present, reftable-rs
// This source code is licensed under the MIT License
// (found in the LICENSE file in the repository)

//! Refname syntax checks and the hierarchy invariant.
//!
//! Across the live view of a stack, no refname may be a directory prefix
//! of another: `refs/a` and `refs/a/b` cannot coexist. Pending additions
//! are checked against the base view plus the addition's own adds and
//! deletes before they become visible.

use crate::{format::BlockType, merge::MergedIter, table::Table, Error, Result};

/// The ref updates of one pending addition; both lists sorted ascending.
pub(crate) struct RefUpdates {
    pub adds: Vec<String>,
    pub dels: Vec<String>,
}

/// Rejects empty names, embedded NUL, and empty, `.` or `..` path
/// components.
pub(crate) fn validate_refname(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('\0') {
        return Err(Error::InvalidRefname(name.to_string()));
    }
    for component in name.split('/') {
        if component.is_empty() || component == "." || component == ".." {
            return Err(Error::InvalidRefname(name.to_string()));
        }
    }
    Ok(())
}

/// Checks that applying `updates` on top of `tables` keeps the refname
/// hierarchy free of directory conflicts.
pub(crate) fn validate_addition(tables: &[Table], updates: &RefUpdates) -> Result<()> {
    for name in &updates.adds {
        validate_refname(name)?;

        // nothing may live below the new name
        let prefix = format!("{name}/");
        if let Some(below) = ref_with_prefix(tables, updates, &prefix)? {
            return Err(Error::NameConflict {
                name: name.clone(),
                conflicts_with: below,
            });
        }

        // and no parent directory of the new name may itself be a ref
        let mut parent = name.as_str();
        while let Some(pos) = parent.rfind('/') {
            parent = &parent[..pos];
            if ref_exists(tables, updates, parent)? {
                return Err(Error::NameConflict {
                    name: name.clone(),
                    conflicts_with: parent.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Whether `name` is a live ref once `updates` are applied.
fn ref_exists(tables: &[Table], updates: &RefUpdates, name: &str) -> Result<bool> {
    if updates
        .adds
        .binary_search_by(|add| add.as_str().cmp(name))
        .is_ok()
    {
        return Ok(true);
    }
    if updates
        .dels
        .binary_search_by(|del| del.as_str().cmp(name))
        .is_ok()
    {
        return Ok(false);
    }

    let mut iter = MergedIter::new(tables, BlockType::Ref, false)?;
    iter.seek_ref(name)?;
    match iter.next_ref()? {
        Some(rec) if rec.refname == name => Ok(!rec.is_deletion()),
        _ => Ok(false),
    }
}

/// Returns a live refname starting with `prefix`, if any, once `updates`
/// are applied.
fn ref_with_prefix(
    tables: &[Table],
    updates: &RefUpdates,
    prefix: &str,
) -> Result<Option<String>> {
    let idx = updates.adds.partition_point(|add| add.as_str() < prefix);
    if let Some(add) = updates.adds.get(idx) {
        if add.starts_with(prefix) {
            return Ok(Some(add.clone()));
        }
    }

    let mut iter = MergedIter::new(tables, BlockType::Ref, true)?;
    iter.seek_ref(prefix)?;
    while let Some(rec) = iter.next_ref()? {
        if !rec.refname.starts_with(prefix) {
            break;
        }
        if updates
            .dels
            .binary_search_by(|del| del.as_str().cmp(rec.refname.as_str()))
            .is_ok()
        {
            continue;
        }
        return Ok(Some(rec.refname));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax() {
        for ok in ["refs/heads/main", "HEAD", "refs/heads/a.b", "refs/x-y/z_1"] {
            assert!(validate_refname(ok).is_ok(), "{ok} should be valid");
        }

        for bad in [
            "",
            "/",
            "refs//heads",
            "refs/heads/",
            "/refs/heads",
            "refs/./main",
            "refs/../main",
            "refs/heads/.",
            "refs/heads/..",
            ".",
            "..",
            "refs/he\0ads",
        ] {
            assert!(
                matches!(validate_refname(bad), Err(Error::InvalidRefname(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn conflicts_within_one_addition() {
        let updates = RefUpdates {
            adds: vec!["refs/a".to_string(), "refs/a/b".to_string()],
            dels: Vec::new(),
        };
        assert!(matches!(
            validate_addition(&[], &updates),
            Err(Error::NameConflict { .. })
        ));
    }

    #[test]
    fn no_conflict_between_siblings() {
        let updates = RefUpdates {
            adds: vec!["refs/a/b".to_string(), "refs/a/c".to_string()],
            dels: Vec::new(),
        };
        assert!(validate_addition(&[], &updates).is_ok());
    }

    #[test]
    fn deleting_the_parent_unblocks_the_child() {
        // "refs/a" is both deleted and re-checked as a parent of the new
        // "refs/a/b"; the pending delete wins
        let updates = RefUpdates {
            adds: vec!["refs/a/b".to_string()],
            dels: vec!["refs/a".to_string()],
        };
        assert!(validate_addition(&[], &updates).is_ok());
    }
}
