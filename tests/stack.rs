use reftable::{Error, Options, RefRecord, RefValue, Stack};
use test_log::test;

fn hash(byte: u8) -> Vec<u8> {
    vec![byte; 20]
}

fn put_ref(stack: &Stack, name: &str, byte: u8) -> reftable::Result<()> {
    let mut addition = stack.new_addition()?;
    let update_index = addition.next_update_index();
    addition.add(|writer| {
        writer.set_limits(update_index, update_index)?;
        writer.add_ref(&RefRecord {
            refname: name.to_string(),
            update_index,
            value: RefValue::Val1(hash(byte)),
        })
    })?;
    addition.commit()
}

fn delete_ref(stack: &Stack, name: &str) -> reftable::Result<()> {
    let mut addition = stack.new_addition()?;
    let update_index = addition.next_update_index();
    addition.add(|writer| {
        writer.set_limits(update_index, update_index)?;
        writer.add_ref(&RefRecord {
            refname: name.to_string(),
            update_index,
            value: RefValue::Deletion,
        })
    })?;
    addition.commit()
}

#[test]
fn write_one_read_one() -> reftable::Result<()> {
    let dir = tempfile::tempdir()?;
    let stack = Stack::open(&dir, Options::default())?;

    put_ref(&stack, "refs/heads/main", 0x01)?;

    let rec = stack.read_ref("refs/heads/main")?.expect("ref should exist");
    assert_eq!("refs/heads/main", rec.refname);
    assert_eq!(1, rec.update_index);
    assert_eq!(RefValue::Val1(hash(0x01)), rec.value);

    assert_eq!(None, stack.read_ref("refs/heads/other")?);

    Ok(())
}

#[test]
fn tombstone_hides_the_ref() -> reftable::Result<()> {
    let dir = tempfile::tempdir()?;
    let stack = Stack::open(&dir, Options::default().auto_compact(false))?;

    put_ref(&stack, "refs/heads/main", 0x01)?;
    delete_ref(&stack, "refs/heads/main")?;

    assert_eq!(None, stack.read_ref("refs/heads/main")?);

    // the merged iterator hides it as well
    let mut iter = stack.ref_iter()?;
    assert!(iter.next_ref()?.is_none());

    Ok(())
}

#[test]
fn newest_table_wins() -> reftable::Result<()> {
    let dir = tempfile::tempdir()?;
    let stack = Stack::open(&dir, Options::default().auto_compact(false))?;

    put_ref(&stack, "refs/heads/main", 0x01)?;
    put_ref(&stack, "refs/heads/main", 0x02)?;
    put_ref(&stack, "refs/heads/main", 0x03)?;

    let rec = stack.read_ref("refs/heads/main")?.expect("ref should exist");
    assert_eq!(RefValue::Val1(hash(0x03)), rec.value);
    assert_eq!(3, rec.update_index);

    Ok(())
}

#[test]
fn hierarchy_conflict_aborts_the_addition() -> reftable::Result<()> {
    let dir = tempfile::tempdir()?;
    let stack = Stack::open(&dir, Options::default())?;

    put_ref(&stack, "refs/a", 0x01)?;
    let tables_before = stack.len();

    let result = put_ref(&stack, "refs/a/b", 0x02);
    assert!(matches!(result, Err(Error::NameConflict { .. })));

    // the manifest is unchanged and the new ref invisible
    assert_eq!(tables_before, stack.len());
    assert_eq!(None, stack.read_ref("refs/a/b")?);
    assert!(stack.read_ref("refs/a")?.is_some());

    // the other direction conflicts as well
    let result = put_ref(&stack, "refs", 0x03);
    assert!(matches!(result, Err(Error::NameConflict { .. })));

    Ok(())
}

#[test]
fn deleting_the_parent_makes_room_for_the_child() -> reftable::Result<()> {
    let dir = tempfile::tempdir()?;
    let stack = Stack::open(&dir, Options::default())?;

    put_ref(&stack, "refs/a", 0x01)?;

    // one transaction that replaces refs/a with refs/a/b
    let mut addition = stack.new_addition()?;
    let update_index = addition.next_update_index();
    addition.add(|writer| {
        writer.set_limits(update_index, update_index)?;
        writer.add_ref(&RefRecord {
            refname: "refs/a".to_string(),
            update_index,
            value: RefValue::Deletion,
        })?;
        writer.add_ref(&RefRecord {
            refname: "refs/a/b".to_string(),
            update_index,
            value: RefValue::Val1(hash(0x02)),
        })
    })?;
    addition.commit()?;

    assert_eq!(None, stack.read_ref("refs/a")?);
    assert!(stack.read_ref("refs/a/b")?.is_some());

    Ok(())
}

#[test]
fn invalid_refnames_are_rejected() -> reftable::Result<()> {
    let dir = tempfile::tempdir()?;
    let stack = Stack::open(&dir, Options::default())?;

    for bad in ["refs//x", "refs/./x", "refs/../x", "refs/x/"] {
        let result = put_ref(&stack, bad, 0x01);
        assert!(
            matches!(result, Err(Error::InvalidRefname(_))),
            "{bad:?} should be rejected"
        );
    }
    assert!(stack.is_empty());

    Ok(())
}

#[test]
fn concurrent_writers_conflict_on_the_lock() -> reftable::Result<()> {
    let dir = tempfile::tempdir()?;
    let stack = Stack::open(&dir, Options::default())?;

    let addition = stack.new_addition()?;
    assert!(matches!(stack.new_addition(), Err(Error::LockTaken(_))));

    // dropping the addition releases the lock
    drop(addition);
    assert!(!dir.path().join("manifest.lock").exists());
    let addition = stack.new_addition()?;
    addition.commit()?;

    Ok(())
}

#[test]
fn empty_addition_adds_nothing() -> reftable::Result<()> {
    let dir = tempfile::tempdir()?;
    let stack = Stack::open(&dir, Options::default())?;

    let mut addition = stack.new_addition()?;
    addition.add(|_writer| Ok(()))?;
    addition.commit()?;

    assert!(stack.is_empty());
    assert!(!dir.path().join("manifest").exists());

    Ok(())
}

#[test]
fn update_indices_grow_monotonically() -> reftable::Result<()> {
    let dir = tempfile::tempdir()?;
    let stack = Stack::open(&dir, Options::default().auto_compact(false))?;

    for i in 0..5u8 {
        put_ref(&stack, &format!("refs/heads/branch-{i}"), i)?;
    }

    let tables = stack.tables();
    assert_eq!(5, tables.len());
    for pair in tables.windows(2) {
        assert!(pair[1].min_update_index() > pair[0].max_update_index());
    }
    assert_eq!(5, stack.max_update_index());

    Ok(())
}

#[test]
fn a_second_stack_sees_committed_data() -> reftable::Result<()> {
    let dir = tempfile::tempdir()?;

    {
        let stack = Stack::open(&dir, Options::default())?;
        put_ref(&stack, "refs/heads/main", 0x07)?;
    }

    let reopened = Stack::open(&dir, Options::default())?;
    let rec = reopened.read_ref("refs/heads/main")?.expect("ref should exist");
    assert_eq!(RefValue::Val1(hash(0x07)), rec.value);

    Ok(())
}

#[test]
fn clean_removes_unreferenced_tables() -> reftable::Result<()> {
    let dir = tempfile::tempdir()?;
    let stack = Stack::open(&dir, Options::default())?;
    put_ref(&stack, "refs/heads/main", 0x01)?;

    // a leftover from a crashed writer
    std::fs::write(dir.path().join("0000000000000009-deadbeef.ref"), b"junk")?;

    stack.clean()?;

    assert!(!dir.path().join("0000000000000009-deadbeef.ref").exists());
    assert!(stack.read_ref("refs/heads/main")?.is_some());

    Ok(())
}

#[test]
fn iteration_is_sorted_across_tables() -> reftable::Result<()> {
    let dir = tempfile::tempdir()?;
    let stack = Stack::open(&dir, Options::default().auto_compact(false))?;

    put_ref(&stack, "refs/heads/delta", 0x04)?;
    put_ref(&stack, "refs/heads/alpha", 0x01)?;
    put_ref(&stack, "refs/tags/v1", 0x05)?;
    put_ref(&stack, "refs/heads/bravo", 0x02)?;

    let mut iter = stack.ref_iter()?;
    let mut names = Vec::new();
    while let Some(rec) = iter.next_ref()? {
        names.push(rec.refname);
    }
    assert_eq!(
        vec![
            "refs/heads/alpha",
            "refs/heads/bravo",
            "refs/heads/delta",
            "refs/tags/v1"
        ],
        names
    );

    // seeking positions mid-stream
    iter.seek_ref("refs/heads/bravo")?;
    assert_eq!(
        Some("refs/heads/bravo".to_string()),
        iter.next_ref()?.map(|r| r.refname)
    );

    Ok(())
}
