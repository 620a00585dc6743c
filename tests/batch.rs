use bytes::Bytes;
use caskdb::record::{self, Record};
use caskdb::{Db, Error, Options};
use tempfile::TempDir;

fn options(dir: &TempDir) -> Options {
    Options {
        max_file_size: 4 * 1024,
        ..Options::new(dir.path())
    }
}

#[test]
fn batch_applies_atomically_in_process() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let db = Db::open(options(&dir))?;
    db.put("c", "old")?;

    let mut batch = db.new_batch()?;
    batch.put("a", "1")?;
    batch.put("b", "2")?;
    batch.delete("c")?;

    // Nothing is visible until commit.
    assert!(matches!(db.get("a"), Err(Error::KeyNotFound)));
    assert_eq!(db.get("c")?, Bytes::from("old"));

    batch.commit()?;
    assert_eq!(db.get("a")?, Bytes::from("1"));
    assert_eq!(db.get("b")?, Bytes::from("2"));
    assert!(matches!(db.get("c"), Err(Error::KeyNotFound)));
    Ok(())
}

#[test]
fn committed_batch_survives_reopen() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    {
        let db = Db::open(options(&dir))?;
        let mut batch = db.new_batch()?;
        for i in 0..100 {
            batch.put(format!("k{i}"), format!("v{i}"))?;
        }
        batch.commit()?;
        db.close()?;
    }

    let db = Db::open(options(&dir))?;
    for i in 0..100 {
        assert_eq!(db.get(format!("k{i}"))?, Bytes::from(format!("v{i}")));
    }
    Ok(())
}

#[test]
fn uncommitted_batch_is_a_no_op() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    {
        let db = Db::open(options(&dir))?;
        db.put("c", "pre-batch")?;

        let mut batch = db.new_batch()?;
        batch.put("a", "1")?;
        batch.put("b", "2")?;
        batch.delete("c")?;
        // Crash before commit: the batch never reaches the log.
        db.close()?;
    }

    let db = Db::open(options(&dir))?;
    assert!(matches!(db.get("a"), Err(Error::KeyNotFound)));
    assert!(matches!(db.get("b"), Err(Error::KeyNotFound)));
    assert_eq!(db.get("c")?, Bytes::from("pre-batch"));
    Ok(())
}

#[test]
fn batch_without_commit_marker_is_discarded_at_recovery() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let marker_len;
    {
        let db = Db::open(options(&dir))?;
        db.put("c", "pre-batch")?;

        let mut batch = db.new_batch()?;
        batch.put("a", "1")?;
        batch.delete("c")?;
        batch.commit()?;
        db.close()?;

        // First batch sequence after a fresh open is 1.
        marker_len = record::encode(&Record::txn_commit(1)).len() as u64;
    }

    // Tear exactly the commit marker off the log, leaving the members.
    let segment = dir.path().join("000000001.data");
    let len = std::fs::metadata(&segment)?.len();
    let file = std::fs::OpenOptions::new().write(true).open(&segment)?;
    file.set_len(len - marker_len)?;
    drop(file);

    let db = Db::open(options(&dir))?;
    assert!(matches!(db.get("a"), Err(Error::KeyNotFound)));
    assert_eq!(db.get("c")?, Bytes::from("pre-batch"));
    Ok(())
}

#[test]
fn last_write_wins_inside_a_batch() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let db = Db::open(options(&dir))?;

    let mut batch = db.new_batch()?;
    batch.put("k", "first")?;
    batch.put("k", "second")?;
    batch.delete("gone")?;
    batch.put("gone", "back")?;
    assert_eq!(batch.len(), 2);
    batch.commit()?;

    assert_eq!(db.get("k")?, Bytes::from("second"));
    assert_eq!(db.get("gone")?, Bytes::from("back"));
    Ok(())
}

#[test]
fn batch_size_cap_enforced() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let db = Db::open(Options {
        batch_max_size: 3,
        ..options(&dir)
    })?;

    let mut batch = db.new_batch()?;
    batch.put("a", "1")?;
    batch.put("b", "2")?;
    batch.put("c", "3")?;
    // Restaging an existing key does not grow the batch.
    batch.put("a", "1b")?;
    assert!(matches!(
        batch.put("d", "4"),
        Err(Error::BatchTooLarge { len: 3, max: 3 })
    ));
    batch.commit()?;
    assert_eq!(db.get("a")?, Bytes::from("1b"));
    Ok(())
}

#[test]
fn batch_misuse_rejected() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let db = Db::open(options(&dir))?;

    let mut batch = db.new_batch()?;
    assert!(matches!(batch.put("", "v"), Err(Error::EmptyKey)));
    assert!(matches!(batch.delete(""), Err(Error::EmptyKey)));
    batch.put("k", "v")?;
    batch.commit()?;

    assert!(matches!(batch.put("x", "y"), Err(Error::BatchCommitted)));
    assert!(matches!(batch.commit(), Err(Error::BatchCommitted)));
    Ok(())
}

#[test]
fn empty_batch_commit_is_a_no_op() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let db = Db::open(options(&dir))?;
    let before = db.stats()?;

    let mut batch = db.new_batch()?;
    batch.commit()?;

    assert_eq!(db.stats()?, before);
    Ok(())
}

#[test]
fn batch_spanning_segment_rotation_recovers() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    {
        let db = Db::open(Options {
            max_file_size: 256,
            ..Options::new(dir.path())
        })?;
        let mut batch = db.new_batch()?;
        for i in 0..40 {
            batch.put(format!("k{i:02}"), format!("v{i:02}"))?;
        }
        batch.commit()?;
        assert!(db.stats()?.data_file_num >= 2);
        db.close()?;
    }

    let db = Db::open(Options::new(dir.path()))?;
    for i in 0..40 {
        assert_eq!(db.get(format!("k{i:02}"))?, Bytes::from(format!("v{i:02}")));
    }
    Ok(())
}
