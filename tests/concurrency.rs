use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use caskdb::{Db, Error, Options};
use tempfile::TempDir;

#[test]
fn readers_observe_writer_progress() -> anyhow::Result<()> {
    const KEYS: usize = 500;

    let dir = TempDir::new()?;
    let db = Db::open(Options {
        max_file_size: 16 * 1024,
        ..Options::new(dir.path())
    })?;

    let stop = Arc::new(AtomicBool::new(false));
    let mut readers = Vec::new();
    for reader_id in 0..8 {
        let db = db.clone();
        let stop = stop.clone();
        readers.push(std::thread::spawn(move || -> anyhow::Result<()> {
            let mut hits = 0usize;
            while !stop.load(Ordering::Relaxed) {
                let i = (hits + reader_id) % KEYS;
                match db.get(format!("k{i:04}")) {
                    // A read either misses entirely or sees the full value.
                    Ok(value) => {
                        anyhow::ensure!(
                            value == Bytes::from(format!("v{i:04}")),
                            "partial or wrong value for k{i:04}: {value:?}"
                        );
                    }
                    Err(Error::KeyNotFound) => {}
                    Err(err) => return Err(err.into()),
                }
                hits += 1;
            }
            Ok(())
        }));
    }

    for i in 0..KEYS {
        db.put(format!("k{i:04}"), format!("v{i:04}"))?;
        // Writes are visible to any subsequent read from any thread.
        assert_eq!(db.get(format!("k{i:04}"))?, Bytes::from(format!("v{i:04}")));
    }

    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().expect("reader thread")?;
    }

    assert_eq!(db.list_keys()?.len(), KEYS);
    Ok(())
}

#[test]
fn concurrent_writers_serialize_cleanly() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let db = Db::open(Options {
        max_file_size: 8 * 1024,
        ..Options::new(dir.path())
    })?;

    let mut writers = Vec::new();
    for w in 0..4 {
        let db = db.clone();
        writers.push(std::thread::spawn(move || -> anyhow::Result<()> {
            for i in 0..250 {
                db.put(format!("w{w}-k{i:03}"), format!("w{w}-v{i:03}"))?;
            }
            Ok(())
        }));
    }
    for writer in writers {
        writer.join().expect("writer thread")?;
    }

    assert_eq!(db.list_keys()?.len(), 1000);
    for w in 0..4 {
        assert_eq!(
            db.get(format!("w{w}-k{:03}", 249))?,
            Bytes::from(format!("w{w}-v{:03}", 249))
        );
    }
    Ok(())
}

#[test]
fn merge_runs_under_concurrent_writes() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let db = Db::open(Options {
        max_file_size: 8 * 1024,
        data_file_merge_ratio: 0.1,
        ..Options::new(dir.path())
    })?;

    for i in 0..500 {
        db.put(format!("k{i:03}"), "old")?;
    }
    for i in 0..500 {
        db.put(format!("k{i:03}"), "new")?;
    }

    let writer = {
        let db = db.clone();
        std::thread::spawn(move || -> anyhow::Result<()> {
            for i in 0..500 {
                db.put(format!("fresh{i:03}"), "x")?;
            }
            Ok(())
        })
    };
    db.merge()?;
    writer.join().expect("writer thread")?;

    for i in 0..500 {
        assert_eq!(db.get(format!("k{i:03}"))?, Bytes::from("new"));
        assert_eq!(db.get(format!("fresh{i:03}"))?, Bytes::from("x"));
    }

    db.close()?;
    let db = Db::open(Options::new(dir.path()))?;
    assert_eq!(db.stats()?.key_num, 1000);
    Ok(())
}
