use std::path::PathBuf;

use anyhow::Context;
use bytes::Bytes;
use caskdb::{Db, Error, IterOptions, Options};
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "caskdb")]
#[command(about = "caskdb helper tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print store counters.
    Stats {
        #[arg(long)]
        db: PathBuf,
    },
    Get {
        #[arg(long)]
        db: PathBuf,
        key: String,
    },
    Put {
        #[arg(long)]
        db: PathBuf,
        key: String,
        value: String,
        #[arg(long)]
        sync: bool,
    },
    Del {
        #[arg(long)]
        db: PathBuf,
        key: String,
    },
    /// List all keys in order.
    Keys {
        #[arg(long)]
        db: PathBuf,
    },
    /// Dump key/value pairs, optionally under a prefix.
    Scan {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long)]
        reverse: bool,
    },
    /// Compact the log if the reclaimable ratio allows it.
    Merge {
        #[arg(long)]
        db: PathBuf,
    },
    /// Copy every live pair into a fresh store at `dst`.
    Backup {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        dst: PathBuf,
    },
}

/// Backup lives outside the engine: it walks the public iterator and
/// replays the pairs into a second store, so it needs nothing beyond the
/// ordinary read and write operations.
fn backup(src: &Db, dst: PathBuf) -> anyhow::Result<()> {
    let dst_db = Db::open(Options::new(&dst))
        .with_context(|| format!("open backup target {}", dst.display()))?;
    let mut iter = src.iterator(IterOptions::default())?;
    iter.rewind();
    while iter.valid() {
        let key = iter.key().expect("valid position").clone();
        if let Some(value) = iter.value()? {
            dst_db.put(key, value)?;
        }
        iter.next();
    }
    dst_db.sync()?;
    dst_db.close()?;
    Ok(())
}

fn open(db: &PathBuf, sync_writes: bool) -> anyhow::Result<Db> {
    Db::open(Options {
        sync_writes,
        ..Options::new(db)
    })
    .with_context(|| format!("open {}", db.display()))
}

fn printable(bytes: &Bytes) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => format!("{bytes:?}"),
    }
}

fn main() -> anyhow::Result<()> {
    match Cli::parse().cmd {
        Command::Stats { db } => {
            let stats = open(&db, false)?.stats()?;
            println!("keys:        {}", stats.key_num);
            println!("data files:  {}", stats.data_file_num);
            println!("disk:        {} bytes", stats.disk_size);
            println!("reclaimable: {} bytes", stats.reclaimable_size);
        }
        Command::Get { db, key } => match open(&db, false)?.get(key.as_bytes()) {
            Ok(value) => println!("{}", printable(&value)),
            Err(Error::KeyNotFound) => anyhow::bail!("key not found"),
            Err(err) => return Err(err).context("get"),
        },
        Command::Put {
            db,
            key,
            value,
            sync,
        } => {
            let db = open(&db, sync)?;
            db.put(key.into_bytes(), value.into_bytes())?;
            db.close()?;
        }
        Command::Del { db, key } => {
            let db = open(&db, false)?;
            db.delete(key.as_bytes())?;
            db.close()?;
        }
        Command::Keys { db } => {
            for key in open(&db, false)?.list_keys()? {
                println!("{}", printable(&key));
            }
        }
        Command::Scan {
            db,
            prefix,
            reverse,
        } => {
            let db = open(&db, false)?;
            let mut iter = db.iterator(IterOptions {
                prefix: prefix.map(|p| Bytes::from(p.into_bytes())),
                reverse,
            })?;
            iter.rewind();
            while iter.valid() {
                let key = iter.key().expect("valid position").clone();
                if let Some(value) = iter.value()? {
                    println!("{}\t{}", printable(&key), printable(&value));
                }
                iter.next();
            }
        }
        Command::Merge { db } => {
            let db = open(&db, false)?;
            let before = db.stats()?;
            db.merge()?;
            let after = db.stats()?;
            println!(
                "disk {} -> {} bytes, reclaimable {} -> {}",
                before.disk_size, after.disk_size, before.reclaimable_size, after.reclaimable_size
            );
            db.close()?;
        }
        Command::Backup { db, dst } => {
            let db = open(&db, false)?;
            backup(&db, dst)?;
            db.close()?;
        }
    }
    Ok(())
}
