//! On-disk layout of a database directory.
//!
//! ```text
//! <dir>/000000001.data      segments, ascending file id, last is active
//! <dir>/000000001.hint      live (key, pos) sidecar written by merge
//! <dir>/merge-finished      varint: first file id the merge did not consume
//! <dir>/flock               advisory process lock
//! <dir>-merge/              sibling staging directory during a merge
//! ```

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::record::{decode_varint, encode_varint};

pub const DATA_EXT: &str = "data";
pub const HINT_EXT: &str = "hint";
pub const MERGE_FINISHED_NAME: &str = "merge-finished";
pub const LOCK_NAME: &str = "flock";
const MERGE_DIR_SUFFIX: &str = "-merge";

pub fn data_path(dir: &Path, file_id: u32) -> PathBuf {
    dir.join(format!("{file_id:09}.{DATA_EXT}"))
}

pub fn hint_path(dir: &Path, file_id: u32) -> PathBuf {
    dir.join(format!("{file_id:09}.{HINT_EXT}"))
}

pub fn merge_finished_path(dir: &Path) -> PathBuf {
    dir.join(MERGE_FINISHED_NAME)
}

pub fn lock_path(dir: &Path) -> PathBuf {
    dir.join(LOCK_NAME)
}

/// The staging directory is a sibling of the database directory, so a
/// whole-directory removal can never touch live data.
pub fn staging_dir(dir: &Path) -> PathBuf {
    let mut name = dir.file_name().unwrap_or_default().to_os_string();
    name.push(MERGE_DIR_SUFFIX);
    dir.with_file_name(name)
}

pub fn file_id_from_path(path: &Path, ext: &str) -> Option<u32> {
    if path.extension()?.to_str()? != ext {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

/// Lists segment ids in `dir`, ascending. A `.data` name that is not a
/// decimal file id makes the whole directory suspect.
pub fn discover(dir: &Path) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(DATA_EXT) {
            continue;
        }
        match file_id_from_path(&path, DATA_EXT) {
            Some(id) => ids.push(id),
            None => {
                return Err(Error::CorruptLog(format!(
                    "unrecognized data file name {}",
                    path.display()
                )))
            }
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Writes the merge-finished marker via tmp + rename, fsyncing the file
/// and its directory, so the marker either exists whole or not at all.
pub fn write_merge_finished(dir: &Path, first_unmerged_id: u32) -> Result<()> {
    let mut payload = Vec::with_capacity(5);
    encode_varint(&mut payload, first_unmerged_id as u64);

    let tmp = dir.join(format!("{MERGE_FINISHED_NAME}.tmp"));
    let mut file = File::create(&tmp)?;
    file.write_all(&payload)?;
    file.sync_data()?;
    drop(file);

    std::fs::rename(&tmp, merge_finished_path(dir))?;
    sync_dir(dir)
}

/// Reads the marker if present; `None` means no finished merge recorded.
pub fn read_merge_finished(dir: &Path) -> Result<Option<u32>> {
    let path = merge_finished_path(dir);
    let mut data = Vec::new();
    match File::open(&path) {
        Ok(mut file) => {
            file.read_to_end(&mut data)?;
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let (value, _) = decode_varint(&data)
        .ok_or_else(|| Error::CorruptLog("merge-finished marker unreadable".into()))?;
    u32::try_from(value)
        .map(Some)
        .map_err(|_| Error::CorruptLog("merge-finished marker out of range".into()))
}

pub fn remove_merge_finished(dir: &Path) -> Result<()> {
    match std::fs::remove_file(merge_finished_path(dir)) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

pub fn sync_dir(dir: &Path) -> Result<()> {
    // Directory fsync is a unix-ism; opening a directory read-only fails
    // elsewhere, and rename durability is best-effort there.
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_zero_padded() {
        let dir = Path::new("/db");
        assert_eq!(
            data_path(dir, 42),
            PathBuf::from("/db/000000042.data")
        );
        assert_eq!(
            hint_path(dir, 1),
            PathBuf::from("/db/000000001.hint")
        );
    }

    #[test]
    fn staging_dir_is_sibling() {
        assert_eq!(
            staging_dir(Path::new("/data/mydb")),
            PathBuf::from("/data/mydb-merge")
        );
    }

    #[test]
    fn discover_sorts_and_skips_auxiliary_files() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        for name in ["000000003.data", "000000001.data", "000000002.data"] {
            std::fs::write(dir.path().join(name), b"").expect("write");
        }
        std::fs::write(dir.path().join("000000001.hint"), b"").expect("write");
        std::fs::write(dir.path().join(LOCK_NAME), b"").expect("write");
        std::fs::write(dir.path().join(MERGE_FINISHED_NAME), b"").expect("write");

        assert_eq!(discover(dir.path()).expect("discover"), vec![1, 2, 3]);
    }

    #[test]
    fn discover_rejects_bad_names() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("not-a-number.data"), b"").expect("write");
        assert!(matches!(
            discover(dir.path()),
            Err(Error::CorruptLog(_))
        ));
    }

    #[test]
    fn merge_finished_round_trip() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        assert_eq!(read_merge_finished(dir.path()).expect("read"), None);

        write_merge_finished(dir.path(), 17).expect("write");
        assert_eq!(read_merge_finished(dir.path()).expect("read"), Some(17));

        remove_merge_finished(dir.path()).expect("remove");
        remove_merge_finished(dir.path()).expect("idempotent");
        assert_eq!(read_merge_finished(dir.path()).expect("read"), None);
    }
}
