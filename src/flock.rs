//! Advisory per-directory process lock.
//!
//! The lock file lives inside the database directory and records the
//! holder's PID. The OS drops the lock when the file handle closes, so a
//! crashed process never wedges the directory.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquires the lock, failing immediately if another process holds it.
    pub fn acquire(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        try_lock(&file)?;

        writeln!(file, "{}", std::process::id())?;
        file.flush()?;
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn try_lock(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn try_lock(_file: &File) -> io::Result<()> {
    // No portable advisory lock; the PID sentinel in the file is all the
    // protection available here.
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_file_records_pid() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("flock");
        let lock = FileLock::acquire(&path).expect("acquire");
        assert_eq!(lock.path(), path);

        let content = std::fs::read_to_string(&path).expect("read");
        assert!(content.contains(&std::process::id().to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("flock");

        let held = FileLock::acquire(&path).expect("first");
        assert!(FileLock::acquire(&path).is_err());

        drop(held);
        FileLock::acquire(&path).expect("after release");
    }
}
