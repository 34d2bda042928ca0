use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::Result;

/// `central_db.csv` -> `central_db.csv.lock`
pub fn lock_path(store: &Path) -> PathBuf {
    let mut lock_path = store.to_path_buf();
    let suffix = match store.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if !ext.is_empty() => format!("{ext}.lock"),
        _ => "lock".to_string(),
    };
    lock_path.set_extension(suffix);
    lock_path
}

/// Exclusive advisory lock scoped to one store path.
///
/// Backed by an OS file lock on a sidecar file, so it serialises writers
/// across threads (each acquisition opens its own handle) and processes.
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Blocks until the lock is free.
    pub fn acquire(store: &Path) -> Result<Self> {
        let (file, path) = open_lockfile(store)?;
        loop {
            match file.lock_exclusive() {
                Ok(()) => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        debug!(lock = %path.display(), "store lock acquired");
        Ok(Self { file, path })
    }

    /// `None` when another holder has it.
    pub fn try_acquire(store: &Path) -> Result<Option<Self>> {
        let (file, path) = open_lockfile(store)?;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Some(Self { file, path })),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_lockfile(store: &Path) -> Result<(File, PathBuf)> {
    let path = lock_path(store);
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)?;
    Ok((file, path))
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(lock = %self.path.display(), "store lock released");
    }
}
