//! Verified snapshots of the central store.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use time::macros::format_description;
use time::{Duration, OffsetDateTime};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::config::Settings;
use crate::error::{Result, SisError};
use crate::repo_fs::write_atomic;
use crate::util::hash_forward::HashingForward;

const PREFIX: &str = "central_db_";

/// Remove a backup that must not be kept; returns whether nothing is left behind.
fn discard(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            error!(backup = %path.display(), error = %e, "could not remove unusable backup");
            false
        }
    }
}

/// Sort key for `central_db_<stamp>[_N].<ext>`: stamp, then numeric suffix.
fn backup_order(path: &Path) -> (String, u32) {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    let rest = stem.strip_prefix(PREFIX).unwrap_or(stem);
    // `[year][month][day]_[hour][minute][second]` is 15 characters.
    match rest.get(15..).and_then(|tail| tail.strip_prefix('_')) {
        Some(n) => match n.parse() {
            Ok(n) => (rest[..15].to_string(), n),
            Err(_) => (rest.to_string(), 0),
        },
        None => (rest.to_string(), 0),
    }
}

/// A backup that passed verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupRef {
    pub path: PathBuf,
    pub created_at: OffsetDateTime,
    pub size: u64,
    pub sha256: [u8; 32],
}

impl BackupRef {
    pub fn hash_hex(&self) -> String {
        hex::encode(self.sha256)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupEntry {
    pub path: PathBuf,
    pub size: u64,
    pub modified: OffsetDateTime,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub deleted: usize,
    pub freed_bytes: u64,
}

pub struct BackupManager {
    dir: PathBuf,
    store_path: PathBuf,
    clock: Arc<dyn Clock>,
}

fn file_digest(path: &Path) -> Result<(u64, [u8; 32])> {
    let mut f = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((size, digest_bytes(hasher)))
}

fn digest_bytes(hasher: Sha256) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Copy `src` into `dst`, hashing the bytes as they are written.
fn copy_hashed(src: &Path, dst: &mut File) -> Result<[u8; 32]> {
    let mut reader = File::open(src)?;
    let mut hasher = Sha256::new();
    {
        let mut w = HashingForward::new(&mut *dst, &mut hasher);
        io::copy(&mut reader, &mut w)?;
        w.flush()?;
    }
    dst.sync_all()?;
    Ok(digest_bytes(hasher))
}

impl BackupManager {
    pub fn new(
        dir: impl Into<PathBuf>,
        store_path: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            store_path: store_path.into(),
            clock,
        })
    }

    pub fn from_settings(s: &Settings, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::new(&s.backup_dir, &s.store_path, clock)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    fn extension(&self) -> &str {
        self.store_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("csv")
    }

    /// Open a fresh, never-before-used backup file for `at`.
    fn reserve_target(&self, at: OffsetDateTime) -> Result<(File, PathBuf)> {
        let stamp = at
            .format(format_description!(
                "[year][month][day]_[hour][minute][second]"
            ))
            .map_err(|e| SisError::Format(e.to_string()))?;
        let ext = self.extension();
        for n in 0u32.. {
            let name = match n {
                0 => format!("{PREFIX}{stamp}.{ext}"),
                n => format!("{PREFIX}{stamp}_{n}.{ext}"),
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(f) => return Ok((f, path)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(SisError::Conflict(format!("no free backup name for {stamp}")))
    }

    /// Snapshot the store. `None` when there is no store yet.
    pub fn backup(&self) -> Result<Option<BackupRef>> {
        if !self.store_path.is_file() {
            warn!(store = %self.store_path.display(), "no central store to back up");
            return Ok(None);
        }
        fs::create_dir_all(&self.dir)?;
        let created_at = self.clock.now();
        let (mut dst, path) = self.reserve_target(created_at)?;
        let copied = copy_hashed(&self.store_path, &mut dst);
        drop(dst);
        let copied = match copied {
            Ok(h) => h,
            Err(e) => {
                error!(backup = %path.display(), error = %e, "backup copy failed");
                discard(&path);
                return Err(e);
            }
        };
        let backup = self.verify_copy(&path, copied, created_at)?;
        info!(
            backup = %backup.path.display(),
            bytes = backup.size,
            sha256 = %backup.hash_hex(),
            "backup created and verified"
        );
        Ok(Some(backup))
    }

    /// Re-hash source and copy; delete the copy unless both agree with what was copied.
    pub(crate) fn verify_copy(
        &self,
        backup_path: &Path,
        copied: [u8; 32],
        created_at: OffsetDateTime,
    ) -> Result<BackupRef> {
        let (src, dst) = rayon::join(
            || file_digest(&self.store_path),
            || file_digest(backup_path),
        );
        let reason = match (src, dst) {
            (Ok((src_size, src_hash)), Ok((dst_size, dst_hash))) => {
                if src_size != dst_size {
                    format!("size mismatch: source {src_size} bytes, backup {dst_size} bytes")
                } else if src_hash != dst_hash || dst_hash != copied {
                    "SHA-256 mismatch between source and backup".to_string()
                } else {
                    return Ok(BackupRef {
                        path: backup_path.to_path_buf(),
                        created_at,
                        size: dst_size,
                        sha256: dst_hash,
                    });
                }
            }
            (Err(e), _) | (_, Err(e)) => format!("could not re-read for verification: {e}"),
        };
        error!(backup = %backup_path.display(), %reason, "backup verification failed");
        discard(backup_path);
        Err(SisError::Integrity {
            path: backup_path.to_path_buf(),
            reason,
        })
    }

    /// Put the backup's bytes back over the live store and check the result.
    pub fn restore(&self, backup: &BackupRef) -> Result<()> {
        write_atomic(&self.store_path, |f| {
            let mut src = File::open(&backup.path)?;
            io::copy(&mut src, f)?;
            Ok(())
        })?;
        let (size, hash) = file_digest(&self.store_path)?;
        if size != backup.size || hash != backup.sha256 {
            return Err(SisError::Integrity {
                path: self.store_path.clone(),
                reason: "restored store does not match its backup".into(),
            });
        }
        warn!(backup = %backup.path.display(), "store restored from backup");
        Ok(())
    }

    /// Backups in the directory, newest first.
    pub fn list(&self) -> Result<Vec<BackupEntry>> {
        let mut out = Vec::new();
        if !self.dir.is_dir() {
            return Ok(out);
        }
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry?;
            let is_backup = entry.file_name().to_str().is_some_and(|n| n.starts_with(PREFIX));
            if !entry.file_type().is_file() || !is_backup {
                continue;
            }
            let md = entry.metadata()?;
            out.push(BackupEntry {
                path: entry.path().to_path_buf(),
                size: md.len(),
                modified: OffsetDateTime::from(md.modified()?),
            });
        }
        out.sort_by_cached_key(|b| std::cmp::Reverse(backup_order(&b.path)));
        Ok(out)
    }

    pub fn prune(&self, older_than: Duration) -> Result<PruneReport> {
        self.prune_with(older_than, &CancelToken::new())
    }

    pub fn prune_days(&self, days: u32) -> Result<PruneReport> {
        self.prune(Duration::days(i64::from(days)))
    }

    /// Delete top-level files with `now - mtime > older_than`. Directories are skipped.
    pub fn prune_with(&self, older_than: Duration, cancel: &CancelToken) -> Result<PruneReport> {
        let now = self.clock.now();
        let mut report = PruneReport::default();
        if !self.dir.is_dir() {
            return Ok(report);
        }
        let partial = |r: &PruneReport, e: SisError| SisError::PartialSweep {
            deleted: r.deleted,
            freed: r.freed_bytes,
            source: Box::new(e),
        };

        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            cancel.check().map_err(|e| partial(&report, e))?;
            let entry = entry.map_err(|e| partial(&report, e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let md = entry.metadata().map_err(|e| partial(&report, e.into()))?;
            let mtime = md
                .modified()
                .map(OffsetDateTime::from)
                .map_err(|e| partial(&report, e.into()))?;
            if now - mtime > older_than {
                fs::remove_file(entry.path()).map_err(|e| partial(&report, e.into()))?;
                report.deleted += 1;
                report.freed_bytes += md.len();
                debug!(backup = %entry.path().display(), "pruned backup");
            }
        }
        info!(
            deleted = report.deleted,
            freed_mb = format!("{:.2}", report.freed_bytes as f64 / 1024.0 / 1024.0),
            "old backups pruned"
        );
        Ok(report)
    }
}
