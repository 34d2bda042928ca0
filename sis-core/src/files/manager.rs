//! Registry of uploaded, processed and download files.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use super::domain::{DownloadArtifact, FileId, FileStatus, StatusUpdate, UploadedFile};
use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::config::Settings;
use crate::error::{Result, SisError};
use crate::policy::UploadPolicy;
use crate::stats::FileStats;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub downloads: usize,
    pub uploads: usize,
    pub processed: usize,
    pub freed_bytes: u64,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn deleted(&self) -> usize {
        self.downloads + self.uploads + self.processed
    }
}

/// Retention windows, by stage.
#[derive(Clone, Copy, Debug)]
pub struct Ttls {
    pub upload: Duration,
    pub processed: Duration,
    pub download: Duration,
}

pub struct FileLifecycleManager {
    uploads_dir: PathBuf,
    processed_dir: PathBuf,
    downloads_dir: PathBuf,
    policy: UploadPolicy,
    ttls: Ttls,
    clock: Arc<dyn Clock>,
    files: DashMap<FileId, UploadedFile>,
    downloads: DashMap<Uuid, DownloadArtifact>,
}

fn private_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// New file readable by the owner only; fails if the name is taken.
fn create_private(path: &Path) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts.open(path)
}

/// Write `fill` into a fresh private file; the partial file is removed on failure.
fn write_private(path: &Path, fill: impl FnOnce(&mut File) -> io::Result<()>) -> Result<()> {
    let mut f = create_private(path)?;
    let written = fill(&mut f).and_then(|()| f.sync_all());
    if let Err(e) = written {
        drop(f);
        if let Err(rm) = remove_if_present(path) {
            warn!(path = %path.display(), error = %rm, "could not remove partial file");
        }
        return Err(e.into());
    }
    Ok(())
}

fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            // Different filesystem: copy, then drop the source.
            debug!(src = %src.display(), error = %rename_err, "rename failed, copying");
            if let Err(copy_err) = fs::copy(src, dst) {
                if let Err(e) = remove_if_present(dst) {
                    warn!(path = %dst.display(), error = %e, "could not remove partial copy");
                }
                return Err(copy_err);
            }
            fs::remove_file(src)
        }
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Last path component with anything outside `[A-Za-z0-9._-]` replaced.
pub fn sanitize_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "download".to_string()
    } else {
        cleaned
    }
}

impl FileLifecycleManager {
    /// Create the directories and adopt whatever is already on disk.
    pub fn open(settings: &Settings, clock: Arc<dyn Clock>) -> Result<Self> {
        let mgr = Self {
            uploads_dir: settings.uploads_dir(),
            processed_dir: settings.processed_dir(),
            downloads_dir: settings.downloads_dir(),
            policy: UploadPolicy::from_settings(settings),
            ttls: Ttls {
                upload: settings.upload_ttl,
                processed: settings.processed_ttl,
                download: settings.download_ttl,
            },
            clock,
            files: DashMap::new(),
            downloads: DashMap::new(),
        };
        for dir in [&mgr.uploads_dir, &mgr.processed_dir, &mgr.downloads_dir] {
            private_dir(dir)?;
        }
        mgr.rebuild()?;
        Ok(mgr)
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed_dir
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    pub fn ttls(&self) -> Ttls {
        self.ttls
    }

    fn rebuild(&self) -> Result<()> {
        for (dir, status) in [
            (&self.uploads_dir, FileStatus::Uploaded),
            (&self.processed_dir, FileStatus::Processed),
        ] {
            for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                let id = Path::new(&name)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| Uuid::parse_str(s).ok());
                let Some(id) = id else {
                    warn!(file = %entry.path().display(), "unrecognised file left alone");
                    continue;
                };
                let md = entry.metadata()?;
                let mtime = OffsetDateTime::from(md.modified()?);
                self.files.insert(
                    id,
                    UploadedFile::new(id, name, entry.path().to_path_buf(), md.len(), status, mtime),
                );
            }
        }

        for entry in WalkDir::new(&self.downloads_dir).min_depth(1).max_depth(1) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let parsed = name
                .split_once('_')
                .and_then(|(id, rest)| Some((Uuid::parse_str(id).ok()?, rest.to_string())));
            let Some((id, file_name)) = parsed else {
                warn!(file = %entry.path().display(), "unrecognised download left alone");
                continue;
            };
            let mtime = OffsetDateTime::from(entry.metadata()?.modified()?);
            self.downloads.insert(
                id,
                DownloadArtifact {
                    id,
                    source: None,
                    path: entry.path().to_path_buf(),
                    file_name,
                    created_at: mtime,
                    expires_at: mtime + self.ttls.download,
                },
            );
        }
        info!(
            files = self.files.len(),
            downloads = self.downloads.len(),
            "file registry rebuilt from disk"
        );
        Ok(())
    }

    /// Accept an upload and assign it an id.
    pub fn store(&self, bytes: &[u8], original_name: &str) -> Result<FileId> {
        let ext = self.policy.check(original_name, bytes.len() as u64)?;
        let id = Uuid::new_v4();
        let path = self.uploads_dir.join(format!("{id}.{ext}"));
        write_private(&path, |f| f.write_all(bytes))?;

        let now = self.clock.now();
        let name = original_name.trim().to_string();
        self.files.insert(
            id,
            UploadedFile::new(id, name, path, bytes.len() as u64, FileStatus::Uploaded, now),
        );
        info!(%id, name = original_name, bytes = bytes.len(), "file stored");
        Ok(id)
    }

    /// Metadata for `id`; counts as an access.
    pub fn get(&self, id: FileId) -> Result<UploadedFile> {
        let mut entry = self
            .files
            .get_mut(&id)
            .ok_or_else(|| SisError::not_found(format!("file {id}")))?;
        entry.last_accessed = self.clock.now();
        Ok(entry.clone())
    }

    /// Stored path, if the file is still on disk.
    pub fn path_of(&self, id: FileId) -> Result<PathBuf> {
        let path = self.get(id)?.path;
        if !path.is_file() {
            return Err(SisError::not_found(format!("file {id} is gone from disk")));
        }
        Ok(path)
    }

    pub fn set_status(&self, id: FileId, status: FileStatus, update: StatusUpdate) -> Result<UploadedFile> {
        let mut entry = self
            .files
            .get_mut(&id)
            .ok_or_else(|| SisError::not_found(format!("file {id}")))?;
        let f = entry.value_mut();
        if !f.status.can_move_to(status, f.highest_stage) {
            return Err(SisError::Conflict(format!(
                "file {id}: cannot move from {} to {status}",
                f.status
            )));
        }
        if status.rank() > f.highest_stage.rank() {
            f.highest_stage = status;
        }
        f.status = status;
        match update.error {
            Some(e) => f.error = Some(e),
            None if status != FileStatus::Error => f.error = None,
            None => {}
        }
        if let Some(p) = update.progress {
            f.progress = p.min(100);
        }
        if let Some(n) = update.processed_rows {
            f.processed_rows = Some(n);
        }
        if let Some(p) = update.export_path {
            f.export_path = Some(p);
        }
        f.last_accessed = self.clock.now();
        debug!(%id, %status, "file status updated");
        Ok(f.clone())
    }

    /// Take an upload for processing. Only one caller wins; everyone else
    /// gets `Conflict` until the winner finishes or fails.
    pub fn claim_for_processing(&self, id: FileId) -> Result<UploadedFile> {
        let mut entry = self
            .files
            .get_mut(&id)
            .ok_or_else(|| SisError::not_found(format!("file {id}")))?;
        let f = entry.value_mut();
        let claimable = match f.status {
            FileStatus::Uploaded => true,
            FileStatus::Error => matches!(f.highest_stage, FileStatus::Uploaded | FileStatus::Processing),
            _ => false,
        };
        if !claimable {
            return Err(SisError::Conflict(format!("file {id} is {}, not claimable", f.status)));
        }
        f.status = FileStatus::Processing;
        f.highest_stage = FileStatus::Processing;
        f.progress = 0;
        f.error = None;
        f.last_accessed = self.clock.now();
        debug!(%id, "file claimed for processing");
        Ok(f.clone())
    }

    /// Move an upload into `processed/` and mark it processed.
    pub fn move_to_processed(&self, id: FileId) -> Result<PathBuf> {
        let src = {
            let f = self
                .files
                .get(&id)
                .ok_or_else(|| SisError::not_found(format!("file {id}")))?;
            if !f.status.can_move_to(FileStatus::Processed, f.highest_stage) {
                return Err(SisError::Conflict(format!(
                    "file {id}: cannot move from {} to processed",
                    f.status
                )));
            }
            f.path.clone()
        };

        let dst = match src.file_name() {
            Some(name) => self.processed_dir.join(name),
            None => return Err(SisError::not_found(format!("file {id} has no stored name"))),
        };
        if src != dst {
            move_file(&src, &dst)?;
        }

        let now = self.clock.now();
        let Some(mut entry) = self.files.get_mut(&id) else {
            // Cleaned up while the file was moving.
            remove_if_present(&dst)?;
            return Err(SisError::not_found(format!("file {id}")));
        };
        let f = entry.value_mut();
        f.path = dst.clone();
        f.status = FileStatus::Processed;
        if f.highest_stage.rank() < FileStatus::Processed.rank() {
            f.highest_stage = FileStatus::Processed;
        }
        f.processed_at = Some(now);
        f.last_accessed = now;
        f.error = None;
        debug!(%id, path = %dst.display(), "file moved to processed");
        Ok(dst)
    }

    /// Copy a processed file into `downloads/` for a limited time.
    pub fn make_download_copy(&self, id: FileId, name: Option<&str>) -> Result<DownloadArtifact> {
        let (src, original) = {
            let mut f = self
                .files
                .get_mut(&id)
                .ok_or_else(|| SisError::not_found(format!("file {id}")))?;
            if !f.effective_stage().is_processed() {
                return Err(SisError::Conflict(format!(
                    "file {id} is {}; only processed files can be downloaded",
                    f.status
                )));
            }
            f.last_accessed = self.clock.now();
            (f.path.clone(), f.original_name.clone())
        };

        let file_name = sanitize_file_name(name.unwrap_or(&original));
        let dl_id = Uuid::new_v4();
        let path = self.downloads_dir.join(format!("{dl_id}_{file_name}"));
        let mut reader = File::open(&src)?;
        write_private(&path, |f| io::copy(&mut reader, f).map(|_| ()))?;

        let now = self.clock.now();
        let artifact = DownloadArtifact {
            id: dl_id,
            source: Some(id),
            path,
            file_name,
            created_at: now,
            expires_at: now + self.ttls.download,
        };
        self.downloads.insert(dl_id, artifact.clone());
        info!(%id, download = %dl_id, "download copy created");
        Ok(artifact)
    }

    /// A live download; expired ones count as gone.
    pub fn download(&self, download_id: Uuid) -> Result<DownloadArtifact> {
        let art = self
            .downloads
            .get(&download_id)
            .map(|a| a.clone())
            .ok_or_else(|| SisError::not_found(format!("download {download_id}")))?;
        if art.is_expired(self.clock.now()) {
            return Err(SisError::not_found(format!("download {download_id} has expired")));
        }
        Ok(art)
    }

    /// Drop a file or download and its metadata. `false` when unknown.
    pub fn cleanup(&self, id: Uuid) -> Result<bool> {
        if let Some((_, f)) = self.files.remove(&id) {
            remove_if_present(&f.path)?;
            info!(%id, "file cleaned up");
            return Ok(true);
        }
        if let Some((_, a)) = self.downloads.remove(&id) {
            remove_if_present(&a.path)?;
            info!(download = %id, "download cleaned up");
            return Ok(true);
        }
        Ok(false)
    }

    /// Every tracked file, oldest first.
    pub fn list(&self) -> Vec<UploadedFile> {
        let mut out: Vec<UploadedFile> = self.files.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|f| f.created_at);
        out
    }

    pub fn stats(&self) -> FileStats {
        let mut s = FileStats::default();
        for f in self.files.iter() {
            s.total_files += 1;
            s.total_bytes += f.size;
            match f.status {
                FileStatus::Uploaded => s.uploaded += 1,
                FileStatus::Processing => s.processing += 1,
                FileStatus::Processed => s.processed += 1,
                FileStatus::Deduplicated => s.deduplicated += 1,
                FileStatus::Exported => s.exported += 1,
                FileStatus::Error => s.error += 1,
            }
        }
        let now = self.clock.now();
        s.downloads = self.downloads.iter().filter(|a| !a.is_expired(now)).count() as u64;
        s
    }

    fn file_expired(&self, f: &UploadedFile, now: OffsetDateTime) -> bool {
        let idle = now - f.last_accessed;
        match f.effective_stage() {
            FileStatus::Uploaded => idle > self.ttls.upload,
            FileStatus::Processed | FileStatus::Deduplicated | FileStatus::Exported => {
                idle > self.ttls.processed
            }
            FileStatus::Processing | FileStatus::Error => false,
        }
    }

    fn delete_swept(path: &Path, size: u64, report: &mut SweepReport) -> bool {
        match remove_if_present(path) {
            Ok(()) => {
                report.freed_bytes += size;
                true
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "could not delete expired file");
                report.failures.push(SweepFailure {
                    path: path.to_path_buf(),
                    error: e.to_string(),
                });
                false
            }
        }
    }

    /// Delete expired downloads and idle files.
    pub fn sweep_expired(&self, cancel: &CancelToken) -> Result<SweepReport> {
        let now = self.clock.now();
        let mut report = SweepReport::default();
        let partial = |r: &SweepReport, e: SisError| SisError::PartialSweep {
            deleted: r.deleted(),
            freed: r.freed_bytes,
            source: Box::new(e),
        };

        let expired: Vec<Uuid> = self
            .downloads
            .iter()
            .filter(|a| a.is_expired(now))
            .map(|a| *a.key())
            .collect();
        for id in expired {
            cancel.check().map_err(|e| partial(&report, e))?;
            if let Some((_, a)) = self.downloads.remove_if(&id, |_, a| a.is_expired(now)) {
                let size = fs::metadata(&a.path).map(|m| m.len()).unwrap_or(0);
                if Self::delete_swept(&a.path, size, &mut report) {
                    report.downloads += 1;
                    debug!(download = %id, "expired download removed");
                }
            }
        }

        let idle: Vec<FileId> = self
            .files
            .iter()
            .filter(|f| self.file_expired(f, now))
            .map(|f| *f.key())
            .collect();
        for id in idle {
            cancel.check().map_err(|e| partial(&report, e))?;
            if let Some((_, f)) = self.files.remove_if(&id, |_, f| self.file_expired(f, now)) {
                if Self::delete_swept(&f.path, f.size, &mut report) {
                    match f.effective_stage() {
                        FileStatus::Uploaded => report.uploads += 1,
                        _ => report.processed += 1,
                    }
                    debug!(%id, "idle file removed");
                }
            }
        }

        if report.deleted() > 0 || !report.failures.is_empty() {
            info!(
                downloads = report.downloads,
                uploads = report.uploads,
                processed = report.processed,
                freed = report.freed_bytes,
                failures = report.failures.len(),
                "expired files swept"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use time::macros::datetime;

    fn manager(dir: &Path) -> (FileLifecycleManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(datetime!(2024-06-01 10:00 UTC)));
        let settings = Settings::with_data_dir(dir);
        (FileLifecycleManager::open(&settings, clock.clone()).unwrap(), clock)
    }

    #[test]
    fn store_writes_uuid_named_private_file() {
        let dir = tempfile::tempdir().unwrap();
        let (m, _) = manager(dir.path());
        let id = m.store(b"bytes", "Orders.XLSX").unwrap();
        let f = m.get(id).unwrap();
        assert_eq!(f.status, FileStatus::Uploaded);
        assert_eq!(f.original_name, "Orders.XLSX");
        assert_eq!(f.path, m.uploads_dir().join(format!("{id}.xlsx")));
        assert_eq!(fs::read(&f.path).unwrap(), b"bytes");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&f.path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
            let mode = fs::metadata(m.uploads_dir()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }

    #[test]
    fn rejected_upload_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let (m, _) = manager(dir.path());
        assert!(matches!(m.store(b"x", "notes.txt"), Err(SisError::Validation(_))));
        assert_eq!(fs::read_dir(m.uploads_dir()).unwrap().count(), 0);
        assert!(m.list().is_empty());
    }

    #[test]
    fn status_updates_merge_and_refuse_going_back() {
        let dir = tempfile::tempdir().unwrap();
        let (m, _) = manager(dir.path());
        let id = m.store(b"x", "a.xlsx").unwrap();
        m.set_status(id, FileStatus::Processing, StatusUpdate::progress(50)).unwrap();
        let f = m.set_status(id, FileStatus::Error, StatusUpdate::error("bad sheet")).unwrap();
        assert_eq!(f.error.as_deref(), Some("bad sheet"));
        assert_eq!(f.progress, 50);
        assert_eq!(f.highest_stage, FileStatus::Processing);

        let err = m.set_status(id, FileStatus::Uploaded, StatusUpdate::default()).unwrap_err();
        assert!(matches!(err, SisError::Conflict(_)));
        let f = m.set_status(id, FileStatus::Processing, StatusUpdate::default()).unwrap();
        assert!(f.error.is_none());
    }

    #[test]
    fn download_copy_requires_processing_first() {
        let dir = tempfile::tempdir().unwrap();
        let (m, clock) = manager(dir.path());
        let id = m.store(b"sheet", "My Orders (v2).xlsx").unwrap();
        assert!(matches!(m.make_download_copy(id, None), Err(SisError::Conflict(_))));

        let moved = m.move_to_processed(id).unwrap();
        assert!(moved.starts_with(m.processed_dir()));
        assert!(moved.is_file());
        assert_eq!(m.get(id).unwrap().status, FileStatus::Processed);

        let art = m.make_download_copy(id, None).unwrap();
        assert_eq!(art.file_name, "My_Orders__v2_.xlsx");
        assert_eq!(fs::read(&art.path).unwrap(), b"sheet");
        assert_eq!(m.download(art.id).unwrap(), art);

        clock.advance(Duration::hours(1));
        assert!(matches!(m.download(art.id), Err(SisError::NotFound(_))));
    }

    #[test]
    fn cleanup_removes_file_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let (m, _) = manager(dir.path());
        let id = m.store(b"x", "a.xlsx").unwrap();
        let path = m.get(id).unwrap().path;
        assert!(m.cleanup(id).unwrap());
        assert!(!path.exists());
        assert!(!m.cleanup(id).unwrap());
        assert!(matches!(m.get(id), Err(SisError::NotFound(_))));
    }

    #[test]
    fn sweep_follows_stage_rules() {
        let dir = tempfile::tempdir().unwrap();
        let (m, clock) = manager(dir.path());
        let fresh_upload = m.store(b"1", "a.xlsx").unwrap();
        let stuck = m.store(b"22", "b.xlsx").unwrap();
        m.set_status(stuck, FileStatus::Processing, StatusUpdate::default()).unwrap();
        let done = m.store(b"333", "c.xlsx").unwrap();
        m.move_to_processed(done).unwrap();
        let failed_upload = m.store(b"4444", "d.xlsx").unwrap();
        m.set_status(failed_upload, FileStatus::Error, StatusUpdate::error("boom")).unwrap();

        clock.advance(Duration::hours(25));
        let report = m.sweep_expired(&CancelToken::new()).unwrap();
        assert_eq!(report.uploads, 2);
        assert_eq!(report.processed, 0);
        assert_eq!(report.freed_bytes, 5);
        assert!(m.get(fresh_upload).is_err());
        assert!(m.get(failed_upload).is_err());
        assert!(m.get(stuck).is_ok());
        assert!(m.get(done).is_ok());

        clock.advance(Duration::days(8));
        let report = m.sweep_expired(&CancelToken::new()).unwrap();
        assert_eq!(report.processed, 1);
        assert!(m.get(stuck).is_ok());
        assert!(report.failures.is_empty());
    }

    #[test]
    fn reopen_adopts_files_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let (m, clock) = manager(dir.path());
        let a = m.store(b"a", "a.xlsx").unwrap();
        let b = m.store(b"b", "b.xlsx").unwrap();
        m.move_to_processed(b).unwrap();
        m.make_download_copy(b, Some("out.xlsx")).unwrap();
        fs::write(m.uploads_dir().join("stray.txt"), "?").unwrap();
        drop(m);

        let reopened = FileLifecycleManager::open(&Settings::with_data_dir(dir.path()), clock).unwrap();
        assert_eq!(reopened.get(a).unwrap().status, FileStatus::Uploaded);
        assert_eq!(reopened.get(b).unwrap().status, FileStatus::Processed);
        assert_eq!(reopened.list().len(), 2);
        assert_eq!(reopened.stats().downloads, 1);
    }

    #[test]
    fn only_one_claim_wins() {
        let dir = tempfile::tempdir().unwrap();
        let (m, _) = manager(dir.path());
        let id = m.store(b"x", "a.xlsx").unwrap();
        assert_eq!(m.claim_for_processing(id).unwrap().status, FileStatus::Processing);
        assert!(matches!(m.claim_for_processing(id), Err(SisError::Conflict(_))));

        m.set_status(id, FileStatus::Error, StatusUpdate::error("bad sheet")).unwrap();
        let f = m.claim_for_processing(id).unwrap();
        assert!(f.error.is_none());

        m.move_to_processed(id).unwrap();
        m.set_status(id, FileStatus::Error, StatusUpdate::error("export failed")).unwrap();
        assert!(matches!(m.claim_for_processing(id), Err(SisError::Conflict(_))));
        assert!(m.make_download_copy(id, None).is_ok());
    }

    #[test]
    fn failed_move_keeps_the_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.xlsx");
        fs::write(&src, b"sheet").unwrap();
        let dst = dir.path().join("taken");
        fs::create_dir(&dst).unwrap();
        fs::write(dst.join("inner"), b"?").unwrap();

        assert!(move_file(&src, &dst).is_err());
        assert_eq!(fs::read(&src).unwrap(), b"sheet");
        assert!(dst.join("inner").is_file());
    }

    #[test]
    fn sanitized_names_stay_inside_downloads() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("a b.xlsx"), "a_b.xlsx");
        assert_eq!(sanitize_file_name(".."), "download");
    }
}
