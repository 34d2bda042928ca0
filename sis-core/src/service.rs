//! Entry points for an outer HTTP or CLI layer.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::config::Settings;
use crate::error::{Result, SisError};
use crate::files::{FileId, FileLifecycleManager, FileStatus, StatusUpdate, UploadedFile};
use crate::import::{ImportPipeline, ImportReport, ImportRequest};
use crate::store::{DedupMode, DedupOutcome, DedupReview};

#[derive(Clone, Debug, Default, Serialize)]
pub struct UploadBatch {
    pub accepted: Vec<UploadedRef>,
    pub rejected: Vec<Rejected>,
}

#[derive(Clone, Debug, Serialize)]
pub struct UploadedRef {
    pub id: FileId,
    pub name: String,
    pub size: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct Rejected {
    pub name: String,
    pub reason: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ExportedFile {
    pub download_id: Uuid,
    pub path: PathBuf,
    pub file_name: String,
    pub expires_at: String,
    pub rows: usize,
    pub dropped_columns: Vec<String>,
}

/// Per-file view with the derived flags the UI shows.
#[derive(Clone, Debug, Serialize)]
pub struct FileStatusView {
    pub id: FileId,
    pub original_name: String,
    pub size: u64,
    pub status: FileStatus,
    pub processed: bool,
    pub duplicates_removed: bool,
    pub exported: bool,
    pub error: Option<String>,
    pub progress: u8,
    pub processed_rows: usize,
    pub export_path: Option<PathBuf>,
    pub created_at: String,
    pub last_accessed: String,
}

fn rfc3339(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_default()
}

impl From<&UploadedFile> for FileStatusView {
    fn from(f: &UploadedFile) -> Self {
        let stage = f.effective_stage().rank().unwrap_or(0);
        Self {
            id: f.id,
            original_name: f.original_name.clone(),
            size: f.size,
            status: f.status,
            processed: f.status.is_processed(),
            duplicates_removed: f.status != FileStatus::Error
                && stage >= FileStatus::Deduplicated.rank().unwrap_or(0),
            exported: f.status == FileStatus::Exported,
            error: f.error.clone(),
            progress: f.progress,
            processed_rows: f.processed_rows.unwrap_or(0),
            export_path: f.export_path.clone(),
            created_at: rfc3339(f.created_at),
            last_accessed: rfc3339(f.last_accessed),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct WorkflowOptions {
    pub keep_columns: Option<Vec<String>>,
    pub remove_duplicates: bool,
    pub export_columns: Option<Vec<String>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct WorkflowFile {
    pub id: FileId,
    pub name: String,
    pub rows: usize,
    pub download: ExportedFile,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct WorkflowReport {
    pub processed: Vec<WorkflowFile>,
    pub errors: Vec<Rejected>,
}

impl WorkflowReport {
    pub fn succeeded(&self) -> bool {
        !self.processed.is_empty()
    }
}

pub struct ImporterService {
    files: Arc<FileLifecycleManager>,
    pipeline: ImportPipeline,
}

impl ImporterService {
    pub fn new(files: Arc<FileLifecycleManager>, pipeline: ImportPipeline) -> Self {
        Self { files, pipeline }
    }

    pub fn from_settings(s: &Settings, clock: Arc<dyn Clock>) -> Result<Self> {
        let files = Arc::new(FileLifecycleManager::open(s, clock.clone())?);
        Ok(Self::new(files, ImportPipeline::from_settings(s, clock)?))
    }

    pub fn files(&self) -> &Arc<FileLifecycleManager> {
        &self.files
    }

    pub fn pipeline(&self) -> &ImportPipeline {
        &self.pipeline
    }

    pub fn upload(&self, name: &str, bytes: &[u8]) -> Result<FileId> {
        self.files.store(bytes, name)
    }

    /// Store every acceptable file; rejections are collected, not fatal.
    pub fn upload_many<I, N, B>(&self, uploads: I) -> UploadBatch
    where
        I: IntoIterator<Item = (N, B)>,
        N: AsRef<str>,
        B: AsRef<[u8]>,
    {
        let mut batch = UploadBatch::default();
        for (name, bytes) in uploads {
            let (name, bytes) = (name.as_ref(), bytes.as_ref());
            match self.files.store(bytes, name) {
                Ok(id) => batch.accepted.push(UploadedRef {
                    id,
                    name: name.to_string(),
                    size: bytes.len() as u64,
                }),
                Err(e) => {
                    warn!(name, error = %e, "upload rejected");
                    batch.rejected.push(Rejected {
                        name: name.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        batch
    }

    fn mark_failed(&self, id: FileId, err: &SisError) {
        if let Err(e) = self.files.set_status(id, FileStatus::Error, StatusUpdate::error(err.to_string())) {
            warn!(%id, error = %e, "could not record failure on file");
        }
    }

    /// Import an uploaded file into the central store.
    pub fn process_file(
        &self,
        id: FileId,
        keep_columns: Option<Vec<String>>,
        cancel: &CancelToken,
    ) -> Result<ImportReport> {
        let f = self.files.get(id)?;
        if f.highest_stage.is_processed() {
            info!(%id, "file already processed");
            return Ok(ImportReport {
                rows: 0,
                order_code: ImportRequest::new(&f.path)
                    .original_name(&f.original_name)
                    .order_code()?,
                backup: None,
            });
        }
        // Losing the claim leaves the winner's status alone.
        let f = self.files.claim_for_processing(id)?;
        let result = self.run_process(&f, keep_columns, cancel);
        if let Err(e) = &result {
            self.mark_failed(id, e);
        }
        result
    }

    fn run_process(
        &self,
        f: &UploadedFile,
        keep_columns: Option<Vec<String>>,
        cancel: &CancelToken,
    ) -> Result<ImportReport> {
        let path = self.files.path_of(f.id)?;
        self.files
            .set_status(f.id, FileStatus::Processing, StatusUpdate::progress(50))?;

        let mut req = ImportRequest::new(path).original_name(&f.original_name);
        req.keep_columns = keep_columns;
        let report = self.pipeline.process(&req, cancel)?;

        self.files.move_to_processed(f.id)?;
        self.files.set_status(
            f.id,
            FileStatus::Processed,
            StatusUpdate {
                progress: Some(100),
                processed_rows: Some(report.rows),
                ..Default::default()
            },
        )?;
        info!(id = %f.id, rows = report.rows, "file processed");
        Ok(report)
    }

    /// Forceful mode rewrites the store now; soft mode hands back a review
    /// to finish with [`ImporterService::commit_review`].
    pub fn remove_duplicates(&self, id: FileId, mode: DedupMode) -> Result<DedupOutcome> {
        let f = self.files.get(id)?;
        if !f.effective_stage().is_processed() {
            return Err(SisError::Conflict(format!("file {id} is not processed yet")));
        }
        if f.effective_stage() == FileStatus::Deduplicated {
            info!(%id, "duplicates already removed");
            return Ok(DedupOutcome::Removed(0));
        }
        let outcome = self.pipeline.remove_duplicates(mode);
        match &outcome {
            Ok(DedupOutcome::Removed(_)) => self.mark_deduplicated(&f)?,
            Ok(DedupOutcome::Review(_)) => {}
            Err(e) => self.mark_failed(id, e),
        }
        outcome
    }

    pub fn commit_review(&self, id: FileId, review: DedupReview) -> Result<usize> {
        let f = self.files.get(id)?;
        let removed = self.pipeline.commit_review(review)?;
        self.mark_deduplicated(&f)?;
        Ok(removed)
    }

    fn mark_deduplicated(&self, f: &UploadedFile) -> Result<()> {
        if f.effective_stage() == FileStatus::Processed {
            self.files
                .set_status(f.id, FileStatus::Deduplicated, StatusUpdate::default())?;
        }
        Ok(())
    }

    /// Export the central store into a download copy named after the upload.
    pub fn export_file(&self, id: FileId, columns: Option<Vec<String>>) -> Result<ExportedFile> {
        let f = self.files.get(id)?;
        if !f.effective_stage().is_processed() {
            return Err(SisError::Conflict(format!("file {id} is not processed yet")));
        }
        let result = self.run_export(&f, columns);
        if let Err(e) = &result {
            self.mark_failed(id, e);
        }
        result
    }

    fn run_export(&self, f: &UploadedFile, columns: Option<Vec<String>>) -> Result<ExportedFile> {
        let name = format!("processed_{}", f.original_name);
        let art = self.files.make_download_copy(f.id, Some(&name))?;
        let report = match self.pipeline.export(&art.path, columns.as_deref()) {
            Ok(r) if r.written => r,
            Ok(_) => {
                self.files.cleanup(art.id)?;
                return Err(SisError::Validation("central store is empty, nothing to export".into()));
            }
            Err(e) => {
                self.files.cleanup(art.id)?;
                return Err(e);
            }
        };
        self.files.set_status(
            f.id,
            FileStatus::Exported,
            StatusUpdate {
                export_path: Some(art.path.clone()),
                ..Default::default()
            },
        )?;
        info!(id = %f.id, download = %art.id, rows = report.rows, "file exported");
        Ok(ExportedFile {
            download_id: art.id,
            path: art.path,
            file_name: art.file_name,
            expires_at: rfc3339(art.expires_at),
            rows: report.rows,
            dropped_columns: report.dropped,
        })
    }

    pub fn file_status(&self, id: FileId) -> Result<FileStatusView> {
        Ok(FileStatusView::from(&self.files.get(id)?))
    }

    pub fn all_statuses(&self) -> Vec<FileStatusView> {
        self.files.list().iter().map(FileStatusView::from).collect()
    }

    pub fn cleanup(&self, id: Uuid) -> Result<bool> {
        self.files.cleanup(id)
    }

    /// Upload, process, optionally dedupe, and export each file.
    pub fn run_workflow<I, N, B>(&self, uploads: I, opts: &WorkflowOptions, cancel: &CancelToken) -> WorkflowReport
    where
        I: IntoIterator<Item = (N, B)>,
        N: AsRef<str>,
        B: AsRef<[u8]>,
    {
        let batch = self.upload_many(uploads);
        let mut report = WorkflowReport {
            errors: batch.rejected,
            ..Default::default()
        };
        for up in batch.accepted {
            let fail = |e: SisError| Rejected {
                name: up.name.clone(),
                reason: e.to_string(),
            };
            let imported = match self.process_file(up.id, opts.keep_columns.clone(), cancel) {
                Ok(r) => r,
                Err(e) => {
                    report.errors.push(fail(e));
                    continue;
                }
            };
            if opts.remove_duplicates {
                if let Err(e) = self.remove_duplicates(up.id, DedupMode::Forceful) {
                    warn!(name = %up.name, error = %e, "duplicate removal failed, exporting anyway");
                }
            }
            match self.export_file(up.id, opts.export_columns.clone()) {
                Ok(download) => report.processed.push(WorkflowFile {
                    id: up.id,
                    name: up.name.clone(),
                    rows: imported.rows,
                    download,
                }),
                Err(e) => report.errors.push(fail(e)),
            }
        }
        info!(
            processed = report.processed.len(),
            failed = report.errors.len(),
            "workflow finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::codec::{SheetCodec, XlsxCodec};
    use crate::domain::Dataset;

    fn service(dir: &std::path::Path) -> ImporterService {
        let clock = Arc::new(ManualClock::starting_now());
        ImporterService::from_settings(&Settings::with_data_dir(dir), clock).unwrap()
    }

    fn xlsx_bytes(dir: &std::path::Path, rows: &[[&str; 2]]) -> Vec<u8> {
        let mut t = Dataset::new(["a", "q"]);
        for r in rows {
            t.push_row(r.iter().map(|s| s.to_string()).collect()).unwrap();
        }
        let p = dir.join("fixture.xlsx");
        XlsxCodec.write_table(&p, &t).unwrap();
        std::fs::read(p).unwrap()
    }

    #[test]
    fn process_then_export_walks_the_status_chain() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let bytes = xlsx_bytes(dir.path(), &[["A", "10"], ["B", "20"]]);
        let id = svc.upload("PO-1.xlsx", &bytes).unwrap();

        let report = svc.process_file(id, None, &CancelToken::new()).unwrap();
        assert_eq!((report.rows, report.order_code.as_str()), (2, "PO-1"));
        let view = svc.file_status(id).unwrap();
        assert!(view.processed && !view.exported);
        assert_eq!((view.progress, view.processed_rows), (100, 2));

        let again = svc.process_file(id, None, &CancelToken::new()).unwrap();
        assert_eq!(again.rows, 0);

        let exported = svc.export_file(id, None).unwrap();
        assert_eq!(exported.file_name, "processed_PO-1.xlsx");
        let back = XlsxCodec.read_table(&exported.path).unwrap();
        assert_eq!(back.columns(), ["orderCode", "a", "q"]);
        assert_eq!(back.len(), 2);
        assert!(svc.file_status(id).unwrap().exported);
    }

    #[test]
    fn failed_processing_is_recorded_on_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let id = svc.upload("broken.xlsx", b"not a workbook").unwrap();
        assert!(svc.process_file(id, None, &CancelToken::new()).is_err());
        let view = svc.file_status(id).unwrap();
        assert_eq!(view.status, FileStatus::Error);
        assert!(view.error.is_some());
        assert!(!svc.pipeline().store().exists());
    }

    #[test]
    fn dedup_requires_processing() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let bytes = xlsx_bytes(dir.path(), &[["A", "10"]]);
        let id = svc.upload("a.xlsx", &bytes).unwrap();
        assert!(matches!(
            svc.remove_duplicates(id, DedupMode::Forceful),
            Err(SisError::Conflict(_))
        ));
    }

    #[test]
    fn concurrent_processing_of_one_upload_imports_once() {
        use std::sync::Barrier;

        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let rows: Vec<[&str; 2]> = (0..200).map(|_| ["A", "10"]).collect();
        let bytes = xlsx_bytes(dir.path(), &rows);
        let id = svc.upload("race.xlsx", &bytes).unwrap();

        let gate = Barrier::new(2);
        let results: Vec<Result<ImportReport>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    s.spawn(|| {
                        gate.wait();
                        svc.process_file(id, None, &CancelToken::new())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let imported: usize = results.iter().filter_map(|r| r.as_ref().ok()).map(|r| r.rows).sum();
        assert_eq!(imported, 200);
        for r in &results {
            if let Err(e) = r {
                assert!(matches!(e, SisError::Conflict(_)), "unexpected error: {e}");
            }
        }
        assert_eq!(svc.pipeline().store().read().unwrap().len(), 200);
        let view = svc.file_status(id).unwrap();
        assert_eq!(view.status, FileStatus::Processed);
        assert!(view.error.is_none());
    }

    #[test]
    fn file_stays_usable_after_a_failed_export() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let empty = xlsx_bytes(dir.path(), &[]);
        let id = svc.upload("empty.xlsx", &empty).unwrap();
        assert_eq!(svc.process_file(id, None, &CancelToken::new()).unwrap().rows, 0);
        assert!(matches!(svc.export_file(id, None), Err(SisError::Validation(_))));
        assert_eq!(svc.file_status(id).unwrap().status, FileStatus::Error);

        assert_eq!(svc.process_file(id, None, &CancelToken::new()).unwrap().rows, 0);
        let other = svc
            .upload("more.xlsx", &xlsx_bytes(dir.path(), &[["A", "10"]]))
            .unwrap();
        svc.process_file(other, None, &CancelToken::new()).unwrap();

        assert!(matches!(
            svc.remove_duplicates(id, DedupMode::Forceful),
            Ok(DedupOutcome::Removed(0))
        ));
        let exported = svc.export_file(id, None).unwrap();
        assert_eq!(exported.rows, 1);
        let view = svc.file_status(id).unwrap();
        assert_eq!(view.status, FileStatus::Exported);
        assert!(view.error.is_none());
    }

    #[test]
    fn workflow_collects_per_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let good = xlsx_bytes(dir.path(), &[["A", "10"], ["A", "10"]]);
        let uploads = vec![
            ("good.xlsx".to_string(), good),
            ("notes.txt".to_string(), b"hi".to_vec()),
            ("bad.xlsx".to_string(), b"garbage".to_vec()),
        ];
        let opts = WorkflowOptions {
            remove_duplicates: true,
            ..Default::default()
        };
        let report = svc.run_workflow(uploads, &opts, &CancelToken::new());
        assert!(report.succeeded());
        assert_eq!(report.processed.len(), 1);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.processed[0].download.rows, 1);
        assert_eq!(svc.all_statuses().len(), 2);
    }
}
