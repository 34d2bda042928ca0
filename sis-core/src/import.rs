//! Spreadsheet batches into the central store: backup, read, append, verify.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use time::Duration;
use tracing::{debug, error, info};

use crate::backup::{BackupManager, BackupRef, PruneReport};
use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::config::Settings;
use crate::domain::{Dataset, ORDER_CODE};
use crate::error::{Result, SisError};
use crate::lock::StoreLock;
use crate::store::{Candidate, Decision, DedupMode, DedupOutcome, DedupReview, DuplicateKey, ExportReport, TabularStore};

/// Rows moved per cancellation check.
const BATCH_ROWS: usize = 512;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportRequest {
    pub path: PathBuf,
    /// Name the user uploaded; its stem becomes the `orderCode`.
    pub original_name: Option<String>,
    /// Keep exactly these columns, in this order.
    pub keep_columns: Option<Vec<String>>,
}

impl ImportRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            original_name: None,
            keep_columns: None,
        }
    }

    pub fn original_name(mut self, name: impl Into<String>) -> Self {
        self.original_name = Some(name.into());
        self
    }

    pub fn keep_columns<I, S>(mut self, cols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keep_columns = Some(cols.into_iter().map(Into::into).collect());
        self
    }

    /// Stem of the original name when given, else of the stored path.
    pub fn order_code(&self) -> Result<String> {
        let stem = match &self.original_name {
            Some(name) => Path::new(name).file_stem(),
            None => self.path.file_stem(),
        };
        stem.and_then(|s| s.to_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .ok_or_else(|| {
                SisError::Validation(format!(
                    "cannot derive an order code from {}",
                    self.original_name
                        .clone()
                        .unwrap_or_else(|| self.path.display().to_string())
                ))
            })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub rows: usize,
    pub order_code: String,
    /// Snapshot taken before the append; `None` when the store did not exist yet.
    pub backup: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    BackingUp,
    Reading,
    Appending,
    Done,
    RollingBack,
    Failed,
}

pub struct ImportPipeline {
    store: TabularStore,
    backups: BackupManager,
}

impl ImportPipeline {
    pub fn new(store: TabularStore, backups: BackupManager) -> Self {
        Self { store, backups }
    }

    pub fn from_settings(s: &Settings, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self::new(
            TabularStore::open_csv(&s.store_path)?,
            BackupManager::from_settings(s, clock)?,
        ))
    }

    pub fn store(&self) -> &TabularStore {
        &self.store
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    fn lock(&self) -> Result<StoreLock> {
        StoreLock::acquire(self.store.path())
    }

    /// Read and shape one spreadsheet. The store is not touched.
    pub fn ingest(&self, req: &ImportRequest, cancel: &CancelToken) -> Result<Dataset> {
        let order_code = req.order_code()?;
        cancel.check()?;
        let sheet = self.store.codec().read_table(&req.path)?;
        let sheet = match &req.keep_columns {
            Some(cols) => sheet.project(cols)?,
            None => sheet,
        };
        if !sheet.has_header() {
            return Ok(sheet);
        }

        let mut out = Dataset::new(sheet.columns().iter().cloned());
        let rows = sheet.into_rows();
        for batch in rows.chunks(BATCH_ROWS) {
            cancel.check()?;
            for row in batch {
                out.push_row(row.clone())?;
            }
        }
        out.prepend_column(ORDER_CODE, &order_code);
        debug!(file = %req.path.display(), rows = out.len(), %order_code, "spreadsheet ingested");
        Ok(out)
    }

    /// Import one spreadsheet under the store lock, rolling back on a failed append.
    pub fn process(&self, req: &ImportRequest, cancel: &CancelToken) -> Result<ImportReport> {
        let mut phase = Phase::Idle;
        let mut step = |next: Phase| {
            debug!(from = ?phase, to = ?next, file = %req.path.display(), "import phase");
            phase = next;
        };

        let _lock = self.lock()?;
        step(Phase::BackingUp);
        let existed = self.store.exists();
        let before = self.store.read()?.len();
        let backup = self.backups.backup()?;

        step(Phase::Reading);
        let delta = self.ingest(req, cancel)?;
        let order_code = req.order_code()?;

        step(Phase::Appending);
        let appended = self.store.append(&delta).and_then(|()| {
            let after = self.store.read()?.len();
            if after == before + delta.len() {
                Ok(())
            } else {
                Err(SisError::Integrity {
                    path: self.store.path().to_path_buf(),
                    reason: format!(
                        "expected {} rows after append, found {after}",
                        before + delta.len()
                    ),
                })
            }
        });

        if let Err(cause) = appended {
            step(Phase::RollingBack);
            let err = self.roll_back(existed, backup.as_ref(), cause);
            step(Phase::Failed);
            return Err(err);
        }
        step(Phase::Done);
        info!(
            file = %req.path.display(),
            rows = delta.len(),
            %order_code,
            "spreadsheet imported"
        );
        Ok(ImportReport {
            rows: delta.len(),
            order_code,
            backup: backup.map(|b| b.path),
        })
    }

    fn roll_back(&self, existed: bool, backup: Option<&BackupRef>, cause: SisError) -> SisError {
        error!(error = %cause, store = %self.store.path().display(), "append failed, rolling back");
        let restored = match backup {
            Some(b) => self.backups.restore(b),
            None if !existed => match fs::remove_file(self.store.path()) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
            None => Err(SisError::Integrity {
                path: self.store.path().to_path_buf(),
                reason: "no backup to roll back to".into(),
            }),
        };
        match restored {
            Ok(()) => SisError::AppendRolledBack {
                source: Box::new(cause),
                backup: backup.map(|b| b.path.clone()),
            },
            Err(rollback) => {
                error!(error = %rollback, "rollback failed, store may be inconsistent");
                SisError::RollbackFailed {
                    append: Box::new(cause),
                    rollback: Box::new(rollback),
                }
            }
        }
    }

    /// Forceful: backup and rewrite now. Soft: hand back a review to drive.
    pub fn remove_duplicates(&self, mode: DedupMode) -> Result<DedupOutcome> {
        match mode {
            DedupMode::Forceful => {
                let _lock = self.lock()?;
                self.backups.backup()?;
                self.store.deduplicate_forceful().map(DedupOutcome::Removed)
            }
            DedupMode::Soft => self.begin_review(&DuplicateKey::FullRow).map(DedupOutcome::Review),
        }
    }

    pub fn begin_review(&self, key: &DuplicateKey) -> Result<DedupReview> {
        let _lock = self.lock()?;
        self.store.begin_review(key)
    }

    /// Pick an abandoned review back up at its first undecided candidate.
    pub fn resume_review(&self, previous: DedupReview) -> Result<DedupReview> {
        let _lock = self.lock()?;
        self.store.resume_review(previous)
    }

    /// Write a finished review, with a fresh backup taken first.
    pub fn commit_review(&self, review: DedupReview) -> Result<usize> {
        let _lock = self.lock()?;
        self.store.ensure_committable(&review)?;
        if review.marked_for_removal() > 0 {
            self.backups.backup()?;
        }
        self.store.commit_review(review)
    }

    /// Review every candidate through `decider`, then commit.
    pub fn remove_duplicates_with<F>(&self, key: &DuplicateKey, decider: F) -> Result<usize>
    where
        F: FnMut(&Candidate) -> Decision,
    {
        let mut review = self.begin_review(key)?;
        review.decide_all(decider)?;
        self.commit_review(review)
    }

    pub fn export(&self, out: &Path, columns: Option<&[String]>) -> Result<ExportReport> {
        let _lock = self.lock()?;
        self.store.export(out, columns)
    }

    pub fn prune_backups(&self, older_than: Duration) -> Result<PruneReport> {
        self.backups.prune(older_than)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::codec::{SheetCodec, XlsxCodec};
    use time::macros::datetime;

    fn pipeline(dir: &Path) -> ImportPipeline {
        let clock = Arc::new(ManualClock::new(datetime!(2024-01-02 03:04:05 UTC)));
        ImportPipeline::new(
            TabularStore::open_csv(dir.join("central_db.csv")).unwrap(),
            BackupManager::new(dir.join("backups"), dir.join("central_db.csv"), clock).unwrap(),
        )
    }

    fn sheet(dir: &Path, name: &str, rows: &[[&str; 2]]) -> PathBuf {
        let mut t = Dataset::new(["a", "q"]);
        for r in rows {
            t.push_row(r.iter().map(|s| s.to_string()).collect()).unwrap();
        }
        let path = dir.join(name);
        XlsxCodec.write_table(&path, &t).unwrap();
        path
    }

    #[test]
    fn order_code_prefers_original_name() {
        let req = ImportRequest::new("/tmp/3f2a.xlsx");
        assert_eq!(req.order_code().unwrap(), "3f2a");
        let req = req.original_name("PO-778.xlsx");
        assert_eq!(req.order_code().unwrap(), "PO-778");
    }

    #[test]
    fn ingest_prepends_order_code_and_projects() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        let path = sheet(dir.path(), "batch7.xlsx", &[["A", "10"], ["B", "20"]]);

        let t = p.ingest(&ImportRequest::new(&path), &CancelToken::new()).unwrap();
        assert_eq!(t.columns(), [ORDER_CODE, "a", "q"]);
        assert_eq!(t.rows()[1], vec!["batch7".to_string(), "B".into(), "20".into()]);

        let req = ImportRequest::new(&path).keep_columns(["q"]);
        let t = p.ingest(&req, &CancelToken::new()).unwrap();
        assert_eq!(t.columns(), [ORDER_CODE, "q"]);

        let req = ImportRequest::new(&path).keep_columns(["q", "price"]);
        let err = p.ingest(&req, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, SisError::Validation(m) if m.contains("price")));
    }

    #[test]
    fn cancelled_import_leaves_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        let path = sheet(dir.path(), "b.xlsx", &[["A", "10"]]);
        p.process(&ImportRequest::new(&path), &CancelToken::new()).unwrap();
        let before = fs::read(p.store().path()).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = p.process(&ImportRequest::new(&path), &cancel).unwrap_err();
        assert!(matches!(err, SisError::Cancelled));
        assert_eq!(fs::read(p.store().path()).unwrap(), before);
    }

    #[test]
    fn import_twice_then_forceful_dedup_returns_to_one_import() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        let path = sheet(dir.path(), "orders.xlsx", &[["A", "10"], ["B", "20"]]);

        let first = p.process(&ImportRequest::new(&path), &CancelToken::new()).unwrap();
        assert_eq!(first.rows, 2);
        assert!(first.backup.is_none());
        let second = p.process(&ImportRequest::new(&path), &CancelToken::new()).unwrap();
        assert!(second.backup.is_some());
        assert_eq!(p.store().read().unwrap().len(), 4);

        match p.remove_duplicates(DedupMode::Forceful).unwrap() {
            DedupOutcome::Removed(n) => assert_eq!(n, 2),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(p.store().read().unwrap().len(), 2);
    }

    #[test]
    fn schema_mismatch_is_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        let good = sheet(dir.path(), "good.xlsx", &[["A", "10"]]);
        p.process(&ImportRequest::new(&good), &CancelToken::new()).unwrap();
        let before = p.store().read().unwrap();

        let mut other = Dataset::new(["a", "price"]);
        other.push_row(vec!["B".into(), "1".into()]).unwrap();
        let bad = dir.path().join("bad.xlsx");
        XlsxCodec.write_table(&bad, &other).unwrap();

        let err = p.process(&ImportRequest::new(&bad), &CancelToken::new()).unwrap_err();
        match err {
            SisError::AppendRolledBack { source, backup } => {
                assert!(matches!(*source, SisError::SchemaMismatch { .. }));
                assert!(backup.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(p.store().read().unwrap(), before);
    }

    #[test]
    fn callback_review_removes_chosen_rows() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        let path = sheet(dir.path(), "o.xlsx", &[["A", "10"]]);
        for _ in 0..3 {
            p.process(&ImportRequest::new(&path), &CancelToken::new()).unwrap();
        }
        let mut seen = 0;
        let removed = p
            .remove_duplicates_with(&DuplicateKey::FullRow, |c| {
                seen += 1;
                if c.row == 1 { Decision::Remove } else { Decision::Keep }
            })
            .unwrap();
        assert_eq!((seen, removed), (2, 1));
        assert_eq!(p.store().read().unwrap().len(), 2);
    }

    #[test]
    fn abandoned_review_resumes_where_it_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        let path = sheet(dir.path(), "o.xlsx", &[["A", "10"]]);
        for _ in 0..3 {
            p.process(&ImportRequest::new(&path), &CancelToken::new()).unwrap();
        }
        let mut review = p.begin_review(&DuplicateKey::FullRow).unwrap();
        review.decide(Decision::Remove).unwrap();

        let mut resumed = p.resume_review(review).unwrap();
        assert_eq!(resumed.remaining(), 1);
        assert_eq!(resumed.current().unwrap().row, 2);
        resumed.decide(Decision::Keep).unwrap();
        assert_eq!(p.commit_review(resumed).unwrap(), 1);
        assert_eq!(p.store().read().unwrap().len(), 2);

        let mut review = p.begin_review(&DuplicateKey::FullRow).unwrap();
        review.decide(Decision::Remove).unwrap();
        p.process(&ImportRequest::new(&path), &CancelToken::new()).unwrap();
        assert!(matches!(p.resume_review(review), Err(SisError::Conflict(_))));
    }
}
