//! The central store: one CSV dataset, append-only outside of dedup and full rewrites.

pub mod dedup;

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::codec::{SheetCodec, XlsxCodec};
use crate::domain::Dataset;
use crate::error::{Result, SisError};
use crate::repo::{OpenParams, TableRepo};
use crate::repo_factory::{Backend, open_repo};

pub use dedup::{Candidate, Decision, DedupMode, DedupReview, DuplicateKey, Fingerprint};

/// Result of [`TabularStore::deduplicate`].
#[derive(Debug)]
pub enum DedupOutcome {
    Removed(usize),
    /// Soft mode: decisions pending, commit with [`TabularStore::commit_review`].
    Review(DedupReview),
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ExportReport {
    pub path: PathBuf,
    /// False when the store was empty and no file was produced.
    pub written: bool,
    pub rows: usize,
    pub columns: Vec<String>,
    /// Requested columns that do not exist in the store.
    pub dropped: Vec<String>,
}

pub struct TabularStore {
    repo: Box<dyn TableRepo>,
    codec: Arc<dyn SheetCodec>,
}

impl TabularStore {
    pub fn new(repo: Box<dyn TableRepo>, codec: Arc<dyn SheetCodec>) -> Self {
        Self { repo, codec }
    }

    /// CSV-backed store with the default spreadsheet codec.
    pub fn open_csv(store_path: impl Into<PathBuf>) -> Result<Self> {
        let repo = open_repo(
            Backend::Csv,
            OpenParams {
                store_path: store_path.into(),
            },
        )?;
        Ok(Self::new(repo, Arc::new(XlsxCodec)))
    }

    pub fn path(&self) -> &Path {
        self.repo.path()
    }

    pub fn codec(&self) -> &Arc<dyn SheetCodec> {
        &self.codec
    }

    pub fn exists(&self) -> bool {
        self.repo.exists()
    }

    pub fn read(&self) -> Result<Dataset> {
        self.repo.read()
    }

    pub fn write(&self, table: &Dataset) -> Result<()> {
        self.repo.write(table)
    }

    pub fn append(&self, delta: &Dataset) -> Result<()> {
        self.repo.append(delta)?;
        info!(rows = delta.len(), store = %self.path().display(), "appended rows");
        Ok(())
    }

    /// BLAKE3 of the store bytes; `None` when absent.
    pub fn fingerprint(&self) -> Result<Option<Fingerprint>> {
        if !self.exists() {
            return Ok(None);
        }
        let mut f = File::open(self.path())?;
        let mut hasher = blake3::Hasher::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = f.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Some(*hasher.finalize().as_bytes()))
    }

    pub fn deduplicate(&self, mode: DedupMode) -> Result<DedupOutcome> {
        match mode {
            DedupMode::Forceful => self.deduplicate_forceful().map(DedupOutcome::Removed),
            DedupMode::Soft => self
                .begin_review(&DuplicateKey::FullRow)
                .map(DedupOutcome::Review),
        }
    }

    pub fn deduplicate_forceful(&self) -> Result<usize> {
        let mut table = self.read()?;
        if table.is_empty() {
            warn!(store = %self.path().display(), "store is empty, nothing to deduplicate");
            return Ok(0);
        }
        let removed = dedup::drop_duplicates(&mut table);
        if removed > 0 {
            self.write(&table)?;
        }
        info!(removed, "duplicates removed forcefully");
        Ok(removed)
    }

    /// Open a soft-mode review over the current store contents.
    pub fn begin_review(&self, key: &DuplicateKey) -> Result<DedupReview> {
        let snapshot = self.fingerprint()?;
        let table = self.read()?;
        DedupReview::new(table, snapshot, key)
    }

    /// A fresh review that keeps the decisions already made in `previous`.
    pub fn resume_review(&self, previous: DedupReview) -> Result<DedupReview> {
        let mut review = self.begin_review(previous.key())?;
        review.adopt_decisions(previous)?;
        Ok(review)
    }

    /// `Conflict` unless every candidate is decided and the store is unchanged.
    pub fn ensure_committable(&self, review: &DedupReview) -> Result<()> {
        if !review.is_complete() {
            return Err(SisError::Conflict(format!(
                "{} duplicate candidate(s) still undecided",
                review.remaining()
            )));
        }
        if review.snapshot() != self.fingerprint()?.as_ref() {
            return Err(SisError::Conflict(
                "store changed since the review was opened; start a new review".into(),
            ));
        }
        Ok(())
    }

    /// Apply a finished review in one write. Returns rows removed.
    pub fn commit_review(&self, review: DedupReview) -> Result<usize> {
        self.ensure_committable(&review)?;
        let (table, removed) = review.into_result();
        if removed > 0 {
            self.write(&table)?;
        }
        info!(removed, "duplicates removed after review");
        Ok(removed)
    }

    /// Write the store (optionally projected) as a single-sheet workbook.
    pub fn export(&self, out: &Path, columns: Option<&[String]>) -> Result<ExportReport> {
        let table = self.read()?;
        let mut report = ExportReport {
            path: out.to_path_buf(),
            ..Default::default()
        };
        if table.is_empty() {
            warn!(store = %self.path().display(), "store is empty, no export written");
            return Ok(report);
        }
        let table = match columns {
            Some(cols) => {
                let (projected, dropped) = table.project_lenient(cols);
                if !dropped.is_empty() {
                    warn!(columns = ?dropped, "requested columns not in the store are ignored");
                }
                report.dropped = dropped;
                projected
            }
            None => table,
        };
        self.codec.write_table(out, &table)?;
        report.written = true;
        report.rows = table.len();
        report.columns = table.columns().to_vec();
        info!(out = %out.display(), rows = report.rows, "exported store");
        Ok(report)
    }
}
