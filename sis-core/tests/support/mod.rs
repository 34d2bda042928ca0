#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sis_core::codec::{SheetCodec, XlsxCodec};
use sis_core::domain::Dataset;
use sis_core::error::{Result, SisError};
use sis_core::repo::{OpenParams, TableRepo};
use sis_core::repo_fs::CsvTableRepo;
use sis_core::{BackupManager, ImportPipeline, ManualClock, TabularStore};
use time::macros::datetime;

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(datetime!(2024-02-03 04:05:06 UTC)))
}

pub fn table(header: &[&str], rows: &[&[&str]]) -> Dataset {
    let mut t = Dataset::new(header.iter().copied());
    for r in rows {
        t.push_row(r.iter().map(|s| s.to_string()).collect()).unwrap();
    }
    t
}

/// Write `rows` as a one-sheet workbook at `dir/name`.
pub fn write_sheet(dir: &Path, name: &str, header: &[&str], rows: &[&[&str]]) -> PathBuf {
    let path = dir.join(name);
    XlsxCodec.write_table(&path, &table(header, rows)).unwrap();
    path
}

pub fn sheet_bytes(dir: &Path, header: &[&str], rows: &[&[&str]]) -> Vec<u8> {
    let path = write_sheet(dir, "fixture.xlsx", header, rows);
    std::fs::read(path).unwrap()
}

pub fn store_path(dir: &Path) -> PathBuf {
    dir.join("central_db.csv")
}

pub fn pipeline_with(dir: &Path, repo: Box<dyn TableRepo>) -> ImportPipeline {
    let store = TabularStore::new(repo, Arc::new(XlsxCodec));
    let backups = BackupManager::new(dir.join("backups"), store_path(dir), clock()).unwrap();
    ImportPipeline::new(store, backups)
}

pub fn pipeline(dir: &Path) -> ImportPipeline {
    pipeline_with(
        dir,
        Box::new(CsvTableRepo::new(OpenParams {
            store_path: store_path(dir),
        })),
    )
}

/// How a [`FlakyRepo`] misbehaves on append.
#[derive(Clone, Copy, Debug)]
pub enum Fault {
    /// Writes the rows, then reports an I/O error.
    FailAfterWrite,
    /// Writes the rows twice and reports success.
    DoubleWrite,
}

/// CSV repo whose appends go wrong in a controlled way.
pub struct FlakyRepo {
    inner: CsvTableRepo,
    fault: Fault,
}

impl FlakyRepo {
    pub fn boxed(dir: &Path, fault: Fault) -> Box<dyn TableRepo> {
        Box::new(Self {
            inner: CsvTableRepo::new(OpenParams {
                store_path: store_path(dir),
            }),
            fault,
        })
    }
}

impl TableRepo for FlakyRepo {
    fn path(&self) -> &Path {
        self.inner.path()
    }

    fn exists(&self) -> bool {
        self.inner.exists()
    }

    fn read(&self) -> Result<Dataset> {
        self.inner.read()
    }

    fn read_header(&self) -> Result<Vec<String>> {
        self.inner.read_header()
    }

    fn write(&self, table: &Dataset) -> Result<()> {
        self.inner.write(table)
    }

    fn append(&self, delta: &Dataset) -> Result<()> {
        self.inner.append(delta)?;
        match self.fault {
            Fault::FailAfterWrite => Err(SisError::Io(std::io::Error::other("disk full"))),
            Fault::DoubleWrite => self.inner.append(delta),
        }
    }
}
