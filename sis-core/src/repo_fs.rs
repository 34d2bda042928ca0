use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::domain::Dataset;
use crate::error::{Result, SisError};
use crate::repo::{OpenParams, TableRepo};

/// CSV file on the local filesystem: header line, then one line per row.
pub struct CsvTableRepo {
    path: PathBuf,
}

impl CsvTableRepo {
    pub fn new(params: OpenParams) -> Self {
        Self {
            path: params.store_path,
        }
    }
}

pub(crate) fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
}

/// Replace `dest` with whatever `fill` writes, via a temp file in the same directory.
pub(crate) fn write_atomic(dest: &Path, fill: impl FnOnce(&mut fs::File) -> Result<()>) -> Result<()> {
    let dir = parent_dir(dest);
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    fill(tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| SisError::Io(e.error))?;
    Ok(())
}

fn ends_with_newline(f: &mut fs::File) -> Result<bool> {
    let len = f.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    f.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    f.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

impl TableRepo for CsvTableRepo {
    fn path(&self) -> &Path {
        &self.path
    }

    fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn read(&self) -> Result<Dataset> {
        if !self.exists() {
            debug!(path = %self.path.display(), "store absent, reading as empty");
            return Ok(Dataset::empty());
        }
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)?;
        let header: Vec<String> = rdr.headers()?.iter().map(String::from).collect();
        let mut table = Dataset::new(header);
        for rec in rdr.records() {
            let rec = rec?;
            table.push_row(rec.iter().map(String::from).collect())?;
        }
        Ok(table)
    }

    fn read_header(&self) -> Result<Vec<String>> {
        if !self.exists() {
            return Ok(Vec::new());
        }
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)?;
        Ok(rdr.headers()?.iter().map(String::from).collect())
    }

    fn write(&self, table: &Dataset) -> Result<()> {
        write_atomic(&self.path, |f| {
            let mut w = csv::Writer::from_writer(f);
            if table.has_header() {
                w.write_record(table.columns())?;
                for row in table.rows() {
                    w.write_record(row)?;
                }
            }
            w.flush()?;
            Ok(())
        })
    }

    fn append(&self, delta: &Dataset) -> Result<()> {
        if !delta.has_header() {
            return Ok(());
        }
        let header = self.read_header()?;
        if header.is_empty() {
            // Fresh store: the delta's header becomes the schema.
            let delta = delta.clone().aligned_to(delta.columns())?;
            return self.write(&delta);
        }
        let delta = delta.clone().aligned_to(&header)?;
        if delta.is_empty() {
            return Ok(());
        }

        let mut w = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        for row in delta.rows() {
            w.write_record(row)?;
        }
        let mut buf = w
            .into_inner()
            .map_err(|e| SisError::Format(format!("csv buffer: {}", e.error())))?;

        let mut f = OpenOptions::new().read(true).append(true).open(&self.path)?;
        if !ends_with_newline(&mut f)? {
            buf.insert(0, b'\n');
        }
        // One write so a reader never sees half of the batch's rows interleaved with another writer.
        f.write_all(&buf)?;
        f.sync_data()?;
        Ok(())
    }
}
