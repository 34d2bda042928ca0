// sis_core/src/repo.rs
use crate::domain::Dataset;
use crate::error::Result;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct OpenParams {
    pub store_path: PathBuf,
}

/// Storage backend behind the central store.
pub trait TableRepo: Send + Sync {
    fn path(&self) -> &Path;

    fn exists(&self) -> bool;

    /// Empty dataset when the backing file is absent.
    fn read(&self) -> Result<Dataset>;

    /// Stored header; empty when absent or header-less.
    fn read_header(&self) -> Result<Vec<String>>;

    /// Full replace.
    fn write(&self, table: &Dataset) -> Result<()>;

    /// Add rows after the existing ones without touching the header.
    fn append(&self, delta: &Dataset) -> Result<()>;
}
