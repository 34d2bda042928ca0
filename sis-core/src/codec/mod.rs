use crate::domain::Dataset;
use crate::error::Result;
use std::path::Path;

/// Spreadsheet reader/writer the pipeline and store export go through.
pub trait SheetCodec: Send + Sync {
    /// First sheet; first row is the header.
    fn read_table(&self, path: &Path) -> Result<Dataset>;
    /// Single sheet with a header row and one row per record.
    fn write_table(&self, path: &Path, table: &Dataset) -> Result<()>;
}

pub mod xlsx;

pub use xlsx::XlsxCodec;
