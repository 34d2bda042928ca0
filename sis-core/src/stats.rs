use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStats {
    pub total_files: u64,
    pub uploaded: u64,
    pub processing: u64,
    pub processed: u64,
    pub deduplicated: u64,
    pub exported: u64,
    pub error: u64,
    pub downloads: u64,
    pub total_bytes: u64,
}
