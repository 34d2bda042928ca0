use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::SisError;

pub type FileId = Uuid;

/// Lifecycle of an uploaded spreadsheet. Declaration order is stage order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Uploaded,
    Processing,
    Processed,
    Deduplicated,
    Exported,
    Error,
}

impl FileStatus {
    /// Stage index; `Error` sits outside the order.
    pub fn rank(self) -> Option<u8> {
        match self {
            FileStatus::Uploaded => Some(0),
            FileStatus::Processing => Some(1),
            FileStatus::Processed => Some(2),
            FileStatus::Deduplicated => Some(3),
            FileStatus::Exported => Some(4),
            FileStatus::Error => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Uploaded => "uploaded",
            FileStatus::Processing => "processing",
            FileStatus::Processed => "processed",
            FileStatus::Deduplicated => "deduplicated",
            FileStatus::Exported => "exported",
            FileStatus::Error => "error",
        }
    }

    /// Processed or any later stage.
    pub fn is_processed(self) -> bool {
        self.rank().is_some_and(|r| r >= 2)
    }

    /// Forward (or same-stage) moves, any move into `Error`, and out of
    /// `Error` only to `highest` or beyond.
    pub fn can_move_to(self, next: FileStatus, highest: FileStatus) -> bool {
        let Some(to) = next.rank() else {
            return true;
        };
        let from = match self.rank() {
            Some(r) => r,
            None => highest.rank().unwrap_or(0),
        };
        to >= from
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = SisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "uploaded" => FileStatus::Uploaded,
            "processing" => FileStatus::Processing,
            "processed" => FileStatus::Processed,
            "deduplicated" => FileStatus::Deduplicated,
            "exported" => FileStatus::Exported,
            "error" => FileStatus::Error,
            other => return Err(SisError::Validation(format!("unknown file status '{other}'"))),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadedFile {
    pub id: FileId,
    pub original_name: String,
    pub path: PathBuf,
    pub size: u64,
    pub status: FileStatus,
    /// Furthest non-error stage reached; decides expiry while in `Error`.
    pub highest_stage: FileStatus,
    pub created_at: OffsetDateTime,
    pub last_accessed: OffsetDateTime,
    pub processed_at: Option<OffsetDateTime>,
    pub error: Option<String>,
    pub export_path: Option<PathBuf>,
    pub processed_rows: Option<usize>,
    pub progress: u8,
}

impl UploadedFile {
    pub(crate) fn new(
        id: FileId,
        original_name: String,
        path: PathBuf,
        size: u64,
        status: FileStatus,
        at: OffsetDateTime,
    ) -> Self {
        Self {
            id,
            original_name,
            path,
            size,
            status,
            highest_stage: status,
            created_at: at,
            last_accessed: at,
            processed_at: status.is_processed().then_some(at),
            error: None,
            export_path: None,
            processed_rows: None,
            progress: if status.is_processed() { 100 } else { 0 },
        }
    }

    /// Stage whose retention rule applies.
    pub fn effective_stage(&self) -> FileStatus {
        match self.status {
            FileStatus::Error => self.highest_stage,
            s => s,
        }
    }
}

/// Fields merged into an entry by `set_status`; `None` leaves a field as is.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    pub error: Option<String>,
    pub progress: Option<u8>,
    pub processed_rows: Option<usize>,
    pub export_path: Option<PathBuf>,
}

impl StatusUpdate {
    pub fn progress(p: u8) -> Self {
        Self {
            progress: Some(p),
            ..Default::default()
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            error: Some(msg.into()),
            ..Default::default()
        }
    }
}

/// Time-limited copy handed out for download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadArtifact {
    pub id: Uuid,
    /// `None` for artifacts adopted from disk at startup.
    pub source: Option<FileId>,
    pub path: PathBuf,
    pub file_name: String,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl DownloadArtifact {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }
}
