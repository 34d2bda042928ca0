//! Uploaded spreadsheets from arrival to expiry.

pub mod domain;
pub mod manager;
pub mod sweeper;

pub use domain::{DownloadArtifact, FileId, FileStatus, StatusUpdate, UploadedFile};
pub use manager::{FileLifecycleManager, SweepFailure, SweepReport, Ttls, sanitize_file_name};
pub use sweeper::{Sweeper, SweeperHandle};
