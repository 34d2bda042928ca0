#![forbid(unsafe_code)]

pub mod error;

pub mod util {
    pub mod hash_forward;
}

pub mod cancel;
pub mod clock;
pub mod config;
pub mod domain;
pub mod policy;
pub mod stats;

pub mod codec;

pub mod lock;
pub mod repo;
pub mod repo_factory;
pub mod repo_fs;
pub mod store;

pub mod backup;
pub mod import;

pub mod files;
pub mod service;

// Re-exports: stable API surface
pub use backup::{BackupEntry, BackupManager, BackupRef, PruneReport};
pub use cancel::CancelToken;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Settings;
pub use domain::{Dataset, ORDER_CODE, Record};
pub use error::{ErrorKind, Result, SisError};
pub use files::{FileId, FileLifecycleManager, FileStatus, Sweeper, SweeperHandle};
pub use import::{ImportPipeline, ImportReport, ImportRequest};
pub use service::{ImporterService, WorkflowOptions, WorkflowReport};
pub use store::{DedupMode, DedupOutcome, DedupReview, Decision, DuplicateKey, TabularStore};
