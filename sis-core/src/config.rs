//! Runtime settings, read from `SISMANAGER_*` environment variables.

use std::path::PathBuf;

use time::Duration;

use crate::error::{Result, SisError};

pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub backup_dir: PathBuf,
    /// The central store (CSV).
    pub store_path: PathBuf,
    pub log_level: String,
    pub backup_retention: Duration,
    pub sweep_interval: std::time::Duration,
    pub max_upload_bytes: u64,
    pub allowed_extensions: Vec<String>,
    /// Idle time after which a never-processed upload is swept.
    pub upload_ttl: Duration,
    /// Idle time after which a processed file is swept.
    pub processed_ttl: Duration,
    /// Lifetime of a download copy.
    pub download_ttl: Duration,
}

impl Settings {
    /// Defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            backup_dir: data_dir.join("backups"),
            store_path: data_dir.join("central_db.csv"),
            data_dir,
            log_level: "info".into(),
            backup_retention: Duration::days(30),
            sweep_interval: std::time::Duration::from_secs(3600),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_extensions: vec!["xlsx".into(), "xls".into()],
            upload_ttl: Duration::hours(24),
            processed_ttl: Duration::days(7),
            download_ttl: Duration::hours(1),
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let data_dir = get("SISMANAGER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data"));
        let mut s = Self::with_data_dir(data_dir);

        if let Some(v) = get("SISMANAGER_BACKUP_DIR") {
            s.backup_dir = PathBuf::from(v);
        }
        if let Some(v) = get("SISMANAGER_CENTRAL_DB_PATH") {
            s.store_path = PathBuf::from(v);
        }
        if let Some(v) = get("SISMANAGER_LOG_LEVEL") {
            s.log_level = v.trim().to_lowercase();
        }
        if let Some(v) = get("SISMANAGER_BACKUP_RETENTION_DAYS") {
            s.backup_retention = Duration::days(parse_num("SISMANAGER_BACKUP_RETENTION_DAYS", &v)?);
        }
        if let Some(v) = get("SISMANAGER_SWEEP_INTERVAL_SECS") {
            let secs = parse_num("SISMANAGER_SWEEP_INTERVAL_SECS", &v)?;
            if secs == 0 {
                return Err(SisError::Validation(
                    "SISMANAGER_SWEEP_INTERVAL_SECS must be positive".into(),
                ));
            }
            s.sweep_interval = std::time::Duration::from_secs(secs as u64);
        }
        if let Some(v) = get("SISMANAGER_MAX_UPLOAD_BYTES") {
            s.max_upload_bytes = parse_num("SISMANAGER_MAX_UPLOAD_BYTES", &v)? as u64;
        }
        Ok(s)
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.data_dir.join("processed")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.data_dir.join("downloads")
    }
}

fn parse_num(key: &str, raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|n| *n >= 0)
        .ok_or_else(|| SisError::Validation(format!("{key}: expected a non-negative integer, got '{raw}'")))
}
