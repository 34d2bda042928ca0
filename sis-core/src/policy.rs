use std::path::Path;

use crate::config::Settings;
use crate::error::{Result, SisError};

/// Acceptance rules applied to every upload before anything touches disk.
#[derive(Clone, Debug)]
pub struct UploadPolicy {
    pub allowed_extensions: Vec<String>,
    pub max_bytes: u64,
}

impl UploadPolicy {
    pub fn from_settings(s: &Settings) -> Self {
        Self {
            allowed_extensions: s.allowed_extensions.clone(),
            max_bytes: s.max_upload_bytes,
        }
    }

    /// Lower-cased extension of an accepted name.
    pub fn check(&self, original_name: &str, size: u64) -> Result<String> {
        let name = original_name.trim();
        if name.is_empty() {
            return Err(SisError::Validation("empty file name".into()));
        }
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .filter(|e| self.allowed_extensions.iter().any(|a| a == e))
            .ok_or_else(|| {
                SisError::Validation(format!(
                    "{name}: file type not allowed (accepted: {})",
                    self.allowed_extensions.join(", ")
                ))
            })?;
        if size > self.max_bytes {
            return Err(SisError::Validation(format!(
                "{name}: {size} bytes exceeds the {} byte limit",
                self.max_bytes
            )));
        }
        Ok(ext)
    }
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            allowed_extensions: vec!["xlsx".into(), "xls".into()],
            max_bytes: crate::config::DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}
