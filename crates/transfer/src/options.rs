//! Upload configuration.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::TransferError;
use crate::progress::{DEFAULT_MAX_SAMPLES, DEFAULT_SPEED_WINDOW, SpeedCalculator};

/// Tunables for a [`ResumableUpload`](crate::ResumableUpload).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOptions {
    /// Sliding window used for speed/ETA estimates, in milliseconds.
    #[serde(default = "default_speed_window_ms")]
    pub speed_window_ms: u64,

    /// Maximum number of progress samples kept for speed estimates.
    #[serde(default = "default_speed_max_samples")]
    pub speed_max_samples: usize,

    /// MIME type forwarded to the transport with every attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

fn default_speed_window_ms() -> u64 {
    DEFAULT_SPEED_WINDOW.as_millis() as u64
}

fn default_speed_max_samples() -> usize {
    DEFAULT_MAX_SAMPLES
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            speed_window_ms: default_speed_window_ms(),
            speed_max_samples: default_speed_max_samples(),
            content_type: None,
        }
    }
}

impl UploadOptions {
    /// Sets the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Parses options from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, TransferError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads options from a JSON file.
    pub fn load(path: &Path) -> Result<Self, TransferError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn speed_window(&self) -> Duration {
        Duration::from_millis(self.speed_window_ms)
    }

    pub(crate) fn speed_calculator(&self) -> SpeedCalculator {
        SpeedCalculator::new(self.speed_window(), self.speed_max_samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let opts = UploadOptions::from_json("{}").unwrap();
        assert_eq!(opts, UploadOptions::default());
        assert_eq!(opts.speed_window(), Duration::from_secs(5));
        assert_eq!(opts.speed_max_samples, 100);
        assert!(opts.content_type.is_none());
    }

    #[test]
    fn field_names_are_camel_case() {
        let opts = UploadOptions::from_json(
            r#"{"speedWindowMs":2000,"speedMaxSamples":10,"contentType":"video/mp4"}"#,
        )
        .unwrap();
        assert_eq!(opts.speed_window_ms, 2000);
        assert_eq!(opts.speed_max_samples, 10);
        assert_eq!(opts.content_type.as_deref(), Some("video/mp4"));
    }

    #[test]
    fn omits_missing_content_type() {
        let json = serde_json::to_string(&UploadOptions::default()).unwrap();
        assert!(!json.contains("contentType"));
    }

    #[test]
    fn invalid_json_is_an_error() {
        let err = UploadOptions::from_json("{not json").unwrap_err();
        assert!(matches!(err, TransferError::Json(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.json");
        std::fs::write(&path, r#"{"contentType":"application/zip"}"#).unwrap();

        let opts = UploadOptions::load(&path).unwrap();
        assert_eq!(opts.content_type.as_deref(), Some("application/zip"));
        assert_eq!(opts.speed_max_samples, 100);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = UploadOptions::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, TransferError::Io(_)));
    }
}
