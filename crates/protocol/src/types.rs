use serde::{Deserialize, Serialize};

/// Lifecycle state of a resumable upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UploadState {
    #[default]
    #[serde(rename = "idle")]
    Idle,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "paused")]
    Paused,
    #[serde(rename = "errored")]
    Errored,
    #[serde(rename = "timeout")]
    TimedOut,
    #[serde(rename = "finished")]
    Finished,
}

impl UploadState {
    /// Returns `true` if the transfer failed and may be retried.
    pub fn is_failed(self) -> bool {
        matches!(self, Self::Errored | Self::TimedOut)
    }

    /// Returns the lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Errored => "errored",
            Self::TimedOut => "timeout",
            Self::Finished => "finished",
        }
    }
}

impl std::fmt::Display for UploadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification delivered to observers after every handled signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUpdate {
    pub state: UploadState,
    pub transferred_bytes: u64,
    pub total_bytes: u64,
    /// Attempt number that produced this update (1-based).
    pub attempt: u32,
}

impl UploadUpdate {
    /// Returns the upload progress as a percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.transferred_bytes as f64 / self.total_bytes as f64 * 100.0
    }

    /// Bytes still to send.
    pub fn remaining_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.transferred_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_state_serialization() {
        assert_eq!(
            serde_json::to_string(&UploadState::TimedOut).unwrap(),
            "\"timeout\""
        );
        assert_eq!(
            serde_json::to_string(&UploadState::Running).unwrap(),
            "\"running\""
        );
        let parsed: UploadState = serde_json::from_str("\"paused\"").unwrap();
        assert_eq!(parsed, UploadState::Paused);
    }

    #[test]
    fn display_matches_wire_name() {
        for state in [
            UploadState::Idle,
            UploadState::Running,
            UploadState::Paused,
            UploadState::Errored,
            UploadState::TimedOut,
            UploadState::Finished,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{state}\""));
        }
    }

    #[test]
    fn failed_states() {
        assert!(UploadState::Errored.is_failed());
        assert!(!UploadState::Paused.is_failed());
        assert!(!UploadState::Finished.is_failed());
        assert!(UploadState::TimedOut.is_failed());
    }

    #[test]
    fn update_field_names() {
        let update = UploadUpdate {
            state: UploadState::Running,
            transferred_bytes: 10,
            total_bytes: 20,
            attempt: 1,
        };
        let json = serde_json::to_string(&update).unwrap();
        assert!(json.contains("\"transferredBytes\":10"));
        assert!(json.contains("\"totalBytes\":20"));
    }

    #[test]
    fn update_percentage() {
        let update = UploadUpdate {
            state: UploadState::Running,
            transferred_bytes: 250,
            total_bytes: 1000,
            attempt: 1,
        };
        assert!((update.percentage() - 25.0).abs() < f64::EPSILON);
        assert_eq!(update.remaining_bytes(), 750);
    }

    #[test]
    fn update_percentage_zero_total() {
        let update = UploadUpdate {
            state: UploadState::Finished,
            transferred_bytes: 0,
            total_bytes: 0,
            attempt: 1,
        };
        assert!((update.percentage() - 0.0).abs() < f64::EPSILON);
    }
}
