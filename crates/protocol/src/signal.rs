use serde::{Deserialize, Serialize};

/// A lifecycle signal reported by a transport for one attempt.
///
/// `Progress.loaded` is cumulative within the attempt and counts from zero
/// for the slice the attempt was given, not from the payload start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportSignal {
    Started,
    Progress { loaded: u64 },
    Aborted,
    Error { message: String },
    Timeout,
    Completed,
}

impl TransportSignal {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Progress { .. } => "progress",
            Self::Aborted => "aborted",
            Self::Error { .. } => "error",
            Self::Timeout => "timeout",
            Self::Completed => "completed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(TransportSignal::Started.kind(), "started");
        assert_eq!(TransportSignal::Progress { loaded: 1 }.kind(), "progress");
        assert_eq!(TransportSignal::Timeout.kind(), "timeout");
        assert_eq!(
            TransportSignal::Error {
                message: "reset".into()
            }
            .kind(),
            "error"
        );
    }

    #[test]
    fn tagged_json_shape() {
        let json = serde_json::to_string(&TransportSignal::Progress { loaded: 42 }).unwrap();
        assert_eq!(json, r#"{"type":"progress","loaded":42}"#);

        let parsed: TransportSignal =
            serde_json::from_str(r#"{"type":"error","message":"reset"}"#).unwrap();
        assert_eq!(
            parsed,
            TransportSignal::Error {
                message: "reset".into()
            }
        );
    }
}
