//! Transport capability consumed by [`ResumableUpload`](crate::ResumableUpload).
//!
//! A transport starts one asynchronous send per attempt and reports its
//! lifecycle through the [`SignalSink`] it was handed. Implementations may
//! emit signals from any thread, including synchronously from inside
//! [`Transport::start`] or [`AttemptHandle::abort`].

use std::sync::Weak;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use resumable_protocol::TransportSignal;

use crate::upload::Shared;

/// What a single attempt must send.
#[derive(Debug, Clone)]
pub struct AttemptRequest {
    /// Destination endpoint, passed through unchanged.
    pub endpoint: String,
    /// Attempt number (1-based, increments on every resume/retry).
    pub attempt: u32,
    /// Byte position of `body` within the full payload.
    pub offset: u64,
    /// Total payload size.
    pub total_size: u64,
    /// The slice `[offset, total_size)` of the payload.
    pub body: Bytes,
    /// Optional MIME type of the payload.
    pub content_type: Option<String>,
}

impl AttemptRequest {
    /// Number of bytes this attempt is asked to send.
    pub fn len(&self) -> u64 {
        self.body.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Handle to an in-flight attempt.
pub trait AttemptHandle: Send + Sync {
    /// Requests cancellation. The transport acknowledges by emitting
    /// [`TransportSignal::Aborted`]; this call must not block on that.
    fn abort(&self);
}

impl AttemptHandle for CancellationToken {
    fn abort(&self) {
        self.cancel();
    }
}

/// Abstract send capability.
///
/// Using a trait keeps the state machine decoupled from the wire and
/// testable with scripted transports.
pub trait Transport: Send + Sync {
    /// Starts sending `request` and returns a handle used to abort it.
    fn start(&self, request: AttemptRequest, sink: SignalSink) -> Box<dyn AttemptHandle>;
}

/// Delivers signals for exactly one attempt back to its upload.
///
/// Holds only a weak reference: once the upload is dropped, signals are
/// discarded.
#[derive(Clone)]
pub struct SignalSink {
    upload: Weak<Shared>,
    attempt: u32,
}

impl SignalSink {
    pub(crate) fn new(upload: Weak<Shared>, attempt: u32) -> Self {
        Self { upload, attempt }
    }

    /// Attempt this sink is bound to.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns `true` while the owning upload is alive.
    pub fn is_connected(&self) -> bool {
        self.upload.strong_count() > 0
    }

    /// Hands a signal to the upload.
    pub fn emit(&self, signal: TransportSignal) {
        if let Some(shared) = self.upload.upgrade() {
            shared.handle_signal(self.attempt, signal);
        }
    }

    pub fn started(&self) {
        self.emit(TransportSignal::Started);
    }

    /// Reports cumulative bytes sent within this attempt.
    pub fn progress(&self, loaded: u64) {
        self.emit(TransportSignal::Progress { loaded });
    }

    pub fn aborted(&self) {
        self.emit(TransportSignal::Aborted);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(TransportSignal::Error {
            message: message.into(),
        });
    }

    pub fn timeout(&self) {
        self.emit(TransportSignal::Timeout);
    }

    pub fn completed(&self) {
        self.emit(TransportSignal::Completed);
    }
}

impl std::fmt::Debug for SignalSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalSink")
            .field("attempt", &self.attempt)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_token_is_a_handle() {
        let token = CancellationToken::new();
        let handle: Box<dyn AttemptHandle> = Box::new(token.clone());
        handle.abort();
        assert!(token.is_cancelled());
    }

    #[test]
    fn detached_sink_discards_signals() {
        let sink = SignalSink::new(Weak::new(), 3);
        assert_eq!(sink.attempt(), 3);
        assert!(!sink.is_connected());
        // Should not panic.
        sink.progress(10);
        sink.completed();
    }

    #[test]
    fn request_len_matches_body() {
        let payload = Bytes::from_static(b"0123456789");
        let req = AttemptRequest {
            endpoint: "upload".into(),
            attempt: 2,
            offset: 4,
            total_size: 10,
            body: payload.slice(4..),
            content_type: None,
        };
        assert_eq!(req.len(), 6);
        assert!(!req.is_empty());
        assert_eq!(&req.body[..], b"456789");
    }
}
