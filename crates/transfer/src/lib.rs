//! Resumable uploads with pause/resume and progress notifications.
//!
//! [`ResumableUpload`] drives one [`Transport`] attempt at a time over a
//! shared, immutable payload. Pausing aborts the in-flight attempt without
//! losing confirmed bytes; resuming issues a fresh attempt for the remaining
//! slice. Every handled transport signal is fanned out to observers as an
//! [`UploadUpdate`](resumable_protocol::UploadUpdate).

mod attempt;
mod observers;
mod options;
mod progress;
mod transport;
mod upload;

pub use observers::SubscriptionId;
pub use options::UploadOptions;
pub use progress::SpeedCalculator;
pub use transport::{AttemptHandle, AttemptRequest, SignalSink, Transport};
pub use upload::{ResumableUpload, WeakUpload};

pub use resumable_protocol::{TransportSignal, UploadState, UploadUpdate};

/// Errors produced by the transfer crate.
///
/// Transport failures are never returned here; they surface as
/// [`UploadState::Errored`] or [`UploadState::TimedOut`] notifications.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("cannot pause an upload that is not running (state: {0})")]
    NotRunning(UploadState),

    #[error("upload is not paused (state: {0})")]
    NotPaused(UploadState),

    #[error("upload has not failed and cannot be retried (state: {0})")]
    NotRetryable(UploadState),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TransferError {
    /// Returns `true` for caller-side state precondition violations.
    pub fn is_invalid_state(&self) -> bool {
        matches!(
            self,
            Self::NotRunning(_) | Self::NotPaused(_) | Self::NotRetryable(_)
        )
    }
}

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
