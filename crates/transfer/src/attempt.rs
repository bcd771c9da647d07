use std::sync::Arc;

use crate::transport::AttemptHandle;

/// Book-keeping owned by the attempt currently in flight.
///
/// Created when an attempt is issued and dropped when the attempt ends,
/// which also releases the transport handle.
pub(crate) struct AttemptContext {
    pub(crate) id: u32,
    /// Payload offset the attempt started at.
    pub(crate) offset: u64,
    /// Length of the slice handed to the transport.
    pub(crate) len: u64,
    /// Last cumulative `loaded` value reported by this attempt.
    last_loaded: u64,
    handle: Option<Arc<dyn AttemptHandle>>,
    abort_requested: bool,
}

impl AttemptContext {
    pub(crate) fn new(id: u32, offset: u64, len: u64) -> Self {
        Self {
            id,
            offset,
            len,
            last_loaded: 0,
            handle: None,
            abort_requested: false,
        }
    }

    /// Folds a cumulative `loaded` report into a delta.
    ///
    /// Values past the slice length are clamped; values that go backwards
    /// yield zero and leave the baseline where it was.
    pub(crate) fn observe(&mut self, loaded: u64) -> u64 {
        let loaded = loaded.min(self.len);
        let delta = loaded.saturating_sub(self.last_loaded);
        self.last_loaded = self.last_loaded.max(loaded);
        delta
    }

    pub(crate) fn last_loaded(&self) -> u64 {
        self.last_loaded
    }

    /// Stores the transport handle. Returns `true` if a pause arrived before
    /// the handle did, in which case the caller must abort it now.
    pub(crate) fn attach(&mut self, handle: Arc<dyn AttemptHandle>) -> bool {
        self.handle = Some(handle);
        self.abort_requested
    }

    /// Records an abort request and returns the handle to abort, if known.
    pub(crate) fn request_abort(&mut self) -> Option<Arc<dyn AttemptHandle>> {
        self.abort_requested = true;
        self.handle.clone()
    }

    pub(crate) fn abort_requested(&self) -> bool {
        self.abort_requested
    }

    pub(crate) fn take_handle(&mut self) -> Option<Arc<dyn AttemptHandle>> {
        self.handle.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandle(AtomicUsize);

    impl AttemptHandle for CountingHandle {
        fn abort(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn deltas_follow_cumulative_loaded() {
        let mut ctx = AttemptContext::new(1, 0, 1000);
        assert_eq!(ctx.observe(200), 200);
        assert_eq!(ctx.observe(500), 300);
        assert_eq!(ctx.last_loaded(), 500);
    }

    #[test]
    fn loaded_going_backwards_yields_zero() {
        let mut ctx = AttemptContext::new(1, 0, 1000);
        ctx.observe(600);
        assert_eq!(ctx.observe(400), 0);
        assert_eq!(ctx.last_loaded(), 600);
        assert_eq!(ctx.observe(700), 100);
    }

    #[test]
    fn loaded_is_clamped_to_slice() {
        let mut ctx = AttemptContext::new(2, 500, 500);
        assert_eq!(ctx.observe(300), 300);
        assert_eq!(ctx.observe(9_999), 200);
        assert_eq!(ctx.observe(10_000), 0);
    }

    #[test]
    fn abort_before_attach_is_remembered() {
        let mut ctx = AttemptContext::new(1, 0, 10);
        assert!(ctx.request_abort().is_none());
        assert!(ctx.abort_requested());

        let handle = Arc::new(CountingHandle(AtomicUsize::new(0)));
        assert!(ctx.attach(handle.clone()));
        assert!(ctx.take_handle().is_some());
        assert!(ctx.take_handle().is_none());
    }

    #[test]
    fn abort_after_attach_returns_handle() {
        let mut ctx = AttemptContext::new(1, 0, 10);
        let handle = Arc::new(CountingHandle(AtomicUsize::new(0)));
        assert!(!ctx.attach(handle.clone()));

        let h = ctx.request_abort().unwrap();
        h.abort();
        assert_eq!(handle.0.load(Ordering::SeqCst), 1);
    }
}
