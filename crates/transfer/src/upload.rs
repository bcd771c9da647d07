//! The resumable upload state machine.
//!
//! All mutations of state, byte accounting and the active attempt happen
//! under one mutex. Transport calls and observer callbacks always run with
//! that mutex released, so transports may signal synchronously and
//! observers may call back into the upload.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use resumable_protocol::{TransportSignal, UploadState, UploadUpdate};

use crate::attempt::AttemptContext;
use crate::observers::{ObserverRegistry, SubscriptionId};
use crate::options::UploadOptions;
use crate::progress::SpeedCalculator;
use crate::transport::{AttemptHandle, AttemptRequest, SignalSink, Transport};
use crate::{TransferError, lock};

/// State shared between the public handle and the signal sinks.
pub(crate) struct Shared {
    endpoint: String,
    payload: Bytes,
    content_type: Option<String>,
    transport: Arc<dyn Transport>,
    core: Mutex<Core>,
    observers: ObserverRegistry,
    speed: SpeedCalculator,
}

struct Core {
    state: UploadState,
    transferred: u64,
    /// Number of attempts issued so far; also the id of the latest one.
    attempts: u32,
    /// Present iff `state == Running`.
    active: Option<AttemptContext>,
}

impl Shared {
    fn payload_size(&self) -> u64 {
        self.payload.len() as u64
    }

    fn snapshot(&self, core: &Core) -> UploadUpdate {
        UploadUpdate {
            state: core.state,
            transferred_bytes: core.transferred,
            total_bytes: self.payload_size(),
            attempt: core.attempts,
        }
    }

    /// Opens a new attempt at the confirmed offset.
    ///
    /// The caller holds the core lock and has checked the precondition.
    fn prepare_attempt(self: &Arc<Self>, core: &mut Core) -> (AttemptRequest, SignalSink) {
        core.attempts = core.attempts.wrapping_add(1);
        let id = core.attempts;
        let offset = core.transferred;
        let body = self.payload.slice(offset as usize..);

        core.active = Some(AttemptContext::new(id, offset, body.len() as u64));
        core.state = UploadState::Running;
        self.speed.reset();

        debug!(
            endpoint = %self.endpoint,
            attempt = id,
            offset,
            len = body.len(),
            "starting attempt"
        );

        let request = AttemptRequest {
            endpoint: self.endpoint.clone(),
            attempt: id,
            offset,
            total_size: self.payload_size(),
            body,
            content_type: self.content_type.clone(),
        };
        (request, SignalSink::new(Arc::downgrade(self), id))
    }

    /// Hands the request to the transport and stores the returned handle.
    fn launch(&self, request: AttemptRequest, sink: SignalSink) {
        let id = request.attempt;
        let handle: Arc<dyn AttemptHandle> = Arc::from(self.transport.start(request, sink));

        let abort_now = {
            let mut core = lock(&self.core);
            match core.active.as_mut() {
                Some(ctx) if ctx.id == id => ctx.attach(Arc::clone(&handle)),
                // Attempt already ended while the transport was starting.
                _ => false,
            }
        };
        if abort_now {
            debug!(attempt = id, "pause arrived before transport handle, aborting now");
            handle.abort();
        }

        self.observers.dispatch();
    }

    pub(crate) fn handle_signal(&self, attempt: u32, signal: TransportSignal) {
        {
            let mut guard = lock(&self.core);
            let core = &mut *guard;

            if attempt != core.attempts {
                debug!(
                    attempt,
                    current = core.attempts,
                    signal = signal.kind(),
                    "ignoring signal from replaced attempt"
                );
                return;
            }

            match &signal {
                TransportSignal::Started => {
                    if core.active.is_none() {
                        warn!(attempt, "start signal after attempt ended");
                        return;
                    }
                    core.state = UploadState::Running;
                }
                TransportSignal::Progress { loaded } => {
                    let Some(ctx) = core.active.as_mut() else {
                        warn!(attempt, loaded, "progress signal after attempt ended");
                        return;
                    };
                    let delta = ctx.observe(*loaded);
                    core.transferred = (core.transferred + delta).min(self.payload_size());
                    if delta > 0 {
                        self.speed.add_sample(delta);
                    }
                }
                TransportSignal::Aborted => self.end_attempt(core, &signal, UploadState::Paused),
                TransportSignal::Error { .. } => {
                    self.end_attempt(core, &signal, UploadState::Errored)
                }
                TransportSignal::Timeout => self.end_attempt(core, &signal, UploadState::TimedOut),
                TransportSignal::Completed => {
                    self.end_attempt(core, &signal, UploadState::Finished)
                }
            }

            let update = self.snapshot(core);
            self.observers.enqueue(update);
        }

        self.observers.dispatch();
    }

    /// Applies a signal that ends the current attempt.
    fn end_attempt(&self, core: &mut Core, signal: &TransportSignal, outcome: UploadState) {
        let attempt = core.attempts;
        match core.active.take() {
            Some(mut ctx) => {
                if *signal == TransportSignal::Completed {
                    // Completion confirms the whole slice.
                    let rest = ctx.observe(ctx.len);
                    core.transferred = (core.transferred + rest).min(self.payload_size());
                }
                drop(ctx.take_handle());
            }
            None => warn!(
                attempt,
                previous = %core.state,
                signal = signal.kind(),
                "terminal signal after attempt ended"
            ),
        }
        core.state = outcome;
        log_outcome(signal, attempt, core.transferred);
    }
}

fn log_outcome(signal: &TransportSignal, attempt: u32, transferred: u64) {
    match signal {
        TransportSignal::Completed => info!(attempt, transferred, "upload finished"),
        TransportSignal::Aborted => debug!(attempt, transferred, "attempt aborted, upload paused"),
        TransportSignal::Timeout => warn!(attempt, transferred, "attempt timed out"),
        TransportSignal::Error { message } => {
            warn!(attempt, transferred, error = %message, "attempt failed")
        }
        _ => {}
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let core = self.core.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut ctx) = core.active.take()
            && let Some(handle) = ctx.take_handle()
        {
            debug!(attempt = ctx.id, "upload dropped while running, aborting attempt");
            handle.abort();
        }
    }
}

/// A single resumable transfer of one payload to one endpoint.
///
/// Cloning yields another handle to the same upload. Dropping the last
/// handle aborts an attempt that is still in flight.
#[derive(Clone)]
pub struct ResumableUpload {
    shared: Arc<Shared>,
}

/// Non-owning handle, for observers that need to call back into the upload.
#[derive(Clone)]
pub struct WeakUpload(Weak<Shared>);

impl WeakUpload {
    pub fn upgrade(&self) -> Option<ResumableUpload> {
        self.0.upgrade().map(|shared| ResumableUpload { shared })
    }
}

impl ResumableUpload {
    /// Creates the upload and immediately issues the first attempt.
    ///
    /// The upload is `Running` when this returns. A zero-byte payload is
    /// allowed.
    pub fn new(
        endpoint: impl Into<String>,
        payload: impl Into<Bytes>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::with_options(endpoint, payload, transport, UploadOptions::default())
    }

    /// Like [`new`](Self::new) with explicit options.
    pub fn with_options(
        endpoint: impl Into<String>,
        payload: impl Into<Bytes>,
        transport: Arc<dyn Transport>,
        options: UploadOptions,
    ) -> Self {
        let shared = Arc::new(Shared {
            endpoint: endpoint.into(),
            payload: payload.into(),
            content_type: options.content_type.clone(),
            transport,
            core: Mutex::new(Core {
                state: UploadState::Idle,
                transferred: 0,
                attempts: 0,
                active: None,
            }),
            observers: ObserverRegistry::new(),
            speed: options.speed_calculator(),
        });

        let (request, sink) = {
            let mut core = lock(&shared.core);
            shared.prepare_attempt(&mut core)
        };
        shared.launch(request, sink);

        Self { shared }
    }

    /// Requests cancellation of the running attempt.
    ///
    /// Returns immediately; the upload becomes `Paused` once the transport
    /// acknowledges the abort. Confirmed bytes are kept.
    pub fn pause(&self) -> Result<(), TransferError> {
        let handle = {
            let mut guard = lock(&self.shared.core);
            let core = &mut *guard;
            let state = core.state;
            let Some(ctx) = core.active.as_mut().filter(|_| state == UploadState::Running) else {
                return Err(TransferError::NotRunning(state));
            };
            if ctx.abort_requested() {
                debug!(attempt = ctx.id, "pause already pending");
                return Ok(());
            }
            debug!(
                attempt = ctx.id,
                offset = ctx.offset,
                loaded = ctx.last_loaded(),
                transferred = core.transferred,
                "pause requested"
            );
            ctx.request_abort()
        };

        if let Some(handle) = handle {
            handle.abort();
        }
        self.shared.observers.dispatch();
        Ok(())
    }

    /// Issues a new attempt for `[transferred_bytes, payload_size)`.
    ///
    /// Only legal while `Paused`.
    pub fn resume(&self) -> Result<(), TransferError> {
        self.restart(|state| {
            (state == UploadState::Paused)
                .then_some(())
                .ok_or(TransferError::NotPaused(state))
        })
    }

    /// Restarts a failed upload from the confirmed offset.
    ///
    /// Only legal while `Errored` or `TimedOut`.
    pub fn retry(&self) -> Result<(), TransferError> {
        self.restart(|state| {
            state
                .is_failed()
                .then_some(())
                .ok_or(TransferError::NotRetryable(state))
        })
    }

    fn restart(
        &self,
        precondition: impl FnOnce(UploadState) -> Result<(), TransferError>,
    ) -> Result<(), TransferError> {
        let (request, sink) = {
            let mut core = lock(&self.shared.core);
            precondition(core.state)?;
            self.shared.prepare_attempt(&mut core)
        };
        self.shared.launch(request, sink);
        Ok(())
    }

    /// Registers an observer for every subsequent update.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&UploadUpdate) + Send + Sync + 'static,
    {
        self.shared.observers.subscribe(Arc::new(callback))
    }

    /// Removes an observer. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.observers.unsubscribe(id)
    }

    /// Returns a channel receiving every subsequent update.
    ///
    /// The subscription ends when the receiver is dropped.
    pub fn updates(&self) -> tokio::sync::mpsc::UnboundedReceiver<UploadUpdate> {
        self.shared.observers.subscribe_channel()
    }

    /// Waits until the state satisfies `predicate` and returns it.
    ///
    /// Resolves immediately if the current state already matches.
    pub async fn wait_for<F>(&self, predicate: F) -> UploadState
    where
        F: Fn(UploadState) -> bool,
    {
        let mut rx = self.updates();
        let current = self.state();
        if predicate(current) {
            return current;
        }
        while let Some(update) = rx.recv().await {
            if predicate(update.state) {
                return update.state;
            }
        }
        self.state()
    }

    /// Waits until the upload is no longer running.
    pub async fn settled(&self) -> UploadState {
        self.wait_for(|state| state != UploadState::Running && state != UploadState::Idle)
            .await
    }

    /// Number of live subscriptions.
    pub fn observer_count(&self) -> usize {
        self.shared.observers.len()
    }

    pub fn downgrade(&self) -> WeakUpload {
        WeakUpload(Arc::downgrade(&self.shared))
    }

    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    /// Total payload size in bytes.
    pub fn payload_size(&self) -> u64 {
        self.shared.payload_size()
    }

    /// Bytes confirmed sent across all attempts.
    pub fn transferred_bytes(&self) -> u64 {
        lock(&self.shared.core).transferred
    }

    pub fn state(&self) -> UploadState {
        lock(&self.shared.core).state
    }

    /// Number of attempts issued so far.
    pub fn attempts(&self) -> u32 {
        lock(&self.shared.core).attempts
    }

    /// Current state and counters as a notification value.
    pub fn snapshot(&self) -> UploadUpdate {
        let core = lock(&self.shared.core);
        self.shared.snapshot(&core)
    }

    /// Speed of the current attempt in bytes/second.
    pub fn bytes_per_second(&self) -> f64 {
        self.shared.speed.bytes_per_second()
    }

    /// Estimated time to finish at the current speed.
    pub fn eta(&self) -> Option<Duration> {
        let remaining = self.snapshot().remaining_bytes();
        self.shared.speed.eta(remaining)
    }
}

impl std::fmt::Debug for ResumableUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("ResumableUpload")
            .field("endpoint", &self.shared.endpoint)
            .field("state", &snapshot.state)
            .field("transferred_bytes", &snapshot.transferred_bytes)
            .field("payload_size", &snapshot.total_bytes)
            .field("attempts", &snapshot.attempt)
            .finish()
    }
}
