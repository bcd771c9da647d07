//! Stream transport (sender side).
//!
//! Every attempt runs as its own tokio task: connect, send the header,
//! stream the slice, wait for the acknowledgement. Cancellation and the
//! optional attempt deadline race the whole send.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use resumable_transfer::{AttemptHandle, AttemptRequest, SignalSink, Transport};

use crate::connector::{Connector, Endpoint, TcpConnector};
use crate::error::DataChannelError;
use crate::wire::{UploadHeader, read_ack, write_header};
use crate::{ACK_TIMEOUT, CONNECT_TIMEOUT, STREAM_BUFFER_SIZE};

/// Tunables for [`StreamTransport`].
#[derive(Debug, Clone)]
pub struct StreamTransportConfig {
    /// Bytes written per progress report.
    pub buffer_size: usize,
    pub connect_timeout: Duration,
    /// How long to wait for the receiver's acknowledgement.
    pub ack_timeout: Duration,
    /// Upper bound for a whole attempt. `None` means no limit.
    pub attempt_timeout: Option<Duration>,
}

impl Default for StreamTransportConfig {
    fn default() -> Self {
        Self {
            buffer_size: STREAM_BUFFER_SIZE,
            connect_timeout: CONNECT_TIMEOUT,
            ack_timeout: ACK_TIMEOUT,
            attempt_timeout: None,
        }
    }
}

/// Sends each attempt over a fresh stream opened by a [`Connector`].
pub struct StreamTransport<C: Connector = TcpConnector> {
    connector: Arc<C>,
    config: StreamTransportConfig,
    runtime: Handle,
}

impl StreamTransport<TcpConnector> {
    /// TCP transport on the current tokio runtime.
    pub fn tcp(config: StreamTransportConfig) -> Result<Self, DataChannelError> {
        Self::new(TcpConnector, config)
    }
}

impl<C: Connector> StreamTransport<C> {
    /// Creates a transport that spawns attempts on the current tokio runtime.
    pub fn new(connector: C, config: StreamTransportConfig) -> Result<Self, DataChannelError> {
        let runtime = Handle::try_current().map_err(|_| DataChannelError::NoRuntime)?;
        Ok(Self::with_runtime(connector, config, runtime))
    }

    /// Creates a transport that spawns attempts on `runtime`.
    pub fn with_runtime(connector: C, config: StreamTransportConfig, runtime: Handle) -> Self {
        Self {
            connector: Arc::new(connector),
            config,
            runtime,
        }
    }

    pub fn config(&self) -> &StreamTransportConfig {
        &self.config
    }
}

impl<C: Connector> Transport for StreamTransport<C> {
    fn start(&self, request: AttemptRequest, sink: SignalSink) -> Box<dyn AttemptHandle> {
        let cancel = CancellationToken::new();
        let connector = Arc::clone(&self.connector);
        let config = self.config.clone();
        let token = cancel.clone();

        self.runtime.spawn(async move {
            run_attempt(&*connector, &config, request, &sink, token).await;
        });

        Box::new(cancel)
    }
}

async fn run_attempt<C: Connector>(
    connector: &C,
    config: &StreamTransportConfig,
    request: AttemptRequest,
    sink: &SignalSink,
    cancel: CancellationToken,
) {
    let attempt = request.attempt;
    sink.started();

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DataChannelError::Cancelled),
        result = with_deadline(config.attempt_timeout, send_slice(connector, config, &request, sink)) => result,
    };

    match result {
        Ok(()) => sink.completed(),
        Err(DataChannelError::Cancelled) => {
            debug!(attempt, "stream attempt cancelled");
            sink.aborted();
        }
        Err(DataChannelError::Timeout) => {
            debug!(attempt, "stream attempt timed out");
            sink.timeout();
        }
        Err(e) => {
            debug!(attempt, error = %e, "stream attempt failed");
            sink.error(e.to_string());
        }
    }
}

async fn with_deadline<F>(limit: Option<Duration>, fut: F) -> Result<(), DataChannelError>
where
    F: Future<Output = Result<(), DataChannelError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| DataChannelError::Timeout)?,
        None => fut.await,
    }
}

async fn send_slice<C: Connector>(
    connector: &C,
    config: &StreamTransportConfig,
    request: &AttemptRequest,
    sink: &SignalSink,
) -> Result<(), DataChannelError> {
    let endpoint = Endpoint::parse(&request.endpoint)?;

    let mut stream = tokio::time::timeout(
        config.connect_timeout,
        connector.connect(&endpoint.authority),
    )
    .await
    .map_err(|_| DataChannelError::Timeout)??;

    debug!(
        authority = %endpoint.authority,
        attempt = request.attempt,
        offset = request.offset,
        len = request.len(),
        "stream connected"
    );

    let header = UploadHeader {
        target: endpoint.target,
        offset: request.offset,
        length: request.len(),
        total_size: request.total_size,
        content_type: request.content_type.clone(),
    };
    write_header(&mut stream, &header).await?;

    // Unbuffered on purpose: progress must only count bytes the stream took.
    let mut sent: u64 = 0;
    for chunk in request.body.chunks(config.buffer_size.max(1)) {
        stream.write_all(chunk).await?;
        sent += chunk.len() as u64;
        sink.progress(sent);
    }
    stream.flush().await?;

    let accepted = tokio::time::timeout(config.ack_timeout, read_ack(&mut stream))
        .await
        .map_err(|_| DataChannelError::Timeout)??;
    if !accepted {
        return Err(DataChannelError::Rejected);
    }

    info!(attempt = request.attempt, bytes = sent, "stream attempt acknowledged");
    Ok(())
}
