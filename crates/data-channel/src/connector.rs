//! Endpoint parsing and connection establishment.

use std::future::Future;
use std::io;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::DataChannelError;

/// Future returned by [`Connector::connect`].
pub type ConnectFuture<'a, S> = Pin<Box<dyn Future<Output = io::Result<S>> + Send + 'a>>;

/// Opens the byte stream an attempt is sent over.
///
/// Using a trait keeps the transport independent of the socket type and
/// testable with in-memory pipes.
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Connects to `authority` (the part of the endpoint before the path).
    fn connect<'a>(&'a self, authority: &'a str) -> ConnectFuture<'a, Self::Stream>;
}

/// Plain TCP connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect<'a>(&'a self, authority: &'a str) -> ConnectFuture<'a, TcpStream> {
        Box::pin(async move {
            let stream = TcpStream::connect(authority).await?;
            stream.set_nodelay(true)?;
            Ok(stream)
        })
    }
}

/// A parsed `[scheme://]authority[/target]` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub authority: String,
    /// Path on the receiver, without the leading slash.
    pub target: String,
}

impl Endpoint {
    pub fn parse(endpoint: &str) -> Result<Self, DataChannelError> {
        let rest = match endpoint.split_once("://") {
            Some((scheme, rest)) if !scheme.is_empty() => rest,
            Some(_) => {
                return Err(DataChannelError::InvalidEndpoint(format!(
                    "empty scheme: {endpoint}"
                )));
            }
            None => endpoint,
        };

        let (authority, target) = rest.split_once('/').unwrap_or((rest, ""));
        if authority.is_empty() {
            return Err(DataChannelError::InvalidEndpoint(format!(
                "missing host: {endpoint}"
            )));
        }

        Ok(Self {
            authority: authority.to_string(),
            target: target.to_string(),
        })
    }
}
