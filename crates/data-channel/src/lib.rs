//! Stream transport for resumable uploads.
//!
//! [`StreamTransport`] implements [`resumable_transfer::Transport`] on top of
//! any byte stream a [`Connector`] can open (TCP by default). Each attempt
//! opens a fresh connection, sends a small header naming the target and the
//! byte range, streams the slice and waits for a one-byte acknowledgement.
//! [`StreamReceiver`] is the matching receiving end, writing every range
//! into a file under a base directory.
//!
//! # Wire format
//!
//! See [`wire`] module for the binary protocol specification.

pub mod client;
pub mod connector;
pub mod error;
pub mod server;
pub mod wire;

pub use client::{StreamTransport, StreamTransportConfig};
pub use connector::{Connector, Endpoint, TcpConnector};
pub use error::DataChannelError;
pub use server::{Received, StreamReceiver};
pub use wire::UploadHeader;

use std::time::Duration;

/// Read/write buffer size (256 KB).
pub const STREAM_BUFFER_SIZE: usize = 256 * 1024;

/// Default timeout for opening a connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for the receiver's acknowledgement after the last byte.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(30);
