//! Value types shared between the upload engine, transports and hosts.
//!
//! Everything here is plain data: lifecycle states, the notification
//! payload handed to observers, and the discrete signals a transport
//! reports for a single attempt.

pub mod signal;
pub mod types;

pub use signal::TransportSignal;
pub use types::{UploadState, UploadUpdate};
