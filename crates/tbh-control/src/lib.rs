//! ---
//! tbh_section: "02-control-messaging"
//! tbh_subsection: "module"
//! tbh_type: "source"
//! tbh_scope: "code"
//! tbh_description: "Control-message vocabulary, transports and client."
//! tbh_version: "v0.1.0"
//! tbh_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Fire-and-forget OSC remote control of the engines under test.

use std::net::SocketAddr;

pub mod client;
pub mod message;
pub mod transport;

/// Shared result type for control-message operations.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Failures raised while handing a control message to a transport.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// The message could not be serialised into an OSC packet.
    #[error("failed to encode control message {address}: {reason}")]
    Encode {
        /// OSC address of the message.
        address: &'static str,
        /// Encoder diagnostic.
        reason: String,
    },
    /// Wrapper for socket errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The datagram was only partially written.
    #[error("short write to {target}: {written} of {expected} bytes")]
    ShortWrite {
        /// Destination of the datagram.
        target: SocketAddr,
        /// Bytes accepted by the socket.
        written: usize,
        /// Size of the encoded packet.
        expected: usize,
    },
    /// Delivery was refused by the transport.
    #[error("delivery to {0} rejected by transport")]
    Rejected(SocketAddr),
}

pub use client::{ControlClient, ControlMetrics, SendStatus};
pub use message::{ControlMessage, Endpoint, EndpointRole, EndpointSet};
pub use transport::{Delivery, InMemoryTransport, Transport, UdpTransport};
