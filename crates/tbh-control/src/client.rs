//! ---
//! tbh_section: "02-control-messaging"
//! tbh_subsection: "module"
//! tbh_type: "source"
//! tbh_scope: "code"
//! tbh_description: "Control-message vocabulary, transports and client."
//! tbh_version: "v0.1.0"
//! tbh_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::{ControlMessage, Endpoint, Transport};

/// Snapshot of control-message counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ControlMetrics {
    /// Messages accepted by the transport.
    pub sent: u64,
    /// Messages the transport refused.
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ControlMetrics {
        ControlMetrics {
            sent: self.sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Local result of handing a message to the transport.
///
/// `Sent` says nothing about whether the engine received or acted on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// The transport accepted the message.
    Sent,
    /// The transport refused the message; the error was logged.
    Dropped,
}

/// Fire-and-forget control client.
///
/// Every send is followed by a fixed settle interval whether or not the
/// transport accepted the message, so consecutive sends are paced.
#[derive(Clone)]
pub struct ControlClient {
    transport: Arc<dyn Transport>,
    settle: Duration,
    counters: Arc<Counters>,
}

impl ControlClient {
    /// Construct a client over `transport` with the given settle interval.
    pub fn new(transport: Arc<dyn Transport>, settle: Duration) -> Self {
        Self {
            transport,
            settle,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Send `message` to `endpoint`, then wait out the settle interval.
    ///
    /// Transport errors never propagate; they are logged and counted.
    pub async fn send(&self, endpoint: &Endpoint, message: &ControlMessage) -> SendStatus {
        let status = match self.transport.send(endpoint.addr, message).await {
            Ok(()) => {
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
                debug!(
                    transport = self.transport.name(),
                    endpoint = %endpoint,
                    message = %message,
                    "control message sent"
                );
                SendStatus::Sent
            }
            Err(err) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    transport = self.transport.name(),
                    endpoint = %endpoint,
                    message = %message,
                    error = %err,
                    "control message dropped"
                );
                SendStatus::Dropped
            }
        };
        tokio::time::sleep(self.settle).await;
        status
    }

    /// Snapshot of the send counters.
    pub fn metrics(&self) -> ControlMetrics {
        self.counters.snapshot()
    }
}
