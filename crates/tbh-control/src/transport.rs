//! ---
//! tbh_section: "02-control-messaging"
//! tbh_subsection: "module"
//! tbh_type: "source"
//! tbh_scope: "code"
//! tbh_description: "Control-message vocabulary, transports and client."
//! tbh_version: "v0.1.0"
//! tbh_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use crate::{ControlError, ControlMessage, Result};

/// Transport abstraction used to hand control messages to an endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one message to `target`. No acknowledgement is expected.
    async fn send(&self, target: SocketAddr, message: &ControlMessage) -> Result<()>;
    /// Human-readable transport name for logging/metrics.
    fn name(&self) -> &'static str;
}

/// OSC over UDP, one datagram per message.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind an ephemeral local socket in the address family of `host`.
    pub async fn bind_for(host: IpAddr) -> Result<Self> {
        let local = match host {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let socket = UdpSocket::bind(local).await?;
        Ok(Self { socket })
    }

    /// Local address of the sending socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, target: SocketAddr, message: &ControlMessage) -> Result<()> {
        let payload = message.encode()?;
        let written = self.socket.send_to(&payload, target).await?;
        if written != payload.len() {
            return Err(ControlError::ShortWrite {
                target,
                written,
                expected: payload.len(),
            });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "osc_udp"
    }
}

/// A message observed by the in-memory transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Destination address.
    pub target: SocketAddr,
    /// Delivered message.
    pub message: ControlMessage,
}

/// In-memory transport recording every delivery, for tests and dry runs.
#[derive(Clone)]
pub struct InMemoryTransport {
    log: Arc<Mutex<Vec<Delivery>>>,
    rejected: Arc<Mutex<HashSet<SocketAddr>>>,
    feed: broadcast::Sender<Delivery>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        let (feed, _) = broadcast::channel(256);
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            rejected: Arc::new(Mutex::new(HashSet::new())),
            feed,
        }
    }
}

impl InMemoryTransport {
    /// Create a new in-memory transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every subsequent delivery to `target`.
    pub fn reject(&self, target: SocketAddr) {
        self.rejected.lock().insert(target);
    }

    /// All accepted deliveries in send order.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.log.lock().clone()
    }

    /// Accepted deliveries addressed to `target`.
    pub fn deliveries_to(&self, target: SocketAddr) -> Vec<ControlMessage> {
        self.log
            .lock()
            .iter()
            .filter(|d| d.target == target)
            .map(|d| d.message)
            .collect()
    }

    /// Live feed of accepted deliveries, used by scripted engines in tests.
    pub fn subscribe(&self) -> broadcast::Receiver<Delivery> {
        self.feed.subscribe()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, target: SocketAddr, message: &ControlMessage) -> Result<()> {
        if self.rejected.lock().contains(&target) {
            return Err(ControlError::Rejected(target));
        }
        let delivery = Delivery {
            target,
            message: *message,
        };
        self.log.lock().push(delivery);
        // No subscribers is fine.
        let _ = self.feed.send(delivery);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}
