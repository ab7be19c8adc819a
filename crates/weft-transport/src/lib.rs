//!
//! Weft Transport - connectionless loopback channels
//!
//! Two channel kinds, both UDP datagrams on 127.0.0.1 carrying JSON
//! envelopes:
//!
//! - the per-machine **control channel**, delivering events into one
//!   machine instance;
//! - the shared **broadcast channel**, where every machine writes
//!   state/activity notifications and the relay server listens.
//!
//! Both are best-effort: writers never block on the presence of a
//! reader, and receives always carry an explicit bound.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use weft_core::application::runtime_interface::{BroadcastSink, ControlSource};
use weft_core::{BroadcastMessage, ControlMessage, CoreError};

/// Largest datagram either channel will send or accept
pub const MAX_DATAGRAM_BYTES: usize = 64 * 1024;

/// Default port of the shared broadcast channel
pub const DEFAULT_BROADCAST_PORT: u16 = 9910;

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

async fn bind(port: u16) -> Result<UdpSocket, CoreError> {
    UdpSocket::bind(loopback(port))
        .await
        .map_err(|e| CoreError::TransportError(format!("Failed to bind port {}: {}", port, e)))
}

/// Serialize a message, enforcing the datagram size cap
fn encode<T: serde::Serialize>(message: &T) -> Result<Vec<u8>, CoreError> {
    let bytes = serde_json::to_vec(message)
        .map_err(|e| CoreError::SerializationError(e.to_string()))?;
    if bytes.len() > MAX_DATAGRAM_BYTES {
        return Err(CoreError::TransportError(format!(
            "Message of {} bytes exceeds datagram cap",
            bytes.len()
        )));
    }
    Ok(bytes)
}

/// Inbound half of a machine's control channel
pub struct ControlChannel {
    socket: UdpSocket,
    port: u16,
}

impl ControlChannel {
    /// Bind the control channel on a loopback port. Port 0 picks an
    /// ephemeral port, readable via [`ControlChannel::port`].
    pub async fn bind(port: u16) -> Result<Self, CoreError> {
        let socket = bind(port).await?;
        let port = socket
            .local_addr()
            .map_err(|e| CoreError::TransportError(e.to_string()))?
            .port();
        debug!(port, "Control channel bound");
        Ok(Self { socket, port })
    }

    /// The bound port
    pub fn port(&self) -> u16 {
        self.port
    }
}

#[async_trait]
impl ControlSource for ControlChannel {
    async fn recv_timeout(&self, bound: Duration) -> Result<Option<ControlMessage>, CoreError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
        match tokio::time::timeout(bound, self.socket.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) => match serde_json::from_slice::<ControlMessage>(&buf[..len]) {
                Ok(message) => Ok(Some(message)),
                Err(e) => {
                    // Malformed datagrams are dropped, not fatal.
                    warn!(%from, error = %e, "Dropping malformed control datagram");
                    Ok(None)
                }
            },
            Ok(Err(e)) => Err(CoreError::TransportError(format!(
                "Control receive failed: {}",
                e
            ))),
            Err(_) => Ok(None),
        }
    }
}

/// Outbound point-to-point sender addressing peer control channels
pub struct ControlSender {
    socket: UdpSocket,
}

impl ControlSender {
    /// Create a sender bound to an ephemeral local port
    pub async fn new() -> Result<Self, CoreError> {
        Ok(Self {
            socket: bind(0).await?,
        })
    }

    /// Send one control message to a peer machine's port.
    /// Fire-and-forget: no delivery guarantee.
    pub async fn send_to(&self, port: u16, message: &ControlMessage) -> Result<(), CoreError> {
        let bytes = encode(message)?;
        self.socket
            .send_to(&bytes, loopback(port))
            .await
            .map_err(|e| CoreError::TransportError(format!("Control send failed: {}", e)))?;
        Ok(())
    }
}

/// Writer half of the shared broadcast channel
pub struct BroadcastSender {
    socket: UdpSocket,
    target: SocketAddr,
}

impl BroadcastSender {
    /// Create a sender addressing the shared broadcast port
    pub async fn new(broadcast_port: u16) -> Result<Self, CoreError> {
        Ok(Self {
            socket: bind(0).await?,
            target: loopback(broadcast_port),
        })
    }
}

#[async_trait]
impl BroadcastSink for BroadcastSender {
    async fn emit(&self, message: &BroadcastMessage) -> Result<(), CoreError> {
        let bytes = match encode(message) {
            Ok(bytes) => bytes,
            Err(e) => {
                // Serialization problems must never abort the emitter.
                warn!(error = %e, "Dropping unserializable broadcast message");
                return Ok(());
            }
        };
        // UDP send_to never blocks on whether anyone is listening; a
        // missing reader surfaces as a connection-refused error on
        // loopback, which is expected and ignored.
        if let Err(e) = self.socket.send_to(&bytes, self.target).await {
            debug!(error = %e, "Broadcast send had no receiver");
        }
        Ok(())
    }
}

/// Reader half of the shared broadcast channel, used by the relay
pub struct BroadcastReceiver {
    socket: UdpSocket,
    port: u16,
}

impl BroadcastReceiver {
    /// Bind the shared broadcast port
    pub async fn bind(port: u16) -> Result<Self, CoreError> {
        let socket = bind(port).await?;
        let port = socket
            .local_addr()
            .map_err(|e| CoreError::TransportError(e.to_string()))?
            .port();
        debug!(port, "Broadcast channel bound");
        Ok(Self { socket, port })
    }

    /// The bound port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait up to `bound` for the next broadcast message.
    /// `Ok(None)` on an empty window or a malformed datagram.
    pub async fn recv_timeout(
        &self,
        bound: Duration,
    ) -> Result<Option<BroadcastMessage>, CoreError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
        match tokio::time::timeout(bound, self.socket.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) => match serde_json::from_slice::<BroadcastMessage>(&buf[..len]) {
                Ok(message) => Ok(Some(message)),
                Err(e) => {
                    warn!(%from, error = %e, "Dropping malformed broadcast datagram");
                    Ok(None)
                }
            },
            Ok(Err(e)) => Err(CoreError::TransportError(format!(
                "Broadcast receive failed: {}",
                e
            ))),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn control_roundtrip_over_loopback() {
        let channel = ControlChannel::bind(0).await.unwrap();
        let sender = ControlSender::new().await.unwrap();

        let message = ControlMessage::new("new_job")
            .with_payload(json!({"source": "dispatcher"}))
            .with_job_id("j-1");
        sender.send_to(channel.port(), &message).await.unwrap();

        let received = channel
            .recv_timeout(Duration::from_secs(2))
            .await
            .unwrap()
            .expect("datagram");
        assert_eq!(received, message);
    }

    #[tokio::test]
    async fn empty_receive_is_not_an_error() {
        let channel = ControlChannel::bind(0).await.unwrap();
        let received = channel
            .recv_timeout(Duration::from_millis(50))
            .await
            .unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn malformed_datagram_is_skipped() {
        let channel = ControlChannel::bind(0).await.unwrap();
        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        raw.send_to(b"not json", loopback(channel.port()))
            .await
            .unwrap();

        let received = channel
            .recv_timeout(Duration::from_millis(200))
            .await
            .unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn broadcast_fans_to_listener() {
        let receiver = BroadcastReceiver::bind(0).await.unwrap();
        let sender = BroadcastSender::new(receiver.port()).await.unwrap();

        let message = BroadcastMessage::state_change("m1", "a", "b", "go");
        sender.emit(&message).await.unwrap();

        let received = receiver
            .recv_timeout(Duration::from_secs(2))
            .await
            .unwrap()
            .expect("datagram");
        assert_eq!(received, message);
    }

    #[tokio::test]
    async fn broadcast_without_reader_does_not_block_or_fail() {
        // Nothing is bound on this port; emit must return promptly.
        let sender = BroadcastSender::new(1).await.unwrap();
        let message = BroadcastMessage::activity_log("m1", "nobody listening");
        tokio::time::timeout(Duration::from_millis(500), sender.emit(&message))
            .await
            .expect("emit must be prompt")
            .unwrap();
    }

    #[tokio::test]
    async fn oversized_control_message_is_rejected() {
        let sender = ControlSender::new().await.unwrap();
        let huge = "x".repeat(MAX_DATAGRAM_BYTES);
        let message = ControlMessage::new("big").with_payload(json!({ "blob": huge }));
        let result = sender.send_to(40000, &message).await;
        assert!(matches!(result, Err(CoreError::TransportError(_))));
    }
}
