//! Transport ports consumed by the execution service
//!
//! The engine never touches sockets directly; it speaks to these traits
//! and the transport crate provides the UDP implementations.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::messages::{BroadcastMessage, ControlMessage};
use crate::CoreError;

/// Inbound point-to-point channel delivering events into a machine.
///
/// Receives must always be bounded; an empty receive is not an error.
#[async_trait]
pub trait ControlSource: Send + Sync {
    /// Wait up to `bound` for the next control message.
    ///
    /// Returns `Ok(None)` when the bound elapses with nothing to read.
    async fn recv_timeout(&self, bound: Duration) -> Result<Option<ControlMessage>, CoreError>;
}

/// Outbound shared fan-out channel.
///
/// Emission is best-effort and must never block on the presence of a
/// reader.
#[async_trait]
pub trait BroadcastSink: Send + Sync {
    /// Emit one broadcast message
    async fn emit(&self, message: &BroadcastMessage) -> Result<(), CoreError>;
}

/// Channel-backed port implementations for testing
#[cfg(feature = "testing")]
pub mod channel {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::{mpsc, Mutex};

    /// Control source fed from an in-process mpsc channel
    pub struct ChannelControlSource {
        rx: Mutex<mpsc::Receiver<ControlMessage>>,
    }

    impl ChannelControlSource {
        /// Create the source and its feeding half
        pub fn new() -> (mpsc::Sender<ControlMessage>, Self) {
            let (tx, rx) = mpsc::channel(64);
            (tx, Self { rx: Mutex::new(rx) })
        }
    }

    #[async_trait]
    impl ControlSource for ChannelControlSource {
        async fn recv_timeout(
            &self,
            bound: Duration,
        ) -> Result<Option<ControlMessage>, CoreError> {
            let mut rx = self.rx.lock().await;
            match tokio::time::timeout(bound, rx.recv()).await {
                Ok(Some(message)) => Ok(Some(message)),
                Ok(None) => Err(CoreError::TransportError(
                    "Control channel closed".to_string(),
                )),
                Err(_) => Ok(None),
            }
        }
    }

    /// Broadcast sink that records every emitted message
    #[derive(Default)]
    pub struct CollectingBroadcastSink {
        messages: StdMutex<Vec<BroadcastMessage>>,
    }

    impl CollectingBroadcastSink {
        /// Create an empty sink
        pub fn new() -> Self {
            Self::default()
        }

        /// Everything emitted so far
        pub fn messages(&self) -> Vec<BroadcastMessage> {
            self.messages.lock().map(|m| m.clone()).unwrap_or_default()
        }

        /// Emitted messages of one type
        pub fn of_type(&self, message_type: &str) -> Vec<BroadcastMessage> {
            self.messages()
                .into_iter()
                .filter(|m| m.message_type == message_type)
                .collect()
        }
    }

    #[async_trait]
    impl BroadcastSink for CollectingBroadcastSink {
        async fn emit(&self, message: &BroadcastMessage) -> Result<(), CoreError> {
            self.messages
                .lock()
                .map_err(|e| CoreError::TransportError(format!("Lock poisoned: {}", e)))?
                .push(message.clone());
            Ok(())
        }
    }
}
