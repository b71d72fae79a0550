//! Byte-frame transport between processes.
//!
//! The router only ever hands a [`Transport`] serialized frames addressed by
//! [`ProcessId`]. [`Bus`] is the in-memory implementation: each attached
//! endpoint owns the receiving half of a bounded channel and drains it on its
//! own task.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::frame::Frame;
use crate::error::{IpcError, IpcResult};
use crate::process::ProcessId;

/// Delivers serialized frames to other processes.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends raw frame bytes to `target`.
    async fn send(&self, target: ProcessId, bytes: Vec<u8>) -> IpcResult<()>;

    /// Returns `true` if `target` can currently receive frames.
    fn is_attached(&self, target: ProcessId) -> bool;

    /// Encodes and sends a frame.
    async fn send_frame(&self, target: ProcessId, frame: &Frame) -> IpcResult<()> {
        let bytes = frame.encode()?;
        self.send(target, bytes).await
    }
}

/// Default queue depth for each attached endpoint.
const DEFAULT_CAPACITY: usize = 256;

/// In-memory transport connecting endpoints that live in one OS process.
#[derive(Debug)]
pub struct Bus {
    endpoints: RwLock<HashMap<ProcessId, mpsc::Sender<Vec<u8>>>>,
    capacity: usize,
}

impl Bus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a bus whose per-endpoint queues hold `capacity` frames.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            endpoints: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Attaches an endpoint and returns its inbound frame queue.
    ///
    /// Re-attaching an id replaces the previous queue; frames still buffered
    /// in the old one are lost.
    pub fn attach(&self, id: ProcessId) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(self.capacity);
        if self.endpoints.write().insert(id, tx).is_some() {
            debug!(process = id, "Endpoint re-attached, previous queue dropped");
        } else {
            debug!(process = id, "Endpoint attached");
        }
        rx
    }

    /// Detaches an endpoint. Returns `false` if it was not attached.
    pub fn detach(&self, id: ProcessId) -> bool {
        let removed = self.endpoints.write().remove(&id).is_some();
        if removed {
            debug!(process = id, "Endpoint detached");
        }
        removed
    }

    /// Ids of all attached endpoints.
    pub fn attached(&self) -> Vec<ProcessId> {
        let mut ids: Vec<_> = self.endpoints.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for Bus {
    async fn send(&self, target: ProcessId, bytes: Vec<u8>) -> IpcResult<()> {
        // Clone the sender so the lock is not held across the await.
        let tx = self
            .endpoints
            .read()
            .get(&target)
            .cloned()
            .ok_or(IpcError::NotAttached(target))?;

        trace!(target = target, len = bytes.len(), "Sending frame");
        tx.send(bytes)
            .await
            .map_err(|e| IpcError::send_failed(target, e.to_string()))
    }

    fn is_attached(&self, target: ProcessId) -> bool {
        self.endpoints.read().contains_key(&target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_reaches_attached_endpoint() {
        let bus = Bus::new();
        let mut rx = bus.attach(4);

        bus.send(4, b"hello".to_vec()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_send_to_unknown_endpoint_fails() {
        let bus = Bus::new();
        let err = bus.send(9, Vec::new()).await.unwrap_err();
        assert!(matches!(err, IpcError::NotAttached(9)));
    }

    #[tokio::test]
    async fn test_detach_stops_delivery() {
        let bus = Bus::new();
        let _rx = bus.attach(1);
        assert!(bus.is_attached(1));
        assert!(bus.detach(1));
        assert!(!bus.is_attached(1));
        assert!(bus.send(1, Vec::new()).await.is_err());
        assert!(!bus.detach(1));
    }

    #[tokio::test]
    async fn test_dropped_receiver_reports_send_failure() {
        let bus = Bus::new();
        drop(bus.attach(2));
        let err = bus.send(2, Vec::new()).await.unwrap_err();
        assert!(matches!(err, IpcError::SendFailed { target: 2, .. }));
    }
}
