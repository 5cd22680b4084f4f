//! Acknowledgement futures for outbound frames.
//!
//! A sender registers the packet id it just transmitted and awaits the
//! returned future; the transport's receive side completes it when the mesh
//! acknowledgement for that id comes back. Acks that arrive before the
//! waiter registers are remembered in a small ring so the race resolves in
//! the waiter's favor.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

/// Acks remembered without a registered waiter.
const EARLY_ACK_RING: usize = 64;

#[derive(Default)]
struct Inner {
    pending: HashMap<u32, oneshot::Sender<()>>,
    early: VecDeque<u32>,
}

#[derive(Default)]
pub struct AckTable {
    inner: Mutex<Inner>,
}

impl AckTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in an ack for `packet_id`.
    pub fn register(&self, packet_id: u32) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pos) = inner.early.iter().position(|&id| id == packet_id) {
            inner.early.remove(pos);
            let _ = tx.send(());
        } else {
            inner.pending.insert(packet_id, tx);
        }
        rx
    }

    /// Complete the waiter for `packet_id`; called from the transport's
    /// receive path. Returns true when a waiter existed.
    pub fn complete(&self, packet_id: u32) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = inner.pending.remove(&packet_id) {
            let _ = tx.send(());
            return true;
        }
        if inner.early.len() >= EARLY_ACK_RING {
            inner.early.pop_front();
        }
        inner.early.push_back(packet_id);
        false
    }

    pub fn cancel(&self, packet_id: u32) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.pending.remove(&packet_id);
    }

    /// Wait up to `timeout` for the ack of `packet_id`.
    pub async fn wait(&self, packet_id: u32, timeout: Duration) -> bool {
        let rx = self.register(packet_id);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(())) => true,
            _ => {
                self.cancel(packet_id);
                false
            }
        }
    }
}
