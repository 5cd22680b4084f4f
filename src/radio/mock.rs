//! Scripted in-memory transport for tests.
//!
//! Inbound frames are injected by the test; outbound frames are recorded
//! for inspection. Destinations can be scripted to acknowledge, to fail, or
//! to enforce a frame-size bound.

use super::{PacketId, RadioError, RadioEvent, RadioLink};
use crate::ack::AckTable;
use crate::types::{NodeEntry, NodeId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub dest: Option<NodeId>,
    pub channel: u8,
    pub text: String,
}

#[derive(Default)]
struct MockState {
    nodes: Vec<NodeEntry>,
    local: Option<NodeEntry>,
    sent: Vec<SentFrame>,
    ack_from: HashSet<NodeId>,
    fail_to: HashMap<NodeId, String>,
    max_frame: Option<usize>,
    closed: bool,
    reopens: u32,
}

pub struct MockLink {
    events: mpsc::Sender<RadioEvent>,
    acks: Arc<AckTable>,
    state: Mutex<MockState>,
    next_packet: AtomicU32,
}

impl MockLink {
    pub fn new(acks: Arc<AckTable>) -> (Arc<Self>, mpsc::Receiver<RadioEvent>) {
        let (tx, rx) = mpsc::channel(256);
        let link = Arc::new(Self {
            events: tx,
            acks,
            state: Mutex::new(MockState::default()),
            next_packet: AtomicU32::new(1),
        });
        (link, rx)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_node(&self, nid: NodeId, short: &str, long: &str, last_heard: Option<i64>) {
        let mut entry = NodeEntry::new(nid, short, long);
        entry.last_heard = last_heard;
        self.lock().nodes.push(entry);
    }

    pub fn set_local(&self, nid: NodeId, short: &str, long: &str) {
        self.lock().local = Some(NodeEntry::new(nid, short, long));
    }

    /// Make sends to `nid` come back acknowledged.
    pub fn ack_from(&self, nid: NodeId) {
        self.lock().ack_from.insert(nid);
    }

    /// Make sends to `nid` fail with a transport error.
    pub fn fail_to(&self, nid: NodeId, msg: &str) {
        self.lock().fail_to.insert(nid, msg.to_string());
    }

    /// Reject frames longer than `chars` with PayloadTooBig.
    pub fn set_max_frame(&self, chars: usize) {
        self.lock().max_frame = Some(chars);
    }

    pub fn sent(&self) -> Vec<SentFrame> {
        self.lock().sent.clone()
    }

    pub fn take_sent(&self) -> Vec<SentFrame> {
        std::mem::take(&mut self.lock().sent)
    }

    pub fn reopen_count(&self) -> u32 {
        self.lock().reopens
    }

    pub async fn inject_frame(
        &self,
        from: NodeId,
        channel: u8,
        packet_id: Option<PacketId>,
        text: &str,
    ) {
        let _ = self
            .events
            .send(RadioEvent::Frame { from, channel, packet_id, text: text.to_string() })
            .await;
    }

    pub async fn inject_text(&self, from: NodeId, text: &str) {
        let pid = self.next_packet.fetch_add(1, Ordering::SeqCst);
        self.inject_frame(from, 0, Some(pid), text).await;
    }

    pub async fn inject_non_text(&self, from: NodeId) {
        let _ = self.events.send(RadioEvent::NonText { from }).await;
    }
}

#[async_trait]
impl RadioLink for MockLink {
    async fn send(
        &self,
        dest: Option<NodeId>,
        channel: u8,
        text: &str,
    ) -> Result<PacketId, RadioError> {
        let ack_now = {
            let mut state = self.lock();
            if state.closed {
                return Err(RadioError::Closed);
            }
            if let Some(max) = state.max_frame {
                if text.chars().count() > max {
                    return Err(RadioError::PayloadTooBig(text.chars().count()));
                }
            }
            if let Some(d) = dest {
                if let Some(msg) = state.fail_to.get(&d) {
                    return Err(RadioError::Transport(msg.clone()));
                }
            }
            state.sent.push(SentFrame { dest, channel, text: text.to_string() });
            matches!(dest, Some(d) if state.ack_from.contains(&d))
        };
        let pid = self.next_packet.fetch_add(1, Ordering::SeqCst);
        if ack_now {
            self.acks.complete(pid);
        }
        Ok(pid)
    }

    fn nodes(&self) -> Vec<NodeEntry> {
        self.lock().nodes.clone()
    }

    fn local_node(&self) -> Option<NodeEntry> {
        self.lock().local.clone()
    }

    fn device(&self) -> Option<String> {
        Some("mock".to_string())
    }

    async fn close(&self) {
        self.lock().closed = true;
    }

    async fn reopen(&self) -> Result<(), RadioError> {
        let mut state = self.lock();
        state.closed = false;
        state.reopens += 1;
        Ok(())
    }
}
