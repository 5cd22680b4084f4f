//! Inbound frame classification.
//!
//! Every frame from the link walks one pipeline: stamp the receive clock,
//! drop blacklisted sources and duplicate packet ids, hand sync control to
//! the replication layer, suppress fingerprint duplicates and rate-limited
//! senders, then run the command interpreter. Any observation of a node
//! also flushes its queued DMs.

use crate::commands::Engine;
use crate::config::Config;
use crate::outbox::DmOutbox;
use crate::radio::{PacketId, RadioEvent, RadioLink};
use crate::store::Store;
use crate::supervisor::LinkState;
use crate::sync::{PeerSync, SYNC_TAG};
use crate::types::NodeId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Recent packet ids remembered for duplicate suppression.
const SEEN_PKT_RING: usize = 256;

/// Fingerprint window for `(from, text)` duplicates arriving through
/// overlapping transports.
const FINGERPRINT_TTL: Duration = Duration::from_secs(10);

/// Fingerprint map size that triggers a prune of expired entries.
const FINGERPRINT_PRUNE_AT: usize = 512;

pub struct FrameRouter {
    engine: Arc<Engine>,
    store: Arc<Store>,
    cfg: Arc<Config>,
    link: Arc<dyn RadioLink>,
    sync: Arc<PeerSync>,
    outbox: Arc<DmOutbox>,
    state: Arc<LinkState>,
    seen_pkt_ring: VecDeque<PacketId>,
    seen_pkt_set: HashSet<PacketId>,
    fingerprints: HashMap<(NodeId, String), Instant>,
    last_reply: HashMap<NodeId, Instant>,
}

impl FrameRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: Arc<Engine>,
        store: Arc<Store>,
        cfg: Arc<Config>,
        link: Arc<dyn RadioLink>,
        sync: Arc<PeerSync>,
        outbox: Arc<DmOutbox>,
        state: Arc<LinkState>,
    ) -> Self {
        Self {
            engine,
            store,
            cfg,
            link,
            sync,
            outbox,
            state,
            seen_pkt_ring: VecDeque::with_capacity(SEEN_PKT_RING),
            seen_pkt_set: HashSet::with_capacity(SEEN_PKT_RING),
            fingerprints: HashMap::new(),
            last_reply: HashMap::new(),
        }
    }

    pub async fn handle_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::LinkError(msg) => {
                warn!("link reported: {}", msg);
                self.state.reconnect_hint.notify_one();
            }
            RadioEvent::NonText { from } => {
                self.state.touch_rx();
                // the node surfaced; its queued DMs can move
                self.outbox.flush_for(self.link.as_ref(), from).await;
            }
            RadioEvent::Frame { from, channel, packet_id, text } => {
                self.state.touch_rx();
                self.handle_frame(from, channel, packet_id, &text).await;
            }
        }
    }

    async fn handle_frame(
        &mut self,
        from: NodeId,
        channel: u8,
        packet_id: Option<PacketId>,
        text: &str,
    ) {
        if self.store.is_blacklisted(from).unwrap_or(false) {
            debug!("drop blacklisted {}", from);
            return;
        }
        if let Some(pid) = packet_id {
            if self.seen_packet(pid) {
                debug!("drop duplicate packet {}", pid);
                return;
            }
        }

        let trimmed = text.trim();
        if trimmed.starts_with(SYNC_TAG) {
            self.sync.handle_frame(self.link.as_ref(), from, trimmed).await;
            return;
        }

        if self.fingerprint_seen(from, trimmed) {
            debug!("drop fingerprint duplicate from {}", from);
            return;
        }

        let rate = Duration::from_secs_f64(self.cfg.rate_limit_sec);
        if let Some(last) = self.last_reply.get(&from) {
            if last.elapsed() < rate {
                debug!("rate limited {}", from);
                self.outbox.flush_for(self.link.as_ref(), from).await;
                return;
            }
        }

        self.engine.dispatch(from, channel, trimmed).await;
        self.last_reply.insert(from, Instant::now());
        self.outbox.flush_for(self.link.as_ref(), from).await;
    }

    /// Bounded FIFO duplicate check on transport packet ids.
    fn seen_packet(&mut self, pid: PacketId) -> bool {
        if self.seen_pkt_set.contains(&pid) {
            return true;
        }
        if self.seen_pkt_ring.len() >= SEEN_PKT_RING {
            if let Some(old) = self.seen_pkt_ring.pop_front() {
                self.seen_pkt_set.remove(&old);
            }
        }
        self.seen_pkt_ring.push_back(pid);
        self.seen_pkt_set.insert(pid);
        false
    }

    fn fingerprint_seen(&mut self, from: NodeId, text: &str) -> bool {
        let now = Instant::now();
        if self.fingerprints.len() >= FINGERPRINT_PRUNE_AT {
            self.fingerprints
                .retain(|_, seen| now.duration_since(*seen) < FINGERPRINT_TTL);
        }
        let key = (from, text.to_string());
        match self.fingerprints.get(&key) {
            Some(seen) if now.duration_since(*seen) < FINGERPRINT_TTL => true,
            _ => {
                self.fingerprints.insert(key, now);
                false
            }
        }
    }
}
