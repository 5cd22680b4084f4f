//! Line-oriented development transport.
//!
//! Stands in for the mesh device when running the engine on a workstation:
//! inbound frames are typed on stdin, outbound frames are printed to
//! stdout. The real serial adapter plugs in through the same trait.
//!
//! Input grammar, one frame per line:
//!
//! ```text
//! !abcd0001 p hello world      frame from !abcd0001 on channel 0
//! !abcd0001 #2 r               frame on channel 2
//! /node !abcd0001 alfa Alfa Station
//! /ack 17                      acknowledge outbound packet 17
//! ```

use super::{candidate_devices, PacketId, RadioError, RadioEvent, RadioLink};
use crate::ack::AckTable;
use crate::types::{now, NodeEntry, NodeId};
use async_trait::async_trait;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info};

pub struct ConsoleLink {
    acks: Arc<AckTable>,
    device_path: String,
    nodes: Mutex<Vec<NodeEntry>>,
    next_packet: AtomicU32,
    closed: AtomicBool,
}

impl ConsoleLink {
    /// Build the link and start the stdin reader thread.
    pub fn spawn(
        acks: Arc<AckTable>,
        device_path: &str,
    ) -> (Arc<Self>, mpsc::Receiver<RadioEvent>) {
        let (tx, rx) = mpsc::channel(256);
        let link = Arc::new(Self {
            acks,
            device_path: device_path.to_string(),
            nodes: Mutex::new(Vec::new()),
            next_packet: AtomicU32::new(1),
            closed: AtomicBool::new(false),
        });

        let reader = link.clone();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                reader.handle_line(line.trim(), &tx);
            }
            debug!("console input closed");
        });

        (link, rx)
    }

    fn handle_line(&self, line: &str, tx: &mpsc::Sender<RadioEvent>) {
        if line.is_empty() {
            return;
        }
        if let Some(rest) = line.strip_prefix("/node ") {
            let mut toks = rest.split_whitespace();
            let (Some(id), Some(short)) = (toks.next(), toks.next()) else { return };
            let Some(nid) = NodeId::parse_loose(id) else { return };
            let long = toks.collect::<Vec<_>>().join(" ");
            let mut entry = NodeEntry::new(nid, short, &long);
            entry.last_heard = Some(now());
            let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
            nodes.retain(|n| n.nid != nid);
            nodes.push(entry);
            return;
        }
        if let Some(rest) = line.strip_prefix("/ack ") {
            if let Ok(pid) = rest.trim().parse::<u32>() {
                self.acks.complete(pid);
            }
            return;
        }

        let mut toks = line.splitn(2, ' ');
        let Some(from) = toks.next().and_then(NodeId::parse_loose) else {
            debug!("unparsable console line: {}", line);
            return;
        };
        let rest = toks.next().unwrap_or("");
        let (channel, text) = match rest.strip_prefix('#') {
            Some(tail) => {
                let mut parts = tail.splitn(2, ' ');
                let ch = parts.next().and_then(|c| c.parse().ok()).unwrap_or(0);
                (ch, parts.next().unwrap_or("").to_string())
            }
            None => (0, rest.to_string()),
        };
        let pid = self.next_packet.fetch_add(1, Ordering::SeqCst);
        // touch the live table so the sender resolves by id
        {
            let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = nodes.iter_mut().find(|n| n.nid == from) {
                entry.last_heard = Some(now());
            }
        }
        let _ = tx.blocking_send(RadioEvent::Frame {
            from,
            channel,
            packet_id: Some(pid),
            text,
        });
    }
}

#[async_trait]
impl RadioLink for ConsoleLink {
    async fn send(
        &self,
        dest: Option<NodeId>,
        channel: u8,
        text: &str,
    ) -> Result<PacketId, RadioError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RadioError::Closed);
        }
        let pid = self.next_packet.fetch_add(1, Ordering::SeqCst);
        match dest {
            Some(d) => println!("tx #{} -> {} (ch{}): {}", pid, d, channel, text),
            None => println!("tx #{} -> ^all (ch{}): {}", pid, channel, text),
        }
        Ok(pid)
    }

    fn nodes(&self) -> Vec<NodeEntry> {
        self.nodes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn local_node(&self) -> Option<NodeEntry> {
        None
    }

    fn device(&self) -> Option<String> {
        Some("console".to_string())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    async fn reopen(&self) -> Result<(), RadioError> {
        let cands = candidate_devices(&self.device_path);
        info!("console reopen (serial candidates: {:?})", cands);
        self.closed.store(false, Ordering::SeqCst);
        Ok(())
    }
}
