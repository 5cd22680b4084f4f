//! Radio transport boundary.
//!
//! The engine consumes mesh hardware through the [`RadioLink`] capability
//! only: enumerate attached nodes, send text frames, receive inbound frames
//! as [`RadioEvent`]s on a channel handed out at link construction. The
//! device-protocol framing below the text abstraction lives behind this
//! trait and is not the engine's business.

pub mod console;
pub mod mock;

use crate::types::{NodeEntry, NodeId};
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// Transport-assigned id of an outbound frame, used to correlate mesh acks.
pub type PacketId = u32;

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("payload too big ({0} chars)")]
    PayloadTooBig(usize),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("link closed")]
    Closed,
}

impl RadioError {
    /// Whether this error suggests the physical link dropped and a
    /// reconnect is worth attempting.
    pub fn is_reconnect_hint(&self) -> bool {
        match self {
            RadioError::Closed => true,
            RadioError::PayloadTooBig(_) => false,
            RadioError::Transport(msg) => {
                let m = msg.to_ascii_lowercase();
                ["serial", "usb", "disconnect", "timed out", "timeout"]
                    .iter()
                    .any(|hint| m.contains(hint))
            }
        }
    }
}

/// One inbound observation from the mesh.
#[derive(Debug, Clone)]
pub enum RadioEvent {
    /// A text frame addressed to us or broadcast on a channel we monitor.
    Frame {
        from: NodeId,
        channel: u8,
        packet_id: Option<PacketId>,
        text: String,
    },
    /// A non-text frame (telemetry, position, ack-only). Carries the source
    /// so the DM outbox can still flush opportunistically.
    NonText { from: NodeId },
    /// The transport noticed trouble on its own.
    LinkError(String),
}

/// Mesh transport capability consumed by the engine.
#[async_trait]
pub trait RadioLink: Send + Sync {
    /// Transmit a text frame. A missing destination broadcasts on the
    /// primary channel. Returns the transport's packet id for ack tracking.
    async fn send(
        &self,
        dest: Option<NodeId>,
        channel: u8,
        text: &str,
    ) -> Result<PacketId, RadioError>;

    /// Snapshot of the currently known mesh nodes.
    fn nodes(&self) -> Vec<NodeEntry>;

    /// The station's own node entry, when the device reports one.
    fn local_node(&self) -> Option<NodeEntry>;

    /// Device path for diagnostics.
    fn device(&self) -> Option<String>;

    /// Release the underlying transport.
    async fn close(&self);

    /// Re-establish the transport against the first available candidate.
    async fn reopen(&self) -> Result<(), RadioError>;
}

/// Serial device candidates in probe order: the explicit path when one is
/// configured, otherwise stable by-id links first, then raw ACM/USB nodes.
pub fn candidate_devices(device_path: &str) -> Vec<PathBuf> {
    if device_path != "auto" {
        return vec![PathBuf::from(device_path)];
    }
    let mut cands = Vec::new();
    if let Ok(entries) = std::fs::read_dir("/dev/serial/by-id") {
        let mut byid: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
        byid.sort();
        cands.extend(byid);
    }
    for dev in ["/dev/ttyACM0", "/dev/ttyACM1", "/dev/ttyUSB0", "/dev/ttyUSB1"] {
        let p = PathBuf::from(dev);
        if p.exists() {
            cands.push(p);
        }
    }
    cands
}
