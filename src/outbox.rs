//! Store-and-forward direct messages.
//!
//! `dm` tries synchronous delivery first: transmit and wait up to
//! DELIVER_WAIT for the mesh acknowledgement. Unacknowledged or unknown
//! recipients get a queued entry with a TTL. Whenever any frame arrives
//! from a node, a bounded batch of its queued entries is flushed; expired
//! entries are swept first and never delivered.

use crate::ack::AckTable;
use crate::config::Config;
use crate::error::Error;
use crate::radio::RadioLink;
use crate::store::Store;
use crate::types::{now, NodeEntry, NodeId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct DmOutbox {
    store: Arc<Store>,
    cfg: Arc<Config>,
    acks: Arc<AckTable>,
}

impl DmOutbox {
    pub fn new(store: Arc<Store>, cfg: Arc<Config>, acks: Arc<AckTable>) -> Self {
        Self { store, cfg, acks }
    }

    /// Handle a `dm` command: direct attempt when the recipient is on the
    /// live table, queue otherwise. Returns the reply text for the sender.
    pub async fn send_direct_or_queue(
        &self,
        link: &dyn RadioLink,
        from: NodeId,
        sender_short: &str,
        target: &NodeEntry,
        reachable: bool,
        channel: u8,
        body: &str,
    ) -> Result<String, Error> {
        if reachable {
            let payload = format!("[DM via BBS] from {}/{}: {}", sender_short, from, body);
            match link.send(Some(target.nid), channel, &payload).await {
                Ok(pid) => {
                    let wait = Duration::from_secs(self.cfg.deliver_wait);
                    if self.acks.wait(pid, wait).await {
                        return Ok(format!("dm delivered to {} ({})", target.short, target.nid));
                    }
                    debug!("direct dm to {} unacknowledged", target.nid);
                    if self.cfg.direct_fallback {
                        // one broadcast fallback, then queue regardless
                        match link.send(None, channel, &payload).await {
                            Ok(pid) => {
                                let wait = Duration::from_secs(self.cfg.fallback_sec);
                                if self.acks.wait(pid, wait).await {
                                    return Ok(format!(
                                        "dm delivered to {} ({})",
                                        target.short, target.nid
                                    ));
                                }
                            }
                            Err(e) => warn!("dm broadcast fallback failed: {}", e),
                        }
                    }
                }
                Err(e) => warn!("direct dm to {} failed: {}", target.nid, e),
            }
        }

        let id = self.store.dm_enqueue(
            target.nid,
            Some(from),
            body,
            channel,
            self.cfg.dm_ttl_sec(),
        )?;
        debug!("queued dm #{} for {}", id, target.nid);
        Ok(format!("queued dm to {} ({})", target.short, target.nid))
    }

    /// Opportunistic flush: deliver up to the batch limit of queued entries
    /// addressed to `nid`, oldest first. Runs on every inbound observation
    /// of that node.
    pub async fn flush_for(&self, link: &dyn RadioLink, nid: NodeId) {
        if let Err(e) = self.store.dm_sweep_expired(now()) {
            warn!("dm sweep failed: {}", e);
            return;
        }
        let entries = match self.store.dm_take_queued_for(nid, self.cfg.sf_limit_batch) {
            Ok(v) => v,
            Err(e) => {
                warn!("dm select failed: {}", e);
                return;
            }
        };
        for entry in entries {
            let payload = format!("[DM] {}", entry.body);
            match link.send(Some(nid), entry.ch_idx, &payload).await {
                Ok(_) => {
                    if let Err(e) = self.store.dm_mark_delivered(entry.id, now()) {
                        warn!("dm #{} delivered but not recorded: {}", entry.id, e);
                        continue;
                    }
                    debug!("dm #{} delivered to {}", entry.id, nid);
                    self.notify_sender(link, &entry, nid).await;
                    tokio::time::sleep(Duration::from_secs_f64(self.cfg.tx_gap)).await;
                }
                Err(e) => {
                    warn!("dm #{} to {} failed: {}", entry.id, nid, e);
                    let _ = self.store.dm_mark_attempt(entry.id, now());
                    // the link is struggling; stop this batch
                    break;
                }
            }
        }
    }

    async fn notify_sender(
        &self,
        link: &dyn RadioLink,
        entry: &crate::types::DmEntry,
        recipient: NodeId,
    ) {
        let Some(from) = entry.from_id else { return };
        if from == recipient {
            return;
        }
        let short = link
            .nodes()
            .into_iter()
            .find(|n| n.nid == recipient)
            .map(|n| n.short)
            .unwrap_or_else(|| recipient.to_string());
        let note = format!("dm #{} delivered to {}", entry.id, short);
        if let Err(e) = link.send(Some(from), entry.ch_idx, &note).await {
            debug!("delivery note to {} failed: {}", from, e);
        }
    }
}
