//! Peer replication over the text channel.
//!
//! Five ASCII verbs behind the reserved `#SYNC` tag: INV advertises recent
//! post ids, GET requests one post, POST/PART/END carry a chunked body
//! correlated by a random uid. Frames are only sent to explicit peers and
//! only honored from them; the applied-uid set makes replays idempotent.

use crate::config::Config;
use crate::error::Error;
use crate::radio::{RadioError, RadioLink};
use crate::store::Store;
use crate::types::{gen_uid, now, NodeId, Post};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Reserved frame tag; user text must not start with this.
pub const SYNC_TAG: &str = "#SYNC";

/// GETs issued per received INV.
const MAX_GETS_PER_INV: usize = 3;

/// Floor for the PayloadTooBig re-chunk retry.
const MIN_CHUNK: usize = 16;

// =============================================================================
// WIRE FORM
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncVerb {
    /// Advertise the last N post ids, ascending.
    Inv { ids: Vec<i64> },
    /// Request one post by station-local id.
    Get { id: i64 },
    /// Announce a replicated post and its part count.
    PostHeader {
        uid: String,
        id: i64,
        ts: i64,
        by: String,
        reply_to: Option<i64>,
        total: u32,
    },
    /// One body chunk.
    Part {
        uid: String,
        index: u32,
        total: u32,
        chunk: String,
    },
    /// Commit whatever accumulated for the uid.
    End { uid: String },
}

impl SyncVerb {
    pub fn parse(text: &str) -> Result<SyncVerb, Error> {
        let rest = text.strip_prefix(SYNC_TAG).ok_or(Error::MalformedSyncFrame)?;
        let rest = rest.strip_prefix(' ').unwrap_or(rest);
        let (verb, tail) = match rest.split_once(' ') {
            Some((v, t)) => (v, t),
            None => (rest, ""),
        };
        match verb {
            "INV" => {
                let kv = parse_kv(tail);
                let ids = kv
                    .iter()
                    .find(|(k, _)| *k == "ids")
                    .map(|(_, v)| {
                        v.split(',')
                            .filter(|s| !s.is_empty())
                            .filter_map(|s| s.parse().ok())
                            .collect()
                    })
                    .ok_or(Error::MalformedSyncFrame)?;
                Ok(SyncVerb::Inv { ids })
            }
            "GET" => {
                let id = kv_get(tail, "id")
                    .and_then(|v| v.parse().ok())
                    .ok_or(Error::MalformedSyncFrame)?;
                Ok(SyncVerb::Get { id })
            }
            "POST" => {
                let uid = kv_get(tail, "uid").ok_or(Error::MalformedSyncFrame)?;
                let id = kv_get(tail, "id").and_then(|v| v.parse().ok()).unwrap_or(0);
                let ts = kv_get(tail, "ts").and_then(|v| v.parse().ok()).unwrap_or(0);
                let by = kv_get(tail, "by").unwrap_or_default();
                let reply_to = match kv_get(tail, "r").as_deref() {
                    None | Some("-") => None,
                    Some(v) => v.parse().ok(),
                };
                let total = kv_get(tail, "n").and_then(|v| v.parse().ok()).unwrap_or(1);
                Ok(SyncVerb::PostHeader { uid, id, ts, by, reply_to, total })
            }
            "PART" => {
                // `uid=<u> <i>/<N> <chunk>`: the chunk is everything after
                // the single space following the index token, verbatim.
                let mut it = tail.splitn(3, ' ');
                let uid = it
                    .next()
                    .and_then(|t| t.strip_prefix("uid="))
                    .ok_or(Error::MalformedSyncFrame)?
                    .to_string();
                let idx_tok = it.next().ok_or(Error::MalformedSyncFrame)?;
                let (i, n) = idx_tok.split_once('/').ok_or(Error::MalformedSyncFrame)?;
                let index = i.parse().map_err(|_| Error::MalformedSyncFrame)?;
                let total = n.parse().map_err(|_| Error::MalformedSyncFrame)?;
                let chunk = it.next().unwrap_or("").to_string();
                Ok(SyncVerb::Part { uid, index, total, chunk })
            }
            "END" => {
                let uid = kv_get(tail, "uid").ok_or(Error::MalformedSyncFrame)?;
                Ok(SyncVerb::End { uid })
            }
            _ => Err(Error::MalformedSyncFrame),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            SyncVerb::Inv { ids } => {
                let csv: Vec<String> = ids.iter().map(|i| i.to_string()).collect();
                format!("{} INV ids={}", SYNC_TAG, csv.join(","))
            }
            SyncVerb::Get { id } => format!("{} GET id={}", SYNC_TAG, id),
            SyncVerb::PostHeader { uid, id, ts, by, reply_to, total } => format!(
                "{} POST uid={} id={} ts={} by={} r={} n={}",
                SYNC_TAG,
                uid,
                id,
                ts,
                by,
                reply_to.map_or_else(|| "-".to_string(), |r| r.to_string()),
                total
            ),
            SyncVerb::Part { uid, index, total, chunk } => {
                format!("{} PART uid={} {}/{} {}", SYNC_TAG, uid, index, total, chunk)
            }
            SyncVerb::End { uid } => format!("{} END uid={}", SYNC_TAG, uid),
        }
    }
}

fn parse_kv(tail: &str) -> Vec<(&str, &str)> {
    tail.split_whitespace()
        .filter_map(|tok| tok.split_once('='))
        .collect()
}

fn kv_get(tail: &str, key: &str) -> Option<String> {
    parse_kv(tail)
        .into_iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.to_string())
}

/// Cut a body into fixed-size character chunks. An empty body still yields
/// one empty chunk so the wire sequence stays POST, PART, END.
pub fn chunk_body(body: &str, chunk_chars: usize) -> Vec<String> {
    let chunk_chars = chunk_chars.max(1);
    let cs: Vec<char> = body.chars().collect();
    if cs.is_empty() {
        return vec![String::new()];
    }
    cs.chunks(chunk_chars).map(|c| c.iter().collect()).collect()
}

// =============================================================================
// REPLICATION ENGINE
// =============================================================================

pub struct PeerSync {
    store: Arc<Store>,
    cfg: Arc<Config>,
    enabled: AtomicBool,
    last_inv_at: AtomicI64,
}

impl PeerSync {
    pub fn new(store: Arc<Store>, cfg: Arc<Config>) -> Self {
        let enabled = cfg.sync;
        Self {
            store,
            cfg,
            enabled: AtomicBool::new(enabled),
            last_inv_at: AtomicI64::new(0),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::SeqCst);
    }

    /// Seconds since the last INV broadcast, if one happened.
    pub fn last_inv_age(&self, now: i64) -> Option<i64> {
        match self.last_inv_at.load(Ordering::SeqCst) {
            0 => None,
            t => Some((now - t).max(0)),
        }
    }

    /// Advertise the most recent post ids to every peer. Skipped while the
    /// post table is empty.
    pub async fn broadcast_inventory(&self, link: &dyn RadioLink) -> Result<(), Error> {
        let ids = self.store.recent_post_ids(self.cfg.sync_inv)?;
        if ids.is_empty() {
            return Ok(());
        }
        let payload = SyncVerb::Inv { ids }.encode();
        let mut last_err = None;
        for peer in self.store.peers()? {
            if let Err(e) = link.send(Some(peer), 0, &payload).await {
                warn!("inv to {} failed: {}", peer, e);
                last_err = Some(e);
            }
        }
        self.last_inv_at.store(now(), Ordering::SeqCst);
        match last_err {
            Some(e) => Err(Error::Transport(e.to_string())),
            None => Ok(()),
        }
    }

    /// Fan a freshly inserted local post out to every peer, one bursted
    /// POST/PART*/END sequence per peer.
    pub async fn replicate_post(&self, link: &dyn RadioLink, post: &Post) {
        if !self.enabled() {
            return;
        }
        let peers = match self.store.peers() {
            Ok(p) => p,
            Err(e) => {
                warn!("replicate: peer list unavailable: {}", e);
                return;
            }
        };
        for peer in peers {
            if let Err(e) = self.send_sequence(link, peer, post).await {
                warn!("replicate #{} to {} failed: {}", post.id, peer, e);
            }
        }
    }

    /// Send one POST/PART*/END sequence, retrying once with a smaller chunk
    /// bound when the transport rejects a frame as too big.
    async fn send_sequence(
        &self,
        link: &dyn RadioLink,
        dest: NodeId,
        post: &Post,
    ) -> Result<(), RadioError> {
        let mut chunk = self.cfg.sync_chunk;
        loop {
            match self.try_sequence(link, dest, post, chunk).await {
                Err(RadioError::PayloadTooBig(_)) if chunk > MIN_CHUNK => {
                    chunk = (chunk / 2).max(MIN_CHUNK);
                    debug!("re-chunking for {} at {} chars", dest, chunk);
                }
                other => return other,
            }
        }
    }

    async fn try_sequence(
        &self,
        link: &dyn RadioLink,
        dest: NodeId,
        post: &Post,
        chunk_chars: usize,
    ) -> Result<(), RadioError> {
        let uid = gen_uid();
        let parts = chunk_body(&post.body, chunk_chars);
        let total = parts.len() as u32;
        let header = SyncVerb::PostHeader {
            uid: uid.clone(),
            id: post.id,
            ts: post.ts,
            by: post.author.clone(),
            reply_to: post.reply_to,
            total,
        };
        link.send(Some(dest), 0, &header.encode()).await?;
        for (i, chunk) in parts.into_iter().enumerate() {
            let part = SyncVerb::Part {
                uid: uid.clone(),
                index: i as u32 + 1,
                total,
                chunk,
            };
            link.send(Some(dest), 0, &part.encode()).await?;
        }
        link.send(Some(dest), 0, &SyncVerb::End { uid }.encode()).await?;
        Ok(())
    }

    /// Handle one inbound sync frame. Best effort: malformed frames and
    /// store hiccups are logged and dropped.
    pub async fn handle_frame(&self, link: &dyn RadioLink, from: NodeId, text: &str) {
        match self.store.is_peer(from) {
            Ok(true) => {}
            Ok(false) => {
                debug!("sync from non-peer {} ignored", from);
                return;
            }
            Err(e) => {
                warn!("sync peer check failed: {}", e);
                return;
            }
        }
        let _ = self.store.peer_touch(from);

        let verb = match SyncVerb::parse(text) {
            Ok(v) => v,
            Err(_) => {
                debug!("malformed sync frame from {}", from);
                return;
            }
        };
        if let Err(e) = self.apply(link, from, verb).await {
            warn!("sync apply from {} failed: {}", from, e);
        }
    }

    async fn apply(
        &self,
        link: &dyn RadioLink,
        from: NodeId,
        verb: SyncVerb,
    ) -> Result<(), Error> {
        match verb {
            SyncVerb::Inv { ids } => {
                let mut missing = Vec::new();
                for id in ids {
                    if !self.store.post_exists(id)? {
                        missing.push(id);
                    }
                }
                for id in missing.into_iter().take(MAX_GETS_PER_INV) {
                    let get = SyncVerb::Get { id }.encode();
                    if let Err(e) = link.send(Some(from), 0, &get).await {
                        warn!("get to {} failed: {}", from, e);
                        break;
                    }
                }
            }
            SyncVerb::Get { id } => {
                if let Some(post) = self.store.get_post(id)? {
                    if let Err(e) = self.send_sequence(link, from, &post).await {
                        warn!("serving #{} to {} failed: {}", id, from, e);
                    }
                }
            }
            SyncVerb::PostHeader { uid, total, .. } => {
                self.store.seen_uid_insert(&uid)?;
                self.store.rxparts_insert_shell(&uid, total, from)?;
            }
            SyncVerb::Part { uid, index, total, chunk } => {
                if !self.store.rxparts_append(&uid, &chunk, index, total)? {
                    debug!("part for unknown uid {} dropped", uid);
                }
            }
            SyncVerb::End { uid } => {
                if self.store.uid_applied(&uid)? {
                    self.store.rxparts_delete(&uid)?;
                    return Ok(());
                }
                let Some((body, got, total, _)) = self.store.rxparts_take_body(&uid)? else {
                    return Ok(());
                };
                if got != total {
                    debug!("uid {} committed with {}/{} parts", uid, got, total);
                }
                let author = format!("[peer]{}", from);
                let pid = self.store.insert_post(&author, &body, None)?;
                self.store.applied_uid_insert(&uid)?;
                self.store.rxparts_delete(&uid)?;
                debug!("applied uid {} as post #{}", uid, pid);
            }
        }
        Ok(())
    }
}
