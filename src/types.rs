//! Core entities and text helpers for the board

use rand::Rng;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as seconds since the epoch
pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// =============================================================================
// NODE IDENTITY
// =============================================================================

/// 32-bit mesh node identifier.
///
/// Canonical rendering is `!xxxxxxxx` (8 lowercase hex digits); that form is
/// used for every persisted reference and comparison. Parsing accepts the
/// three equivalent encodings seen on the wire: the integer node number, a
/// bare hex string, and the prefixed form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn from_num(num: u64) -> Self {
        NodeId((num & 0xffff_ffff) as u32)
    }

    /// Parse any of the three encodings. Bare decimal-looking strings are
    /// treated as hex, matching the mesh firmware convention.
    pub fn parse_loose(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        let hex = s.strip_prefix('!').unwrap_or(s);
        if hex.is_empty() || hex.len() > 8 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        u32::from_str_radix(hex, 16).ok().map(NodeId)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{:08x}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = ();

    /// Strict canonical form only: `!` followed by up to 8 hex digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().strip_prefix('!').ok_or(())?;
        if hex.is_empty() || hex.len() > 8 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(());
        }
        u32::from_str_radix(hex, 16).map(NodeId).map_err(|_| ())
    }
}

/// Normalized read-only view of one live node table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEntry {
    pub nid: NodeId,
    pub short: String,
    pub long: String,
    pub last_heard: Option<i64>,
}

impl NodeEntry {
    pub fn new(nid: NodeId, short: &str, long: &str) -> Self {
        Self {
            nid,
            short: clean_text(short),
            long: clean_text(long),
            last_heard: None,
        }
    }
}

// =============================================================================
// BOARD ENTITIES
// =============================================================================

/// One board post. Replies are posts with `reply_to` set; both live in the
/// same table and share the station-local id sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: i64,
    pub ts: i64,
    pub author: String,
    pub body: String,
    pub reply_to: Option<i64>,
}

/// The station notice. Treated as absent once `expire_ts` has passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub body: String,
    pub set_ts: i64,
    pub expire_ts: Option<i64>,
}

impl Notice {
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expire_ts, Some(exp) if now >= exp)
    }
}

/// DM outbox entry lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmStatus {
    Queued,
    Delivered,
    Expired,
}

impl DmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DmStatus::Queued => "queued",
            DmStatus::Delivered => "delivered",
            DmStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(DmStatus::Queued),
            "delivered" => Some(DmStatus::Delivered),
            "expired" => Some(DmStatus::Expired),
            _ => None,
        }
    }
}

/// One store-and-forward DM. `delivered_ts` is set exactly when the status
/// transitions to delivered; expired entries keep it NULL forever.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmEntry {
    pub id: i64,
    pub to_id: NodeId,
    pub from_id: Option<NodeId>,
    pub body: String,
    pub created_ts: i64,
    pub delivered_ts: Option<i64>,
    pub attempts: i64,
    pub last_attempt_ts: Option<i64>,
    pub ch_idx: u8,
    pub ttl_sec: i64,
    pub status: DmStatus,
}

// =============================================================================
// TEXT HELPERS
// =============================================================================

/// Collapse all whitespace runs (including newlines) to single spaces and
/// strip the ends. Bodies are stored verbatim; this is display-only.
pub fn clean_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize a short name for matching: keep alphanumerics, lowercase.
pub fn norm_short(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Bound a string to `max` characters, marking the cut with a trailing `…`.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(1);
    let mut out: String = s.chars().take(keep).collect();
    out.push('…');
    out
}

pub fn fmt_uptime(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    format!("{}h{:02}m", h, m)
}

/// Compact age rendering for node listings: 42s, 5m, 3h, 2d.
pub fn fmt_age(seconds: i64) -> String {
    let s = seconds.max(0);
    if s < 60 {
        format!("{}s", s)
    } else if s < 3600 {
        format!("{}m", s / 60)
    } else if s < 86_400 {
        format!("{}h", s / 3600)
    } else {
        format!("{}d", s / 86_400)
    }
}

pub fn fmt_ts_short(ts: i64) -> String {
    match chrono::DateTime::from_timestamp(ts, 0) {
        Some(dt) => dt.format("%m-%d %H:%M").to_string(),
        None => "?".to_string(),
    }
}

pub fn fmt_ts_long(ts: i64) -> String {
    match chrono::DateTime::from_timestamp(ts, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        None => "?".to_string(),
    }
}

/// Random 10-character lowercase alphanumeric replication token
pub fn gen_uid() -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..10)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}
