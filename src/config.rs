//! Station configuration: environment knobs with CLI overrides

use crate::types::NodeId;
use clap::Parser;
use std::path::PathBuf;

/// Immutable configuration record handed to the supervisor at startup.
///
/// Every knob is an environment variable; a handful of CLI flags override
/// the environment for operator convenience.
#[derive(Debug, Clone)]
pub struct Config {
    /// Filesystem path of the embedded database file
    pub db_path: PathBuf,
    /// Serial device path, or `auto` to probe candidates
    pub device_path: String,
    /// Default station display name
    pub name: String,
    /// Seed node ids for the admin set
    pub admins: Vec<NodeId>,
    /// Seed node ids for the sync peer set
    pub peers: Vec<NodeId>,

    /// Per-sender minimum reply interval, seconds
    pub rate_limit_sec: f64,
    /// Frame body maximum length, characters
    pub max_text: usize,
    /// Inter-frame pause, seconds
    pub tx_gap: f64,

    /// Acknowledgement wait for the broadcast fallback path, seconds
    pub fallback_sec: u64,
    /// Broadcast the DM payload once when the direct send goes unacknowledged
    pub direct_fallback: bool,
    /// Synchronous DM acknowledgement wait, seconds
    pub deliver_wait: u64,
    /// Max DMs flushed per opportunistic trigger
    pub sf_limit_batch: usize,
    /// DM queue time-to-live, hours
    pub sf_ttl_hours: u64,

    /// Peer gossip enabled at startup
    pub sync: bool,
    /// Post ids advertised per INV (floor 5)
    pub sync_inv: usize,
    /// Gossip period, seconds
    pub sync_period: u64,
    /// Characters per PART chunk
    pub sync_chunk: usize,

    /// Reconnect when no inbound for this long, seconds
    pub rx_stale_sec: u64,
    /// Watchdog wake interval, seconds
    pub watch_tick: u64,

    /// Answer `health` to any sender
    pub health_public: bool,
    /// Reply to unrecognized commands
    pub unknown_reply: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./meshboard.db"),
            device_path: "auto".to_string(),
            name: "Meshboard BBS".to_string(),
            admins: Vec::new(),
            peers: Vec::new(),
            rate_limit_sec: 2.0,
            max_text: 140,
            tx_gap: 0.8,
            fallback_sec: 8,
            direct_fallback: false,
            deliver_wait: 8,
            sf_limit_batch: 3,
            sf_ttl_hours: 72,
            sync: true,
            sync_inv: 15,
            sync_period: 300,
            sync_chunk: 160,
            rx_stale_sec: 240,
            watch_tick: 10,
            health_public: false,
            unknown_reply: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build a config from any key lookup. Unset or unparsable values fall
    /// back to the defaults, so a half-broken environment still boots.
    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Config::default();
        Self {
            db_path: get("DB_PATH").map(PathBuf::from).unwrap_or(d.db_path),
            device_path: get("DEVICE_PATH").unwrap_or(d.device_path),
            name: get("NAME").unwrap_or(d.name),
            admins: get("ADMINS").map(|s| parse_id_csv(&s)).unwrap_or_default(),
            peers: get("PEERS").map(|s| parse_id_csv(&s)).unwrap_or_default(),
            rate_limit_sec: parse_or(&get, "RATE_LIMIT_SEC", d.rate_limit_sec),
            max_text: parse_or(&get, "MAX_TEXT", d.max_text),
            tx_gap: parse_or(&get, "TX_GAP", d.tx_gap),
            fallback_sec: parse_or(&get, "FALLBACK_SEC", d.fallback_sec),
            direct_fallback: bool_or(&get, "DIRECT_FALLBACK", d.direct_fallback),
            deliver_wait: parse_or(&get, "DELIVER_WAIT", d.deliver_wait),
            sf_limit_batch: parse_or(&get, "SF_LIMIT_BATCH", d.sf_limit_batch),
            sf_ttl_hours: parse_or(&get, "SF_TTL_HOURS", d.sf_ttl_hours),
            sync: bool_or(&get, "SYNC", d.sync),
            sync_inv: parse_or(&get, "SYNC_INV", d.sync_inv).max(5),
            sync_period: parse_or(&get, "SYNC_PERIOD", d.sync_period),
            sync_chunk: parse_or(&get, "SYNC_CHUNK", d.sync_chunk).max(1),
            rx_stale_sec: parse_or(&get, "RX_STALE_SEC", d.rx_stale_sec),
            watch_tick: parse_or(&get, "WATCH_TICK", d.watch_tick).max(1),
            health_public: bool_or(&get, "HEALTH_PUBLIC", d.health_public),
            unknown_reply: bool_or(&get, "UNKNOWN_REPLY", d.unknown_reply),
        }
    }

    pub fn apply_args(&mut self, args: &Args) {
        if let Some(db) = &args.db {
            self.db_path = db.clone();
        }
        if let Some(dev) = &args.device {
            self.device_path = dev.clone();
        }
        if let Some(admins) = &args.admins {
            self.admins = parse_id_csv(admins);
        }
        if let Some(peers) = &args.peers {
            self.peers = parse_id_csv(peers);
        }
    }

    pub fn dm_ttl_sec(&self) -> i64 {
        (self.sf_ttl_hours * 3600) as i64
    }
}

/// CLI overrides for the most commonly changed knobs
#[derive(Debug, Parser, Default)]
#[command(name = "meshboard", version, about = "Meshboard: mesh-radio bulletin board")]
pub struct Args {
    /// Database file path (overrides DB_PATH)
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Serial device path or "auto" (overrides DEVICE_PATH)
    #[arg(long)]
    pub device: Option<String>,

    /// Comma-separated admin node ids (overrides ADMINS)
    #[arg(long)]
    pub admins: Option<String>,

    /// Comma-separated sync peer node ids (overrides PEERS)
    #[arg(long)]
    pub peers: Option<String>,
}

fn parse_or<F, T>(get: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    get(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn bool_or<F>(get: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

fn parse_id_csv(s: &str) -> Vec<NodeId> {
    s.split(',')
        .filter_map(|p| NodeId::parse_loose(p))
        .collect()
}
