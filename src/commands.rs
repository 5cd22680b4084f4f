//! The user-facing command grammar and its executor.
//!
//! Every inbound text frame is parsed once into a [`Command`] at the router
//! boundary, then executed by the [`Engine`] against the store, the live
//! node table and the peer sync layer. Replies go back to the sender on the
//! inbound channel, paged when they span frames.

use crate::config::Config;
use crate::error::Error;
use crate::outbox::DmOutbox;
use crate::pager::paginate;
use crate::radio::RadioLink;
use crate::resolve::{collect_nodes, resolve, Resolution};
use crate::store::Store;
use crate::supervisor::LinkState;
use crate::sync::PeerSync;
use crate::types::{
    clean_text, fmt_age, fmt_ts_long, fmt_ts_short, fmt_uptime, now, truncate_chars, NodeEntry,
    NodeId,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Posts shown by the bare `r` listing.
const RECENT_LIMIT: usize = 10;
/// Replies shown under one post.
const REPLIES_LIMIT: usize = 5;
/// Body bound in the recent listing.
const LIST_BODY_CHARS: usize = 60;
/// Body bound for replies in the single-post view.
const REPLY_BODY_CHARS: usize = 80;
/// Body bound in the outbox view.
const OUTBOX_BODY_CHARS: usize = 40;
/// Body bound for the notice.
const NOTICE_BODY_CHARS: usize = 450;

// =============================================================================
// GRAMMAR
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetAction {
    View,
    Add(String),
    Remove(String),
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    On,
    Off,
    Now,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Menu,
    Help,
    Read { arg: Option<String> },
    Post { text: String },
    Reply { id: String, text: String },
    Info,
    InfoSet { rest: String },
    Status,
    Whoami,
    Whois { query: String },
    Nodes,
    Dm { query: String, text: String },
    Outbox,
    Admins(SetAction),
    Blacklist(SetAction),
    Name,
    NameSet { text: String },
    Peer(SetAction),
    Sync(SyncAction),
    Health,
    Usage(&'static str),
    Unknown,
}

/// First whitespace-delimited word and the rest, original spacing kept.
fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

fn set_action(rest: &str) -> Option<SetAction> {
    if rest.is_empty() {
        return Some(SetAction::View);
    }
    let (act, arg) = split_word(rest);
    match act.to_ascii_lowercase().as_str() {
        "list" => Some(SetAction::View),
        "add" if !arg.is_empty() => Some(SetAction::Add(arg.to_string())),
        "remove" | "del" if !arg.is_empty() => Some(SetAction::Remove(arg.to_string())),
        "clear" => Some(SetAction::Clear),
        _ => None,
    }
}

impl Command {
    /// Verbs are case-insensitive; argument text keeps its spacing.
    pub fn parse(text: &str) -> Command {
        let trimmed = text.trim();
        match trimmed {
            "?" => return Command::Menu,
            "??" => return Command::Help,
            _ => {}
        }
        let (verb, rest) = split_word(trimmed);
        if verb.is_empty() {
            return Command::Unknown;
        }
        match verb.to_ascii_lowercase().as_str() {
            "menu" | "m" | "h" => Command::Menu,
            "help" => Command::Help,
            "r" | "read" => {
                let (arg, _) = split_word(rest);
                Command::Read { arg: (!arg.is_empty()).then(|| arg.to_string()) }
            }
            "p" | "post" => {
                if rest.is_empty() {
                    Command::Usage("usage: p <text>")
                } else {
                    Command::Post { text: rest.to_string() }
                }
            }
            "reply" => {
                let (id, text) = split_word(rest);
                if id.is_empty() || text.is_empty() {
                    Command::Usage("usage: reply <id> <text>")
                } else {
                    Command::Reply { id: id.to_string(), text: text.to_string() }
                }
            }
            "info" => {
                let (sub, tail) = split_word(rest);
                if sub.eq_ignore_ascii_case("set") {
                    Command::InfoSet { rest: tail.to_string() }
                } else {
                    Command::Info
                }
            }
            "status" => Command::Status,
            "whoami" => Command::Whoami,
            "whois" => {
                let (q, _) = split_word(rest);
                if q.is_empty() {
                    Command::Usage("usage: whois <short>")
                } else {
                    Command::Whois { query: q.to_string() }
                }
            }
            "nodes" | "node" => Command::Nodes,
            "dm" | "msg" => {
                let (q, text) = split_word(rest);
                if q.is_empty() || text.is_empty() {
                    Command::Usage("dm usage: dm <short> <text>")
                } else {
                    Command::Dm { query: q.to_string(), text: text.to_string() }
                }
            }
            "outbox" => Command::Outbox,
            "admins" => match set_action(rest) {
                Some(a) => Command::Admins(a),
                None => Command::Usage("usage: admins [add|remove|clear <id>]"),
            },
            "blacklist" | "bl" => match set_action(rest) {
                Some(a) => Command::Blacklist(a),
                None => Command::Usage("usage: blacklist [add|remove|clear <id>]"),
            },
            "peer" | "peers" => match set_action(rest) {
                Some(a) => Command::Peer(a),
                None => Command::Usage("usage: peer add|del|list <id>"),
            },
            "sync" => {
                let (act, _) = split_word(rest);
                match act.to_ascii_lowercase().as_str() {
                    "on" => Command::Sync(SyncAction::On),
                    "off" => Command::Sync(SyncAction::Off),
                    "now" => Command::Sync(SyncAction::Now),
                    _ => Command::Usage("usage: sync on|off|now"),
                }
            }
            "name" => {
                if rest.is_empty() {
                    Command::Name
                } else {
                    let (sub, tail) = split_word(rest);
                    if sub.eq_ignore_ascii_case("set") && !tail.is_empty() {
                        Command::NameSet { text: tail.to_string() }
                    } else {
                        Command::Usage("usage: name set <text>")
                    }
                }
            }
            "health" => Command::Health,
            _ => Command::Unknown,
        }
    }
}

// =============================================================================
// EXECUTION
// =============================================================================

pub struct Engine {
    store: Arc<Store>,
    cfg: Arc<Config>,
    link: Arc<dyn RadioLink>,
    sync: Arc<PeerSync>,
    outbox: Arc<DmOutbox>,
    state: Arc<LinkState>,
}

impl Engine {
    pub fn new(
        store: Arc<Store>,
        cfg: Arc<Config>,
        link: Arc<dyn RadioLink>,
        sync: Arc<PeerSync>,
        outbox: Arc<DmOutbox>,
        state: Arc<LinkState>,
    ) -> Self {
        Self { store, cfg, link, sync, outbox, state }
    }

    /// Parse and execute one inbound command; command-level errors become
    /// reply text, the rest is logged and suppressed.
    pub async fn dispatch(&self, from: NodeId, channel: u8, text: &str) {
        let cmd = Command::parse(text);
        debug!("{} -> {:?}", from, cmd);
        if let Err(e) = self.execute(from, channel, cmd).await {
            match e.reply_text() {
                Some(reply) => self.send_text(Some(from), channel, &reply).await,
                None => warn!("command from {} failed: {}", from, e),
            }
        }
    }

    async fn execute(&self, from: NodeId, channel: u8, cmd: Command) -> Result<(), Error> {
        match cmd {
            Command::Menu => self.cmd_menu(from, channel).await,
            Command::Help => self.cmd_help(from, channel).await,
            Command::Read { arg } => self.cmd_read(from, channel, arg).await,
            Command::Post { text } => self.cmd_post(from, channel, &text).await,
            Command::Reply { id, text } => self.cmd_reply(from, channel, &id, &text).await,
            Command::Info => self.cmd_info(from, channel).await,
            Command::InfoSet { rest } => self.cmd_info_set(from, channel, &rest).await,
            Command::Status => self.cmd_status(from, channel).await,
            Command::Whoami => self.cmd_whoami(from, channel).await,
            Command::Whois { query } => self.cmd_whois(from, channel, &query).await,
            Command::Nodes => self.cmd_nodes(from, channel).await,
            Command::Dm { query, text } => self.cmd_dm(from, channel, &query, &text).await,
            Command::Outbox => self.cmd_outbox(from, channel).await,
            Command::Admins(action) => self.cmd_admins(from, channel, action).await,
            Command::Blacklist(action) => self.cmd_blacklist(from, channel, action).await,
            Command::Name => self.cmd_name(from, channel).await,
            Command::NameSet { text } => self.cmd_name_set(from, channel, &text).await,
            Command::Peer(action) => self.cmd_peer(from, channel, action).await,
            Command::Sync(action) => self.cmd_sync(from, channel, action).await,
            Command::Health => self.cmd_health(from, channel).await,
            Command::Usage(usage) => {
                self.send_text(Some(from), channel, usage).await;
                Ok(())
            }
            Command::Unknown => {
                if self.cfg.unknown_reply {
                    self.send_text(
                        Some(from),
                        channel,
                        "I didn't recognise that. Send '?' for menu.",
                    )
                    .await;
                }
                Ok(())
            }
        }
    }

    // -------------------------------------------------------------------------
    // transmission helpers

    async fn send_text(&self, dest: Option<NodeId>, channel: u8, text: &str) {
        if let Err(e) = self.link.send(dest, channel, text).await {
            warn!("send failed: {}", e);
            if e.is_reconnect_hint() {
                self.state.reconnect_hint.notify_one();
            }
        }
    }

    async fn send_paged(&self, dest: Option<NodeId>, channel: u8, lines: &[String]) {
        let frames = paginate(lines, self.cfg.max_text);
        for (i, frame) in frames.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(Duration::from_secs_f64(self.cfg.tx_gap)).await;
            }
            self.send_text(dest, channel, frame).await;
        }
    }

    fn station_name(&self) -> String {
        self.store
            .station_name()
            .ok()
            .flatten()
            .unwrap_or_else(|| self.cfg.name.clone())
    }

    fn require_admin(&self, from: NodeId) -> Result<(), Error> {
        if self.store.is_admin(from)? {
            Ok(())
        } else {
            Err(Error::Unauthorized)
        }
    }

    fn parse_target(&self, arg: &str) -> Option<NodeId> {
        NodeId::parse_loose(arg)
    }

    // -------------------------------------------------------------------------
    // menu / help

    /// Short menu line with the station header, shedding items until it
    /// fits the frame bound.
    fn menu_text(&self) -> String {
        let max = self.cfg.max_text;
        let mut name = clean_text(&self.station_name());
        if name.chars().count() > 28 {
            let words: Vec<&str> = name.split(' ').collect();
            if words.len() > 1 {
                let initials: Vec<String> = words[1..]
                    .iter()
                    .filter_map(|w| w.chars().next())
                    .map(|c| c.to_string())
                    .collect();
                name = format!("{} {}", words[0], initials.join(" "));
            }
            name = name.chars().take(28).collect::<String>().trim_end().to_string();
        }
        let header = format!("[{}]", name);
        let parts = [
            "r list",
            "r <id> read",
            "p <text> post",
            "reply <id> <t>",
            "info",
            "status",
            "whoami",
            "nodes",
            "whois <short>",
            "dm <short> <t>",
            "?? help",
        ];
        let join_line = |items: &[&str]| format!("{} {}", header, items.join(" | "));
        let line = join_line(&parts);
        if line.chars().count() <= max {
            return line;
        }
        let removable = [
            "dm <short> <t>",
            "whois <short>",
            "nodes",
            "whoami",
            "status",
            "info",
            "reply <id> <t>",
            "p <text> post",
            "r <id> read",
        ];
        let mut keep: Vec<&str> = parts.to_vec();
        for item in removable {
            keep.retain(|k| *k != item);
            let line = join_line(&keep);
            if line.chars().count() <= max {
                return line;
            }
        }
        let tiny = format!("{} r list | p | r <id> | ??", header);
        if tiny.chars().count() <= max {
            return tiny;
        }
        let base = if header.chars().count() + 12 < max { header } else { "[BBS]".to_string() };
        format!("{} r|p|r#|??", base)
    }

    async fn cmd_menu(&self, from: NodeId, channel: u8) -> Result<(), Error> {
        if let Some(notice) = self.store.get_notice()? {
            if !notice.is_expired(now()) {
                let body = truncate_chars(&clean_text(&notice.body), NOTICE_BODY_CHARS);
                self.send_paged(Some(from), channel, &[body]).await;
            }
        }
        let menu = self.menu_text();
        self.send_text(Some(from), channel, &menu).await;
        Ok(())
    }

    async fn cmd_help(&self, from: NodeId, channel: u8) -> Result<(), Error> {
        let name = self.station_name();
        let lines: Vec<String> = vec![
            format!("[{}] Help:", name),
            "- r: list recent; r 12: read #12".into(),
            "- p <text>: post; reply 12 <text>: reply".into(),
            "- info / info set [hours] <text> (admin)".into(),
            "- status / whoami / nodes / whois <short>".into(),
            "- dm <short> <text>: queued DM; outbox: your queue".into(),
            "- admins add|remove|clear <id> (admin)".into(),
            "- blacklist add|remove|clear <id> (admin)".into(),
            "- peer add|del|list, sync on|off|now (admin)".into(),
            "- name set <text> (admin); health".into(),
        ];
        self.send_paged(Some(from), channel, &lines).await;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // posts

    async fn cmd_read(&self, from: NodeId, channel: u8, arg: Option<String>) -> Result<(), Error> {
        match arg {
            None => {
                let posts = self.store.recent_posts(RECENT_LIMIT)?;
                let mut lines = vec![format!("[{}] Recent:", self.station_name())];
                if posts.is_empty() {
                    lines.push("(no posts yet)".to_string());
                } else {
                    for p in posts {
                        lines.push(format!(
                            "#{:>4} {} {}: {}",
                            p.id,
                            fmt_ts_short(p.ts),
                            p.author,
                            truncate_chars(&clean_text(&p.body), LIST_BODY_CHARS)
                        ));
                    }
                }
                self.send_paged(Some(from), channel, &lines).await;
            }
            Some(arg) => {
                let Ok(pid) = arg.parse::<i64>() else {
                    self.send_text(Some(from), channel, "bad id").await;
                    return Ok(());
                };
                let post = self.store.get_post(pid)?.ok_or(Error::PostNotFound(pid))?;
                let mut lines = vec![
                    format!("#{} {} {}", post.id, fmt_ts_long(post.ts), post.author),
                    clean_text(&post.body),
                ];
                for r in self.store.replies_to(pid, REPLIES_LIMIT)? {
                    lines.push(format!(
                        " -> #{} {} {}: {}",
                        r.id,
                        fmt_ts_long(r.ts),
                        r.author,
                        truncate_chars(&clean_text(&r.body), REPLY_BODY_CHARS)
                    ));
                }
                self.send_paged(Some(from), channel, &lines).await;
            }
        }
        Ok(())
    }

    async fn cmd_post(&self, from: NodeId, channel: u8, text: &str) -> Result<(), Error> {
        let pid = self.store.insert_post(&from.to_string(), text, None)?;
        self.send_text(Some(from), channel, &format!("posted #{}", pid)).await;
        if let Some(post) = self.store.get_post(pid)? {
            self.sync.replicate_post(self.link.as_ref(), &post).await;
        }
        Ok(())
    }

    async fn cmd_reply(
        &self,
        from: NodeId,
        channel: u8,
        id: &str,
        text: &str,
    ) -> Result<(), Error> {
        let Ok(pid) = id.parse::<i64>() else {
            self.send_text(Some(from), channel, "bad id").await;
            return Ok(());
        };
        let rid = self.store.append_reply(pid, &from.to_string(), text)?;
        self.send_text(Some(from), channel, &format!("reply #{} -> #{}", rid, pid)).await;
        if let Some(post) = self.store.get_post(rid)? {
            self.sync.replicate_post(self.link.as_ref(), &post).await;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // notice

    async fn cmd_info(&self, from: NodeId, channel: u8) -> Result<(), Error> {
        let notice = self.store.get_notice()?;
        let Some(n) = notice.filter(|n| !n.is_expired(now())) else {
            self.send_text(Some(from), channel, "No notice set.").await;
            return Ok(());
        };
        let meta = match n.expire_ts {
            Some(exp) => format!(
                "(Set: {} - Expires: {})",
                fmt_ts_long(n.set_ts),
                fmt_ts_long(exp)
            ),
            None => format!("(Set: {})", fmt_ts_long(n.set_ts)),
        };
        let lines = vec![
            format!("[{}] Notice", self.station_name()),
            truncate_chars(&clean_text(&n.body), NOTICE_BODY_CHARS),
            meta,
        ];
        self.send_paged(Some(from), channel, &lines).await;
        Ok(())
    }

    async fn cmd_info_set(&self, from: NodeId, channel: u8, rest: &str) -> Result<(), Error> {
        self.require_admin(from)?;
        let (first, tail) = split_word(rest);
        let (body, expire_ts) = if !first.is_empty() && first.chars().all(|c| c.is_ascii_digit()) {
            let hours: i64 = first.parse().unwrap_or(0);
            (tail.to_string(), Some(now() + hours * 3600))
        } else {
            (rest.to_string(), None)
        };
        self.store.set_notice(&body, expire_ts)?;
        self.send_text(Some(from), channel, "notice updated").await;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // identity / nodes

    async fn cmd_status(&self, from: NodeId, channel: u8) -> Result<(), Error> {
        let (long, short) = match self.link.local_node() {
            Some(n) => (n.long, n.short),
            None => (self.station_name(), String::new()),
        };
        let up = fmt_uptime(now() - self.state.connected_at());
        self.send_text(Some(from), channel, &format!("{} / {} / up {}", long, short, up))
            .await;
        Ok(())
    }

    async fn cmd_whoami(&self, from: NodeId, channel: u8) -> Result<(), Error> {
        let nodes = collect_nodes(self.link.as_ref());
        let (short, long) = nodes
            .iter()
            .find(|n| n.nid == from)
            .map(|n| (n.short.clone(), n.long.clone()))
            .unwrap_or_default();
        self.send_text(Some(from), channel, &format!("{} / {} / {}", from, short, long))
            .await;
        Ok(())
    }

    async fn cmd_whois(&self, from: NodeId, channel: u8, query: &str) -> Result<(), Error> {
        let nodes = collect_nodes(self.link.as_ref());
        let reply = match resolve(query, &nodes) {
            Resolution::Hit(n) => format!("{} / {} / {}", n.nid, n.short, n.long),
            Resolution::Ambiguous(sugg) => suggestions_reply(query, &sugg),
            Resolution::NotFound => format!("no node with short '{}'", query),
        };
        self.send_text(Some(from), channel, &reply).await;
        Ok(())
    }

    async fn cmd_nodes(&self, from: NodeId, channel: u8) -> Result<(), Error> {
        let nodes = collect_nodes(self.link.as_ref());
        let mut lines = vec![format!("[{}] Nodes: {}", self.station_name(), nodes.len())];
        if nodes.is_empty() {
            lines.push("(no nodes)".to_string());
        } else {
            let ts = now();
            for n in nodes {
                let age = n
                    .last_heard
                    .map(|lh| format!(" ({})", fmt_age(ts - lh)))
                    .unwrap_or_default();
                lines.push(format!("{:<8} {}  {}{}", n.short, n.nid, n.long, age));
            }
        }
        self.send_paged(Some(from), channel, &lines).await;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // direct messages

    async fn cmd_dm(
        &self,
        from: NodeId,
        channel: u8,
        query: &str,
        text: &str,
    ) -> Result<(), Error> {
        let body = clean_text(text);
        if body.is_empty() {
            self.send_text(Some(from), channel, "dm usage: dm <short> <text>").await;
            return Ok(());
        }
        let nodes = collect_nodes(self.link.as_ref());
        match resolve(query, &nodes) {
            Resolution::Hit(target) => {
                let reachable = nodes.iter().any(|n| n.nid == target.nid);
                let sender_short = nodes
                    .iter()
                    .find(|n| n.nid == from)
                    .map(|n| n.short.clone())
                    .unwrap_or_else(|| from.to_string());
                let reply = self
                    .outbox
                    .send_direct_or_queue(
                        self.link.as_ref(),
                        from,
                        &sender_short,
                        &target,
                        reachable,
                        channel,
                        &body,
                    )
                    .await?;
                self.send_text(Some(from), channel, &reply).await;
            }
            Resolution::Ambiguous(sugg) => {
                self.send_text(Some(from), channel, &suggestions_reply(query, &sugg)).await;
            }
            Resolution::NotFound => {
                self.send_text(Some(from), channel, &format!("no node with short '{}'", query))
                    .await;
            }
        }
        Ok(())
    }

    async fn cmd_outbox(&self, from: NodeId, channel: u8) -> Result<(), Error> {
        let entries = self.store.dm_queued_from(from)?;
        let mut lines = vec!["[outbox]".to_string()];
        if entries.is_empty() {
            lines.push("(none)".to_string());
        } else {
            let ts = now();
            for e in entries {
                lines.push(format!(
                    "#{} -> {} ({}): {}",
                    e.id,
                    e.to_id,
                    fmt_age(ts - e.created_ts),
                    truncate_chars(&clean_text(&e.body), OUTBOX_BODY_CHARS)
                ));
            }
        }
        self.send_paged(Some(from), channel, &lines).await;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // administration

    async fn cmd_admins(&self, from: NodeId, channel: u8, action: SetAction) -> Result<(), Error> {
        match action {
            SetAction::View => {
                self.require_admin(from)?;
                let ids = self.store.admins()?;
                self.send_id_list(from, channel, "[admins]", &ids).await;
            }
            SetAction::Add(arg) => {
                // bootstrap: while the admin set is empty, anyone may claim it
                if self.store.admin_count()? > 0 {
                    self.require_admin(from)?;
                }
                let Some(id) = self.parse_target(&arg) else {
                    self.send_text(Some(from), channel, "bad node id").await;
                    return Ok(());
                };
                self.store.admin_add(id)?;
                self.send_text(Some(from), channel, "admin added").await;
            }
            SetAction::Remove(arg) => {
                self.require_admin(from)?;
                let Some(id) = self.parse_target(&arg) else {
                    self.send_text(Some(from), channel, "bad node id").await;
                    return Ok(());
                };
                self.store.admin_remove(id)?;
                self.send_text(Some(from), channel, "admin removed").await;
            }
            SetAction::Clear => {
                self.require_admin(from)?;
                self.store.admins_clear()?;
                self.send_text(Some(from), channel, "admins cleared").await;
            }
        }
        Ok(())
    }

    async fn cmd_blacklist(
        &self,
        from: NodeId,
        channel: u8,
        action: SetAction,
    ) -> Result<(), Error> {
        self.require_admin(from)?;
        match action {
            SetAction::View => {
                let ids = self.store.blacklist()?;
                self.send_id_list(from, channel, "[blacklist]", &ids).await;
            }
            SetAction::Add(arg) => {
                let Some(id) = self.parse_target(&arg) else {
                    self.send_text(Some(from), channel, "bad node id").await;
                    return Ok(());
                };
                self.store.blacklist_add(id)?;
                self.send_text(Some(from), channel, "blacklisted").await;
            }
            SetAction::Remove(arg) => {
                let Some(id) = self.parse_target(&arg) else {
                    self.send_text(Some(from), channel, "bad node id").await;
                    return Ok(());
                };
                self.store.blacklist_remove(id)?;
                self.send_text(Some(from), channel, "removed").await;
            }
            SetAction::Clear => {
                self.store.blacklist_clear()?;
                self.send_text(Some(from), channel, "blacklist cleared").await;
            }
        }
        Ok(())
    }

    async fn cmd_name(&self, from: NodeId, channel: u8) -> Result<(), Error> {
        let name = self.station_name();
        self.send_text(Some(from), channel, &format!("name: {}", name)).await;
        Ok(())
    }

    async fn cmd_name_set(&self, from: NodeId, channel: u8, text: &str) -> Result<(), Error> {
        self.require_admin(from)?;
        self.store.set_station_name(&clean_text(text))?;
        self.send_text(Some(from), channel, "name updated").await;
        Ok(())
    }

    async fn cmd_peer(&self, from: NodeId, channel: u8, action: SetAction) -> Result<(), Error> {
        self.require_admin(from)?;
        match action {
            SetAction::View => {
                let ids = self.store.peers()?;
                self.send_id_list(from, channel, "[peers]", &ids).await;
            }
            SetAction::Add(arg) => {
                let Some(id) = self.parse_target(&arg) else {
                    self.send_text(Some(from), channel, "bad node id").await;
                    return Ok(());
                };
                self.store.peer_add(id)?;
                self.send_text(Some(from), channel, "peer added").await;
            }
            SetAction::Remove(arg) => {
                let Some(id) = self.parse_target(&arg) else {
                    self.send_text(Some(from), channel, "bad node id").await;
                    return Ok(());
                };
                self.store.peer_remove(id)?;
                self.send_text(Some(from), channel, "peer removed").await;
            }
            SetAction::Clear => {
                self.send_text(Some(from), channel, "usage: peer add|del|list <id>").await;
            }
        }
        Ok(())
    }

    async fn cmd_sync(&self, from: NodeId, channel: u8, action: SyncAction) -> Result<(), Error> {
        self.require_admin(from)?;
        match action {
            SyncAction::On => {
                self.sync.set_enabled(true);
                self.send_text(Some(from), channel, "sync on").await;
            }
            SyncAction::Off => {
                self.sync.set_enabled(false);
                self.send_text(Some(from), channel, "sync off").await;
            }
            SyncAction::Now => {
                self.sync.broadcast_inventory(self.link.as_ref()).await?;
                self.send_text(Some(from), channel, "sync announced").await;
            }
        }
        Ok(())
    }

    async fn cmd_health(&self, from: NodeId, channel: u8) -> Result<(), Error> {
        if !self.cfg.health_public {
            self.require_admin(from)?;
        }
        let ts = now();
        let dev = self.link.device().unwrap_or_else(|| "n/a".to_string());
        let up = fmt_uptime(ts - self.state.connected_at());
        let nodes = collect_nodes(self.link.as_ref()).len();
        let posts = self.store.post_count()?;
        let latest = self.store.latest_post_id()?;
        let admins = self.store.admin_count()?;
        let peers = self.store.peer_count()?;
        let bl = self.store.blacklist_count()?;
        let qdm = self.store.dm_queued_count()?;
        let sync_s = if self.sync.enabled() { "on" } else { "off" };
        let inv = self
            .sync
            .last_inv_age(ts)
            .map(|a| format!("{}s ago", a))
            .unwrap_or_else(|| "n/a".to_string());
        let line = format!(
            "link=ok dev={} up={} posts={} latest={} peers={} admins={} bl={} qdm={} nodes={} sync={} inv={}",
            dev, up, posts, latest, peers, admins, bl, qdm, nodes, sync_s, inv
        );
        if line.chars().count() <= self.cfg.max_text {
            self.send_text(Some(from), channel, &line).await;
        } else {
            let lines = vec![
                format!("[{}] Health:", self.station_name()),
                format!("link=ok dev={} up={}", dev, up),
                format!("posts={} latest={} peers={}", posts, latest, peers),
                format!("admins={} bl={} qdm={} nodes={}", admins, bl, qdm, nodes),
                format!("sync={} last_inv={}", sync_s, inv),
            ];
            self.send_paged(Some(from), channel, &lines).await;
        }
        Ok(())
    }

    async fn send_id_list(&self, from: NodeId, channel: u8, title: &str, ids: &[NodeId]) {
        let mut lines = vec![title.to_string()];
        if ids.is_empty() {
            lines.push("(none)".to_string());
        } else {
            lines.extend(ids.iter().map(|id| id.to_string()));
        }
        self.send_paged(Some(from), channel, &lines).await;
    }
}

fn suggestions_reply(query: &str, sugg: &[NodeEntry]) -> String {
    let list: Vec<String> = sugg.iter().map(|n| format!("{}({})", n.short, n.nid)).collect();
    format!("no exact match for '{}'. Try: {}", query, list.join(", "))
}
