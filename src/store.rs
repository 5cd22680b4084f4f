//! Durable station state on an embedded SQLite file.
//!
//! The store exclusively owns persistent state: posts and replies, the
//! notice, the admin / blacklist / peer sets, the DM outbox and the peer
//! replication bookkeeping. One connection behind a mutex serializes
//! writers; every operation is atomic at the entity level.

use crate::error::Error;
use crate::types::{now, DmEntry, DmStatus, NodeId, Notice, Post};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// Replication rx buffers older than this are dropped by the sweep.
const RXPARTS_STALE_SEC: i64 = 3600;

const MIGRATIONS: &str = "
CREATE TABLE IF NOT EXISTS posts (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    ts       INTEGER NOT NULL,
    author   TEXT NOT NULL,
    body     TEXT NOT NULL,
    reply_to INTEGER
);
CREATE TABLE IF NOT EXISTS kv (k TEXT PRIMARY KEY, v TEXT NOT NULL);
CREATE TABLE IF NOT EXISTS admins (id TEXT PRIMARY KEY);
CREATE TABLE IF NOT EXISTS blacklist (id TEXT PRIMARY KEY);
CREATE TABLE IF NOT EXISTS peers (id TEXT PRIMARY KEY, last_seen INTEGER NOT NULL DEFAULT 0);
CREATE TABLE IF NOT EXISTS seen_uids (uid TEXT PRIMARY KEY, ts INTEGER NOT NULL);
CREATE TABLE IF NOT EXISTS applied_uids (uid TEXT PRIMARY KEY, ts INTEGER NOT NULL);
CREATE TABLE IF NOT EXISTS rxparts (
    uid        TEXT PRIMARY KEY,
    total      INTEGER NOT NULL,
    got        INTEGER NOT NULL,
    data       TEXT NOT NULL,
    from_id    TEXT NOT NULL,
    created_ts INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS dm_out (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    to_id           TEXT NOT NULL,
    from_id         TEXT,
    body            TEXT NOT NULL,
    created_ts      INTEGER NOT NULL,
    delivered_ts    INTEGER,
    attempts        INTEGER NOT NULL DEFAULT 0,
    last_attempt_ts INTEGER,
    ch_idx          INTEGER NOT NULL DEFAULT 0,
    ttl_sec         INTEGER NOT NULL,
    status          TEXT NOT NULL DEFAULT 'queued'
);
";

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let conn = Connection::open(path)?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, Error> {
        let store = Self { conn: Mutex::new(Connection::open_in_memory()?) };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), Error> {
        self.lock().execute_batch(MIGRATIONS)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock means a panicked writer; the connection itself
        // is still usable for the remaining threads.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // =========================================================================
    // POSTS
    // =========================================================================

    /// Insert a post, returning the newly assigned station-local id.
    /// Durable on return.
    pub fn insert_post(
        &self,
        author: &str,
        body: &str,
        reply_to: Option<i64>,
    ) -> Result<i64, Error> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO posts (ts, author, body, reply_to) VALUES (?1, ?2, ?3, ?4)",
            params![now(), author, body, reply_to],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Append a reply to an existing post. Fails when the parent is absent,
    /// which keeps every persisted `reply_to` pointing at a real post.
    pub fn append_reply(&self, post_id: i64, author: &str, body: &str) -> Result<i64, Error> {
        if !self.post_exists(post_id)? {
            return Err(Error::PostNotFound(post_id));
        }
        self.insert_post(author, body, Some(post_id))
    }

    pub fn post_exists(&self, id: i64) -> Result<bool, Error> {
        let conn = self.lock();
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM posts WHERE id = ?1", params![id], |r| r.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get_post(&self, id: i64) -> Result<Option<Post>, Error> {
        let conn = self.lock();
        let post = conn
            .query_row(
                "SELECT id, ts, author, body, reply_to FROM posts WHERE id = ?1",
                params![id],
                row_to_post,
            )
            .optional()?;
        Ok(post)
    }

    /// Most recent posts (not replies), newest first.
    pub fn recent_posts(&self, limit: usize) -> Result<Vec<Post>, Error> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, ts, author, body, reply_to FROM posts
             WHERE reply_to IS NULL ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_post)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Error::from)
    }

    /// Replies to one post in id order.
    pub fn replies_to(&self, post_id: i64, limit: usize) -> Result<Vec<Post>, Error> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, ts, author, body, reply_to FROM posts
             WHERE reply_to = ?1 ORDER BY id LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![post_id, limit as i64], row_to_post)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Error::from)
    }

    /// The last `n` post ids in ascending order, for INV advertisement.
    pub fn recent_post_ids(&self, n: usize) -> Result<Vec<i64>, Error> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT id FROM posts ORDER BY id DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![n as i64], |r| r.get::<_, i64>(0))?;
        let mut ids = rows.collect::<Result<Vec<_>, _>>()?;
        ids.reverse();
        Ok(ids)
    }

    pub fn post_count(&self) -> Result<i64, Error> {
        let conn = self.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM posts", [], |r| r.get(0))?)
    }

    pub fn latest_post_id(&self) -> Result<i64, Error> {
        let conn = self.lock();
        Ok(conn.query_row("SELECT IFNULL(MAX(id), 0) FROM posts", [], |r| r.get(0))?)
    }

    // =========================================================================
    // KV: NOTICE AND STATION NAME
    // =========================================================================

    fn kv_get(conn: &Connection, k: &str) -> Result<Option<String>, rusqlite::Error> {
        conn.query_row("SELECT v FROM kv WHERE k = ?1", params![k], |r| r.get(0))
            .optional()
    }

    fn kv_set(conn: &Connection, k: &str, v: &str) -> Result<(), rusqlite::Error> {
        conn.execute(
            "INSERT INTO kv (k, v) VALUES (?1, ?2)
             ON CONFLICT(k) DO UPDATE SET v = excluded.v",
            params![k, v],
        )?;
        Ok(())
    }

    pub fn set_notice(&self, body: &str, expire_ts: Option<i64>) -> Result<(), Error> {
        let conn = self.lock();
        Self::kv_set(&conn, "notice", body)?;
        Self::kv_set(&conn, "notice_set", &now().to_string())?;
        match expire_ts {
            Some(exp) => Self::kv_set(&conn, "notice_exp", &exp.to_string())?,
            None => {
                conn.execute("DELETE FROM kv WHERE k = 'notice_exp'", [])?;
            }
        }
        Ok(())
    }

    pub fn get_notice(&self) -> Result<Option<Notice>, Error> {
        let conn = self.lock();
        let body = match Self::kv_get(&conn, "notice")? {
            Some(b) if !b.trim().is_empty() => b,
            _ => return Ok(None),
        };
        let set_ts = Self::kv_get(&conn, "notice_set")?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let expire_ts = Self::kv_get(&conn, "notice_exp")?.and_then(|v| v.parse().ok());
        Ok(Some(Notice { body, set_ts, expire_ts }))
    }

    pub fn station_name(&self) -> Result<Option<String>, Error> {
        let conn = self.lock();
        Ok(Self::kv_get(&conn, "name")?)
    }

    pub fn set_station_name(&self, name: &str) -> Result<(), Error> {
        let conn = self.lock();
        Self::kv_set(&conn, "name", name)?;
        Ok(())
    }

    // =========================================================================
    // ID SETS: ADMINS, BLACKLIST, PEERS
    // =========================================================================

    pub fn admin_add(&self, id: NodeId) -> Result<(), Error> {
        self.set_add("admins", id)
    }

    pub fn admin_remove(&self, id: NodeId) -> Result<(), Error> {
        self.set_remove("admins", id)
    }

    pub fn admins_clear(&self) -> Result<(), Error> {
        self.lock().execute("DELETE FROM admins", [])?;
        Ok(())
    }

    pub fn is_admin(&self, id: NodeId) -> Result<bool, Error> {
        self.set_contains("admins", id)
    }

    pub fn admins(&self) -> Result<Vec<NodeId>, Error> {
        self.set_list("admins")
    }

    pub fn admin_count(&self) -> Result<i64, Error> {
        self.set_count("admins")
    }

    pub fn blacklist_add(&self, id: NodeId) -> Result<(), Error> {
        self.set_add("blacklist", id)
    }

    pub fn blacklist_remove(&self, id: NodeId) -> Result<(), Error> {
        self.set_remove("blacklist", id)
    }

    pub fn blacklist_clear(&self) -> Result<(), Error> {
        self.lock().execute("DELETE FROM blacklist", [])?;
        Ok(())
    }

    pub fn is_blacklisted(&self, id: NodeId) -> Result<bool, Error> {
        self.set_contains("blacklist", id)
    }

    pub fn blacklist(&self) -> Result<Vec<NodeId>, Error> {
        self.set_list("blacklist")
    }

    pub fn blacklist_count(&self) -> Result<i64, Error> {
        self.set_count("blacklist")
    }

    pub fn peer_add(&self, id: NodeId) -> Result<(), Error> {
        self.lock().execute(
            "INSERT OR IGNORE INTO peers (id, last_seen) VALUES (?1, 0)",
            params![id.to_string()],
        )?;
        Ok(())
    }

    pub fn peer_remove(&self, id: NodeId) -> Result<(), Error> {
        self.set_remove("peers", id)
    }

    pub fn is_peer(&self, id: NodeId) -> Result<bool, Error> {
        self.set_contains("peers", id)
    }

    pub fn peers(&self) -> Result<Vec<NodeId>, Error> {
        self.set_list("peers")
    }

    pub fn peer_count(&self) -> Result<i64, Error> {
        self.set_count("peers")
    }

    /// Stamp a peer as heard from, for diagnostics.
    pub fn peer_touch(&self, id: NodeId) -> Result<(), Error> {
        self.lock().execute(
            "UPDATE peers SET last_seen = ?1 WHERE id = ?2",
            params![now(), id.to_string()],
        )?;
        Ok(())
    }

    fn set_add(&self, table: &str, id: NodeId) -> Result<(), Error> {
        let sql = format!("INSERT OR IGNORE INTO {} (id) VALUES (?1)", table);
        self.lock().execute(&sql, params![id.to_string()])?;
        Ok(())
    }

    fn set_remove(&self, table: &str, id: NodeId) -> Result<(), Error> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", table);
        self.lock().execute(&sql, params![id.to_string()])?;
        Ok(())
    }

    fn set_contains(&self, table: &str, id: NodeId) -> Result<bool, Error> {
        let sql = format!("SELECT 1 FROM {} WHERE id = ?1", table);
        let conn = self.lock();
        let found: Option<i64> = conn
            .query_row(&sql, params![id.to_string()], |r| r.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    fn set_list(&self, table: &str) -> Result<Vec<NodeId>, Error> {
        let sql = format!("SELECT id FROM {} ORDER BY id", table);
        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            if let Some(id) = NodeId::parse_loose(&row?) {
                out.push(id);
            }
        }
        Ok(out)
    }

    fn set_count(&self, table: &str) -> Result<i64, Error> {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let conn = self.lock();
        Ok(conn.query_row(&sql, [], |r| r.get(0))?)
    }

    // =========================================================================
    // DM OUTBOX
    // =========================================================================

    pub fn dm_enqueue(
        &self,
        to_id: NodeId,
        from_id: Option<NodeId>,
        body: &str,
        ch_idx: u8,
        ttl_sec: i64,
    ) -> Result<i64, Error> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO dm_out (to_id, from_id, body, created_ts, ch_idx, ttl_sec, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'queued')",
            params![
                to_id.to_string(),
                from_id.map(|id| id.to_string()),
                body,
                now(),
                ch_idx as i64,
                ttl_sec
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Expire queued entries past their TTL. Expired entries never transition
    /// back and are never delivered.
    pub fn dm_sweep_expired(&self, now: i64) -> Result<usize, Error> {
        let conn = self.lock();
        let n = conn.execute(
            "UPDATE dm_out SET status = 'expired'
             WHERE status = 'queued' AND created_ts + ttl_sec < ?1",
            params![now],
        )?;
        Ok(n)
    }

    /// Queued entries addressed to one node, oldest first.
    pub fn dm_take_queued_for(&self, to_id: NodeId, max: usize) -> Result<Vec<DmEntry>, Error> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, to_id, from_id, body, created_ts, delivered_ts,
                    attempts, last_attempt_ts, ch_idx, ttl_sec, status
             FROM dm_out WHERE to_id = ?1 AND status = 'queued'
             ORDER BY id LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![to_id.to_string(), max as i64], row_to_dm)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Error::from)
    }

    /// A sender's still-queued DMs, for the `outbox` view.
    pub fn dm_queued_from(&self, from_id: NodeId) -> Result<Vec<DmEntry>, Error> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, to_id, from_id, body, created_ts, delivered_ts,
                    attempts, last_attempt_ts, ch_idx, ttl_sec, status
             FROM dm_out WHERE from_id = ?1 AND status = 'queued'
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![from_id.to_string()], row_to_dm)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Error::from)
    }

    pub fn dm_mark_delivered(&self, id: i64, now: i64) -> Result<(), Error> {
        self.lock().execute(
            "UPDATE dm_out SET status = 'delivered', delivered_ts = ?1
             WHERE id = ?2 AND status = 'queued'",
            params![now, id],
        )?;
        Ok(())
    }

    pub fn dm_mark_attempt(&self, id: i64, now: i64) -> Result<(), Error> {
        self.lock().execute(
            "UPDATE dm_out SET attempts = attempts + 1, last_attempt_ts = ?1
             WHERE id = ?2",
            params![now, id],
        )?;
        Ok(())
    }

    pub fn dm_queued_count(&self) -> Result<i64, Error> {
        let conn = self.lock();
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM dm_out WHERE status = 'queued'",
            [],
            |r| r.get(0),
        )?)
    }

    pub fn dm_get(&self, id: i64) -> Result<Option<DmEntry>, Error> {
        let conn = self.lock();
        let entry = conn
            .query_row(
                "SELECT id, to_id, from_id, body, created_ts, delivered_ts,
                        attempts, last_attempt_ts, ch_idx, ttl_sec, status
                 FROM dm_out WHERE id = ?1",
                params![id],
                row_to_dm,
            )
            .optional()?;
        Ok(entry)
    }

    // =========================================================================
    // REPLICATION BOOKKEEPING
    // =========================================================================

    /// Record a replication uid as observed. Returns false when already seen.
    pub fn seen_uid_insert(&self, uid: &str) -> Result<bool, Error> {
        let n = self.lock().execute(
            "INSERT OR IGNORE INTO seen_uids (uid, ts) VALUES (?1, ?2)",
            params![uid, now()],
        )?;
        Ok(n > 0)
    }

    /// Record a replication uid as applied. Returns false when already
    /// applied, which is the dedup that keeps replays idempotent.
    pub fn applied_uid_insert(&self, uid: &str) -> Result<bool, Error> {
        let n = self.lock().execute(
            "INSERT OR IGNORE INTO applied_uids (uid, ts) VALUES (?1, ?2)",
            params![uid, now()],
        )?;
        Ok(n > 0)
    }

    pub fn uid_applied(&self, uid: &str) -> Result<bool, Error> {
        let conn = self.lock();
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM applied_uids WHERE uid = ?1", params![uid], |r| r.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn rxparts_insert_shell(
        &self,
        uid: &str,
        total: u32,
        from_id: NodeId,
    ) -> Result<(), Error> {
        self.lock().execute(
            "INSERT OR IGNORE INTO rxparts (uid, total, got, data, from_id, created_ts)
             VALUES (?1, ?2, 0, '', ?3, ?4)",
            params![uid, total as i64, from_id.to_string(), now()],
        )?;
        Ok(())
    }

    /// Append one chunk. Ordering is not verified, only counted; the last
    /// observed total wins. Returns false when no shell exists.
    pub fn rxparts_append(
        &self,
        uid: &str,
        chunk: &str,
        part_index: u32,
        total: u32,
    ) -> Result<bool, Error> {
        let conn = self.lock();
        let got: Option<i64> = conn
            .query_row("SELECT got FROM rxparts WHERE uid = ?1", params![uid], |r| r.get(0))
            .optional()?;
        let Some(got) = got else {
            return Ok(false);
        };
        if got + 1 != part_index as i64 {
            debug!("uid {} part {} arrived at position {}", uid, part_index, got + 1);
        }
        conn.execute(
            "UPDATE rxparts SET data = data || ?1, got = got + 1, total = ?2 WHERE uid = ?3",
            params![chunk, total as i64, uid],
        )?;
        Ok(true)
    }

    /// Accumulated body plus (got, total, from_id) for END handling.
    pub fn rxparts_take_body(
        &self,
        uid: &str,
    ) -> Result<Option<(String, i64, i64, Option<NodeId>)>, Error> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT data, got, total, from_id FROM rxparts WHERE uid = ?1",
                params![uid],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, i64>(1)?,
                        r.get::<_, i64>(2)?,
                        r.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        Ok(row.map(|(data, got, total, from)| (data, got, total, NodeId::parse_loose(&from))))
    }

    pub fn rxparts_delete(&self, uid: &str) -> Result<(), Error> {
        self.lock()
            .execute("DELETE FROM rxparts WHERE uid = ?1", params![uid])?;
        Ok(())
    }

    /// Drop reassembly buffers that never saw their END.
    pub fn rxparts_sweep_stale(&self, now: i64) -> Result<usize, Error> {
        let n = self.lock().execute(
            "DELETE FROM rxparts WHERE created_ts < ?1",
            params![now - RXPARTS_STALE_SEC],
        )?;
        Ok(n)
    }
}

fn row_to_post(row: &rusqlite::Row<'_>) -> Result<Post, rusqlite::Error> {
    Ok(Post {
        id: row.get(0)?,
        ts: row.get(1)?,
        author: row.get(2)?,
        body: row.get(3)?,
        reply_to: row.get(4)?,
    })
}

fn row_to_dm(row: &rusqlite::Row<'_>) -> Result<DmEntry, rusqlite::Error> {
    let to: String = row.get(1)?;
    let from: Option<String> = row.get(2)?;
    let status: String = row.get(10)?;
    Ok(DmEntry {
        id: row.get(0)?,
        to_id: NodeId::parse_loose(&to).unwrap_or(NodeId(0)),
        from_id: from.as_deref().and_then(NodeId::parse_loose),
        body: row.get(3)?,
        created_ts: row.get(4)?,
        delivered_ts: row.get(5)?,
        attempts: row.get(6)?,
        last_attempt_ts: row.get(7)?,
        ch_idx: row.get::<_, i64>(8)? as u8,
        ttl_sec: row.get(9)?,
        status: DmStatus::parse(&status).unwrap_or(DmStatus::Queued),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    #[test]
    fn post_ids_increase() {
        let s = store();
        let a = s.insert_post("!abcd0001", "first", None).unwrap();
        let b = s.insert_post("!abcd0001", "second", None).unwrap();
        assert!(b > a);
        assert_eq!(s.latest_post_id().unwrap(), b);
        assert_eq!(s.post_count().unwrap(), 2);
    }

    #[test]
    fn reply_requires_existing_post() {
        let s = store();
        match s.append_reply(999, "!abcd0001", "hi") {
            Err(Error::PostNotFound(999)) => {}
            other => panic!("expected PostNotFound, got {:?}", other.map(|_| ())),
        }
        let pid = s.insert_post("!abcd0001", "root", None).unwrap();
        let rid = s.append_reply(pid, "!feed0002", "hi").unwrap();
        let replies = s.replies_to(pid, 5).unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].id, rid);
        assert_eq!(replies[0].reply_to, Some(pid));
    }

    #[test]
    fn recent_lists_posts_not_replies() {
        let s = store();
        let pid = s.insert_post("!abcd0001", "root", None).unwrap();
        s.append_reply(pid, "!feed0002", "r1").unwrap();
        let recent = s.recent_posts(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, pid);
        // INV advertisement covers replies too: ascending ids
        assert_eq!(s.recent_post_ids(10).unwrap(), vec![1, 2]);
    }

    #[test]
    fn notice_set_get_and_expiry_fields() {
        let s = store();
        assert!(s.get_notice().unwrap().is_none());
        s.set_notice("maintenance tonight", Some(12345)).unwrap();
        let n = s.get_notice().unwrap().unwrap();
        assert_eq!(n.body, "maintenance tonight");
        assert_eq!(n.expire_ts, Some(12345));
        s.set_notice("open-ended", None).unwrap();
        let n = s.get_notice().unwrap().unwrap();
        assert_eq!(n.expire_ts, None);
    }

    #[test]
    fn id_sets_are_idempotent() {
        let s = store();
        let id = NodeId(0xabcd0001);
        assert!(!s.is_admin(id).unwrap());
        s.admin_add(id).unwrap();
        s.admin_add(id).unwrap();
        assert_eq!(s.admin_count().unwrap(), 1);
        s.admin_remove(id).unwrap();
        assert!(!s.is_admin(id).unwrap());

        s.blacklist_add(id).unwrap();
        assert!(s.is_blacklisted(id).unwrap());
        s.blacklist_clear().unwrap();
        assert_eq!(s.blacklist_count().unwrap(), 0);

        s.peer_add(id).unwrap();
        s.peer_add(id).unwrap();
        assert_eq!(s.peers().unwrap(), vec![id]);
    }

    #[test]
    fn dm_lifecycle_and_sweep() {
        let s = store();
        let to = NodeId(0xfeed0002);
        let from = NodeId(0xcafe0001);
        let id = s.dm_enqueue(to, Some(from), "hi", 0, 10).unwrap();

        let queued = s.dm_take_queued_for(to, 3).unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].status, DmStatus::Queued);
        assert_eq!(queued[0].from_id, Some(from));

        s.dm_mark_attempt(id, now()).unwrap();
        s.dm_mark_delivered(id, now()).unwrap();
        let entry = s.dm_get(id).unwrap().unwrap();
        assert_eq!(entry.status, DmStatus::Delivered);
        assert!(entry.delivered_ts.is_some());
        assert_eq!(entry.attempts, 1);
        // delivered entries never show up again
        assert!(s.dm_take_queued_for(to, 3).unwrap().is_empty());
    }

    #[test]
    fn dm_expiry_is_terminal() {
        let s = store();
        let to = NodeId(0xfeed0002);
        let id = s.dm_enqueue(to, None, "late", 0, 10).unwrap();
        // sweep far in the future
        assert_eq!(s.dm_sweep_expired(now() + 100).unwrap(), 1);
        let entry = s.dm_get(id).unwrap().unwrap();
        assert_eq!(entry.status, DmStatus::Expired);
        assert_eq!(entry.delivered_ts, None);
        // expired entries are not selected and not re-delivered
        assert!(s.dm_take_queued_for(to, 3).unwrap().is_empty());
        s.dm_mark_delivered(id, now()).unwrap();
        assert_eq!(s.dm_get(id).unwrap().unwrap().status, DmStatus::Expired);
    }

    #[test]
    fn rxparts_accumulate_and_take() {
        let s = store();
        let from = NodeId(0xaaaa0001);
        s.rxparts_insert_shell("u1", 2, from).unwrap();
        // duplicate shell is ignored
        s.rxparts_insert_shell("u1", 9, from).unwrap();
        assert!(s.rxparts_append("u1", "hello ", 1, 2).unwrap());
        assert!(s.rxparts_append("u1", "world", 2, 2).unwrap());
        assert!(!s.rxparts_append("nope", "x", 1, 1).unwrap());

        let (body, got, total, peer) = s.rxparts_take_body("u1").unwrap().unwrap();
        assert_eq!(body, "hello world");
        assert_eq!((got, total), (2, 2));
        assert_eq!(peer, Some(from));
        s.rxparts_delete("u1").unwrap();
        assert!(s.rxparts_take_body("u1").unwrap().is_none());
    }

    #[test]
    fn applied_uid_is_once_only() {
        let s = store();
        assert!(s.applied_uid_insert("u1").unwrap());
        assert!(!s.applied_uid_insert("u1").unwrap());
        assert!(s.uid_applied("u1").unwrap());
        assert!(s.seen_uid_insert("u1").unwrap());
        assert!(!s.seen_uid_insert("u1").unwrap());
    }
}
