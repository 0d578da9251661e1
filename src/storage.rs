//! SQLite storage layer for weft: the durable half of the social graph.
//!
//! Owns the relationship records (follow sets, mutual connections, block
//! sets, connection edges) and the notification records. All mutation goes
//! through single-statement set operations or explicit transactions so that
//! concurrent request handlers never observe a partial cascade.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum StorageError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    NotFound(String),
    AlreadyExists(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Sqlite(e) => write!(f, "sqlite error: {e}"),
            StorageError::Io(e) => write!(f, "io error: {e}"),
            StorageError::NotFound(msg) => write!(f, "not found: {msg}"),
            StorageError::AlreadyExists(msg) => write!(f, "already exists: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Sqlite(e)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e)
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// User row: opaque id plus the display profile denormalized from the
/// identity provider. `last_seen_at` is persisted on disconnect so presence
/// text survives process restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRow {
    pub user_id: String,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub profile_picture: Option<String>,
    pub created_at: u64,
    pub last_seen_at: Option<u64>,
}

/// Status of a connection edge between two users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeStatus {
    Pending,
    Accepted,
    Rejected,
    /// Permanent marker left behind by a block cascade so concurrent readers
    /// never see a dangling reference.
    Removed,
}

impl EdgeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeStatus::Pending => "pending",
            EdgeStatus::Accepted => "accepted",
            EdgeStatus::Rejected => "rejected",
            EdgeStatus::Removed => "removed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EdgeStatus::Pending),
            "accepted" => Some(EdgeStatus::Accepted),
            "rejected" => Some(EdgeStatus::Rejected),
            "removed" => Some(EdgeStatus::Removed),
            _ => None,
        }
    }
}

/// Connection edge between an unordered pair of users. At most one row per
/// pair exists (unique index on the canonical pair), which is the storage
/// backstop against two concurrent requests creating duplicate edges.
#[derive(Debug, Clone)]
pub struct EdgeRow {
    pub id: i64,
    pub from_user: String,
    pub to_user: String,
    pub status: EdgeStatus,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Notification row. One row per `(receiver, sender, family)` key; the dedup
/// window logic rewrites rows in place rather than inserting duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRow {
    pub id: i64,
    pub receiver_id: String,
    pub sender_id: String,
    /// Dedup key component: "follow", "connection", "like", "message".
    pub family: String,
    /// Concrete variant: "follow", "friend_request", "friend_accept", ...
    pub kind: String,
    pub body: Option<String>,
    pub created_at: u64,
    pub is_read: bool,
    /// Set when a reversal inside the dedup window cancels the notification
    /// without deleting the row (delivery may already be in flight).
    pub hidden: bool,
}

/// Canonical unordered-pair key: lesser id first.
fn pair_key<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

// ---------------------------------------------------------------------------
// Storage handle
// ---------------------------------------------------------------------------

/// Main storage handle wrapping a SQLite connection.
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open or create a database at the given path. Creates schema if needed.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let storage = Self { conn };
        storage.create_schema()?;
        Ok(storage)
    }

    /// Create an in-memory database (tests and ephemeral runs).
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let storage = Self { conn };
        storage.create_schema()?;
        Ok(storage)
    }

    fn create_schema(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                user_id         TEXT PRIMARY KEY,
                username        TEXT,
                full_name       TEXT,
                profile_picture TEXT,
                created_at      INTEGER NOT NULL,
                last_seen_at    INTEGER
            );

            CREATE TABLE IF NOT EXISTS follows (
                follower_id TEXT NOT NULL,
                followee_id TEXT NOT NULL,
                created_at  INTEGER NOT NULL,
                PRIMARY KEY (follower_id, followee_id)
            );

            CREATE INDEX IF NOT EXISTS idx_follows_followee
                ON follows(followee_id);

            CREATE TABLE IF NOT EXISTS connections (
                user_lo    TEXT NOT NULL,
                user_hi    TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (user_lo, user_hi)
            );

            CREATE TABLE IF NOT EXISTS blocks (
                blocker_id TEXT NOT NULL,
                blocked_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (blocker_id, blocked_id)
            );

            CREATE TABLE IF NOT EXISTS edges (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                user_lo    TEXT NOT NULL,
                user_hi    TEXT NOT NULL,
                from_user  TEXT NOT NULL,
                to_user    TEXT NOT NULL,
                status     TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE (user_lo, user_hi)
            );

            CREATE TABLE IF NOT EXISTS notifications (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                receiver_id TEXT NOT NULL,
                sender_id   TEXT NOT NULL,
                family      TEXT NOT NULL,
                kind        TEXT NOT NULL,
                body        TEXT,
                created_at  INTEGER NOT NULL,
                is_read     INTEGER NOT NULL DEFAULT 0,
                hidden      INTEGER NOT NULL DEFAULT 0,
                UNIQUE (receiver_id, sender_id, family)
            );

            CREATE INDEX IF NOT EXISTS idx_notifications_receiver
                ON notifications(receiver_id, created_at);
            ",
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    /// Insert or refresh a user's display profile. The identity provider is
    /// authoritative for these fields, so the latest write wins.
    pub fn upsert_user(
        &self,
        user_id: &str,
        username: Option<&str>,
        full_name: Option<&str>,
        profile_picture: Option<&str>,
        now: u64,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO users (user_id, username, full_name, profile_picture, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                 username = COALESCE(excluded.username, username),
                 full_name = COALESCE(excluded.full_name, full_name),
                 profile_picture = COALESCE(excluded.profile_picture, profile_picture)",
            params![user_id, username, full_name, profile_picture, now as i64],
        )?;
        Ok(())
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<UserRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, username, full_name, profile_picture, created_at, last_seen_at
             FROM users WHERE user_id = ?1",
        )?;
        let row = stmt
            .query_row(params![user_id], |row| {
                Ok(UserRow {
                    user_id: row.get(0)?,
                    username: row.get(1)?,
                    full_name: row.get(2)?,
                    profile_picture: row.get(3)?,
                    created_at: row.get::<_, i64>(4)? as u64,
                    last_seen_at: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
                })
            })
            .optional()?;
        Ok(row)
    }

    /// Require that a user exists, surfacing a caller-visible not-found.
    pub fn require_user(&self, user_id: &str) -> Result<UserRow, StorageError> {
        self.get_user(user_id)?
            .ok_or_else(|| StorageError::NotFound(format!("user {user_id}")))
    }

    /// Persist the last-seen timestamp recorded by the presence registry on
    /// disconnect.
    pub fn set_last_seen(&self, user_id: &str, ts: u64) -> Result<(), StorageError> {
        self.conn.execute(
            "UPDATE users SET last_seen_at = ?1 WHERE user_id = ?2",
            params![ts as i64, user_id],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Follows
    // -----------------------------------------------------------------------

    /// Add a follow edge. A single row is simultaneously membership in both
    /// `follower.following` and `followee.followers`, so the set-add is one
    /// atomic statement. Returns whether the set changed.
    pub fn add_follow(&self, follower: &str, followee: &str, now: u64) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "INSERT OR IGNORE INTO follows (follower_id, followee_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![follower, followee, now as i64],
        )?;
        Ok(affected > 0)
    }

    /// Remove a follow edge. Returns whether the set changed.
    pub fn remove_follow(&self, follower: &str, followee: &str) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "DELETE FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
            params![follower, followee],
        )?;
        Ok(affected > 0)
    }

    pub fn is_following(&self, follower: &str, followee: &str) -> Result<bool, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
            params![follower, followee],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // -----------------------------------------------------------------------
    // Connections (mutual friends)
    // -----------------------------------------------------------------------

    pub fn add_connection(&self, a: &str, b: &str, now: u64) -> Result<bool, StorageError> {
        let (lo, hi) = pair_key(a, b);
        let affected = self.conn.execute(
            "INSERT OR IGNORE INTO connections (user_lo, user_hi, created_at)
             VALUES (?1, ?2, ?3)",
            params![lo, hi, now as i64],
        )?;
        Ok(affected > 0)
    }

    pub fn remove_connection(&self, a: &str, b: &str) -> Result<bool, StorageError> {
        let (lo, hi) = pair_key(a, b);
        let affected = self.conn.execute(
            "DELETE FROM connections WHERE user_lo = ?1 AND user_hi = ?2",
            params![lo, hi],
        )?;
        Ok(affected > 0)
    }

    pub fn are_connected(&self, a: &str, b: &str) -> Result<bool, StorageError> {
        let (lo, hi) = pair_key(a, b);
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM connections WHERE user_lo = ?1 AND user_hi = ?2",
            params![lo, hi],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // -----------------------------------------------------------------------
    // Blocks
    // -----------------------------------------------------------------------

    pub fn add_block(&self, blocker: &str, blocked: &str, now: u64) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "INSERT OR IGNORE INTO blocks (blocker_id, blocked_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![blocker, blocked, now as i64],
        )?;
        Ok(affected > 0)
    }

    pub fn remove_block(&self, blocker: &str, blocked: &str) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "DELETE FROM blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
            params![blocker, blocked],
        )?;
        Ok(affected > 0)
    }

    /// Whether `blocker` has blocked `blocked` (asymmetric).
    pub fn has_block(&self, blocker: &str, blocked: &str) -> Result<bool, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
            params![blocker, blocked],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Whether either user has blocked the other.
    pub fn blocked_either_way(&self, a: &str, b: &str) -> Result<bool, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM blocks
             WHERE (blocker_id = ?1 AND blocked_id = ?2)
                OR (blocker_id = ?2 AND blocked_id = ?1)",
            params![a, b],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Apply the full block cascade as one transaction: strip follows and the
    /// mutual connection in both directions, mark any edge between the pair
    /// `removed`, and record the block itself. Readers either see the world
    /// before the block or after it, never in between.
    pub fn block_cascade(&self, blocker: &str, blocked: &str, now: u64) -> Result<(), StorageError> {
        let (lo, hi) = pair_key(blocker, blocked);
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM follows
             WHERE (follower_id = ?1 AND followee_id = ?2)
                OR (follower_id = ?2 AND followee_id = ?1)",
            params![blocker, blocked],
        )?;
        tx.execute(
            "DELETE FROM connections WHERE user_lo = ?1 AND user_hi = ?2",
            params![lo, hi],
        )?;
        tx.execute(
            "UPDATE edges SET status = 'removed', updated_at = ?3
             WHERE user_lo = ?1 AND user_hi = ?2",
            params![lo, hi, now as i64],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO blocks (blocker_id, blocked_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![blocker, blocked, now as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Connection edges
    // -----------------------------------------------------------------------

    fn edge_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EdgeRow> {
        let status_str: String = row.get(3)?;
        Ok(EdgeRow {
            id: row.get(0)?,
            from_user: row.get(1)?,
            to_user: row.get(2)?,
            status: EdgeStatus::parse(&status_str).unwrap_or(EdgeStatus::Removed),
            created_at: row.get::<_, i64>(4)? as u64,
            updated_at: row.get::<_, i64>(5)? as u64,
        })
    }

    /// Find the edge between two users regardless of direction.
    pub fn find_edge(&self, a: &str, b: &str) -> Result<Option<EdgeRow>, StorageError> {
        let (lo, hi) = pair_key(a, b);
        let mut stmt = self.conn.prepare(
            "SELECT id, from_user, to_user, status, created_at, updated_at
             FROM edges WHERE user_lo = ?1 AND user_hi = ?2",
        )?;
        let row = stmt
            .query_row(params![lo, hi], Self::edge_from_row)
            .optional()?;
        Ok(row)
    }

    /// Create a pending edge. The unique pair index rejects a concurrent
    /// duplicate, which surfaces as `AlreadyExists`.
    pub fn insert_edge(&self, from: &str, to: &str, now: u64) -> Result<i64, StorageError> {
        let (lo, hi) = pair_key(from, to);
        let result = self.conn.execute(
            "INSERT INTO edges (user_lo, user_hi, from_user, to_user, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?5)",
            params![lo, hi, from, to, now as i64],
        );
        match result {
            Ok(_) => Ok(self.conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::AlreadyExists(format!("edge {from}<->{to}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Reuse a rejected/removed edge row for a fresh pending request. The
    /// row keeps its pair slot (unique index) but gets the new direction and
    /// timestamps.
    pub fn reset_edge(&self, id: i64, from: &str, to: &str, now: u64) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "UPDATE edges
             SET from_user = ?1, to_user = ?2, status = 'pending',
                 created_at = ?3, updated_at = ?3
             WHERE id = ?4",
            params![from, to, now as i64, id],
        )?;
        Ok(affected > 0)
    }

    pub fn set_edge_status(
        &self,
        id: i64,
        status: EdgeStatus,
        now: u64,
    ) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "UPDATE edges SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), now as i64, id],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_edge(&self, id: i64) -> Result<bool, StorageError> {
        let affected = self
            .conn
            .execute("DELETE FROM edges WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    // -----------------------------------------------------------------------
    // List queries
    // -----------------------------------------------------------------------

    pub fn list_following(&self, user_id: &str) -> Result<Vec<UserRow>, StorageError> {
        self.list_users_by(
            "SELECT u.user_id, u.username, u.full_name, u.profile_picture, u.created_at, u.last_seen_at
             FROM users u JOIN follows f ON f.followee_id = u.user_id
             WHERE f.follower_id = ?1 ORDER BY f.created_at DESC",
            user_id,
        )
    }

    pub fn list_followers(&self, user_id: &str) -> Result<Vec<UserRow>, StorageError> {
        self.list_users_by(
            "SELECT u.user_id, u.username, u.full_name, u.profile_picture, u.created_at, u.last_seen_at
             FROM users u JOIN follows f ON f.follower_id = u.user_id
             WHERE f.followee_id = ?1 ORDER BY f.created_at DESC",
            user_id,
        )
    }

    pub fn list_friends(&self, user_id: &str) -> Result<Vec<UserRow>, StorageError> {
        self.list_users_by(
            "SELECT u.user_id, u.username, u.full_name, u.profile_picture, u.created_at, u.last_seen_at
             FROM users u JOIN connections c
               ON (c.user_lo = ?1 AND c.user_hi = u.user_id)
               OR (c.user_hi = ?1 AND c.user_lo = u.user_id)
             ORDER BY c.created_at DESC",
            user_id,
        )
    }

    pub fn list_blocked(&self, user_id: &str) -> Result<Vec<UserRow>, StorageError> {
        self.list_users_by(
            "SELECT u.user_id, u.username, u.full_name, u.profile_picture, u.created_at, u.last_seen_at
             FROM users u JOIN blocks b ON b.blocked_id = u.user_id
             WHERE b.blocker_id = ?1 ORDER BY b.created_at DESC",
            user_id,
        )
    }

    fn list_users_by(&self, sql: &str, user_id: &str) -> Result<Vec<UserRow>, StorageError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(UserRow {
                user_id: row.get(0)?,
                username: row.get(1)?,
                full_name: row.get(2)?,
                profile_picture: row.get(3)?,
                created_at: row.get::<_, i64>(4)? as u64,
                last_seen_at: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
            })
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Pending edges touching the user, filtered by direction: `true` for
    /// incoming (user is the recipient), `false` for outgoing.
    pub fn list_pending_edges(
        &self,
        user_id: &str,
        incoming: bool,
    ) -> Result<Vec<EdgeRow>, StorageError> {
        let sql = if incoming {
            "SELECT id, from_user, to_user, status, created_at, updated_at
             FROM edges WHERE to_user = ?1 AND status = 'pending'
             ORDER BY created_at DESC"
        } else {
            "SELECT id, from_user, to_user, status, created_at, updated_at
             FROM edges WHERE from_user = ?1 AND status = 'pending'
             ORDER BY created_at DESC"
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![user_id], Self::edge_from_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    fn notification_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NotificationRow> {
        Ok(NotificationRow {
            id: row.get(0)?,
            receiver_id: row.get(1)?,
            sender_id: row.get(2)?,
            family: row.get(3)?,
            kind: row.get(4)?,
            body: row.get(5)?,
            created_at: row.get::<_, i64>(6)? as u64,
            is_read: row.get::<_, i32>(7)? != 0,
            hidden: row.get::<_, i32>(8)? != 0,
        })
    }

    const NOTIFICATION_COLS: &'static str =
        "id, receiver_id, sender_id, family, kind, body, created_at, is_read, hidden";

    /// Find the record for a dedup key `(receiver, sender, family)`.
    pub fn find_notification(
        &self,
        receiver: &str,
        sender: &str,
        family: &str,
    ) -> Result<Option<NotificationRow>, StorageError> {
        let sql = format!(
            "SELECT {} FROM notifications
             WHERE receiver_id = ?1 AND sender_id = ?2 AND family = ?3",
            Self::NOTIFICATION_COLS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let row = stmt
            .query_row(params![receiver, sender, family], Self::notification_from_row)
            .optional()?;
        Ok(row)
    }

    pub fn get_notification(&self, id: i64) -> Result<Option<NotificationRow>, StorageError> {
        let sql = format!(
            "SELECT {} FROM notifications WHERE id = ?1",
            Self::NOTIFICATION_COLS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let row = stmt
            .query_row(params![id], Self::notification_from_row)
            .optional()?;
        Ok(row)
    }

    /// Insert a new notification. Returns the new notification ID.
    pub fn insert_notification(&self, row: &NotificationRow) -> Result<i64, StorageError> {
        self.conn.execute(
            "INSERT INTO notifications
             (receiver_id, sender_id, family, kind, body, created_at, is_read, hidden)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                row.receiver_id,
                row.sender_id,
                row.family,
                row.kind,
                row.body,
                row.created_at as i64,
                row.is_read as i32,
                row.hidden as i32,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Rewrite a notification in place: the dedup window merges repeated
    /// occurrences into the existing row instead of inserting duplicates.
    pub fn rewrite_notification(
        &self,
        id: i64,
        kind: &str,
        body: Option<&str>,
        created_at: u64,
        is_read: bool,
        hidden: bool,
    ) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "UPDATE notifications
             SET kind = ?1, body = ?2, created_at = ?3, is_read = ?4, hidden = ?5
             WHERE id = ?6",
            params![kind, body, created_at as i64, is_read as i32, hidden as i32, id],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_notification(&self, id: i64) -> Result<bool, StorageError> {
        let affected = self
            .conn
            .execute("DELETE FROM notifications WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    /// Delete the record for a dedup key outright (e.g. block cascade).
    pub fn delete_notification_by_key(
        &self,
        receiver: &str,
        sender: &str,
        family: &str,
    ) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "DELETE FROM notifications
             WHERE receiver_id = ?1 AND sender_id = ?2 AND family = ?3",
            params![receiver, sender, family],
        )?;
        Ok(affected > 0)
    }

    /// List a receiver's notifications, newest first. Hidden (cancelled)
    /// rows never surface here.
    pub fn list_notifications(
        &self,
        receiver: &str,
        unread_only: bool,
        limit: u32,
    ) -> Result<Vec<NotificationRow>, StorageError> {
        let sql = if unread_only {
            format!(
                "SELECT {} FROM notifications
                 WHERE receiver_id = ?1 AND hidden = 0 AND is_read = 0
                 ORDER BY created_at DESC LIMIT ?2",
                Self::NOTIFICATION_COLS
            )
        } else {
            format!(
                "SELECT {} FROM notifications
                 WHERE receiver_id = ?1 AND hidden = 0
                 ORDER BY created_at DESC LIMIT ?2",
                Self::NOTIFICATION_COLS
            )
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![receiver, limit], Self::notification_from_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn count_unread(&self, receiver: &str) -> Result<u32, StorageError> {
        let count: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM notifications
             WHERE receiver_id = ?1 AND hidden = 0 AND is_read = 0",
            params![receiver],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Mark a notification as read, scoped to its receiver so one user
    /// cannot consume another's records.
    pub fn mark_notification_read(&self, id: i64, receiver: &str) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND receiver_id = ?2",
            params![id, receiver],
        )?;
        Ok(affected > 0)
    }

    pub fn mark_all_read(&self, receiver: &str) -> Result<usize, StorageError> {
        let affected = self.conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE receiver_id = ?1 AND is_read = 0",
            params![receiver],
        )?;
        Ok(affected)
    }
}

/// Current time as seconds since UNIX epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_storage() -> Storage {
        Storage::open_in_memory().unwrap()
    }

    fn add_user(storage: &Storage, id: &str) {
        storage
            .upsert_user(id, Some(id), None, None, unix_now())
            .unwrap();
    }

    #[test]
    fn test_user_crud() {
        let storage = test_storage();
        let now = unix_now();

        storage
            .upsert_user("alice", Some("alice"), Some("Alice A"), None, now)
            .unwrap();
        let loaded = storage.get_user("alice").unwrap().unwrap();
        assert_eq!(loaded.username, Some("alice".to_string()));
        assert_eq!(loaded.full_name, Some("Alice A".to_string()));
        assert!(loaded.last_seen_at.is_none());

        // Upsert refreshes profile fields but keeps existing values when the
        // new ones are absent.
        storage
            .upsert_user("alice", None, None, Some("pic.png"), now + 1)
            .unwrap();
        let loaded = storage.get_user("alice").unwrap().unwrap();
        assert_eq!(loaded.username, Some("alice".to_string()));
        assert_eq!(loaded.profile_picture, Some("pic.png".to_string()));

        storage.set_last_seen("alice", now + 5).unwrap();
        let loaded = storage.get_user("alice").unwrap().unwrap();
        assert_eq!(loaded.last_seen_at, Some(now + 5));

        assert!(storage.get_user("nobody").unwrap().is_none());
        assert!(matches!(
            storage.require_user("nobody"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_follow_set_semantics() {
        let storage = test_storage();
        add_user(&storage, "alice");
        add_user(&storage, "bob");
        let now = unix_now();

        assert!(storage.add_follow("alice", "bob", now).unwrap());
        // Second add is a no-op, not an error and not a duplicate row.
        assert!(!storage.add_follow("alice", "bob", now).unwrap());
        assert!(storage.is_following("alice", "bob").unwrap());
        assert!(!storage.is_following("bob", "alice").unwrap());

        let following = storage.list_following("alice").unwrap();
        assert_eq!(following.len(), 1);
        assert_eq!(following[0].user_id, "bob");
        let followers = storage.list_followers("bob").unwrap();
        assert_eq!(followers.len(), 1);
        assert_eq!(followers[0].user_id, "alice");

        assert!(storage.remove_follow("alice", "bob").unwrap());
        assert!(!storage.remove_follow("alice", "bob").unwrap());
        assert!(!storage.is_following("alice", "bob").unwrap());
    }

    #[test]
    fn test_edge_pair_uniqueness() {
        let storage = test_storage();
        let now = unix_now();

        storage.insert_edge("alice", "bob", now).unwrap();
        // The reverse direction hits the same canonical pair slot.
        let err = storage.insert_edge("bob", "alice", now).unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));

        // Lookup is order-independent.
        let edge = storage.find_edge("bob", "alice").unwrap().unwrap();
        assert_eq!(edge.from_user, "alice");
        assert_eq!(edge.to_user, "bob");
        assert_eq!(edge.status, EdgeStatus::Pending);
    }

    #[test]
    fn test_edge_status_transitions() {
        let storage = test_storage();
        let now = unix_now();

        let id = storage.insert_edge("alice", "bob", now).unwrap();
        assert!(storage.set_edge_status(id, EdgeStatus::Accepted, now + 1).unwrap());
        let edge = storage.find_edge("alice", "bob").unwrap().unwrap();
        assert_eq!(edge.status, EdgeStatus::Accepted);
        assert_eq!(edge.updated_at, now + 1);

        assert!(storage.delete_edge(id).unwrap());
        assert!(storage.find_edge("alice", "bob").unwrap().is_none());
    }

    #[test]
    fn test_block_cascade() {
        let storage = test_storage();
        add_user(&storage, "alice");
        add_user(&storage, "bob");
        let now = unix_now();

        storage.add_follow("alice", "bob", now).unwrap();
        storage.add_follow("bob", "alice", now).unwrap();
        storage.add_connection("alice", "bob", now).unwrap();
        let edge_id = storage.insert_edge("alice", "bob", now).unwrap();
        storage
            .set_edge_status(edge_id, EdgeStatus::Accepted, now)
            .unwrap();

        storage.block_cascade("alice", "bob", now + 1).unwrap();

        assert!(!storage.is_following("alice", "bob").unwrap());
        assert!(!storage.is_following("bob", "alice").unwrap());
        assert!(!storage.are_connected("alice", "bob").unwrap());
        // The edge survives as a removed marker, not a dangling row.
        let edge = storage.find_edge("alice", "bob").unwrap().unwrap();
        assert_eq!(edge.status, EdgeStatus::Removed);
        assert!(storage.has_block("alice", "bob").unwrap());
        assert!(!storage.has_block("bob", "alice").unwrap());
        assert!(storage.blocked_either_way("bob", "alice").unwrap());

        assert!(storage.remove_block("alice", "bob").unwrap());
        assert!(!storage.blocked_either_way("alice", "bob").unwrap());
    }

    #[test]
    fn test_notification_dedup_key() {
        let storage = test_storage();
        let now = unix_now();

        let row = NotificationRow {
            id: 0,
            receiver_id: "bob".to_string(),
            sender_id: "alice".to_string(),
            family: "follow".to_string(),
            kind: "follow".to_string(),
            body: None,
            created_at: now,
            is_read: false,
            hidden: false,
        };
        let id = storage.insert_notification(&row).unwrap();

        let found = storage
            .find_notification("bob", "alice", "follow")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, id);

        // Same key cannot be inserted twice; the deduper rewrites instead.
        assert!(storage.insert_notification(&row).is_err());
        assert!(storage
            .rewrite_notification(id, "follow", None, now + 10, false, false)
            .unwrap());
        let found = storage.get_notification(id).unwrap().unwrap();
        assert_eq!(found.created_at, now + 10);

        // A different family for the same pair is a distinct record.
        let mut like = row.clone();
        like.family = "like".to_string();
        like.kind = "like".to_string();
        storage.insert_notification(&like).unwrap();
    }

    #[test]
    fn test_notification_listing_and_read_state() {
        let storage = test_storage();
        let now = unix_now();

        for (sender, family) in [("alice", "follow"), ("carol", "follow"), ("alice", "like")] {
            let row = NotificationRow {
                id: 0,
                receiver_id: "bob".to_string(),
                sender_id: sender.to_string(),
                family: family.to_string(),
                kind: family.to_string(),
                body: None,
                created_at: now,
                is_read: false,
                hidden: false,
            };
            storage.insert_notification(&row).unwrap();
        }

        assert_eq!(storage.count_unread("bob").unwrap(), 3);
        let listed = storage.list_notifications("bob", false, 50).unwrap();
        assert_eq!(listed.len(), 3);

        // Hidden rows vanish from lists and counts.
        let hidden_id = listed[0].id;
        storage
            .rewrite_notification(hidden_id, "follow_withdrawn", None, now, false, true)
            .unwrap();
        assert_eq!(storage.list_notifications("bob", false, 50).unwrap().len(), 2);
        assert_eq!(storage.count_unread("bob").unwrap(), 2);

        // Read scoping: the wrong receiver cannot mark it.
        let target = storage.list_notifications("bob", false, 50).unwrap()[0].id;
        assert!(!storage.mark_notification_read(target, "mallory").unwrap());
        assert!(storage.mark_notification_read(target, "bob").unwrap());
        assert_eq!(storage.count_unread("bob").unwrap(), 1);

        assert_eq!(storage.mark_all_read("bob").unwrap(), 1);
        assert_eq!(storage.count_unread("bob").unwrap(), 0);
        let unread = storage.list_notifications("bob", true, 50).unwrap();
        assert!(unread.is_empty());
    }
}
