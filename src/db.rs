//! SQLite storage for subscriptions, feed streams and playback progress.
//!
//! The database is stored at `<data dir>/feedstate.db` unless the configuration
//! points elsewhere.
//!
//! Every write bumps a data revision. Metric sources watch that revision and
//! re-query, so they follow the same data changes the feed list does.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tokio::sync::watch;

use crate::toggles::FilterState;

/// Group id meaning "every subscription"
pub const GROUP_ALL_ID: i64 = -1;

/// A stream counts as fully watched once progress is this close to the end
const WATCHED_THRESHOLD_SECS: i64 = 5;

/// A feed stream together with its playback progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamItem {
    pub id: i64,
    pub subscription_id: i64,
    pub url: String,
    pub title: String,
    pub uploader: String,
    pub duration_secs: i64,
    pub upload_date: Option<DateTime<Utc>>,
    pub progress_secs: Option<i64>,
}

impl StreamItem {
    pub fn is_fully_watched(&self) -> bool {
        match self.progress_secs {
            Some(progress) => {
                self.duration_secs > 0 && progress >= self.duration_secs - WATCHED_THRESHOLD_SECS
            }
            None => false,
        }
    }

    pub fn is_partially_watched(&self) -> bool {
        self.progress_secs.unwrap_or(0) > 0 && !self.is_fully_watched()
    }
}

/// Input for [`Database::add_stream`]
#[derive(Debug, Clone)]
pub struct NewStream {
    pub subscription_id: i64,
    pub url: String,
    pub title: String,
    pub uploader: String,
    pub duration_secs: i64,
    pub upload_date: Option<DateTime<Utc>>,
}

/// Predicates for materializing the feed list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamQuery {
    pub group_id: i64,
    pub exclude_fully_watched: bool,
    pub exclude_partially_watched: bool,
    pub include_future: bool,
}

impl StreamQuery {
    pub fn new(group_id: i64, filters: FilterState) -> Self {
        let (exclude_fully_watched, exclude_partially_watched) =
            filters.played_visibility.exclusions();
        Self {
            group_id,
            exclude_fully_watched,
            exclude_partially_watched,
            include_future: filters.show_future,
        }
    }
}

/// Data layer used by the feed pipeline to materialize items.
///
/// Called from the blocking pool; implementations may block.
pub trait FeedRepository: Send + Sync {
    fn fetch_items(&self, query: &StreamQuery) -> Result<Vec<StreamItem>>;
}

/// Feed database
pub struct Database {
    conn: Mutex<Connection>,
    revision: watch::Sender<u64>,
}

impl Database {
    /// Get the default database file path
    pub fn db_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("org", "feedstate", "Feedstate")
            .ok_or_else(|| anyhow!("Could not determine data directory"))?;

        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        Ok(data_dir.join("feedstate.db"))
    }

    /// Open or create the database at `path`, or at the default location
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::db_path()?,
        };
        let conn = Connection::open(&path)?;
        let db = Self::from_connection(conn)?;

        tracing::info!("Opened database at {:?}", path);
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let (revision, _) = watch::channel(0);
        let db = Self {
            conn: Mutex::new(conn),
            revision,
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS subscriptions (
                uid INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                last_updated TEXT
            );

            CREATE TABLE IF NOT EXISTS feed_groups (
                uid INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS feed_group_subscription_join (
                group_id INTEGER NOT NULL REFERENCES feed_groups(uid) ON DELETE CASCADE,
                subscription_id INTEGER NOT NULL REFERENCES subscriptions(uid) ON DELETE CASCADE,
                PRIMARY KEY (group_id, subscription_id)
            );

            CREATE TABLE IF NOT EXISTS streams (
                uid INTEGER PRIMARY KEY AUTOINCREMENT,
                subscription_id INTEGER NOT NULL REFERENCES subscriptions(uid) ON DELETE CASCADE,
                url TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                uploader TEXT NOT NULL,
                duration INTEGER NOT NULL DEFAULT 0,
                upload_date TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_streams_subscription ON streams(subscription_id);

            -- Playback progress, only present for streams that were opened
            CREATE TABLE IF NOT EXISTS stream_progress (
                stream_id INTEGER PRIMARY KEY REFERENCES streams(uid) ON DELETE CASCADE,
                progress_secs INTEGER NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Database connection lock poisoned"))
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    /// Watch the data revision; it changes after every write
    pub fn revision(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn add_subscription(&self, url: &str, name: &str) -> Result<i64> {
        let id = {
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO subscriptions (url, name) VALUES (?, ?)",
                params![url, name],
            )?;
            conn.last_insert_rowid()
        };
        self.bump_revision();
        Ok(id)
    }

    pub fn add_group(&self, name: &str) -> Result<i64> {
        let id = {
            let conn = self.conn()?;
            conn.execute("INSERT INTO feed_groups (name) VALUES (?)", params![name])?;
            conn.last_insert_rowid()
        };
        self.bump_revision();
        Ok(id)
    }

    pub fn add_to_group(&self, group_id: i64, subscription_id: i64) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR IGNORE INTO feed_group_subscription_join (group_id, subscription_id)
             VALUES (?, ?)",
            params![group_id, subscription_id],
        )?;
        self.bump_revision();
        Ok(())
    }

    pub fn add_stream(&self, stream: &NewStream) -> Result<i64> {
        let id = {
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO streams (subscription_id, url, title, uploader, duration, upload_date)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    stream.subscription_id,
                    stream.url,
                    stream.title,
                    stream.uploader,
                    stream.duration_secs,
                    stream.upload_date
                ],
            )?;
            conn.last_insert_rowid()
        };
        self.bump_revision();
        Ok(id)
    }

    /// Record playback progress for a stream
    pub fn set_progress(&self, stream_id: i64, progress_secs: i64) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO stream_progress (stream_id, progress_secs) VALUES (?, ?)",
            params![stream_id, progress_secs],
        )?;
        self.bump_revision();
        Ok(())
    }

    /// Record that a subscription's feed was loaded at `when`
    pub fn mark_subscription_updated(&self, subscription_id: i64, when: DateTime<Utc>) -> Result<()> {
        let changed = self.conn()?.execute(
            "UPDATE subscriptions SET last_updated = ? WHERE uid = ?",
            params![when, subscription_id],
        )?;
        if changed == 0 {
            return Err(anyhow!("Subscription not found: {}", subscription_id));
        }
        self.bump_revision();
        Ok(())
    }

    pub fn subscription_name(&self, subscription_id: i64) -> Result<Option<String>> {
        let name = self
            .conn()?
            .query_row(
                "SELECT name FROM subscriptions WHERE uid = ?",
                params![subscription_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name)
    }

    /// Streams of a group matching `query`, newest upload first
    pub fn get_streams(&self, query: &StreamQuery, now: DateTime<Utc>) -> Result<Vec<StreamItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT s.uid, s.subscription_id, s.url, s.title, s.uploader, s.duration,
                    s.upload_date, p.progress_secs
             FROM streams s
             LEFT JOIN stream_progress p ON p.stream_id = s.uid
             WHERE (?1 = -1 OR s.subscription_id IN (
                    SELECT subscription_id FROM feed_group_subscription_join WHERE group_id = ?1))
               AND (?2 OR s.upload_date IS NULL OR s.upload_date <= ?3)
             ORDER BY s.upload_date IS NULL, s.upload_date DESC, s.uid DESC",
        )?;

        let rows = stmt.query_map(
            params![query.group_id, query.include_future, now],
            |row| {
                Ok(StreamItem {
                    id: row.get(0)?,
                    subscription_id: row.get(1)?,
                    url: row.get(2)?,
                    title: row.get(3)?,
                    uploader: row.get(4)?,
                    duration_secs: row.get(5)?,
                    upload_date: row.get(6)?,
                    progress_secs: row.get(7)?,
                })
            },
        )?;

        let mut items = Vec::new();
        for row in rows {
            let item = row?;
            if query.exclude_fully_watched && item.is_fully_watched() {
                continue;
            }
            if query.exclude_partially_watched && item.is_partially_watched() {
                continue;
            }
            items.push(item);
        }
        Ok(items)
    }

    /// Subscriptions in the group whose feed was never loaded
    pub fn not_loaded_count(&self, group_id: i64) -> Result<u64> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM subscriptions
             WHERE last_updated IS NULL
               AND (?1 = -1 OR uid IN (
                    SELECT subscription_id FROM feed_group_subscription_join WHERE group_id = ?1))",
            params![group_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Last-updated timestamps of the group's subscriptions, oldest first
    pub fn subscription_updates(&self, group_id: i64) -> Result<Vec<DateTime<Utc>>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT last_updated FROM subscriptions
             WHERE last_updated IS NOT NULL
               AND (?1 = -1 OR uid IN (
                    SELECT subscription_id FROM feed_group_subscription_join WHERE group_id = ?1))
             ORDER BY last_updated ASC",
        )?;
        let rows = stmt.query_map(params![group_id], |row| row.get::<_, DateTime<Utc>>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }
}

impl FeedRepository for Database {
    fn fetch_items(&self, query: &StreamQuery) -> Result<Vec<StreamItem>> {
        self.get_streams(query, Utc::now())
    }
}
