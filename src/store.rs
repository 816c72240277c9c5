#![forbid(unsafe_code)]

//! Persistence layer for the channel mirror.
//!
//! A single SQLite database holds the channel snapshot, every known video,
//! the threaded comments, and one row per sync run. Full-text projections
//! over videos and comments are maintained by triggers so the search tables
//! can never drift from the base rows: the trigger runs inside the same
//! transaction as the write that fired it.

use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use libsql::{Builder, Connection, Row, params};
use serde::{Deserialize, Serialize};

/// Most recently observed state of the mirrored channel. At most one row
/// exists; every sync overwrites it in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSnapshot {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_url: Option<String>,
    pub published_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    pub subscriber_count: i64,
    pub video_count: i64,
    pub view_count: i64,
    pub last_synced: String,
}

/// Rows stored in the `videos` table.
///
/// `local_path` and `downloaded_at` belong to the download manager; a
/// metadata upsert never touches them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub published_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    pub view_count: i64,
    pub like_count: i64,
    pub comment_count: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloaded_at: Option<String>,
    pub last_updated: String,
}

/// A single comment, either a thread top (`parent_id` is `None`) or a reply
/// pointing at its thread's top-level comment. Replies always carry a
/// `total_reply_count` of zero; only thread tops report the real count.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRecord {
    pub id: String,
    pub video_id: String,
    pub author_display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_profile_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_channel_id: Option<String>,
    pub text_display: String,
    pub text_original: String,
    pub like_count: i64,
    pub published_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub total_reply_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncRunStatus {
    Running,
    Completed,
    Failed,
}

impl SyncRunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => bail!("unknown sync run status: {other}"),
        }
    }
}

/// Bookkeeping row for one execution of the reconciliation algorithm.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRun {
    pub id: i64,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    pub status: SyncRunStatus,
    pub videos_added: i64,
    pub videos_updated: i64,
    pub comments_added: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Partial update applied to an open sync run. Fields left as `None` keep
/// their stored value.
#[derive(Debug, Clone, Default)]
pub struct SyncRunUpdate {
    pub completed_at: Option<String>,
    pub status: Option<SyncRunStatus>,
    pub videos_added: Option<i64>,
    pub videos_updated: Option<i64>,
    pub comments_added: Option<i64>,
    pub error: Option<String>,
}

impl SyncRunUpdate {
    /// Terminal update for a run that finished cleanly.
    pub fn completed(videos_added: i64, videos_updated: i64, comments_added: i64) -> Self {
        Self {
            completed_at: Some(Utc::now().to_rfc3339()),
            status: Some(SyncRunStatus::Completed),
            videos_added: Some(videos_added),
            videos_updated: Some(videos_updated),
            comments_added: Some(comments_added),
            error: None,
        }
    }

    /// Terminal update for a run that aborted.
    pub fn failed(error: &str) -> Self {
        Self {
            completed_at: Some(Utc::now().to_rfc3339()),
            status: Some(SyncRunStatus::Failed),
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

/// Result of an insert-or-update. `is_new` reflects whether the id existed
/// before the write, never whether any field changed.
#[derive(Debug, Clone, Copy)]
pub struct UpsertOutcome {
    pub is_new: bool,
}

async fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA foreign_keys=ON;
        "#,
    )
    .await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS channel_info (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT DEFAULT '',
            custom_url TEXT,
            published_at TEXT NOT NULL,
            thumbnail_url TEXT,
            subscriber_count INTEGER NOT NULL DEFAULT 0,
            video_count INTEGER NOT NULL DEFAULT 0,
            view_count INTEGER NOT NULL DEFAULT 0,
            last_synced TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS videos (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT DEFAULT '',
            published_at TEXT NOT NULL,
            thumbnail_url TEXT,
            duration TEXT,
            view_count INTEGER NOT NULL DEFAULT 0,
            like_count INTEGER NOT NULL DEFAULT 0,
            comment_count INTEGER NOT NULL DEFAULT 0,
            tags_json TEXT NOT NULL DEFAULT '[]',
            local_path TEXT,
            downloaded_at TEXT,
            last_updated TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS comments (
            id TEXT PRIMARY KEY,
            video_id TEXT NOT NULL,
            author_display_name TEXT NOT NULL DEFAULT '',
            author_profile_image_url TEXT,
            author_channel_id TEXT,
            text_display TEXT NOT NULL DEFAULT '',
            text_original TEXT NOT NULL DEFAULT '',
            like_count INTEGER NOT NULL DEFAULT 0,
            published_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            parent_id TEXT,
            total_reply_count INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (video_id) REFERENCES videos(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS sync_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            completed_at TEXT,
            status TEXT NOT NULL CHECK(status IN ('running', 'completed', 'failed')),
            videos_added INTEGER NOT NULL DEFAULT 0,
            videos_updated INTEGER NOT NULL DEFAULT 0,
            comments_added INTEGER NOT NULL DEFAULT 0,
            error TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_comments_video_id ON comments(video_id);
        CREATE INDEX IF NOT EXISTS idx_comments_parent_id ON comments(parent_id);
        CREATE INDEX IF NOT EXISTS idx_videos_published_at ON videos(published_at DESC);

        CREATE VIRTUAL TABLE IF NOT EXISTS videos_fts USING fts5(
            id UNINDEXED,
            title,
            description,
            tags
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS comments_fts USING fts5(
            id UNINDEXED,
            video_id UNINDEXED,
            author_display_name,
            text_display,
            text_original
        );
        "#,
    )
    .await?;

    // Trigger bodies contain semicolons, so each one runs as its own
    // statement instead of going through the batch splitter.
    for trigger in FTS_TRIGGERS {
        conn.execute(trigger, params![]).await?;
    }
    Ok(())
}

/// Keeps both search projections aligned with their base tables. The
/// trigger runs in the same transaction as the triggering write, so a row
/// and its projection commit (or roll back) together.
const FTS_TRIGGERS: &[&str] = &[
    r#"
    CREATE TRIGGER IF NOT EXISTS videos_fts_insert AFTER INSERT ON videos BEGIN
        INSERT INTO videos_fts(rowid, id, title, description, tags)
        VALUES (new.rowid, new.id, new.title, new.description, new.tags_json);
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS videos_fts_delete AFTER DELETE ON videos BEGIN
        DELETE FROM videos_fts WHERE rowid = old.rowid;
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS videos_fts_update AFTER UPDATE ON videos BEGIN
        DELETE FROM videos_fts WHERE rowid = old.rowid;
        INSERT INTO videos_fts(rowid, id, title, description, tags)
        VALUES (new.rowid, new.id, new.title, new.description, new.tags_json);
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS comments_fts_insert AFTER INSERT ON comments BEGIN
        INSERT INTO comments_fts(rowid, id, video_id, author_display_name, text_display, text_original)
        VALUES (new.rowid, new.id, new.video_id, new.author_display_name, new.text_display, new.text_original);
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS comments_fts_delete AFTER DELETE ON comments BEGIN
        DELETE FROM comments_fts WHERE rowid = old.rowid;
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS comments_fts_update AFTER UPDATE ON comments BEGIN
        DELETE FROM comments_fts WHERE rowid = old.rowid;
        INSERT INTO comments_fts(rowid, id, video_id, author_display_name, text_display, text_original)
        VALUES (new.rowid, new.id, new.video_id, new.author_display_name, new.text_display, new.text_original);
    END
    "#,
];

/// Wrapper around the SQLite connection holding every read/write operation
/// the mirror performs.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Opens (and if necessary creates) the database and ensures the
    /// expected schema, indexes, and search triggers exist.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .with_context(|| format!("opening database {}", path.display()))?;

        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await?;
        Ok(Self { conn })
    }

    /// Inserts or refreshes the single channel row. The original publish
    /// date is kept from the first insert; everything else is overwritten.
    pub async fn upsert_channel(&self, snapshot: &ChannelSnapshot) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO channel_info (
                    id, title, description, custom_url, published_at,
                    thumbnail_url, subscriber_count, video_count, view_count, last_synced
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    description = excluded.description,
                    custom_url = excluded.custom_url,
                    thumbnail_url = excluded.thumbnail_url,
                    subscriber_count = excluded.subscriber_count,
                    video_count = excluded.video_count,
                    view_count = excluded.view_count,
                    last_synced = excluded.last_synced
                "#,
                params![
                    snapshot.id.as_str(),
                    snapshot.title.as_str(),
                    snapshot.description.as_str(),
                    snapshot.custom_url.as_deref(),
                    snapshot.published_at.as_str(),
                    snapshot.thumbnail_url.as_deref(),
                    snapshot.subscriber_count,
                    snapshot.video_count,
                    snapshot.view_count,
                    snapshot.last_synced.as_str(),
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn get_channel(&self) -> Result<Option<ChannelSnapshot>> {
        let mut rows = self
            .conn
            .query(
                r#"
                SELECT id, title, description, custom_url, published_at,
                       thumbnail_url, subscriber_count, video_count, view_count, last_synced
                FROM channel_info
                LIMIT 1
                "#,
                params![],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        Ok(Some(row_to_channel(&row)?))
    }

    /// Inserts or updates a video keyed by its remote identifier.
    ///
    /// The update clause deliberately leaves `local_path` and
    /// `downloaded_at` alone so a metadata refresh can never erase a
    /// recorded download.
    pub async fn upsert_video(&self, record: &VideoRecord) -> Result<UpsertOutcome> {
        let is_new = !self.video_exists(&record.id).await?;
        let tags_json = serde_json::to_string(&record.tags).context("serializing tags")?;

        self.conn
            .execute(
                r#"
                INSERT INTO videos (
                    id, title, description, published_at, thumbnail_url, duration,
                    view_count, like_count, comment_count, tags_json,
                    local_path, downloaded_at, last_updated
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    description = excluded.description,
                    published_at = excluded.published_at,
                    thumbnail_url = excluded.thumbnail_url,
                    duration = excluded.duration,
                    view_count = excluded.view_count,
                    like_count = excluded.like_count,
                    comment_count = excluded.comment_count,
                    tags_json = excluded.tags_json,
                    last_updated = excluded.last_updated
                "#,
                params![
                    record.id.as_str(),
                    record.title.as_str(),
                    record.description.as_str(),
                    record.published_at.as_str(),
                    record.thumbnail_url.as_deref(),
                    record.duration.as_deref(),
                    record.view_count,
                    record.like_count,
                    record.comment_count,
                    tags_json,
                    record.local_path.as_deref(),
                    record.downloaded_at.as_deref(),
                    record.last_updated.as_str(),
                ],
            )
            .await?;

        Ok(UpsertOutcome { is_new })
    }

    async fn video_exists(&self, id: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query("SELECT 1 FROM videos WHERE id = ?1", [id])
            .await?;
        Ok(rows.next().await?.is_some())
    }

    /// Records where a finished download landed. Only the download manager
    /// calls this.
    pub async fn update_local_path(&self, id: &str, local_path: &str) -> Result<()> {
        let affected = self
            .conn
            .execute(
                "UPDATE videos SET local_path = ?1, downloaded_at = ?2 WHERE id = ?3",
                params![local_path, Utc::now().to_rfc3339(), id],
            )
            .await?;
        if affected == 0 {
            bail!("video {id} not found");
        }
        Ok(())
    }

    pub async fn get_video(&self, id: &str) -> Result<Option<VideoRecord>> {
        let stmt = self
            .conn
            .prepare(&format!(
                "SELECT {VIDEO_COLUMNS} FROM videos WHERE id = ?1"
            ))
            .await?;
        let mut rows = stmt.query([id]).await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        Ok(Some(row_to_video(&row)?))
    }

    /// Lists videos newest-first, optionally windowed for pagination.
    pub async fn list_videos(
        &self,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<VideoRecord>> {
        let mut sql = format!("SELECT {VIDEO_COLUMNS} FROM videos ORDER BY published_at DESC");
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
            if let Some(offset) = offset {
                sql.push_str(&format!(" OFFSET {offset}"));
            }
        }
        self.fetch_videos(&sql).await
    }

    pub async fn count_videos(&self) -> Result<i64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM videos", params![])
            .await?;
        let row = rows.next().await?.context("missing count row")?;
        Ok(row.get(0)?)
    }

    /// Videos the download manager has not yet produced media for.
    pub async fn list_videos_missing_media(&self, limit: Option<u64>) -> Result<Vec<VideoRecord>> {
        let mut sql = format!(
            "SELECT {VIDEO_COLUMNS} FROM videos \
             WHERE local_path IS NULL OR local_path = '' \
             ORDER BY published_at DESC"
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        self.fetch_videos(&sql).await
    }

    /// Removes a video row; comments cascade via the foreign key, and the
    /// delete triggers keep both search projections aligned.
    pub async fn delete_video(&self, id: &str) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM videos WHERE id = ?1", [id])
            .await?;
        Ok(affected > 0)
    }

    /// Inserts or updates a comment. Author identity fields are immutable
    /// once a comment exists; only text, likes, reply count, and the update
    /// timestamp are refreshed.
    pub async fn upsert_comment(&self, record: &CommentRecord) -> Result<UpsertOutcome> {
        let mut rows = self
            .conn
            .query("SELECT 1 FROM comments WHERE id = ?1", [record.id.as_str()])
            .await?;
        let is_new = rows.next().await?.is_none();

        self.conn
            .execute(
                r#"
                INSERT INTO comments (
                    id, video_id, author_display_name, author_profile_image_url,
                    author_channel_id, text_display, text_original, like_count,
                    published_at, updated_at, parent_id, total_reply_count
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                ON CONFLICT(id) DO UPDATE SET
                    text_display = excluded.text_display,
                    text_original = excluded.text_original,
                    like_count = excluded.like_count,
                    updated_at = excluded.updated_at,
                    total_reply_count = excluded.total_reply_count
                "#,
                params![
                    record.id.as_str(),
                    record.video_id.as_str(),
                    record.author_display_name.as_str(),
                    record.author_profile_image_url.as_deref(),
                    record.author_channel_id.as_deref(),
                    record.text_display.as_str(),
                    record.text_original.as_str(),
                    record.like_count,
                    record.published_at.as_str(),
                    record.updated_at.as_str(),
                    record.parent_id.as_deref(),
                    record.total_reply_count,
                ],
            )
            .await?;

        Ok(UpsertOutcome { is_new })
    }

    pub async fn list_comments_for_video(
        &self,
        video_id: &str,
        limit: Option<u64>,
    ) -> Result<Vec<CommentRecord>> {
        let mut sql = format!(
            "SELECT {COMMENT_COLUMNS} FROM comments \
             WHERE video_id = ?1 ORDER BY published_at DESC"
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        let stmt = self.conn.prepare(&sql).await?;
        let mut rows = stmt.query([video_id]).await?;
        let mut comments = Vec::new();
        while let Some(row) = rows.next().await? {
            comments.push(row_to_comment(&row)?);
        }
        Ok(comments)
    }

    /// Relevance-ranked full-text search over title, description, and tags.
    /// The rowid tiebreaker keeps results stable for identical input.
    pub async fn search_videos(&self, query: &str, limit: u64) -> Result<Vec<VideoRecord>> {
        let sql = format!(
            "SELECT {} FROM videos v \
             JOIN videos_fts ON v.rowid = videos_fts.rowid \
             WHERE videos_fts MATCH ?1 \
             ORDER BY videos_fts.rank, v.rowid \
             LIMIT ?2",
            prefixed_video_columns("v")
        );
        let stmt = self.conn.prepare(&sql).await?;
        let mut rows = stmt.query(params![query, limit as i64]).await?;
        let mut videos = Vec::new();
        while let Some(row) = rows.next().await? {
            videos.push(row_to_video(&row)?);
        }
        Ok(videos)
    }

    /// Relevance-ranked full-text search over comment author and text.
    pub async fn search_comments(&self, query: &str, limit: u64) -> Result<Vec<CommentRecord>> {
        let sql = format!(
            "SELECT {} FROM comments c \
             JOIN comments_fts ON c.rowid = comments_fts.rowid \
             WHERE comments_fts MATCH ?1 \
             ORDER BY comments_fts.rank, c.rowid \
             LIMIT ?2",
            prefixed_comment_columns("c")
        );
        let stmt = self.conn.prepare(&sql).await?;
        let mut rows = stmt.query(params![query, limit as i64]).await?;
        let mut comments = Vec::new();
        while let Some(row) = rows.next().await? {
            comments.push(row_to_comment(&row)?);
        }
        Ok(comments)
    }

    /// Opens a new sync run in `running` state and returns its id.
    pub async fn create_sync_run(&self) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO sync_runs (started_at, status) VALUES (?1, 'running')",
                params![Utc::now().to_rfc3339()],
            )
            .await?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Applies a partial update to a run. `COALESCE` keeps stored values
    /// for fields the update leaves unset, so one statement covers both
    /// terminal transitions.
    pub async fn update_sync_run(&self, id: i64, update: &SyncRunUpdate) -> Result<()> {
        self.conn
            .execute(
                r#"
                UPDATE sync_runs SET
                    completed_at = COALESCE(?2, completed_at),
                    status = COALESCE(?3, status),
                    videos_added = COALESCE(?4, videos_added),
                    videos_updated = COALESCE(?5, videos_updated),
                    comments_added = COALESCE(?6, comments_added),
                    error = COALESCE(?7, error)
                WHERE id = ?1
                "#,
                params![
                    id,
                    update.completed_at.as_deref(),
                    update.status.map(SyncRunStatus::as_str),
                    update.videos_added,
                    update.videos_updated,
                    update.comments_added,
                    update.error.as_deref(),
                ],
            )
            .await?;
        Ok(())
    }

    /// The run used for "last sync" reporting. Older runs stay on disk as
    /// history but are never consulted.
    pub async fn latest_sync_run(&self) -> Result<Option<SyncRun>> {
        let mut rows = self
            .conn
            .query(
                r#"
                SELECT id, started_at, completed_at, status,
                       videos_added, videos_updated, comments_added, error
                FROM sync_runs
                ORDER BY id DESC
                LIMIT 1
                "#,
                params![],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        Ok(Some(row_to_sync_run(&row)?))
    }

    async fn fetch_videos(&self, sql: &str) -> Result<Vec<VideoRecord>> {
        let stmt = self.conn.prepare(sql).await?;
        let mut rows = stmt.query(params![]).await?;
        let mut videos = Vec::new();
        while let Some(row) = rows.next().await? {
            videos.push(row_to_video(&row)?);
        }
        Ok(videos)
    }
}

const VIDEO_COLUMNS: &str = "id, title, description, published_at, thumbnail_url, duration, \
     view_count, like_count, comment_count, tags_json, local_path, downloaded_at, last_updated";

const COMMENT_COLUMNS: &str = "id, video_id, author_display_name, author_profile_image_url, \
     author_channel_id, text_display, text_original, like_count, published_at, updated_at, \
     parent_id, total_reply_count";

fn prefixed_video_columns(alias: &str) -> String {
    VIDEO_COLUMNS
        .split(", ")
        .map(|column| format!("{alias}.{column}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn prefixed_comment_columns(alias: &str) -> String {
    COMMENT_COLUMNS
        .split(", ")
        .map(|column| format!("{alias}.{column}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Converts a SQL row into a `ChannelSnapshot`.
fn row_to_channel(row: &Row) -> Result<ChannelSnapshot> {
    Ok(ChannelSnapshot {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        custom_url: row.get(3)?,
        published_at: row.get(4)?,
        thumbnail_url: row.get(5)?,
        subscriber_count: row.get(6)?,
        video_count: row.get(7)?,
        view_count: row.get(8)?,
        last_synced: row.get(9)?,
    })
}

/// Converts a SQL row into a `VideoRecord`, deserializing the stored tag
/// list. A missing or empty tag column becomes an empty vec, never null.
fn row_to_video(row: &Row) -> Result<VideoRecord> {
    // Column order must match VIDEO_COLUMNS.
    let tags_json: String = row.get(9)?;
    let tags: Vec<String> =
        serde_json::from_str(&tags_json).context("parsing stored tags JSON")?;
    Ok(VideoRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        published_at: row.get(3)?,
        thumbnail_url: row.get(4)?,
        duration: row.get(5)?,
        view_count: row.get(6)?,
        like_count: row.get(7)?,
        comment_count: row.get(8)?,
        tags,
        local_path: row.get(10)?,
        downloaded_at: row.get(11)?,
        last_updated: row.get(12)?,
    })
}

/// Converts a SQL row into a `CommentRecord`.
fn row_to_comment(row: &Row) -> Result<CommentRecord> {
    // Column order must match COMMENT_COLUMNS.
    Ok(CommentRecord {
        id: row.get(0)?,
        video_id: row.get(1)?,
        author_display_name: row.get(2)?,
        author_profile_image_url: row.get(3)?,
        author_channel_id: row.get(4)?,
        text_display: row.get(5)?,
        text_original: row.get(6)?,
        like_count: row.get(7)?,
        published_at: row.get(8)?,
        updated_at: row.get(9)?,
        parent_id: row.get(10)?,
        total_reply_count: row.get(11)?,
    })
}

fn row_to_sync_run(row: &Row) -> Result<SyncRun> {
    let status: String = row.get(3)?;
    Ok(SyncRun {
        id: row.get(0)?,
        started_at: row.get(1)?,
        completed_at: row.get(2)?,
        status: SyncRunStatus::parse(&status)?,
        videos_added: row.get(4)?,
        videos_updated: row.get(5)?,
        comments_added: row.get(6)?,
        error: row.get(7)?,
    })
}
