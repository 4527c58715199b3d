//! SQLite-backed repository implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{
    Episode, EpisodeStatus, Feed, Publication, Repository, RepositoryError, RepositoryOps,
};

fn db_err(e: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Database(e.to_string())
}

/// SQLite-backed repository.
///
/// All aggregate fields live in their own columns; only the episode file
/// selection is a JSON column. The same statement helpers serve both the
/// top-level repository and the transaction-scoped view.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// Open (or create) a repository at the given path.
    pub fn new(path: &Path) -> Result<Self, RepositoryError> {
        let conn = Connection::open(path).map_err(db_err)?;
        // The queue shares the database file through its own connection.
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory repository (useful for testing).
    pub fn in_memory() -> Result<Self, RepositoryError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), RepositoryError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS counters (
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                value INTEGER NOT NULL,
                PRIMARY KEY (user_id, name)
            );

            CREATE TABLE IF NOT EXISTS episodes (
                user_id TEXT NOT NULL,
                id TEXT NOT NULL,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                source_url TEXT NOT NULL,
                source_files TEXT NOT NULL,
                remote_job_id TEXT,
                storage_key TEXT NOT NULL,
                artifact_url TEXT NOT NULL,
                status TEXT NOT NULL,
                duration_secs INTEGER,
                byte_length INTEGER,
                media_format TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, id)
            );

            CREATE TABLE IF NOT EXISTS feeds (
                user_id TEXT NOT NULL,
                id TEXT NOT NULL,
                title TEXT NOT NULL,
                artifact_url TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (user_id, id)
            );

            CREATE TABLE IF NOT EXISTS publications (
                user_id TEXT NOT NULL,
                episode_id TEXT NOT NULL,
                feed_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (user_id, episode_id, feed_id)
            );

            CREATE INDEX IF NOT EXISTS idx_episodes_status ON episodes(user_id, status);
            CREATE INDEX IF NOT EXISTS idx_publications_feed ON publications(user_id, feed_id);
            "#,
        )
        .map_err(db_err)?;

        Ok(())
    }
}

// ----------------------------------------------------------------------
// Statement helpers - shared between SqliteRepository and TxView
// ----------------------------------------------------------------------

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn status_from_str(s: &str) -> EpisodeStatus {
    match s {
        "created" => EpisodeStatus::Created,
        "pending" => EpisodeStatus::Pending,
        "downloading" => EpisodeStatus::Downloading,
        "processing" => EpisodeStatus::Processing,
        "uploading" => EpisodeStatus::Uploading,
        "complete" => EpisodeStatus::Complete,
        _ => EpisodeStatus::Created,
    }
}

fn row_to_episode(row: &rusqlite::Row) -> rusqlite::Result<Episode> {
    let source_files_json: String = row.get(5)?;
    let source_files: Vec<String> = serde_json::from_str(&source_files_json).unwrap_or_default();
    let created_at_str: String = row.get(3)?;
    let updated_at_str: String = row.get(13)?;
    let status_str: String = row.get(9)?;

    Ok(Episode {
        user_id: row.get(0)?,
        id: row.get(1)?,
        title: row.get(2)?,
        created_at: parse_timestamp(&created_at_str),
        source_url: row.get(4)?,
        source_files,
        remote_job_id: row.get(6)?,
        storage_key: row.get(7)?,
        artifact_url: row.get(8)?,
        status: status_from_str(&status_str),
        duration_secs: row.get(10)?,
        byte_length: row.get(11)?,
        media_format: row.get(12)?,
        updated_at: parse_timestamp(&updated_at_str),
    })
}

fn row_to_feed(row: &rusqlite::Row) -> rusqlite::Result<Feed> {
    let created_at_str: String = row.get(4)?;
    Ok(Feed {
        user_id: row.get(0)?,
        id: row.get(1)?,
        title: row.get(2)?,
        artifact_url: row.get(3)?,
        created_at: parse_timestamp(&created_at_str),
    })
}

fn row_to_publication(row: &rusqlite::Row) -> rusqlite::Result<Publication> {
    let created_at_str: String = row.get(3)?;
    Ok(Publication {
        user_id: row.get(0)?,
        episode_id: row.get(1)?,
        feed_id: row.get(2)?,
        created_at: parse_timestamp(&created_at_str),
    })
}

const EPISODE_COLUMNS: &str = "user_id, id, title, created_at, source_url, source_files, \
     remote_job_id, storage_key, artifact_url, status, duration_secs, byte_length, \
     media_format, updated_at";

fn next_id(conn: &Connection, user_id: &str, name: &str, start: i64) -> Result<String, RepositoryError> {
    let value: i64 = conn
        .query_row(
            "INSERT INTO counters (user_id, name, value) VALUES (?, ?, ?)
             ON CONFLICT(user_id, name) DO UPDATE SET value = value + 1
             RETURNING value",
            params![user_id, name, start],
            |row| row.get(0),
        )
        .map_err(db_err)?;
    Ok(value.to_string())
}

fn upsert_episode(conn: &Connection, episode: &Episode) -> Result<(), RepositoryError> {
    let source_files_json = serde_json::to_string(&episode.source_files).map_err(db_err)?;
    conn.execute(
        "INSERT OR REPLACE INTO episodes (user_id, id, title, created_at, source_url, \
         source_files, remote_job_id, storage_key, artifact_url, status, duration_secs, \
         byte_length, media_format, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            episode.user_id,
            episode.id,
            episode.title,
            episode.created_at.to_rfc3339(),
            episode.source_url,
            source_files_json,
            episode.remote_job_id,
            episode.storage_key,
            episode.artifact_url,
            episode.status.as_str(),
            episode.duration_secs,
            episode.byte_length,
            episode.media_format,
            episode.updated_at.to_rfc3339(),
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

fn get_episode(
    conn: &Connection,
    user_id: &str,
    id: &str,
) -> Result<Option<Episode>, RepositoryError> {
    let sql = format!(
        "SELECT {} FROM episodes WHERE user_id = ? AND id = ?",
        EPISODE_COLUMNS
    );
    match conn.query_row(&sql, params![user_id, id], row_to_episode) {
        Ok(episode) => Ok(Some(episode)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(db_err(e)),
    }
}

fn get_episodes(
    conn: &Connection,
    user_id: &str,
    ids: &[String],
) -> Result<Vec<Episode>, RepositoryError> {
    let mut episodes = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(episode) = get_episode(conn, user_id, id)? {
            episodes.push(episode);
        }
    }
    Ok(episodes)
}

fn list_episodes(conn: &Connection, user_id: &str) -> Result<Vec<Episode>, RepositoryError> {
    let sql = format!(
        "SELECT {} FROM episodes WHERE user_id = ? ORDER BY CAST(id AS INTEGER) DESC",
        EPISODE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let rows = stmt
        .query_map(params![user_id], row_to_episode)
        .map_err(db_err)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
}

fn delete_episodes(
    conn: &Connection,
    user_id: &str,
    ids: &[String],
) -> Result<(), RepositoryError> {
    let mut stmt = conn
        .prepare("DELETE FROM episodes WHERE user_id = ? AND id = ?")
        .map_err(db_err)?;
    for id in ids {
        stmt.execute(params![user_id, id]).map_err(db_err)?;
    }
    Ok(())
}

fn upsert_feed(conn: &Connection, feed: &Feed) -> Result<(), RepositoryError> {
    conn.execute(
        "INSERT OR REPLACE INTO feeds (user_id, id, title, artifact_url, created_at) \
         VALUES (?, ?, ?, ?, ?)",
        params![
            feed.user_id,
            feed.id,
            feed.title,
            feed.artifact_url,
            feed.created_at.to_rfc3339(),
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

fn get_feed(conn: &Connection, user_id: &str, id: &str) -> Result<Option<Feed>, RepositoryError> {
    match conn.query_row(
        "SELECT user_id, id, title, artifact_url, created_at FROM feeds \
         WHERE user_id = ? AND id = ?",
        params![user_id, id],
        row_to_feed,
    ) {
        Ok(feed) => Ok(Some(feed)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(db_err(e)),
    }
}

fn list_feeds(conn: &Connection, user_id: &str) -> Result<Vec<Feed>, RepositoryError> {
    let mut stmt = conn
        .prepare(
            "SELECT user_id, id, title, artifact_url, created_at FROM feeds \
             WHERE user_id = ? ORDER BY CAST(id AS INTEGER) ASC",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![user_id], row_to_feed)
        .map_err(db_err)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
}

fn delete_feed(conn: &Connection, user_id: &str, id: &str) -> Result<(), RepositoryError> {
    conn.execute(
        "DELETE FROM feeds WHERE user_id = ? AND id = ?",
        params![user_id, id],
    )
    .map_err(db_err)?;
    Ok(())
}

fn insert_publications(
    conn: &Connection,
    publications: &[Publication],
) -> Result<(), RepositoryError> {
    let mut stmt = conn
        .prepare(
            "INSERT OR REPLACE INTO publications (user_id, episode_id, feed_id, created_at) \
             VALUES (?, ?, ?, ?)",
        )
        .map_err(db_err)?;
    for publication in publications {
        stmt.execute(params![
            publication.user_id,
            publication.episode_id,
            publication.feed_id,
            publication.created_at.to_rfc3339(),
        ])
        .map_err(db_err)?;
    }
    Ok(())
}

fn delete_publications(
    conn: &Connection,
    user_id: &str,
    pairs: &[(String, String)],
) -> Result<(), RepositoryError> {
    let mut stmt = conn
        .prepare("DELETE FROM publications WHERE user_id = ? AND episode_id = ? AND feed_id = ?")
        .map_err(db_err)?;
    for (episode_id, feed_id) in pairs {
        stmt.execute(params![user_id, episode_id, feed_id])
            .map_err(db_err)?;
    }
    Ok(())
}

fn list_publications_by_episodes(
    conn: &Connection,
    user_id: &str,
    episode_ids: &[String],
) -> Result<Vec<Publication>, RepositoryError> {
    let mut stmt = conn
        .prepare(
            "SELECT user_id, episode_id, feed_id, created_at FROM publications \
             WHERE user_id = ? AND episode_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .map_err(db_err)?;
    let mut publications = Vec::new();
    for episode_id in episode_ids {
        let rows = stmt
            .query_map(params![user_id, episode_id], row_to_publication)
            .map_err(db_err)?;
        for row in rows {
            publications.push(row.map_err(db_err)?);
        }
    }
    Ok(publications)
}

fn list_publications_by_feed(
    conn: &Connection,
    user_id: &str,
    feed_id: &str,
) -> Result<Vec<Publication>, RepositoryError> {
    let mut stmt = conn
        .prepare(
            "SELECT user_id, episode_id, feed_id, created_at FROM publications \
             WHERE user_id = ? AND feed_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![user_id, feed_id], row_to_publication)
        .map_err(db_err)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
}

// ----------------------------------------------------------------------
// Trait implementations
// ----------------------------------------------------------------------

impl RepositoryOps for SqliteRepository {
    fn next_episode_id(&self, user_id: &str) -> Result<String, RepositoryError> {
        next_id(&self.conn.lock().unwrap(), user_id, "episode", 1)
    }

    fn next_feed_id(&self, user_id: &str) -> Result<String, RepositoryError> {
        // "1" is the default feed, explicit feeds start at "2".
        next_id(&self.conn.lock().unwrap(), user_id, "feed", 2)
    }

    fn upsert_episode(&self, episode: &Episode) -> Result<(), RepositoryError> {
        upsert_episode(&self.conn.lock().unwrap(), episode)
    }

    fn get_episode(&self, user_id: &str, id: &str) -> Result<Option<Episode>, RepositoryError> {
        get_episode(&self.conn.lock().unwrap(), user_id, id)
    }

    fn get_episodes(&self, user_id: &str, ids: &[String]) -> Result<Vec<Episode>, RepositoryError> {
        get_episodes(&self.conn.lock().unwrap(), user_id, ids)
    }

    fn list_episodes(&self, user_id: &str) -> Result<Vec<Episode>, RepositoryError> {
        list_episodes(&self.conn.lock().unwrap(), user_id)
    }

    fn delete_episodes(&self, user_id: &str, ids: &[String]) -> Result<(), RepositoryError> {
        delete_episodes(&self.conn.lock().unwrap(), user_id, ids)
    }

    fn upsert_feed(&self, feed: &Feed) -> Result<(), RepositoryError> {
        upsert_feed(&self.conn.lock().unwrap(), feed)
    }

    fn get_feed(&self, user_id: &str, id: &str) -> Result<Option<Feed>, RepositoryError> {
        get_feed(&self.conn.lock().unwrap(), user_id, id)
    }

    fn list_feeds(&self, user_id: &str) -> Result<Vec<Feed>, RepositoryError> {
        list_feeds(&self.conn.lock().unwrap(), user_id)
    }

    fn delete_feed(&self, user_id: &str, id: &str) -> Result<(), RepositoryError> {
        delete_feed(&self.conn.lock().unwrap(), user_id, id)
    }

    fn insert_publications(&self, publications: &[Publication]) -> Result<(), RepositoryError> {
        insert_publications(&self.conn.lock().unwrap(), publications)
    }

    fn delete_publications(
        &self,
        user_id: &str,
        pairs: &[(String, String)],
    ) -> Result<(), RepositoryError> {
        delete_publications(&self.conn.lock().unwrap(), user_id, pairs)
    }

    fn list_publications_by_episodes(
        &self,
        user_id: &str,
        episode_ids: &[String],
    ) -> Result<Vec<Publication>, RepositoryError> {
        list_publications_by_episodes(&self.conn.lock().unwrap(), user_id, episode_ids)
    }

    fn list_publications_by_feed(
        &self,
        user_id: &str,
        feed_id: &str,
    ) -> Result<Vec<Publication>, RepositoryError> {
        list_publications_by_feed(&self.conn.lock().unwrap(), user_id, feed_id)
    }
}

/// Transaction-scoped repository view.
struct TxView<'a> {
    conn: &'a Connection,
}

impl RepositoryOps for TxView<'_> {
    fn next_episode_id(&self, user_id: &str) -> Result<String, RepositoryError> {
        next_id(self.conn, user_id, "episode", 1)
    }

    fn next_feed_id(&self, user_id: &str) -> Result<String, RepositoryError> {
        next_id(self.conn, user_id, "feed", 2)
    }

    fn upsert_episode(&self, episode: &Episode) -> Result<(), RepositoryError> {
        upsert_episode(self.conn, episode)
    }

    fn get_episode(&self, user_id: &str, id: &str) -> Result<Option<Episode>, RepositoryError> {
        get_episode(self.conn, user_id, id)
    }

    fn get_episodes(&self, user_id: &str, ids: &[String]) -> Result<Vec<Episode>, RepositoryError> {
        get_episodes(self.conn, user_id, ids)
    }

    fn list_episodes(&self, user_id: &str) -> Result<Vec<Episode>, RepositoryError> {
        list_episodes(self.conn, user_id)
    }

    fn delete_episodes(&self, user_id: &str, ids: &[String]) -> Result<(), RepositoryError> {
        delete_episodes(self.conn, user_id, ids)
    }

    fn upsert_feed(&self, feed: &Feed) -> Result<(), RepositoryError> {
        upsert_feed(self.conn, feed)
    }

    fn get_feed(&self, user_id: &str, id: &str) -> Result<Option<Feed>, RepositoryError> {
        get_feed(self.conn, user_id, id)
    }

    fn list_feeds(&self, user_id: &str) -> Result<Vec<Feed>, RepositoryError> {
        list_feeds(self.conn, user_id)
    }

    fn delete_feed(&self, user_id: &str, id: &str) -> Result<(), RepositoryError> {
        delete_feed(self.conn, user_id, id)
    }

    fn insert_publications(&self, publications: &[Publication]) -> Result<(), RepositoryError> {
        insert_publications(self.conn, publications)
    }

    fn delete_publications(
        &self,
        user_id: &str,
        pairs: &[(String, String)],
    ) -> Result<(), RepositoryError> {
        delete_publications(self.conn, user_id, pairs)
    }

    fn list_publications_by_episodes(
        &self,
        user_id: &str,
        episode_ids: &[String],
    ) -> Result<Vec<Publication>, RepositoryError> {
        list_publications_by_episodes(self.conn, user_id, episode_ids)
    }

    fn list_publications_by_feed(
        &self,
        user_id: &str,
        feed_id: &str,
    ) -> Result<Vec<Publication>, RepositoryError> {
        list_publications_by_feed(self.conn, user_id, feed_id)
    }
}

impl Repository for SqliteRepository {
    fn transaction(
        &self,
        f: &mut dyn FnMut(&dyn RepositoryOps) -> Result<(), RepositoryError>,
    ) -> Result<(), RepositoryError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(db_err)?;
        let result = f(&TxView { conn: &tx });
        match result {
            Ok(()) => tx.commit().map_err(db_err),
            // Dropping the transaction rolls it back.
            Err(e) => Err(e),
        }
    }
}
