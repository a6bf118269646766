//! SQLite-based metadata store.

use super::{ChunkMetadata, CorpusEntry, MetadataStore, VideoRecord};
use crate::chunking::Chunk;
use crate::error::{LecternError, Result, Service};
use crate::transcript::VideoMetadata;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS videos (
        id TEXT PRIMARY KEY,
        chapter TEXT NOT NULL,
        title TEXT NOT NULL,
        url TEXT NOT NULL,
        duration INTEGER,
        ingested_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS chunks (
        id TEXT PRIMARY KEY,
        video_id TEXT NOT NULL REFERENCES videos(id) ON DELETE CASCADE,
        chunk_order INTEGER NOT NULL,
        start_time REAL NOT NULL,
        end_time REAL NOT NULL,
        raw_text TEXT NOT NULL,
        contextualized_text TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_chunks_video_id ON chunks(video_id);

    CREATE TABLE IF NOT EXISTS corpus_state (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        updated_at TEXT NOT NULL
    );
"#;

/// SQLite-based metadata store.
///
/// Statements run on the blocking pool, so a caller's deadline still fires
/// while the connection is busy.
pub struct SqliteMetadataStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMetadataStore {
    /// Open (or create) a metadata store at `path`.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        info!("Initialized SQLite metadata store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `op` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|e| {
                LecternError::upstream(Service::MetadataStore, format!("Failed to acquire lock: {}", e))
            })?;
            op(&guard)
        })
        .await
        .map_err(|e| LecternError::Task(format!("metadata store task failed: {}", e)))?
    }

    fn touch(conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO corpus_state (id, updated_at) VALUES (1, ?1)",
            params![Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn write_video(conn: &Connection, video: &VideoMetadata) -> Result<()> {
        conn.execute(
            r#"
            INSERT INTO videos (id, chapter, title, url, duration, ingested_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                chapter = excluded.chapter,
                title = excluded.title,
                url = excluded.url,
                duration = excluded.duration,
                ingested_at = excluded.ingested_at
            "#,
            params![
                video.id,
                video.chapter,
                video.title,
                video.url,
                video.duration,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn write_chunks(conn: &Connection, chunks: &[Chunk]) -> Result<()> {
        let mut stmt = conn.prepare(
            r#"
            INSERT OR REPLACE INTO chunks
            (id, video_id, chunk_order, start_time, end_time, raw_text, contextualized_text)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )?;
        for chunk in chunks {
            stmt.execute(params![
                chunk.id,
                chunk.video_id,
                chunk.order,
                chunk.start_time,
                chunk.end_time,
                chunk.raw_text,
                chunk.contextualized_text,
            ])?;
        }
        Ok(())
    }
}

fn parse_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
    Ok(Chunk {
        id: row.get(0)?,
        video_id: row.get(1)?,
        order: row.get(2)?,
        start_time: row.get(3)?,
        end_time: row.get(4)?,
        raw_text: row.get(5)?,
        contextualized_text: row.get(6)?,
    })
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    #[instrument(skip(self, video), fields(video_id = %video.id))]
    async fn upsert_video(&self, video: &VideoMetadata) -> Result<()> {
        let video = video.clone();
        self.with_conn(move |conn| {
            Self::write_video(conn, &video)?;
            Self::touch(conn)
        })
        .await
    }

    #[instrument(skip(self, chunks), fields(count = chunks.len()))]
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<usize> {
        let chunks = chunks.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            Self::write_chunks(&tx, &chunks)?;
            Self::touch(&tx)?;
            tx.commit()?;
            debug!("Stored {} chunks", chunks.len());
            Ok(chunks.len())
        })
        .await
    }

    #[instrument(skip(self, video, chunks), fields(video_id = %video.id, count = chunks.len()))]
    async fn replace_video(&self, video: &VideoMetadata, chunks: &[Chunk]) -> Result<Vec<String>> {
        let video = video.clone();
        let chunks = chunks.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;

            let previous = {
                let mut stmt = tx.prepare("SELECT id FROM chunks WHERE video_id = ?1")?;
                let ids = stmt.query_map(params![video.id], |row| row.get::<_, String>(0))?;
                ids.collect::<rusqlite::Result<Vec<_>>>()?
            };

            Self::write_video(&tx, &video)?;
            tx.execute("DELETE FROM chunks WHERE video_id = ?1", params![video.id])?;
            Self::write_chunks(&tx, &chunks)?;
            Self::touch(&tx)?;
            tx.commit()?;

            let replaced: Vec<String> = previous
                .into_iter()
                .filter(|id| !chunks.iter().any(|c| &c.id == id))
                .collect();
            debug!("Stored {} chunks, replaced {}", chunks.len(), replaced.len());
            Ok(replaced)
        })
        .await
    }

    async fn update_contextualized_text(&self, chunk_id: &str, text: &str) -> Result<()> {
        let chunk_id = chunk_id.to_string();
        let text = text.to_string();
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE chunks SET contextualized_text = ?1 WHERE id = ?2",
                params![text, chunk_id],
            )?;
            if updated == 0 {
                return Err(LecternError::InvalidInput(format!("unknown chunk {}", chunk_id)));
            }
            Self::touch(conn)
        })
        .await
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn fetch_chunks(&self, ids: &[String]) -> Result<HashMap<String, ChunkMetadata>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let ids = ids.to_vec();
        self.with_conn(move |conn| {
            let placeholders = vec!["?"; ids.len()].join(", ");
            let sql = format!(
                r#"
                SELECT c.id, c.video_id, v.chapter, v.title, v.url,
                       c.start_time, c.end_time, c.raw_text, c.contextualized_text
                FROM chunks c
                JOIN videos v ON v.id = c.video_id
                WHERE c.id IN ({})
                "#,
                placeholders
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
                Ok(ChunkMetadata {
                    chunk_id: row.get(0)?,
                    video_id: row.get(1)?,
                    chapter: row.get(2)?,
                    video_title: row.get(3)?,
                    video_url: row.get(4)?,
                    start_time: row.get(5)?,
                    end_time: row.get(6)?,
                    raw_text: row.get(7)?,
                    contextualized_text: row.get(8)?,
                })
            })?;

            let mut found = HashMap::with_capacity(ids.len());
            for row in rows {
                let meta = row?;
                found.insert(meta.chunk_id.clone(), meta);
            }
            debug!("Fetched metadata for {}/{} chunks", found.len(), ids.len());
            Ok(found)
        })
        .await
    }

    async fn corpus(&self) -> Result<Vec<CorpusEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT c.id, v.chapter, c.contextualized_text
                FROM chunks c
                JOIN videos v ON v.id = c.video_id
                ORDER BY c.rowid
                "#,
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(CorpusEntry {
                    chunk_id: row.get(0)?,
                    chapter: row.get(1)?,
                    text: row.get(2)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn chunks_for_video(&self, video_id: &str) -> Result<Vec<Chunk>> {
        let video_id = video_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, video_id, chunk_order, start_time, end_time, raw_text, contextualized_text
                FROM chunks
                WHERE video_id = ?1
                ORDER BY chunk_order
                "#,
            )?;
            let rows = stmt.query_map(params![video_id], row_to_chunk)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn get_video(&self, video_id: &str) -> Result<Option<VideoMetadata>> {
        let video_id = video_id.to_string();
        self.with_conn(move |conn| {
            let video = conn
                .query_row(
                    "SELECT id, chapter, title, url, duration FROM videos WHERE id = ?1",
                    params![video_id],
                    |row| {
                        Ok(VideoMetadata {
                            id: row.get(0)?,
                            chapter: row.get(1)?,
                            title: row.get(2)?,
                            url: row.get(3)?,
                            duration: row.get(4)?,
                        })
                    },
                )
                .optional()?;
            Ok(video)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn delete_video(&self, video_id: &str) -> Result<usize> {
        let video_id = video_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let chunks = tx.execute("DELETE FROM chunks WHERE video_id = ?1", params![video_id])?;
            let videos = tx.execute("DELETE FROM videos WHERE id = ?1", params![video_id])?;
            if videos == 0 {
                return Err(LecternError::VideoNotFound(video_id));
            }
            Self::touch(&tx)?;
            tx.commit()?;
            info!("Deleted video {} with {} chunks", video_id, chunks);
            Ok(chunks)
        })
        .await
    }

    async fn list_videos(&self) -> Result<Vec<VideoRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT v.id, v.chapter, v.title, v.url, v.duration, v.ingested_at,
                       COUNT(c.id), COALESCE(MAX(c.end_time), 0.0)
                FROM videos v
                LEFT JOIN chunks c ON c.video_id = v.id
                GROUP BY v.id
                ORDER BY v.ingested_at DESC
                "#,
            )?;

            let rows = stmt.query_map([], |row| {
                let ingested_at: String = row.get(5)?;
                Ok(VideoRecord {
                    video: VideoMetadata {
                        id: row.get(0)?,
                        chapter: row.get(1)?,
                        title: row.get(2)?,
                        url: row.get(3)?,
                        duration: row.get(4)?,
                    },
                    ingested_at: parse_time(&ingested_at),
                    chunk_count: row.get(6)?,
                    covered_seconds: row.get(7)?,
                })
            })?;

            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn corpus_updated_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.with_conn(|conn| {
            let updated: Option<String> = conn
                .query_row("SELECT updated_at FROM corpus_state WHERE id = 1", [], |row| row.get(0))
                .optional()?;
            Ok(updated.as_deref().map(parse_time))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deadline;
    use std::time::{Duration, Instant};

    fn video(id: &str, chapter: &str) -> VideoMetadata {
        VideoMetadata::new(chapter, format!("[CS431] Part 1: {}", id), format!("https://youtu.be/{}", id))
            .with_id(id)
    }

    async fn seeded() -> (SqliteMetadataStore, Vec<Chunk>) {
        let store = SqliteMetadataStore::in_memory().unwrap();
        store.upsert_video(&video("v1", "Chapter 1")).await.unwrap();
        store.upsert_video(&video("v2", "Chapter 2")).await.unwrap();

        let mut chunks = vec![
            Chunk::new("v1", 0.0, 60.0, "perceptron", 0),
            Chunk::new("v1", 50.0, 110.0, "backpropagation", 1),
            Chunk::new("v2", 0.0, 60.0, "attention", 0),
        ];
        chunks[2].set_context("About transformers.");
        store.insert_chunks(&chunks).await.unwrap();
        (store, chunks)
    }

    #[tokio::test]
    async fn test_fetch_chunks_joins_video() {
        let (store, chunks) = seeded().await;

        let ids = vec![chunks[2].id.clone(), "missing".to_string(), chunks[0].id.clone()];
        let found = store.fetch_chunks(&ids).await.unwrap();

        assert_eq!(found.len(), 2);
        let meta = &found[&chunks[2].id];
        assert_eq!(meta.chapter, "Chapter 2");
        assert_eq!(meta.video_url, "https://youtu.be/v2");
        assert_eq!(meta.raw_text, "attention");
        assert_eq!(meta.contextualized_text, "About transformers.\n\nattention");
        assert!(!found.contains_key("missing"));
    }

    #[tokio::test]
    async fn test_corpus_uses_contextualized_text() {
        let (store, chunks) = seeded().await;

        let corpus = store.corpus().await.unwrap();
        assert_eq!(corpus.len(), 3);
        assert_eq!(corpus[0].chunk_id, chunks[0].id);
        assert_eq!(corpus[2].text, chunks[2].contextualized_text);
        assert_eq!(corpus[2].chapter, "Chapter 2");
    }

    #[tokio::test]
    async fn test_update_and_reload_chunks() {
        let (store, chunks) = seeded().await;

        store
            .update_contextualized_text(&chunks[1].id, "Prefix.\n\nbackpropagation")
            .await
            .unwrap();

        let loaded = store.chunks_for_video("v1").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], chunks[0]);
        assert_eq!(loaded[1].contextualized_text, "Prefix.\n\nbackpropagation");

        assert!(matches!(
            store.update_contextualized_text("nope", "x").await,
            Err(LecternError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_list_and_delete_videos() {
        let (store, _) = seeded().await;

        let videos = store.list_videos().await.unwrap();
        assert_eq!(videos.len(), 2);
        let v1 = videos.iter().find(|v| v.video.id == "v1").unwrap();
        assert_eq!(v1.chunk_count, 2);
        assert_eq!(v1.covered_seconds, 110.0);

        let before = store.corpus_updated_at().await.unwrap().unwrap();
        assert_eq!(store.delete_video("v1").await.unwrap(), 2);
        assert!(store.get_video("v1").await.unwrap().is_none());
        assert_eq!(store.corpus().await.unwrap().len(), 1);
        assert!(store.corpus_updated_at().await.unwrap().unwrap() >= before);

        assert!(matches!(
            store.delete_video("v1").await,
            Err(LecternError::VideoNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_replace_video_swaps_chunks() {
        let (store, chunks) = seeded().await;

        let fresh = vec![Chunk::new("v1", 0.0, 45.0, "multilayer perceptron", 0)];
        let replaced = store.replace_video(&video("v1", "Chapter 1"), &fresh).await.unwrap();

        let mut expected = vec![chunks[0].id.clone(), chunks[1].id.clone()];
        let mut replaced = replaced;
        expected.sort();
        replaced.sort();
        assert_eq!(replaced, expected);
        assert_eq!(store.chunks_for_video("v1").await.unwrap(), fresh);
        assert_eq!(store.chunks_for_video("v2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_replace_video_rolls_back_on_failure() {
        let (store, chunks) = seeded().await;

        // The chunk points at a video that does not exist, so the foreign key rejects it.
        let orphan = vec![Chunk::new("ghost", 0.0, 10.0, "orphan", 0)];
        assert!(store.replace_video(&video("v1", "Chapter 1"), &orphan).await.is_err());

        let kept = store.chunks_for_video("v1").await.unwrap();
        assert_eq!(kept, chunks[..2].to_vec());
    }

    #[tokio::test]
    async fn test_busy_connection_does_not_block_deadline() {
        let (store, chunks) = seeded().await;

        let conn = Arc::clone(&store.conn);
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _guard = conn.lock().unwrap();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(500));
        });
        locked_rx.recv().unwrap();

        let started = Instant::now();
        let result = deadline::within(
            Service::MetadataStore,
            Duration::from_millis(50),
            store.fetch_chunks(&[chunks[0].id.clone()]),
        )
        .await;

        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(matches!(
            result,
            Err(LecternError::Timeout {
                service: Service::MetadataStore,
                ..
            })
        ));
        holder.join().unwrap();
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        assert!(store.corpus().await.unwrap().is_empty());
        assert!(store.fetch_chunks(&[]).await.unwrap().is_empty());
        assert!(store.corpus_updated_at().await.unwrap().is_none());
    }
}
