//! SQLite-based vector index implementation.
//!
//! Uses SQLite with cosine similarity computed in Rust for simplicity.
//! For large corpora, consider the sqlite-vec extension or a dedicated
//! vector database behind the same trait.

use super::{check_upsert_lengths, cosine_similarity, rank_hits, ChunkPayload, SearchFilter, VectorHit, VectorIndex};
use crate::error::{LecternError, Result, Service};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS chunk_vectors (
        id TEXT PRIMARY KEY,
        video_id TEXT NOT NULL,
        chapter TEXT NOT NULL,
        payload_json TEXT NOT NULL,
        embedding BLOB NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_chunk_vectors_video_id ON chunk_vectors(video_id);
    CREATE INDEX IF NOT EXISTS idx_chunk_vectors_chapter ON chunk_vectors(chapter);
"#;

/// SQLite-based vector index.
pub struct SqliteVectorIndex {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteVectorIndex {
    /// Open (or create) a vector index at `path`.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Initialized SQLite vector index at {:?}", path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory SQLite vector index (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `op` on the blocking pool; the full-table scan in `search` must
    /// not hold up the async workers.
    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|e| {
                LecternError::upstream(Service::VectorStore, format!("Failed to acquire lock: {}", e))
            })?;
            op(&guard)
        })
        .await
        .map_err(|e| LecternError::Task(format!("vector index task failed: {}", e)))?
    }

    /// Serialize embedding to bytes.
    fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Deserialize embedding from bytes.
    fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| {
                let arr: [u8; 4] = chunk.try_into().unwrap_or_default();
                f32::from_le_bytes(arr)
            })
            .collect()
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    #[instrument(skip_all, fields(count = ids.len()))]
    async fn upsert(&self, ids: &[String], vectors: &[Vec<f32>], payloads: &[ChunkPayload]) -> Result<usize> {
        check_upsert_lengths(ids, vectors, payloads)?;

        let ids = ids.to_vec();
        let vectors = vectors.to_vec();
        let payloads = payloads.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;

            for ((id, vector), payload) in ids.iter().zip(&vectors).zip(&payloads) {
                tx.execute(
                    r#"
                    INSERT OR REPLACE INTO chunk_vectors (id, video_id, chapter, payload_json, embedding)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    "#,
                    params![
                        id,
                        payload.video_id,
                        payload.chapter,
                        serde_json::to_string(payload)?,
                        Self::embedding_to_bytes(vector),
                    ],
                )?;
            }

            tx.commit()?;
            info!("Upserted {} vectors", ids.len());
            Ok(ids.len())
        })
        .await
    }

    #[instrument(skip(self, vector, filter))]
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
        score_threshold: Option<f32>,
    ) -> Result<Vec<VectorHit>> {
        let vector = vector.to_vec();
        let filter = filter.cloned();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT id, payload_json, embedding FROM chunk_vectors")?;

            let rows = stmt.query_map([], |row| {
                let id: String = row.get(0)?;
                let payload_json: String = row.get(1)?;
                let embedding_bytes: Vec<u8> = row.get(2)?;
                Ok((id, payload_json, embedding_bytes))
            })?;

            let mut hits = Vec::new();
            for row in rows {
                let (id, payload_json, embedding_bytes) = row?;
                let payload: ChunkPayload = match serde_json::from_str(&payload_json) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("Skipping vector {} with unreadable payload: {}", id, e);
                        continue;
                    }
                };
                if filter.as_ref().is_some_and(|f| !f.matches(&payload)) {
                    continue;
                }
                let score = cosine_similarity(&vector, &Self::bytes_to_embedding(&embedding_bytes));
                hits.push(VectorHit { id, score, payload });
            }

            let hits = rank_hits(hits, top_k, score_threshold);
            debug!("Found {} matching vectors", hits.len());
            Ok(hits)
        })
        .await
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn delete(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let ids = ids.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let mut deleted = 0;
            for id in &ids {
                deleted += tx.execute("DELETE FROM chunk_vectors WHERE id = ?1", params![id])?;
            }
            tx.commit()?;
            debug!("Deleted {} vectors", deleted);
            Ok(deleted)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn delete_by_video(&self, video_id: &str) -> Result<usize> {
        let video_id = video_id.to_string();
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM chunk_vectors WHERE video_id = ?1",
                params![video_id],
            )?;

            info!("Deleted {} vectors for video {}", deleted, video_id);
            Ok(deleted)
        })
        .await
    }

    async fn count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunk_vectors", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }
}
