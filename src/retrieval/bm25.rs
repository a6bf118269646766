//! Okapi BM25 lexical index over contextualized chunk text.
//!
//! The index is an immutable [`Bm25Snapshot`] behind a single shared
//! pointer. A rebuild constructs a complete new snapshot off the async
//! executor and then swaps the pointer, so a query sees either the old
//! snapshot or the new one and never a partial build.

use crate::deadline;
use crate::error::{LecternError, Result, Service};
use crate::metadata::{CorpusEntry, MetadataStore};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// BM25 free parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f64,
    /// Document-length normalisation.
    pub b: f64,
    /// Floor for negative IDFs, as a fraction of the mean IDF.
    pub epsilon: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            epsilon: 0.25,
        }
    }
}

/// Lowercase and split on whitespace. No stemming.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// A lexical match.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalHit {
    pub chunk_id: String,
    pub score: f64,
}

/// Corpus statistics frozen at build time.
#[derive(Debug)]
pub struct Bm25Snapshot {
    chunk_ids: Vec<String>,
    chapters: Vec<String>,
    term_freqs: Vec<HashMap<String, u32>>,
    doc_lens: Vec<usize>,
    avgdl: f64,
    idf: HashMap<String, f64>,
    params: Bm25Params,
    built_at: DateTime<Utc>,
}

impl Bm25Snapshot {
    /// Compute statistics over `corpus`, which was read from the store at
    /// `built_at`.
    pub fn build(corpus: Vec<CorpusEntry>, params: Bm25Params, built_at: DateTime<Utc>) -> Self {
        let mut chunk_ids = Vec::with_capacity(corpus.len());
        let mut chapters = Vec::with_capacity(corpus.len());
        let mut term_freqs = Vec::with_capacity(corpus.len());
        let mut doc_lens = Vec::with_capacity(corpus.len());
        let mut doc_freqs: HashMap<String, u32> = HashMap::new();
        let mut total_len = 0usize;

        for entry in corpus {
            let tokens = tokenize(&entry.text);
            total_len += tokens.len();
            doc_lens.push(tokens.len());

            let mut freqs: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *freqs.entry(token).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *doc_freqs.entry(term.clone()).or_insert(0) += 1;
            }

            term_freqs.push(freqs);
            chunk_ids.push(entry.chunk_id);
            chapters.push(entry.chapter);
        }

        let n = chunk_ids.len() as f64;
        let avgdl = if chunk_ids.is_empty() {
            0.0
        } else {
            total_len as f64 / n
        };

        let mut idf: HashMap<String, f64> = HashMap::with_capacity(doc_freqs.len());
        let mut idf_sum = 0.0;
        let mut negative = Vec::new();
        for (term, df) in doc_freqs {
            let df = df as f64;
            let value = (n - df + 0.5).ln() - (df + 0.5).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(term.clone());
            }
            idf.insert(term, value);
        }

        // Terms in more than half the corpus get a small positive floor
        // instead of a negative weight.
        if !idf.is_empty() {
            let floor = params.epsilon * idf_sum / idf.len() as f64;
            for term in negative {
                idf.insert(term, floor);
            }
        }

        Self {
            chunk_ids,
            chapters,
            term_freqs,
            doc_lens,
            avgdl,
            idf,
            params,
            built_at,
        }
    }

    pub fn len(&self) -> usize {
        self.chunk_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_ids.is_empty()
    }

    /// When the corpus behind this snapshot was read. Writes after this
    /// instant may be missing.
    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// BM25 score of every document for `query`, in corpus order.
    pub fn scores(&self, query: &str) -> Vec<f64> {
        let query_terms = tokenize(query);
        let Bm25Params { k1, b, .. } = self.params;
        let avgdl = if self.avgdl > 0.0 { self.avgdl } else { 1.0 };

        self.term_freqs
            .iter()
            .zip(&self.doc_lens)
            .map(|(freqs, &len)| {
                let norm = k1 * (1.0 - b + b * len as f64 / avgdl);
                query_terms
                    .iter()
                    .map(|term| {
                        let tf = freqs.get(term).copied().unwrap_or(0) as f64;
                        if tf == 0.0 {
                            return 0.0;
                        }
                        let idf = self.idf.get(term).copied().unwrap_or(0.0);
                        idf * (tf * (k1 + 1.0)) / (tf + norm)
                    })
                    .sum()
            })
            .collect()
    }

    /// Top `top_k` documents by descending score. Documents scoring zero or
    /// less share no useful term with the query and are never returned.
    /// Equal scores keep corpus order.
    pub fn search(&self, query: &str, top_k: usize, chapters: Option<&[String]>) -> Vec<LexicalHit> {
        let mut scored: Vec<(usize, f64)> = self
            .scores(query)
            .into_iter()
            .enumerate()
            .filter(|&(_, score)| score > 0.0)
            .filter(|&(i, _)| chapters.map_or(true, |set| set.contains(&self.chapters[i])))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(i, score)| LexicalHit {
                chunk_id: self.chunk_ids[i].clone(),
                score,
            })
            .collect()
    }
}

/// Lazily built, atomically swapped BM25 index over the metadata corpus.
pub struct Bm25Index {
    store: Arc<dyn MetadataStore>,
    params: Bm25Params,
    fetch_timeout: Duration,
    current: RwLock<Option<Arc<Bm25Snapshot>>>,
    build_lock: Mutex<()>,
}

impl Bm25Index {
    pub fn new(store: Arc<dyn MetadataStore>, fetch_timeout: Duration) -> Self {
        Self {
            store,
            params: Bm25Params::default(),
            fetch_timeout,
            current: RwLock::new(None),
            build_lock: Mutex::new(()),
        }
    }

    /// The published snapshot, if one has been built.
    pub fn current(&self) -> Option<Arc<Bm25Snapshot>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The published snapshot, building it on first use.
    pub async fn snapshot(&self) -> Result<Arc<Bm25Snapshot>> {
        if let Some(snapshot) = self.current() {
            return Ok(snapshot);
        }

        let _guard = self.build_lock.lock().await;
        // Another query may have finished the build while we waited.
        if let Some(snapshot) = self.current() {
            return Ok(snapshot);
        }
        self.build_and_publish().await
    }

    /// Build a fresh snapshot from the current corpus and publish it.
    #[instrument(skip(self))]
    pub async fn rebuild(&self) -> Result<Arc<Bm25Snapshot>> {
        let _guard = self.build_lock.lock().await;
        self.build_and_publish().await
    }

    /// Drop the published snapshot so the next query rebuilds it.
    pub fn invalidate(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Whether the corpus changed after the published snapshot was built.
    pub async fn is_stale(&self) -> Result<bool> {
        let Some(snapshot) = self.current() else {
            return Ok(false);
        };
        let updated = deadline::within(
            Service::MetadataStore,
            self.fetch_timeout,
            self.store.corpus_updated_at(),
        )
        .await?;
        Ok(updated.is_some_and(|t| t > snapshot.built_at()))
    }

    /// Top `top_k` lexical matches for `query`, optionally restricted to chapters.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        chapters: Option<&[String]>,
    ) -> Result<Vec<LexicalHit>> {
        let snapshot = self.snapshot().await?;
        if snapshot.is_empty() {
            return Ok(Vec::new());
        }

        let query = query.to_string();
        let chapters = chapters.map(<[String]>::to_vec);
        let hits = tokio::task::spawn_blocking(move || {
            snapshot.search(&query, top_k, chapters.as_deref())
        })
        .await
        .map_err(|e| LecternError::Task(format!("BM25 search task failed: {}", e)))?;

        debug!("BM25 returned {} hits", hits.len());
        Ok(hits)
    }

    async fn build_and_publish(&self) -> Result<Arc<Bm25Snapshot>> {
        // Stamped before the read, so a write racing the read marks the
        // snapshot stale instead of being silently missed.
        let read_at = Utc::now();
        let corpus = deadline::within(Service::MetadataStore, self.fetch_timeout, self.store.corpus()).await?;
        let params = self.params;

        let snapshot = tokio::task::spawn_blocking(move || Bm25Snapshot::build(corpus, params, read_at))
            .await
            .map_err(|e| LecternError::Task(format!("BM25 build task failed: {}", e)))?;
        let snapshot = Arc::new(snapshot);

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
        info!("Built BM25 index over {} chunks", snapshot.len());
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::Chunk;
    use crate::metadata::{ChunkMetadata, SqliteMetadataStore, VideoRecord};
    use crate::transcript::VideoMetadata;
    use async_trait::async_trait;

    fn entry(id: &str, chapter: &str, text: &str) -> CorpusEntry {
        CorpusEntry {
            chunk_id: id.to_string(),
            chapter: chapter.to_string(),
            text: text.to_string(),
        }
    }

    fn build(corpus: Vec<CorpusEntry>) -> Bm25Snapshot {
        Bm25Snapshot::build(corpus, Bm25Params::default(), Utc::now())
    }

    fn corpus() -> Vec<CorpusEntry> {
        vec![
            entry("a", "1", "the perceptron learns a linear boundary"),
            entry("b", "1", "gradient descent minimises the loss"),
            entry("c", "2", "the attention mechanism weighs tokens"),
            entry("d", "2", "dropout regularises the network"),
            entry("e", "3", "convolution kernels slide over the image"),
        ]
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("  Hello\tWORLD\nagain "), vec!["hello", "world", "again"]);
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn test_matches_rank_bm25_reference() {
        // Two documents, one shared query term appearing once in doc 0.
        let snapshot = build(vec![entry("x", "1", "alpha beta"), entry("y", "1", "gamma delta epsilon")]);
        let scores = snapshot.scores("alpha");

        // idf = ln(2 - 1 + 0.5) - ln(1 + 0.5) = 0, so a matching term adds nothing.
        assert_eq!(scores, vec![0.0, 0.0]);

        let snapshot = build(corpus());
        let scores = snapshot.scores("attention");
        let n: f64 = 5.0;
        let idf = (n - 1.0 + 0.5).ln() - (1.0_f64 + 0.5).ln();
        let avgdl = (6.0 + 5.0 + 5.0 + 4.0 + 6.0) / 5.0;
        let expected = idf * 2.5 / (1.0 + 1.5 * (1.0 - 0.75 + 0.75 * 5.0 / avgdl));
        assert!((scores[2] - expected).abs() < 1e-12);
        assert_eq!(scores[0], 0.0);
    }

    #[test]
    fn test_absent_term_contributes_nothing() {
        let snapshot = build(corpus());
        let with = snapshot.scores("dropout");
        let with_absent = snapshot.scores("dropout quaternion");
        assert_eq!(with, with_absent);
    }

    #[test]
    fn test_more_occurrences_score_higher() {
        let snapshot = build(vec![
            entry("once", "1", "kernel one two three"),
            entry("twice", "1", "kernel kernel two three"),
            entry("none", "1", "four five six seven"),
            entry("none2", "1", "eight nine ten eleven"),
            entry("none3", "1", "twelve thirteen fourteen fifteen"),
        ]);
        let scores = snapshot.scores("kernel");
        assert!(scores[1] > scores[0]);
        assert!(scores[0] > 0.0);
    }

    #[test]
    fn test_search_excludes_zero_and_filters_chapters() {
        let snapshot = build(corpus());

        let hits = snapshot.search("attention dropout", 10, None);
        let ids: Vec<_> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"c") && ids.contains(&"d"));

        assert!(snapshot.search("quaternion", 10, None).is_empty());

        let chapters = vec!["1".to_string()];
        let hits = snapshot.search("attention perceptron", 10, Some(&chapters));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "a");
    }

    #[test]
    fn test_common_term_gets_positive_floor() {
        let snapshot = build(corpus());
        // "the" appears in every document, so its raw idf is negative.
        let hits = snapshot.search("the", 10, None);
        assert_eq!(hits.len(), 5);
        assert!(hits.iter().all(|h| h.score > 0.0));
    }

    #[test]
    fn test_empty_corpus() {
        let snapshot = build(Vec::new());
        assert!(snapshot.is_empty());
        assert!(snapshot.search("anything", 10, None).is_empty());
    }

    async fn store_with(texts: &[&str]) -> Arc<SqliteMetadataStore> {
        let store = Arc::new(SqliteMetadataStore::in_memory().unwrap());
        let video = VideoMetadata::new("1", "Lecture", "https://youtu.be/l1");
        store.upsert_video(&video).await.unwrap();
        let chunks: Vec<Chunk> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| Chunk::new(&video.id, i as f64 * 50.0, i as f64 * 50.0 + 60.0, *t, i as u32))
            .collect();
        store.insert_chunks(&chunks).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_lazy_build_and_rebuild_swap() {
        let store = store_with(&[
            "recurrent networks",
            "convolutional networks",
            "pooling layers",
            "batch normalisation",
            "residual connections",
        ])
        .await;
        let index = Bm25Index::new(store.clone(), Duration::from_secs(5));

        assert!(index.current().is_none());
        let hits = index.search("recurrent", 10, None).await.unwrap();
        assert_eq!(hits.len(), 1);

        let first = index.current().unwrap();
        assert_eq!(first.len(), 5);

        let video = store.list_videos().await.unwrap()[0].video.clone();
        store
            .insert_chunks(&[Chunk::new(&video.id, 200.0, 260.0, "recurrent cells again", 9)])
            .await
            .unwrap();
        assert!(index.is_stale().await.unwrap());

        // The old snapshot stays usable while a new one is published.
        let rebuilt = index.rebuild().await.unwrap();
        assert_eq!(first.len(), 5);
        assert_eq!(rebuilt.len(), 6);
        assert!(!Arc::ptr_eq(&first, &index.current().unwrap()));
        assert_eq!(index.search("recurrent", 10, None).await.unwrap().len(), 2);
        assert!(!index.is_stale().await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_first_queries_build_once() {
        let store = store_with(&["alpha", "beta", "gamma"]).await;
        let index = Arc::new(Bm25Index::new(store, Duration::from_secs(5)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let index = index.clone();
                tokio::spawn(async move { index.snapshot().await.unwrap() })
            })
            .collect();

        let mut snapshots = Vec::new();
        for handle in handles {
            snapshots.push(handle.await.unwrap());
        }
        assert!(snapshots.iter().all(|s| Arc::ptr_eq(s, &snapshots[0])));
    }

    #[tokio::test]
    async fn test_invalidate_forces_rebuild() {
        let store = store_with(&["alpha"]).await;
        let index = Bm25Index::new(store, Duration::from_secs(5));

        let first = index.snapshot().await.unwrap();
        index.invalidate();
        assert!(index.current().is_none());
        let second = index.snapshot().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    /// Store where another writer commits a chunk right after every corpus read.
    struct RacingWriter {
        inner: SqliteMetadataStore,
        video: VideoMetadata,
        writes: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl MetadataStore for RacingWriter {
        async fn upsert_video(&self, video: &VideoMetadata) -> Result<()> {
            self.inner.upsert_video(video).await
        }

        async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<usize> {
            self.inner.insert_chunks(chunks).await
        }

        async fn replace_video(&self, video: &VideoMetadata, chunks: &[Chunk]) -> Result<Vec<String>> {
            self.inner.replace_video(video, chunks).await
        }

        async fn update_contextualized_text(&self, chunk_id: &str, text: &str) -> Result<()> {
            self.inner.update_contextualized_text(chunk_id, text).await
        }

        async fn fetch_chunks(&self, ids: &[String]) -> Result<HashMap<String, ChunkMetadata>> {
            self.inner.fetch_chunks(ids).await
        }

        async fn corpus(&self) -> Result<Vec<CorpusEntry>> {
            let corpus = self.inner.corpus().await?;
            let n = self.writes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let late = Chunk::new(&self.video.id, 500.0 + n as f64, 560.0 + n as f64, "late arrival", 100 + n);
            self.inner.insert_chunks(&[late]).await?;
            Ok(corpus)
        }

        async fn chunks_for_video(&self, video_id: &str) -> Result<Vec<Chunk>> {
            self.inner.chunks_for_video(video_id).await
        }

        async fn get_video(&self, video_id: &str) -> Result<Option<VideoMetadata>> {
            self.inner.get_video(video_id).await
        }

        async fn delete_video(&self, video_id: &str) -> Result<usize> {
            self.inner.delete_video(video_id).await
        }

        async fn list_videos(&self) -> Result<Vec<VideoRecord>> {
            self.inner.list_videos().await
        }

        async fn corpus_updated_at(&self) -> Result<Option<DateTime<Utc>>> {
            self.inner.corpus_updated_at().await
        }
    }

    #[tokio::test]
    async fn test_write_during_build_marks_snapshot_stale() {
        let inner = SqliteMetadataStore::in_memory().unwrap();
        let video = VideoMetadata::new("1", "Lecture", "https://youtu.be/l1");
        inner.upsert_video(&video).await.unwrap();
        inner
            .insert_chunks(&[Chunk::new(&video.id, 0.0, 60.0, "early words", 0)])
            .await
            .unwrap();

        let store = Arc::new(RacingWriter {
            inner,
            video,
            writes: std::sync::atomic::AtomicU32::new(0),
        });
        let index = Bm25Index::new(store.clone(), Duration::from_secs(5));

        let snapshot = index.rebuild().await.unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.inner.corpus().await.unwrap().len(), 2);
        assert!(index.is_stale().await.unwrap());
        assert!(index.search("late", 10, None).await.unwrap().is_empty());
    }
}
