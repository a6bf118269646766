//! Local query-term overlap scorer.
//!
//! A dependency-free stand-in for a cross-encoder. Scores run on the
//! blocking pool so a large batch does not hold up the async executor.

use super::RelevanceModel;
use crate::error::{LecternError, Result};
use async_trait::async_trait;
use std::collections::HashSet;

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "to", "of", "in", "for", "on",
    "with", "at", "by", "from", "and", "or", "but", "it", "this", "that", "what", "how", "why",
    "which", "do", "does",
];

/// Scores by how many query terms the text contains, with diminishing
/// returns on repeats and a mild length penalty. Scores lie in `[0, 1)`.
pub struct TermOverlapModel;

impl TermOverlapModel {
    pub fn score_one(query: &str, text: &str) -> f32 {
        let stopwords: HashSet<&str> = STOPWORDS.iter().copied().collect();
        let query = query.to_lowercase();
        let terms: Vec<&str> = query
            .split_whitespace()
            .filter(|w| w.chars().count() > 1 && !stopwords.contains(w))
            .collect();

        if terms.is_empty() {
            return 0.0;
        }

        let text = text.to_lowercase();
        let words: Vec<&str> = text.split_whitespace().collect();
        let length_norm = 1.0 / (1.0 + (words.len().max(1) as f32 / 50.0).sqrt());

        let mut total = 0.0f32;
        let mut matched = 0usize;
        for (pos, term) in terms.iter().enumerate() {
            let tf = words.iter().filter(|w| *w == term).count() as f32;
            if tf > 0.0 {
                matched += 1;
                let specificity = (1.0 + term.chars().count() as f32).ln();
                let position_weight = 1.0 / (1.0 + pos as f32 * 0.1);
                total += tf.sqrt() * specificity * position_weight * length_norm;
            }
        }

        let raw = total + 0.3 * matched as f32 / terms.len() as f32;
        raw / (raw + 1.0)
    }
}

#[async_trait]
impl RelevanceModel for TermOverlapModel {
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        let query = query.to_string();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || {
            texts
                .iter()
                .map(|t| TermOverlapModel::score_one(&query, t))
                .collect::<Vec<f32>>()
        })
        .await
        .map_err(|e| LecternError::Task(format!("overlap scoring failed: {}", e)))
    }

    fn name(&self) -> &str {
        "term-overlap"
    }
}
