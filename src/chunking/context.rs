//! Situational context for chunks.
//!
//! Each chunk gets a short prefix describing where it sits in the lecture,
//! written by a [`TextGenerator`] from the chunk, its neighbours and the video
//! metadata. When generation is unavailable the prefix falls back to a fixed
//! template, so enrichment never fails ingestion.

use super::Chunk;
use crate::config::{ContextSettings, Prompts};
use crate::deadline;
use crate::error::Service;
use crate::llm::{Generation, TextGenerator};
use crate::transcript::VideoMetadata;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tunables for context generation.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub enabled: bool,
    /// Output token budget for the first attempt.
    pub token_budget: u32,
    /// Added to the budget after each truncated attempt.
    pub budget_increment: u32,
    pub max_attempts: u32,
    pub max_concurrent: usize,
    /// Deadline for one generation call.
    pub timeout: Duration,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token_budget: 200,
            budget_increment: 100,
            max_attempts: 3,
            max_concurrent: 4,
            timeout: Duration::from_secs(60),
        }
    }
}

impl From<&ContextSettings> for ContextConfig {
    fn from(settings: &ContextSettings) -> Self {
        Self {
            enabled: settings.enabled,
            token_budget: settings.token_budget,
            budget_increment: settings.budget_increment,
            max_attempts: settings.max_attempts.max(1),
            max_concurrent: settings.max_concurrent.max(1),
            timeout: settings.timeout(),
        }
    }
}

/// Why a chunk received the template prefix instead of a generated one.
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackReason {
    /// Generation is switched off or no generator is configured.
    Disabled,
    /// Every attempt ran out of output budget.
    BudgetExhausted { attempts: u32 },
    /// The generator failed for a reason other than budget.
    GenerationFailed(String),
    /// The generator answered with nothing usable.
    EmptyResponse,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::Disabled => write!(f, "context generation disabled"),
            FallbackReason::BudgetExhausted { attempts } => {
                write!(f, "token budget exhausted after {} attempts", attempts)
            }
            FallbackReason::GenerationFailed(e) => write!(f, "generation failed: {}", e),
            FallbackReason::EmptyResponse => write!(f, "empty response"),
        }
    }
}

/// Prefix chosen for one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextOutcome {
    Generated { prefix: String, attempts: u32 },
    Fallback { prefix: String, reason: FallbackReason },
}

impl ContextOutcome {
    pub fn prefix(&self) -> &str {
        match self {
            ContextOutcome::Generated { prefix, .. } | ContextOutcome::Fallback { prefix, .. } => {
                prefix
            }
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ContextOutcome::Fallback { .. })
    }
}

/// Counts from one [`ContextEnricher::enrich`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentReport {
    pub generated: usize,
    pub fallbacks: usize,
}

/// Retry state for budget-truncated generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BudgetRetry {
    attempt: u32,
    budget: u32,
}

impl BudgetRetry {
    fn first(budget: u32) -> Self {
        Self { attempt: 1, budget }
    }

    /// The next attempt with a larger budget, or `None` once attempts run out.
    fn escalate(self, config: &ContextConfig) -> Option<Self> {
        (self.attempt < config.max_attempts).then(|| Self {
            attempt: self.attempt + 1,
            budget: self.budget.saturating_add(config.budget_increment),
        })
    }
}

/// Writes situational prefixes for chunks.
pub struct ContextEnricher {
    generator: Option<Arc<dyn TextGenerator>>,
    prompts: Prompts,
    config: ContextConfig,
}

impl ContextEnricher {
    pub fn new(generator: Arc<dyn TextGenerator>, prompts: Prompts, config: ContextConfig) -> Self {
        Self {
            generator: Some(generator),
            prompts,
            config,
        }
    }

    /// An enricher that only ever uses the fallback template.
    pub fn templated(prompts: Prompts) -> Self {
        Self {
            generator: None,
            prompts,
            config: ContextConfig {
                enabled: false,
                ..ContextConfig::default()
            },
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Produce a prefix for `chunk`. Never fails.
    pub async fn context_for(
        &self,
        chunk: &Chunk,
        previous: Option<&Chunk>,
        next: Option<&Chunk>,
        video: &VideoMetadata,
    ) -> ContextOutcome {
        let generator = match (&self.generator, self.config.enabled) {
            (Some(generator), true) => generator,
            _ => return self.fallback(chunk, video, FallbackReason::Disabled),
        };

        let mut retry = BudgetRetry::first(self.config.token_budget);

        loop {
            let prompt = self.user_prompt(chunk, previous, next, video, retry.budget);
            let call = generator.generate(&prompt, &self.prompts.context.system, retry.budget);

            match deadline::within(Service::Generation, self.config.timeout, call).await {
                Ok(Generation::Complete(text)) => {
                    let prefix = text.trim();
                    if prefix.is_empty() {
                        return self.fallback(chunk, video, FallbackReason::EmptyResponse);
                    }
                    return ContextOutcome::Generated {
                        prefix: prefix.to_string(),
                        attempts: retry.attempt,
                    };
                }
                Ok(Generation::BudgetExceeded { budget, .. }) => match retry.escalate(&self.config) {
                    Some(next_retry) => {
                        debug!(
                            "Chunk {} exceeded {} tokens, retrying with {}",
                            chunk.order, budget, next_retry.budget
                        );
                        retry = next_retry;
                    }
                    None => {
                        let reason = FallbackReason::BudgetExhausted {
                            attempts: retry.attempt,
                        };
                        return self.fallback(chunk, video, reason);
                    }
                },
                Err(e) => {
                    return self.fallback(chunk, video, FallbackReason::GenerationFailed(e.to_string()));
                }
            }
        }
    }

    /// Set the contextualized text of every chunk, in order.
    ///
    /// Up to `max_concurrent` generations run at once; each chunk sees its
    /// original neighbours regardless of completion order.
    pub async fn enrich(&self, chunks: &mut [Chunk], video: &VideoMetadata) -> EnrichmentReport {
        if chunks.is_empty() {
            return EnrichmentReport::default();
        }

        info!(
            "Generating context for {} chunks of {}",
            chunks.len(),
            video.id
        );

        let outcomes: Vec<ContextOutcome> = {
            let snapshot: &[Chunk] = chunks;
            let mut results: Vec<(usize, ContextOutcome)> = stream::iter(0..snapshot.len())
                .map(|i| async move {
                    let previous = i.checked_sub(1).map(|p| &snapshot[p]);
                    let next = snapshot.get(i + 1);
                    (i, self.context_for(&snapshot[i], previous, next, video).await)
                })
                .buffer_unordered(self.config.max_concurrent.max(1))
                .collect()
                .await;
            results.sort_by_key(|(i, _)| *i);
            results.into_iter().map(|(_, outcome)| outcome).collect()
        };

        let mut report = EnrichmentReport::default();
        for (chunk, outcome) in chunks.iter_mut().zip(outcomes) {
            if let ContextOutcome::Fallback { reason, .. } = &outcome {
                if *reason != FallbackReason::Disabled {
                    warn!("Using fallback context for chunk {}: {}", chunk.order, reason);
                }
                report.fallbacks += 1;
            } else {
                report.generated += 1;
            }
            chunk.set_context(outcome.prefix());
        }

        report
    }

    fn user_prompt(
        &self,
        chunk: &Chunk,
        previous: Option<&Chunk>,
        next: Option<&Chunk>,
        video: &VideoMetadata,
        budget: u32,
    ) -> String {
        let mut vars = self.video_vars(chunk, video);
        vars.insert("token_budget".to_string(), budget.to_string());
        vars.insert("text".to_string(), chunk.raw_text.clone());
        vars.insert(
            "previous".to_string(),
            previous
                .map(|p| format!("Previous excerpt (ends at {:.1}s): {}...", p.end_time, p.raw_text))
                .unwrap_or_default(),
        );
        vars.insert(
            "next".to_string(),
            next.map(|n| format!("Next excerpt (starts at {:.1}s): {}...", n.start_time, n.raw_text))
                .unwrap_or_default(),
        );
        self.prompts.render_with_custom(&self.prompts.context.user, &vars)
    }

    fn fallback(&self, chunk: &Chunk, video: &VideoMetadata, reason: FallbackReason) -> ContextOutcome {
        let vars = self.video_vars(chunk, video);
        ContextOutcome::Fallback {
            prefix: self
                .prompts
                .render_with_custom(&self.prompts.context.fallback, &vars),
            reason,
        }
    }

    fn video_vars(&self, chunk: &Chunk, video: &VideoMetadata) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("chapter".to_string(), video.chapter_label());
        vars.insert("title".to_string(), video.clean_title());
        vars.insert("start".to_string(), format!("{:.1}", chunk.start_time));
        vars.insert("end".to_string(), format!("{:.1}", chunk.end_time));
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LecternError, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Scripted generator: pops one response per call and records budgets.
    struct Scripted {
        responses: Mutex<Vec<Result<Generation>>>,
        budgets: Mutex<Vec<u32>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(mut responses: Vec<Result<Generation>>) -> Arc<Self> {
            responses.reverse();
            Arc::new(Self {
                responses: Mutex::new(responses),
                budgets: Mutex::new(Vec::new()),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn generate(&self, prompt: &str, _system: &str, max: u32) -> Result<Generation> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.budgets.lock().unwrap().push(max);
            assert!(prompt.contains(&max.to_string()));
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(Generation::Complete(format!("Context for {}", max))))
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    /// Echoes the chunk's own text so ordering can be checked.
    struct Echo;

    #[async_trait]
    impl TextGenerator for Echo {
        async fn generate(&self, prompt: &str, _system: &str, _max: u32) -> Result<Generation> {
            let line = prompt
                .lines()
                .find(|l| l.starts_with("chunk-"))
                .unwrap_or("none")
                .to_string();
            Ok(Generation::Complete(format!("about {}", line)))
        }

        fn model(&self) -> &str {
            "echo"
        }
    }

    struct Slow;

    #[async_trait]
    impl TextGenerator for Slow {
        async fn generate(&self, _prompt: &str, _system: &str, _max: u32) -> Result<Generation> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Generation::Complete("too late".to_string()))
        }

        fn model(&self) -> &str {
            "slow"
        }
    }

    fn video() -> VideoMetadata {
        VideoMetadata::new("4", "[CS431] Part 1: Convolutions", "https://youtu.be/conv")
    }

    fn chunk() -> Chunk {
        Chunk::new("v", 0.0, 60.0, "kernels slide over the image", 0)
    }

    fn exceeded(budget: u32) -> Result<Generation> {
        Ok(Generation::BudgetExceeded {
            partial: String::new(),
            budget,
        })
    }

    #[tokio::test]
    async fn test_budget_escalates_then_succeeds() {
        let generator = Scripted::new(vec![exceeded(200), exceeded(300)]);
        let enricher = ContextEnricher::new(generator.clone(), Prompts::default(), ContextConfig::default());

        let outcome = enricher.context_for(&chunk(), None, None, &video()).await;

        assert_eq!(
            outcome,
            ContextOutcome::Generated {
                prefix: "Context for 400".to_string(),
                attempts: 3
            }
        );
        assert_eq!(*generator.budgets.lock().unwrap(), vec![200, 300, 400]);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_falls_back() {
        let generator = Scripted::new(vec![exceeded(200), exceeded(300), exceeded(400)]);
        let enricher = ContextEnricher::new(generator.clone(), Prompts::default(), ContextConfig::default());

        let outcome = enricher.context_for(&chunk(), None, None, &video()).await;

        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            outcome,
            ContextOutcome::Fallback {
                prefix: "Chapter 4, Video: Convolutions, Timestamp: 0.0s-60.0s".to_string(),
                reason: FallbackReason::BudgetExhausted { attempts: 3 },
            }
        );
    }

    #[tokio::test]
    async fn test_other_errors_do_not_retry() {
        let generator = Scripted::new(vec![Err(LecternError::upstream(
            Service::Generation,
            "rate limited",
        ))]);
        let enricher = ContextEnricher::new(generator.clone(), Prompts::default(), ContextConfig::default());

        let outcome = enricher.context_for(&chunk(), None, None, &video()).await;

        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            outcome,
            ContextOutcome::Fallback {
                reason: FallbackReason::GenerationFailed(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_empty_response_falls_back() {
        let generator = Scripted::new(vec![Ok(Generation::Complete("   ".to_string()))]);
        let enricher = ContextEnricher::new(generator, Prompts::default(), ContextConfig::default());

        let outcome = enricher.context_for(&chunk(), None, None, &video()).await;
        assert!(matches!(
            outcome,
            ContextOutcome::Fallback {
                reason: FallbackReason::EmptyResponse,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_timeout_falls_back() {
        let config = ContextConfig {
            timeout: Duration::from_millis(50),
            ..ContextConfig::default()
        };
        let enricher = ContextEnricher::new(Arc::new(Slow), Prompts::default(), config);

        let outcome = enricher.context_for(&chunk(), None, None, &video()).await;
        assert!(outcome.is_fallback());
    }

    #[tokio::test]
    async fn test_templated_never_calls_generator() {
        let enricher = ContextEnricher::templated(Prompts::default());
        let outcome = enricher.context_for(&chunk(), None, None, &video()).await;
        assert_eq!(
            outcome,
            ContextOutcome::Fallback {
                prefix: "Chapter 4, Video: Convolutions, Timestamp: 0.0s-60.0s".to_string(),
                reason: FallbackReason::Disabled,
            }
        );
    }

    #[tokio::test]
    async fn test_fallback_does_not_repeat_chapter_word() {
        let enricher = ContextEnricher::templated(Prompts::default());
        let named = VideoMetadata::new("Chapter 8", "[CS431] Part 1: LSTM", "https://youtu.be/lstm");
        let outcome = enricher.context_for(&chunk(), None, None, &named).await;
        assert_eq!(
            outcome.prefix(),
            "Chapter 8, Video: LSTM, Timestamp: 0.0s-60.0s"
        );
    }

    #[tokio::test]
    async fn test_enrich_keeps_order_and_raw_suffix() {
        let mut prompts = Prompts::default();
        prompts.context.user = "{{text}}\n{{previous}}\n{{next}}".to_string();
        let config = ContextConfig {
            max_concurrent: 3,
            ..ContextConfig::default()
        };
        let enricher = ContextEnricher::new(Arc::new(Echo), prompts, config);

        let mut chunks: Vec<Chunk> = (0..8)
            .map(|i| Chunk::new("v", i as f64 * 50.0, i as f64 * 50.0 + 60.0, format!("chunk-{}", i), i))
            .collect();

        let report = enricher.enrich(&mut chunks, &video()).await;

        assert_eq!(report, EnrichmentReport { generated: 8, fallbacks: 0 });
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.raw_text, format!("chunk-{}", i));
            assert_eq!(c.contextualized_text, format!("about chunk-{}\n\nchunk-{}", i, i));
            assert!(c.contextualized_text.ends_with(&c.raw_text));
        }
    }
}
