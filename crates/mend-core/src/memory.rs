//! Similarity-based recall of past (failure -> successful fix) pairs.
//!
//! Embeddings come from the configured endpoint when available, else from a
//! deterministic hashed-token projection. The family used is recorded per
//! pattern and similarity never compares across families.

use crate::clock::Clock;
use crate::error::PatternError;
use crate::llm::EmbeddingClient;
use crate::signature::normalize_error;
use crate::types::{EmbeddingFamily, Pattern, PatternId, PatternMatch};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

pub const EMBEDDING_DIMENSION: usize = 1536;
pub const SAME_CATEGORY_THRESHOLD: f32 = 0.75;
pub const CROSS_CATEGORY_THRESHOLD: f32 = 0.85;
pub const PROMPT_CONTEXT_MATCHES: usize = 3;

pub trait PatternRepository {
    fn insert(&self, pattern: &Pattern) -> Result<(), PatternError>;
    fn all(&self) -> Result<Vec<Pattern>, PatternError>;
    fn count(&self) -> Result<u64, PatternError>;
    fn count_for_repo(&self, repository: &str) -> Result<u64, PatternError>;
    /// Remove the oldest patterns for a repository down to `keep` entries.
    /// Returns the ids removed so the in-memory index can follow.
    fn prune_oldest(&self, repository: &str, keep: usize) -> Result<Vec<PatternId>, PatternError>;
}

#[derive(Debug, Clone)]
pub struct NewPattern {
    pub repository: String,
    pub branch: String,
    pub failure_reason: String,
    pub category: String,
    pub proposed_fix: String,
    pub files_modified: Vec<String>,
    pub fix_commands: Vec<String>,
    pub fix_successful: bool,
    pub risk_score: u8,
    pub resolution_time_ms: i64,
}

/// Deterministic local embedding: sha256 over `(text, chunk)` expanded into
/// u32 words scaled to [0, 1]. Stable across runs and platforms.
pub fn hashed_embedding(category: &str, reason: &str) -> Vec<f32> {
    let text = format!("{category}:{reason}");
    let mut embedding = Vec::with_capacity(EMBEDDING_DIMENSION);
    let mut chunk = 0u32;
    while embedding.len() < EMBEDDING_DIMENSION {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(b":");
        hasher.update(chunk.to_be_bytes());
        let digest = hasher.finalize();
        for window in digest.chunks_exact(4) {
            if embedding.len() >= EMBEDDING_DIMENSION {
                break;
            }
            let word = u32::from_be_bytes([window[0], window[1], window[2], window[3]]);
            embedding.push(word as f32 / u32::MAX as f32);
        }
        chunk += 1;
    }
    embedding
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0) as f32
}

pub struct PatternMemory {
    embedder: Option<Arc<dyn EmbeddingClient>>,
    clock: Arc<dyn Clock>,
    cap_per_repo: usize,
    store_negative: bool,
    index: RwLock<Vec<Pattern>>,
    /// Serializes writes per error signature so two workers observing the
    /// same failure cannot double-insert.
    write_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PatternMemory {
    pub fn new(
        embedder: Option<Arc<dyn EmbeddingClient>>,
        clock: Arc<dyn Clock>,
        cap_per_repo: usize,
        store_negative: bool,
    ) -> Self {
        Self {
            embedder,
            clock,
            cap_per_repo,
            store_negative,
            index: RwLock::new(Vec::new()),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Load every stored pattern into the in-memory index at startup.
    pub fn warm<R: PatternRepository>(&self, repo: &R) -> Result<usize, PatternError> {
        let patterns = repo.all()?;
        let count = patterns.len();
        *self.index.write().expect("pattern index poisoned") = patterns;
        info!(patterns = count, "pattern memory warmed");
        Ok(count)
    }

    fn signature_lock(&self, signature: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.write_locks.lock().expect("pattern locks poisoned");
        map.entry(signature.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn embed(&self, category: &str, signature: &str) -> (Vec<f32>, EmbeddingFamily) {
        if let Some(embedder) = &self.embedder {
            let text = format!("Category: {category}\nError: {signature}");
            match embedder.embed(&text).await {
                Ok(vector) if vector.len() == EMBEDDING_DIMENSION => {
                    return (vector, EmbeddingFamily::Remote);
                }
                Ok(vector) => {
                    warn!(
                        got = vector.len(),
                        expected = EMBEDDING_DIMENSION,
                        "embedding dimension mismatch, using hashed fallback"
                    );
                }
                Err(err) => {
                    warn!(error = %err, "embedding endpoint failed, using hashed fallback");
                }
            }
        }
        (hashed_embedding(category, signature), EmbeddingFamily::Hashed)
    }

    /// Insert a pattern. Only called after confirmed success unless the
    /// negative-example policy is enabled.
    pub async fn store_pattern<R: PatternRepository>(
        &self,
        repo: &R,
        input: NewPattern,
    ) -> Result<Option<Pattern>, PatternError> {
        if input.failure_reason.is_empty() {
            return Err(PatternError::InvalidInput {
                message: "failure_reason must be non-empty".to_string(),
            });
        }
        if !input.fix_successful && !self.store_negative {
            debug!(repository = %input.repository, "skipping failed-fix pattern");
            return Ok(None);
        }

        let error_signature = normalize_error(&input.failure_reason);
        let guard = self.signature_lock(&error_signature);
        let _held = guard.lock().await;

        let (embedding, embedding_family) = self.embed(&input.category, &error_signature).await;
        let pattern = Pattern {
            id: PatternId::generate(),
            repository: input.repository,
            branch: input.branch,
            failure_reason: input.failure_reason,
            category: input.category,
            error_signature,
            proposed_fix: input.proposed_fix,
            files_modified: input.files_modified,
            fix_commands: input.fix_commands,
            fix_successful: input.fix_successful,
            risk_score: input.risk_score,
            resolution_time_ms: input.resolution_time_ms,
            embedding,
            embedding_family,
            created_at: self.clock.now(),
        };

        repo.insert(&pattern)?;
        {
            let mut index = self.index.write().expect("pattern index poisoned");
            index.push(pattern.clone());
        }

        let count = repo.count_for_repo(&pattern.repository)? as usize;
        if count > self.cap_per_repo {
            let removed = repo.prune_oldest(&pattern.repository, self.cap_per_repo)?;
            if !removed.is_empty() {
                let mut index = self.index.write().expect("pattern index poisoned");
                index.retain(|p| !removed.contains(&p.id));
                info!(
                    repository = %pattern.repository,
                    pruned = removed.len(),
                    "pattern retention cap enforced"
                );
            }
        }

        info!(
            pattern_id = %pattern.id,
            category = %pattern.category,
            successful = pattern.fix_successful,
            "failure pattern stored"
        );
        Ok(Some(pattern))
    }

    /// Top-k matches by cosine similarity. Same-category candidates use the
    /// 0.75 threshold; cross-category candidates need 0.85.
    pub async fn similar(
        &self,
        failure_reason: &str,
        category: &str,
        repository: Option<&str>,
        k: usize,
        only_successful: bool,
    ) -> Vec<PatternMatch> {
        if k == 0 {
            return Vec::new();
        }
        let signature = normalize_error(failure_reason);
        let (query_remote, query_hashed) = {
            let hashed = hashed_embedding(category, &signature);
            if self.embedder.is_some() {
                let (vector, family) = self.embed(category, &signature).await;
                match family {
                    EmbeddingFamily::Remote => (Some(vector), hashed),
                    EmbeddingFamily::Hashed => (None, hashed),
                }
            } else {
                (None, hashed)
            }
        };

        let index = self.index.read().expect("pattern index poisoned");
        let mut matches: Vec<PatternMatch> = index
            .iter()
            .filter(|pattern| !only_successful || pattern.fix_successful)
            .filter(|pattern| repository.map(|r| pattern.repository == r).unwrap_or(true))
            .filter_map(|pattern| {
                let query = match pattern.embedding_family {
                    EmbeddingFamily::Remote => query_remote.as_deref()?,
                    EmbeddingFamily::Hashed => &query_hashed,
                };
                let similarity = cosine_similarity(query, &pattern.embedding);
                let threshold = if pattern.category == category {
                    SAME_CATEGORY_THRESHOLD
                } else {
                    CROSS_CATEGORY_THRESHOLD
                };
                (similarity >= threshold).then(|| PatternMatch {
                    pattern: pattern.clone(),
                    similarity,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(k);
        matches
    }

    /// Formatted prompt section with the top similar past fixes.
    pub async fn historical_context(
        &self,
        failure_reason: &str,
        category: &str,
        repository: &str,
    ) -> String {
        let matches = self
            .similar(
                failure_reason,
                category,
                Some(repository),
                PROMPT_CONTEXT_MATCHES,
                true,
            )
            .await;
        if matches.is_empty() {
            return String::new();
        }

        let mut out = String::from("HISTORICAL CONTEXT - similar past failures:\n");
        for (i, matched) in matches.iter().enumerate() {
            let pattern = &matched.pattern;
            out.push_str(&format!(
                "\n{}. similarity {:.2}\n   error: {}\n   successful fix: {}\n   files: {}\n",
                i + 1,
                matched.similarity,
                truncate(&pattern.error_signature, 200),
                truncate(&pattern.proposed_fix, 300),
                pattern.files_modified.join(", "),
            ));
        }
        out.push_str("\nUse these as reference, adapted to the current context.\n");
        out
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
