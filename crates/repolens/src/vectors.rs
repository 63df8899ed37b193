#![forbid(unsafe_code)]

//! Chunk embeddings and similarity search.
//!
//! A [`VectorStore`] is always built from scratch for the current analysis
//! records and then swapped in whole through [`VectorIndex`]. Stores are never
//! merged, so repeated rebuilds do not accumulate records.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::types::{Diagnostic, DiagnosticKind, EmbeddingConfig, EmbeddingRecord, FileAnalysis};

/// Text to vector. Implementations are called concurrently from the embedding pool.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> io::Result<Vec<f32>>;

    fn model_name(&self) -> &str {
        "unknown"
    }
}

/// Client for an Ollama-compatible `/api/embeddings` endpoint.
pub struct OllamaEmbedder {
    agent: ureq::Agent,
    endpoint: String,
    model: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(agent_config),
            endpoint: format!("{}/api/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
        }
    }
}

impl Embedder for OllamaEmbedder {
    fn embed(&self, text: &str) -> io::Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };
        let mut response = self
            .agent
            .post(&self.endpoint)
            .send_json(&request)
            .map_err(|e| io::Error::other(format!("Embedding request failed: {e}")))?;
        let body: EmbeddingResponse = response
            .body_mut()
            .read_json()
            .map_err(|e| io::Error::other(format!("Invalid embedding response: {e}")))?;
        Ok(body.embedding)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Prompt embedded for one chunk.
pub fn chunk_prompt(file_id: &str, text: &str) -> String {
    format!("File: {file_id}\nCode:\n{text}")
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorStore {
    records: Vec<EmbeddingRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct BuildOutcome {
    pub store: VectorStore,
    pub diagnostics: Vec<Diagnostic>,
}

impl VectorStore {
    /// Wraps already-embedded records, e.g. ones loaded from disk.
    pub fn from_records(records: Vec<EmbeddingRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[EmbeddingRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.records.first().map(|r| r.vector.len())
    }

    pub fn build(analyses: &[FileAnalysis], embedder: &dyn Embedder, concurrency: usize) -> BuildOutcome {
        Self::build_with_progress(analyses, embedder, concurrency, &|_| {})
    }

    /// Embeds every chunk of every record on a pool of `concurrency` threads.
    /// Records keep input order; failed chunks are left out and reported.
    pub fn build_with_progress(
        analyses: &[FileAnalysis],
        embedder: &dyn Embedder,
        concurrency: usize,
        on_embedded: &(dyn Fn(usize) + Sync),
    ) -> BuildOutcome {
        // (analysis position, chunk position)
        let jobs: Vec<(usize, usize)> = analyses
            .iter()
            .enumerate()
            .flat_map(|(ai, a)| (0..a.chunks.len()).map(move |ci| (ai, ci)))
            .collect();

        let done = AtomicUsize::new(0);
        let embed_one = |&(ai, ci): &(usize, usize)| {
            let analysis = &analyses[ai];
            let result = embedder.embed(&chunk_prompt(&analysis.id, &analysis.chunks[ci].text));
            on_embedded(done.fetch_add(1, Ordering::Relaxed) + 1);
            result
        };

        let results: Vec<io::Result<Vec<f32>>> = match rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency.max(1))
            .build()
        {
            Ok(pool) => pool.install(|| jobs.par_iter().map(embed_one).collect()),
            Err(err) => {
                tracing::warn!(error = %err, "embedding pool unavailable, embedding serially");
                jobs.iter().map(embed_one).collect()
            }
        };

        let mut records = Vec::with_capacity(results.len());
        let mut diagnostics = Vec::new();
        let mut dimension = None;

        for (&(ai, ci), result) in jobs.iter().zip(results) {
            let analysis = &analyses[ai];
            let chunk = &analysis.chunks[ci];
            let subject = format!("{}#{}", analysis.id, chunk.index);
            let vector = match result {
                Ok(vector) if vector.is_empty() => Err("embedder returned an empty vector".to_string()),
                Ok(vector) if dimension.is_some_and(|d| d != vector.len()) => Err(format!(
                    "dimension {} does not match store dimension {}",
                    vector.len(),
                    dimension.unwrap_or_default()
                )),
                Ok(vector) => Ok(vector),
                Err(err) => Err(err.to_string()),
            };

            match vector {
                Ok(vector) => {
                    dimension.get_or_insert(vector.len());
                    records.push(EmbeddingRecord {
                        file_id: analysis.id.clone(),
                        chunk_index: chunk.index,
                        text: chunk.text.clone(),
                        vector,
                        language: analysis.language.clone(),
                    });
                }
                Err(message) => {
                    tracing::warn!(chunk = %subject, %message, "embedding failed");
                    diagnostics.push(Diagnostic::new(DiagnosticKind::EmbeddingFailure, subject, message));
                }
            }
        }

        tracing::debug!(records = records.len(), failed = diagnostics.len(), "vector store built");
        BuildOutcome {
            store: Self { records },
            diagnostics,
        }
    }

    /// The `k` records most similar to `query`, best first. Ties keep record order.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(&EmbeddingRecord, f32)> {
        let mut scored: Vec<(&EmbeddingRecord, f32)> = self
            .records
            .iter()
            .map(|r| (r, cosine_similarity(query, &r.vector)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }
}

/// Shared handle to the current store. Readers hold an `Arc` snapshot while a
/// rebuild runs; the new store replaces the old one in a single write.
#[derive(Debug, Default)]
pub struct VectorIndex {
    current: RwLock<Arc<VectorStore>>,
}

impl VectorIndex {
    pub fn new(store: VectorStore) -> Self {
        Self {
            current: RwLock::new(Arc::new(store)),
        }
    }

    pub fn snapshot(&self) -> Arc<VectorStore> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Installs `store` and returns the one it replaced.
    pub fn replace(&self, store: VectorStore) -> Arc<VectorStore> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(store))
    }

    pub fn rebuild(&self, analyses: &[FileAnalysis], embedder: &dyn Embedder, concurrency: usize) -> Vec<Diagnostic> {
        let outcome = VectorStore::build(analyses, embedder, concurrency);
        self.replace(outcome.store);
        outcome.diagnostics
    }
}

/// Cosine similarity of two vectors. Mismatched, empty or zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let sim = dot / (norm_a * norm_b);
    if sim.is_nan() { 0.0 } else { sim }
}
