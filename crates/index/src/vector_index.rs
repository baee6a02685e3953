//! In-memory vector index snapshot.
//!
//! A [`Snapshot`] is built once from embedded chunks and never mutated. It
//! answers exact cosine-similarity queries over every entry; readers share it
//! through an `Arc`.

use chrono::{DateTime, Utc};
use libris_core::{AppError, AppResult};
use std::collections::HashSet;

use crate::types::{Chunk, ScoredChunk};

/// One complete, immutable version of the index.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    model: String,
    created_at: DateTime<Utc>,
    dimensions: usize,
    /// Chunk metadata, vectors stripped
    chunks: Vec<Chunk>,
    /// Row-major vectors, `chunks.len() * dimensions` values
    vectors: Vec<f32>,
    norms: Vec<f32>,
}

impl Snapshot {
    /// Build a fresh snapshot from chunks that carry embeddings.
    ///
    /// Fails when a chunk has no vector, vectors disagree on dimensionality,
    /// or two chunks share an id.
    pub fn build(chunks: Vec<Chunk>, model: impl Into<String>) -> AppResult<Self> {
        let first = chunks
            .first()
            .ok_or_else(|| AppError::Knowledge("Cannot build an index from zero chunks".into()))?;
        let dimensions = first
            .embedding
            .as_ref()
            .map(|v| v.len())
            .ok_or_else(|| missing_vector(first.id))?;

        let mut vectors = Vec::with_capacity(chunks.len() * dimensions);
        let mut stripped = Vec::with_capacity(chunks.len());

        for mut chunk in chunks {
            let vector = chunk.embedding.take().ok_or_else(|| missing_vector(chunk.id))?;
            if vector.len() != dimensions {
                return Err(AppError::Knowledge(format!(
                    "Chunk {} has {} dimensions, expected {}",
                    chunk.id,
                    vector.len(),
                    dimensions
                )));
            }
            vectors.extend_from_slice(&vector);
            stripped.push(chunk);
        }

        let snapshot = Self::from_parts(model.into(), Utc::now(), dimensions, stripped, vectors)?;
        tracing::debug!(
            "Built snapshot: {} vectors, {} dimensions",
            snapshot.len(),
            snapshot.dimensions
        );
        Ok(snapshot)
    }

    /// Assemble a snapshot from stored parts, checking its invariants.
    pub(crate) fn from_parts(
        model: String,
        created_at: DateTime<Utc>,
        dimensions: usize,
        chunks: Vec<Chunk>,
        vectors: Vec<f32>,
    ) -> AppResult<Self> {
        if dimensions == 0 {
            return Err(AppError::Knowledge("Vector dimensionality is zero".into()));
        }
        if vectors.len() != chunks.len() * dimensions {
            return Err(AppError::Knowledge(format!(
                "{} vector values do not fit {} chunks of dimension {}",
                vectors.len(),
                chunks.len(),
                dimensions
            )));
        }
        if let Some(id) = first_duplicate_id(&chunks) {
            return Err(AppError::Knowledge(format!("Duplicate chunk id {}", id)));
        }

        let norms = vectors
            .chunks_exact(dimensions)
            .map(|v| v.iter().map(|x| x * x).sum::<f32>().sqrt())
            .collect();

        Ok(Self {
            model,
            created_at,
            dimensions,
            chunks,
            vectors,
            norms,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunk metadata in id order of insertion.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Row-major vector data.
    pub fn raw_vectors(&self) -> &[f32] {
        &self.vectors
    }

    /// Vector of the entry at `index`.
    pub fn vector(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(self.dimensions)?;
        self.vectors.get(start..start + self.dimensions)
    }

    /// Check the snapshot is fit to be served with an embedder of `expected_dimensions`.
    pub fn validate(&self, expected_dimensions: usize) -> AppResult<()> {
        if self.is_empty() {
            return Err(AppError::Knowledge("Snapshot has no chunks".into()));
        }
        if self.dimensions != expected_dimensions {
            return Err(AppError::Knowledge(format!(
                "Snapshot dimension {} does not match embedder dimension {}",
                self.dimensions, expected_dimensions
            )));
        }
        if let Some(id) = first_duplicate_id(&self.chunks) {
            return Err(AppError::Knowledge(format!("Duplicate chunk id {}", id)));
        }
        Ok(())
    }

    /// Exact cosine-similarity search.
    ///
    /// Returns at most `k` entries scoring at least `min_score`, best first,
    /// ties broken by ascending chunk id. An empty result is not an error.
    pub fn query(&self, vector: &[f32], k: usize, min_score: f32) -> AppResult<Vec<ScoredChunk>> {
        if vector.len() != self.dimensions {
            return Err(AppError::Knowledge(format!(
                "Query vector has {} dimensions, index has {}",
                vector.len(),
                self.dimensions
            )));
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let query_norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();

        let mut hits: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(self.dimensions)
            .zip(&self.norms)
            .enumerate()
            .map(|(i, (row, norm))| (i, cosine(vector, query_norm, row, *norm)))
            .filter(|(_, score)| *score >= min_score)
            .collect();

        hits.sort_by(|(ia, sa), (ib, sb)| {
            sb.total_cmp(sa)
                .then_with(|| self.chunks[*ia].id.cmp(&self.chunks[*ib].id))
        });
        hits.truncate(k);

        Ok(hits
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: self.chunks[i].clone(),
                score,
            })
            .collect())
    }
}

fn cosine(a: &[f32], norm_a: f32, b: &[f32], norm_b: f32) -> f32 {
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

fn first_duplicate_id(chunks: &[Chunk]) -> Option<u64> {
    let mut seen = HashSet::with_capacity(chunks.len());
    chunks.iter().map(|c| c.id).find(|id| !seen.insert(*id))
}

fn missing_vector(id: u64) -> AppError {
    AppError::Knowledge(format!("Chunk {} has no embedding", id))
}
