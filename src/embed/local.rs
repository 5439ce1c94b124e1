//! Local fallback embedder for development without remote credentials.
//!
//! A deterministic feature-hashing model: terms are hashed into a
//! lower-dimension bag-of-words vector, signed to spread collisions, then
//! unit-normalized. Retrieval quality is crude but the vectors are stable
//! across runs, which is what development and tests need. The model tag
//! deliberately differs from any remote model so the writer refuses to mix
//! the two spaces.

use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use crate::error::Result;

use super::{EmbeddingClient, TaskType};

pub const LOCAL_MODEL_TAG: &str = "local-hash-384";
const LOCAL_DIMENSION: usize = 384;

pub struct LocalHashEmbedder {
    dimension: usize,
}

impl LocalHashEmbedder {
    pub fn new() -> Self {
        Self {
            dimension: LOCAL_DIMENSION,
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for term in tokenize(text) {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            term.hash(&mut hasher);
            let h = hasher.finish();
            let bucket = (h % self.dimension as u64) as usize;
            let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for LocalHashEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
}

#[async_trait]
impl EmbeddingClient for LocalHashEmbedder {
    fn model(&self) -> &str {
        LOCAL_MODEL_TAG
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String], _task: TaskType) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
