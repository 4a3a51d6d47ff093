//! Embedding services: text in, fixed-length vector out.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("embedding service returned an empty vector")]
    Empty,
}

pub trait Embedder: Send + Sync {
    /// Identifies the embedding space. Vectors from embedders with different names are not
    /// comparable.
    fn name(&self) -> String;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

/// Deterministic feature-hashing embedder. Each lower-cased word is hashed into one of
/// `dimension` buckets with a hash-derived sign; the result is L2-normalised. Needs no service.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> HashingEmbedder {
        HashingEmbedder {
            dimension: dimension.max(1),
        }
    }
}

impl Embedder for HashingEmbedder {
    fn name(&self) -> String {
        format!("hashing-{}", self.dimension)
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vector = vec![0f32; self.dimension];
        for word in words(text) {
            let hash = Sha256::digest(word.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&hash[..8]);
            let bucket = u64::from_le_bytes(bucket) % self.dimension as u64;
            let sign = if hash[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket as usize] += sign;
        }
        normalize(&mut vector);
        Ok(vector)
    }
}

/// Lower-cased alphanumeric words; `snake_case` identifiers are split into their parts too.
fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .flat_map(|w| {
            let lower = w.to_lowercase();
            let mut parts: Vec<String> = lower
                .split('_')
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
            if parts.len() > 1 {
                parts.push(lower);
            }
            parts
        })
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
}

/// Embeddings from an Ollama server's `/api/embeddings` endpoint.
pub struct OllamaEmbedder {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<OllamaEmbedder, EmbedError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(OllamaEmbedder {
            client,
            endpoint: format!("{}/api/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
        })
    }
}

impl Embedder for OllamaEmbedder {
    fn name(&self) -> String {
        format!("ollama-{}", self.model)
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let response: EmbedResponse = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest {
                model: &self.model,
                prompt: text,
            })
            .send()?
            .error_for_status()?
            .json()?;
        if response.embedding.is_empty() {
            return Err(EmbedError::Empty);
        }
        Ok(response.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_deterministic_and_normalised() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("Invoice processing for sales").unwrap();
        let b = embedder.embed("Invoice processing for sales").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|v| v * v).sum();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let vector = HashingEmbedder::new(8).embed("  ,; ").unwrap();
        assert!(vector.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn identifiers_are_split() {
        let words: Vec<String> = words("make_gl_entries(x)").collect();
        assert_eq!(words, ["make", "gl", "entries", "make_gl_entries", "x"]);
    }
}
