//! Offline hashing embedder
//!
//! TF-IDF-like weighting over word tokens, word bigrams and, for scripts
//! written without spaces, character bigrams. Deterministic and needs no
//! external service, so it is the default similarity source.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::embedding::Embedder;
use crate::error::{PersonaError, Result};

/// Hashing-trick embedder
pub struct TfIdfEmbedder {
    dimensions: usize,
}

impl TfIdfEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// Lowercase word tokens; runs of non-ASCII letters are split into
    /// overlapping character bigrams.
    fn tokenize(text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| !s.is_empty())
        {
            if word.is_ascii() {
                if word.len() > 1 {
                    tokens.push(word.to_string());
                }
                continue;
            }
            let chars: Vec<char> = word.chars().collect();
            if chars.len() == 1 {
                tokens.push(word.to_string());
            } else {
                tokens.extend(chars.windows(2).map(|w| w.iter().collect::<String>()));
            }
        }
        tokens
    }

    fn hash_of(token: &str, salt: &str) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        token.hash(&mut hasher);
        salt.hash(&mut hasher);
        hasher.finish()
    }

    fn bucket(&self, token: &str) -> usize {
        (Self::hash_of(token, "idx") as usize) % self.dimensions
    }

    /// Sign for feature hashing (reduces collision impact)
    fn sign(token: &str) -> f32 {
        if Self::hash_of(token, "sign") % 2 == 0 {
            1.0
        } else {
            -1.0
        }
    }
}

impl Embedder for TfIdfEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.dimensions == 0 {
            return Err(PersonaError::Embedding(
                "embedder configured with zero dimensions".to_string(),
            ));
        }

        let tokens = Self::tokenize(text);
        let mut vector = vec![0.0_f32; self.dimensions];
        if tokens.is_empty() {
            return Ok(vector);
        }

        let mut tf: HashMap<&str, f32> = HashMap::new();
        for token in &tokens {
            *tf.entry(token.as_str()).or_insert(0.0) += 1.0;
        }

        let doc_len = tokens.len() as f32;
        for (token, count) in tf {
            let tf_score = (1.0 + count / doc_len).ln();
            // longer tokens are treated as rarer
            let idf_score = 1.0 + token.chars().count() as f32 * 0.1;
            vector[self.bucket(token)] += tf_score * idf_score * Self::sign(token);
        }

        for pair in tokens.windows(2) {
            let bigram = format!("{}_{}", pair[0], pair[1]);
            vector[self.bucket(&bigram)] += 0.5 * Self::sign(&bigram);
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }

        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "tfidf"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn test_deterministic() {
        let embedder = TfIdfEmbedder::new(256);
        let e1 = embedder.embed("hello world").unwrap();
        let e2 = embedder.embed("hello world").unwrap();
        assert_eq!(e1, e2);
    }

    #[test]
    fn test_related_text_scores_higher() {
        let embedder = TfIdfEmbedder::new(384);
        let base = embedder
            .embed("we were planning the garden layout for spring")
            .unwrap();
        let related = embedder
            .embed("back to the garden layout we were planning")
            .unwrap();
        let unrelated = embedder.embed("quarterly tax filing deadline").unwrap();

        assert!(cosine_similarity(&base, &related) > cosine_similarity(&base, &unrelated));
    }

    #[test]
    fn test_japanese_text_produces_signal() {
        let embedder = TfIdfEmbedder::new(384);
        let a = embedder.embed("庭の設計の続き").unwrap();
        let b = embedder.embed("庭の設計について").unwrap();
        assert!(a.iter().any(|x| *x != 0.0));
        assert!(cosine_similarity(&a, &b) > 0.0);
    }

    #[test]
    fn test_empty_is_zero_vector() {
        let embedder = TfIdfEmbedder::new(64);
        let e = embedder.embed("").unwrap();
        assert_eq!(e.len(), 64);
        assert!(e.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_zero_dimensions_is_error() {
        assert!(TfIdfEmbedder::new(0).embed("text").is_err());
    }
}
