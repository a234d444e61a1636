//! FNV-1a character n-gram feature hashing.

use rayon::prelude::*;

use crate::error::{PipelineError, Result};
use crate::strategy::{Embedder, StrategyResult};

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x00000100000001B3;

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    ngram_range: (usize, usize),
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(PipelineError::InvalidArgument("embedding dimension must be > 0".to_string()));
        }
        Ok(Self { dimension, ngram_range: (3, 4) })
    }

    pub fn with_ngram_range(mut self, min: usize, max: usize) -> Result<Self> {
        if min == 0 || min > max {
            return Err(PipelineError::InvalidArgument(format!("invalid n-gram range {min}..={max}")));
        }
        self.ngram_range = (min, max);
        Ok(self)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed a single text, L2-normalised
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let chars: Vec<char> = text.to_lowercase().chars().collect();
        for n in self.ngram_range.0..=self.ngram_range.1 {
            if n > chars.len() {
                continue;
            }
            for window in chars.windows(n) {
                let ngram: String = window.iter().collect();
                let h = fnv1a(ngram.as_bytes());
                let bucket = (h % self.dimension as u64) as usize;
                let sign = if (h >> 32) & 1 == 0 { 1.0f32 } else { -1.0f32 };
                vector[bucket] += sign;
            }
        }
        l2_normalize(&mut vector);
        vector
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

impl Embedder for HashEmbedder {
    fn name(&self) -> String {
        format!("fnv1a-hash-{}", self.dimension)
    }

    fn embed(&self, chunks: &[String]) -> StrategyResult<Vec<Vec<f32>>> {
        Ok(chunks.par_iter().map(|chunk| self.embed_one(chunk)).collect())
    }
}
