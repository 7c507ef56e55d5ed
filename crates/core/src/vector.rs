//! Dense-vector math for the semantic signal.
//!
//! Flat (brute-force) cosine similarity over caller-supplied embeddings. The
//! engine never generates embeddings; the embedding provider does.
//!
//! # Complexity
//! - one comparison: O(d) where d is the embedding dimension
//! - a graph build: O(n²·d) — norms are computed once per note, not per pair

use crate::note::Embedding;

/// Euclidean (L2) norm of `v`.
pub(crate) fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity between `a` and `b` with pre-computed norms.
///
/// Returns `None` when the vectors differ in length or either is the zero
/// vector: the similarity is undefined there, which is not the same thing as
/// a similarity of zero.
pub(crate) fn cosine_similarity(a: &[f32], a_norm: f32, b: &[f32], b_norm: f32) -> Option<f64> {
    if a.len() != b.len() || a_norm == 0.0 || b_norm == 0.0 {
        return None;
    }
    // Accumulate in f64 so the result does not depend on summation drift.
    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum();
    let cos = dot / (f64::from(a_norm) * f64::from(b_norm));
    Some(cos.clamp(-1.0, 1.0))
}

/// Map a cosine in \[-1, 1\] onto \[0, 1\].
pub(crate) fn rescale_cosine(cos: f64) -> f64 {
    (cos + 1.0) / 2.0
}

/// An embedding with its norm cached, ready for repeated comparisons.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PreparedEmbedding<'a> {
    pub(crate) embedding: &'a Embedding,
    pub(crate) norm: f32,
}

impl<'a> PreparedEmbedding<'a> {
    pub(crate) fn new(embedding: &'a Embedding) -> Self {
        Self {
            embedding,
            norm: l2_norm(&embedding.vector),
        }
    }

    /// Rescaled cosine similarity, or `None` if the two embeddings come from
    /// different models, have different dimensions, or either is all zeros.
    pub(crate) fn similarity(&self, other: &PreparedEmbedding<'_>) -> Option<f64> {
        if !self.embedding.is_compatible(other.embedding) {
            return None;
        }
        cosine_similarity(
            &self.embedding.vector,
            self.norm,
            &other.embedding.vector,
            other.norm,
        )
        .map(rescale_cosine)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn prepared(emb: &Embedding) -> PreparedEmbedding<'_> {
        PreparedEmbedding::new(emb)
    }

    #[test]
    fn identical_vectors_score_one() {
        let a = Embedding::new("m", vec![0.3, 0.4]);
        let b = Embedding::new("m", vec![0.3, 0.4]);
        let s = prepared(&a).similarity(&prepared(&b)).unwrap();
        assert!((s - 1.0).abs() < 1e-9);
    }

    #[test]
    fn opposite_vectors_score_zero_not_absent() {
        let a = Embedding::new("m", vec![1.0, 0.0]);
        let b = Embedding::new("m", vec![-1.0, 0.0]);
        let s = prepared(&a).similarity(&prepared(&b));
        assert_eq!(s, Some(0.0));
    }

    #[test]
    fn orthogonal_vectors_score_half() {
        let a = Embedding::new("m", vec![1.0, 0.0]);
        let b = Embedding::new("m", vec![0.0, 1.0]);
        let s = prepared(&a).similarity(&prepared(&b)).unwrap();
        assert!((s - 0.5).abs() < 1e-9);
    }

    #[test]
    fn different_models_are_incomparable() {
        let a = Embedding::new("mini-lm", vec![1.0, 0.0]);
        let b = Embedding::new("bge-small", vec![1.0, 0.0]);
        assert_eq!(prepared(&a).similarity(&prepared(&b)), None);
    }

    #[test]
    fn different_dimensions_are_incomparable() {
        let a = Embedding::new("m", vec![1.0, 0.0]);
        let b = Embedding::new("m", vec![1.0, 0.0, 0.0]);
        assert_eq!(prepared(&a).similarity(&prepared(&b)), None);
    }

    #[test]
    fn zero_vector_is_absent() {
        let a = Embedding::new("m", vec![0.0, 0.0]);
        let b = Embedding::new("m", vec![1.0, 0.0]);
        assert_eq!(prepared(&a).similarity(&prepared(&b)), None);
    }
}
