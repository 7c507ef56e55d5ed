//! Embedding provider seam.
//!
//! The knowledge base never computes embeddings itself. A provider (a local
//! model, a remote API, a test double) is plugged in with
//! [`crate::KnowledgeBase::with_embedder`].

use monoid_graph::{Embedding, Note};

use crate::Result;

pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier stamped on every embedding this provider returns.
    fn model(&self) -> &str;

    /// Embed a note, or `Ok(None)` when nothing was computed for it.
    fn embed_note(&self, note: &Note) -> Result<Option<Embedding>>;

    /// Embed a free-text query.
    fn embed_query(&self, text: &str) -> Result<Option<Embedding>>;
}

/// Whether `note` needs a (new) embedding from a provider of `model`.
pub(crate) fn needs_embedding(note: &Note, model: &str) -> bool {
    !note.is_deleted()
        && note
            .embedding
            .as_ref()
            .map_or(true, |embedding| embedding.model != model)
}
