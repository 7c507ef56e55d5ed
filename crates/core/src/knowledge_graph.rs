//! Monoid graph: a bounded knowledge graph and hybrid retrieval engine for
//! personal notes.
//!
//! The engine reads a snapshot of notes and answers two questions:
//!
//! 1. **Which notes are related?** [`GraphBuilder`] scores every pair of live
//!    notes from independent [`signals`] (explicit references, embedding
//!    similarity, tag overlap, creation-time proximity), fuses them into one
//!    score and keeps each note's top-K neighbours. The result is a
//!    [`Graph`] whose every edge carries the contributions that produced it.
//! 2. **Which notes match this query?** [`search()`] combines full-text
//!    relevance, tag filters and semantic similarity with the same fusion
//!    rule and returns a ranked list.
//!
//! A signal that cannot be computed for a pair is *absent*, not zero; fusion
//! averages only over present signals.
//!
//! Graph freshness is tracked separately by [`StalenessTracker`], which the
//! note store feeds with create/edit/delete events.
//!
//! # Quick start
//!
//! ```rust
//! use chrono::Utc;
//! use monoid_graph::{build, GraphConfig, Note, NoteId};
//!
//! let now = Utc::now();
//! let notes = vec![
//!     Note::new("a", "binary search on sorted arrays", now).with_tags(["dsa"]),
//!     Note::new("b", "two pointers", now).with_tags(["dsa"]).with_link("a"),
//! ];
//!
//! let graph = build(&notes, &GraphConfig::default()).unwrap();
//! assert_eq!(graph.related(&NoteId::new("a")), vec![NoteId::new("b")]);
//! ```

pub mod builder;
pub mod config;
pub mod fusion;
pub mod graph;
pub mod note;
pub mod search;
pub mod signals;
pub mod staleness;
pub mod text;
mod vector;

pub use builder::{
    build, CancelToken, GraphBuilder, IncrementalOutcome, IncrementalUnsafe, PairCache, PairScore,
};
pub use config::{GraphConfig, LinkPolicy, SignalWeights, TagOptions};
pub use fusion::{fuse, fuse_over, Fused, SignalContribution};
pub use graph::{Edge, Graph, GraphNode, GraphStats};
pub use note::{Embedding, Note, NoteId, NoteKind, Tag, TagSource};
pub use search::{
    search, search_with_cancel, Query, SearchMode, SearchOptions, SearchResult, TagMatch,
};
pub use signals::{SignalKind, Signals};
pub use staleness::{Freshness, Mutation, StalenessSnapshot, StalenessTracker};
pub use text::{KeywordIndex, NoTextIndex, TextIndex};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Invalid parameters, reported before any work starts.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Input that indicates upstream corruption, such as duplicate live ids
    /// or an embedding whose length disagrees with its declared dimension.
    #[error("data integrity error: {0}")]
    DataIntegrity(String),
    /// The caller cancelled the operation; no partial result is returned.
    #[error("operation cancelled")]
    Cancelled,
    #[error("worker pool error: {0}")]
    WorkerPool(String),
}

impl From<rayon::ThreadPoolBuildError> for GraphError {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        GraphError::WorkerPool(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
