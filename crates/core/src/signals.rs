//! Signal extractors.
//!
//! Each extractor yields `Some(value)` in \[0, 1\] or `None` when the signal
//! cannot be computed for the pair. `None` is never the same as `Some(0.0)`:
//! absent signals are left out of fusion instead of dragging it down.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::{GraphConfig, LinkPolicy, TagOptions};
use crate::note::{Note, NoteId, TagSource};
use crate::vector::PreparedEmbedding;

// ---------------------------------------------------------------------------
// Kinds and sparse values
// ---------------------------------------------------------------------------

/// The named contributors to relatedness. Declaration order is the order in
/// which contributions are listed and summed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    ExplicitLink,
    SemanticSimilarity,
    TagOverlap,
    TemporalProximity,
    TextualRelevance,
}

impl SignalKind {
    pub const ALL: [SignalKind; 5] = [
        SignalKind::ExplicitLink,
        SignalKind::SemanticSimilarity,
        SignalKind::TagOverlap,
        SignalKind::TemporalProximity,
        SignalKind::TextualRelevance,
    ];

    /// Signals that take part in note-to-note scoring.
    pub const GRAPH: [SignalKind; 4] = [
        SignalKind::ExplicitLink,
        SignalKind::SemanticSimilarity,
        SignalKind::TagOverlap,
        SignalKind::TemporalProximity,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SignalKind::ExplicitLink => "explicit-link",
            SignalKind::SemanticSimilarity => "semantic-similarity",
            SignalKind::TagOverlap => "tag-overlap",
            SignalKind::TemporalProximity => "temporal-proximity",
            SignalKind::TextualRelevance => "textual-relevance",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A sparse set of signal values, one optional slot per [`SignalKind`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Signals {
    values: [Option<f64>; 5],
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, kind: SignalKind, value: Option<f64>) {
        self.values[kind.slot()] = value;
    }

    pub fn with(mut self, kind: SignalKind, value: f64) -> Self {
        self.set(kind, Some(value));
        self
    }

    pub fn get(&self, kind: SignalKind) -> Option<f64> {
        self.values[kind.slot()]
    }

    /// Present signals in declaration order.
    pub fn present(&self) -> impl Iterator<Item = (SignalKind, f64)> + '_ {
        SignalKind::ALL
            .into_iter()
            .filter_map(|kind| self.get(kind).map(|v| (kind, v)))
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }
}

// ---------------------------------------------------------------------------
// Prepared notes
// ---------------------------------------------------------------------------

/// Per-note data derived once per build so pair scoring stays cheap.
#[derive(Debug, Clone)]
pub(crate) struct PreparedNote<'a> {
    pub(crate) note: &'a Note,
    pub(crate) references: BTreeSet<NoteId>,
    pub(crate) tags: BTreeSet<String>,
    pub(crate) embedding: Option<PreparedEmbedding<'a>>,
}

impl<'a> PreparedNote<'a> {
    pub(crate) fn new(note: &'a Note, tags: &TagOptions) -> Self {
        Self {
            note,
            references: note.references(),
            tags: tag_keys(note, tags),
            embedding: note.embedding.as_ref().map(PreparedEmbedding::new),
        }
    }

    pub(crate) fn id(&self) -> &NoteId {
        &self.note.id
    }
}

/// Comparison keys of the tags that count under `options`.
pub(crate) fn tag_keys(note: &Note, options: &TagOptions) -> BTreeSet<String> {
    note.tags
        .iter()
        .filter(|t| match t.source {
            TagSource::User => true,
            TagSource::Derived => options.include_derived && t.confidence >= options.min_confidence,
        })
        .map(|t| t.key())
        .filter(|k| !k.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Extractors
// ---------------------------------------------------------------------------

/// `explicit-link` from `a`'s point of view: 1.0 if `a` references `b`, or,
/// under [`LinkPolicy::Symmetric`], if `b` references `a`.
pub fn explicit_link(a: &Note, b: &Note, policy: LinkPolicy) -> Option<f64> {
    link_value(&a.references(), &a.id, &b.references(), &b.id, policy)
}

fn link_value(
    a_refs: &BTreeSet<NoteId>,
    a_id: &NoteId,
    b_refs: &BTreeSet<NoteId>,
    b_id: &NoteId,
    policy: LinkPolicy,
) -> Option<f64> {
    let forward = a_refs.contains(b_id);
    let backward = policy == LinkPolicy::Symmetric && b_refs.contains(a_id);
    (forward || backward).then_some(1.0)
}

/// `tag-overlap`: `|A ∩ B| / min(|A|, |B|)` once the shared count reaches
/// `options.min_overlap`.
pub fn tag_overlap(a: &Note, b: &Note, options: &TagOptions) -> Option<f64> {
    overlap_ratio(&tag_keys(a, options), &tag_keys(b, options), options.min_overlap)
}

pub(crate) fn overlap_ratio(
    a: &BTreeSet<String>,
    b: &BTreeSet<String>,
    min_overlap: usize,
) -> Option<f64> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let shared = a.intersection(b).count();
    if shared == 0 || shared < min_overlap {
        return None;
    }
    Some(shared as f64 / a.len().min(b.len()) as f64)
}

/// `semantic-similarity`: rescaled cosine, absent unless both notes carry
/// embeddings from the same model with the same dimension.
pub fn semantic_similarity(a: &Note, b: &Note) -> Option<f64> {
    let a = PreparedEmbedding::new(a.embedding.as_ref()?);
    let b = PreparedEmbedding::new(b.embedding.as_ref()?);
    a.similarity(&b)
}

/// `temporal-proximity`: `exp(-|Δt| / τ)` over creation times, τ in days.
pub fn temporal_proximity(a: &Note, b: &Note, tau_days: f64) -> Option<f64> {
    proximity(a.created_at, b.created_at, tau_days)
}

pub(crate) fn proximity(a: DateTime<Utc>, b: DateTime<Utc>, tau_days: f64) -> Option<f64> {
    if tau_days.is_nan() || tau_days <= 0.0 {
        return None;
    }
    let delta_days = (a - b).num_milliseconds().unsigned_abs() as f64 / 86_400_000.0;
    Some((-delta_days / tau_days).exp())
}

/// Signals for an unordered pair, as seen from each endpoint.
///
/// The two views differ only in `explicit-link` under
/// [`LinkPolicy::Directed`]; otherwise they are identical.
pub(crate) fn pair_signals(
    a: &PreparedNote<'_>,
    b: &PreparedNote<'_>,
    config: &GraphConfig,
) -> (Signals, Signals) {
    let mut shared = Signals::new();
    shared.set(
        SignalKind::SemanticSimilarity,
        match (&a.embedding, &b.embedding) {
            (Some(ea), Some(eb)) => ea.similarity(eb),
            _ => None,
        },
    );
    shared.set(
        SignalKind::TagOverlap,
        overlap_ratio(&a.tags, &b.tags, config.tags.min_overlap),
    );

    let mut forward = shared;
    forward.set(
        SignalKind::ExplicitLink,
        link_value(&a.references, a.id(), &b.references, b.id(), config.link_policy),
    );
    let mut backward = shared;
    backward.set(
        SignalKind::ExplicitLink,
        link_value(&b.references, b.id(), &a.references, a.id(), config.link_policy),
    );

    let temporal = proximity(
        a.note.created_at,
        b.note.created_at,
        config.temporal_tau_days,
    );
    for view in [&mut forward, &mut backward] {
        if !config.temporal_supporting || !view.is_empty() {
            view.set(SignalKind::TemporalProximity, temporal);
        }
    }

    (forward, backward)
}
