//! Hybrid query engine.
//!
//! A query is compared against every live note with the signals its mode
//! selects. A signal is active when the query supplies its input (text, tags
//! or an embedding). Present signals are weighted as for graph edges, but the
//! score is normalized by the weight of every active signal, so a note missing
//! one of them ranks by the weighted contributions it does have. Notes with no
//! present signal are not results.
//!
//! | mode        | signals                                   |
//! |-------------|-------------------------------------------|
//! | `full-text` | textual relevance                         |
//! | `tags`      | tag overlap                               |
//! | `semantic`  | semantic similarity                       |
//! | `hybrid`    | all three, each only where it is present  |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use crate::builder::CancelToken;
use crate::config::{SignalWeights, TagOptions};
use crate::fusion::{fuse_over, SignalContribution};
use crate::note::{live_snapshot, Embedding, Note, NoteId};
use crate::signals::{tag_keys, SignalKind, Signals};
use crate::text::TextIndex;
use crate::vector::PreparedEmbedding;
use crate::{GraphError, Result};

/// Notes scored between cancellation checks.
const CANCEL_CHECK_INTERVAL: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchMode {
    FullText,
    Tags,
    Semantic,
    #[default]
    Hybrid,
}

impl SearchMode {
    /// Signals that take part in this mode.
    pub fn signals(self) -> &'static [SignalKind] {
        match self {
            SearchMode::FullText => &[SignalKind::TextualRelevance],
            SearchMode::Tags => &[SignalKind::TagOverlap],
            SearchMode::Semantic => &[SignalKind::SemanticSimilarity],
            SearchMode::Hybrid => &[
                SignalKind::SemanticSimilarity,
                SignalKind::TagOverlap,
                SignalKind::TextualRelevance,
            ],
        }
    }

    fn uses(self, kind: SignalKind) -> bool {
        self.signals().contains(&kind)
    }
}

/// How a query's tag filter matches a note's tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagMatch {
    /// At least one requested tag; the value is the matched fraction.
    #[default]
    Any,
    /// Every requested tag; the value is 1.0.
    All,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub embedding: Option<Embedding>,
}

impl Query {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_embedding(mut self, embedding: Embedding) -> Self {
        self.embedding = Some(embedding);
        self
    }

    fn tag_keys(&self) -> BTreeSet<String> {
        self.tags
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchOptions {
    pub mode: SearchMode,
    pub tag_match: TagMatch,
    pub weights: SignalWeights,
    /// Maximum number of results.
    pub top_n: usize,
    pub tags: TagOptions,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            mode: SearchMode::Hybrid,
            tag_match: TagMatch::Any,
            weights: SignalWeights::default(),
            top_n: 20,
            tags: TagOptions::default(),
        }
    }
}

impl SearchOptions {
    pub fn validate(&self) -> Result<()> {
        if self.top_n == 0 {
            return Err(GraphError::Configuration("top_n must be >= 1".to_string()));
        }
        self.tags.validate()?;
        let context = format!("{:?} search", self.mode);
        self.weights.validate_for(self.mode.signals(), &context)
    }
}

/// One ranked hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: NoteId,
    pub score: f64,
    pub modified_at: DateTime<Utc>,
    pub signals: Vec<SignalContribution>,
}

/// Rank `notes` against `query`.
///
/// Results are ordered by fused score descending, then last-modified time
/// descending, then id ascending, and truncated to `options.top_n`.
pub fn search(
    query: &Query,
    notes: &[Note],
    options: &SearchOptions,
    text_index: &dyn TextIndex,
) -> Result<Vec<SearchResult>> {
    search_with_cancel(query, notes, options, text_index, &CancelToken::new())
}

pub fn search_with_cancel(
    query: &Query,
    notes: &[Note],
    options: &SearchOptions,
    text_index: &dyn TextIndex,
    cancel: &CancelToken,
) -> Result<Vec<SearchResult>> {
    let started = Instant::now();
    options.validate()?;
    if options.mode == SearchMode::Semantic && query.embedding.is_none() {
        return Err(GraphError::Configuration(
            "semantic search requires a query embedding".to_string(),
        ));
    }
    if let Some(embedding) = &query.embedding {
        embedding.validate("query")?;
    }
    cancel.checkpoint()?;

    let live = live_snapshot(notes)?;
    let mode = options.mode;

    let text = query.text.trim();
    let use_text = mode.uses(SignalKind::TextualRelevance) && !text.is_empty();
    let wanted_tags = query.tag_keys();
    let use_tags = mode.uses(SignalKind::TagOverlap) && !wanted_tags.is_empty();
    let query_embedding = query
        .embedding
        .as_ref()
        .filter(|_| mode.uses(SignalKind::SemanticSimilarity))
        .map(PreparedEmbedding::new);

    let active: Vec<SignalKind> = [
        (SignalKind::SemanticSimilarity, query_embedding.is_some()),
        (SignalKind::TagOverlap, use_tags),
        (SignalKind::TextualRelevance, use_text),
    ]
    .into_iter()
    .filter_map(|(kind, on)| on.then_some(kind))
    .collect();

    let text_scores: HashMap<NoteId, f64> = if use_text {
        text_index.rank_all(text, notes).into_iter().collect()
    } else {
        HashMap::new()
    };

    let mut results = Vec::new();
    for (i, note) in live.iter().enumerate() {
        if i % CANCEL_CHECK_INTERVAL == 0 {
            cancel.checkpoint()?;
        }

        let mut signals = Signals::new();
        if use_text {
            signals.set(
                SignalKind::TextualRelevance,
                checked_text_score(text_scores.get(&note.id).copied(), &note.id)?,
            );
        }
        if use_tags {
            signals.set(
                SignalKind::TagOverlap,
                tag_match(&wanted_tags, &tag_keys(note, &options.tags), options.tag_match),
            );
        }
        if let Some(q) = &query_embedding {
            let note_embedding = note.embedding.as_ref().map(PreparedEmbedding::new);
            signals.set(
                SignalKind::SemanticSimilarity,
                note_embedding.and_then(|e| q.similarity(&e)),
            );
        }

        if let Some(fused) = fuse_over(&signals, &options.weights, &active) {
            results.push(SearchResult {
                id: note.id.clone(),
                score: fused.score,
                modified_at: note.modified_at,
                signals: fused.contributions,
            });
        }
    }
    cancel.checkpoint()?;

    let matched = results.len();
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.modified_at.cmp(&a.modified_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    results.truncate(options.top_n);

    tracing::debug!(
        mode = ?mode,
        notes = live.len(),
        matched,
        returned = results.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Search finished."
    );

    Ok(results)
}

fn checked_text_score(score: Option<f64>, id: &NoteId) -> Result<Option<f64>> {
    match score {
        Some(s) if !s.is_finite() || !(0.0..=1.0).contains(&s) => Err(GraphError::DataIntegrity(
            format!("text index returned score {s} for note {id}; expected [0, 1]"),
        )),
        other => Ok(other),
    }
}

fn tag_match(wanted: &BTreeSet<String>, have: &BTreeSet<String>, policy: TagMatch) -> Option<f64> {
    let matched = wanted.intersection(have).count();
    match policy {
        TagMatch::Any => (matched > 0).then(|| matched as f64 / wanted.len() as f64),
        TagMatch::All => (matched == wanted.len()).then_some(1.0),
    }
}
