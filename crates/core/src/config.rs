//! Tuning knobs for graph builds and searches.
//!
//! Every struct here has a `Default` matching the documented defaults and a
//! `validate()` that runs before any computation starts. The structs derive
//! `serde` traits so a settings file can embed them directly.

use serde::{Deserialize, Serialize};

use crate::signals::SignalKind;
use crate::{GraphError, Result};

/// Whether an explicit reference relates both endpoints or only its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPolicy {
    /// A reference in either direction relates the pair; edges are undirected.
    #[default]
    Symmetric,
    /// A reference only enters its source's candidate list; edges are directed.
    Directed,
}

/// Per-signal fusion weights.
///
/// Defaults favour explicit link > semantic similarity > tag overlap >
/// temporal proximity. `textual_relevance` only matters for searches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SignalWeights {
    pub explicit_link: f64,
    pub semantic_similarity: f64,
    pub tag_overlap: f64,
    pub temporal_proximity: f64,
    pub textual_relevance: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            explicit_link: 1.0,
            semantic_similarity: 0.8,
            tag_overlap: 0.6,
            temporal_proximity: 0.1,
            textual_relevance: 0.7,
        }
    }
}

impl SignalWeights {
    pub fn weight(&self, kind: SignalKind) -> f64 {
        match kind {
            SignalKind::ExplicitLink => self.explicit_link,
            SignalKind::SemanticSimilarity => self.semantic_similarity,
            SignalKind::TagOverlap => self.tag_overlap,
            SignalKind::TemporalProximity => self.temporal_proximity,
            SignalKind::TextualRelevance => self.textual_relevance,
        }
    }

    /// Every weight must be finite and non-negative, and at least one of the
    /// signals used by `context` must carry weight.
    pub fn validate_for(&self, kinds: &[SignalKind], context: &str) -> Result<()> {
        for kind in SignalKind::ALL {
            let w = self.weight(kind);
            if !w.is_finite() || w < 0.0 {
                return Err(GraphError::Configuration(format!(
                    "weight for `{kind}` must be a finite, non-negative number (got {w})"
                )));
            }
        }
        if kinds.iter().all(|k| self.weight(*k) == 0.0) {
            return Err(GraphError::Configuration(format!(
                "{context}: at least one of the participating signal weights must be > 0"
            )));
        }
        Ok(())
    }
}

/// How tags are compared.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TagOptions {
    /// Shared-tag count below which the tag-overlap signal is absent.
    pub min_overlap: usize,
    /// Derived tags below this confidence are ignored. User tags always count.
    pub min_confidence: f32,
    /// Ignore derived tags entirely.
    pub include_derived: bool,
}

impl Default for TagOptions {
    fn default() -> Self {
        Self {
            min_overlap: 1,
            min_confidence: 0.0,
            include_derived: true,
        }
    }
}

impl TagOptions {
    pub fn validate(&self) -> Result<()> {
        if self.min_overlap == 0 {
            return Err(GraphError::Configuration(
                "tags.min_overlap must be >= 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(GraphError::Configuration(format!(
                "tags.min_confidence must be in [0, 1] (got {})",
                self.min_confidence
            )));
        }
        Ok(())
    }
}

/// Parameters of a graph build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphConfig {
    /// Maximum outgoing edges kept per note.
    pub top_k: usize,
    /// Pairs whose fused score is below this never become edges.
    pub min_score: f64,
    pub weights: SignalWeights,
    pub link_policy: LinkPolicy,
    pub tags: TagOptions,
    /// Time constant τ (days) of `exp(-|Δt| / τ)`.
    pub temporal_tau_days: f64,
    /// When true, temporal proximity only counts alongside another signal.
    pub temporal_supporting: bool,
    /// Worker threads for pair scoring. 0 = one per core, 1 = calling thread.
    pub workers: usize,
    /// Source rows scored per batch; cancellation is checked between batches.
    pub batch_rows: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            min_score: 0.3,
            weights: SignalWeights::default(),
            link_policy: LinkPolicy::Symmetric,
            tags: TagOptions::default(),
            temporal_tau_days: 7.0,
            temporal_supporting: true,
            workers: 0,
            batch_rows: 64,
        }
    }
}

impl GraphConfig {
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(GraphError::Configuration("top_k must be >= 1".to_string()));
        }
        if !self.min_score.is_finite() || !(0.0..=1.0).contains(&self.min_score) {
            return Err(GraphError::Configuration(format!(
                "min_score must be in [0, 1] (got {})",
                self.min_score
            )));
        }
        if !self.temporal_tau_days.is_finite() || self.temporal_tau_days <= 0.0 {
            return Err(GraphError::Configuration(format!(
                "temporal_tau_days must be > 0 (got {})",
                self.temporal_tau_days
            )));
        }
        if self.batch_rows == 0 {
            return Err(GraphError::Configuration(
                "batch_rows must be >= 1".to_string(),
            ));
        }
        self.tags.validate()?;
        self.weights.validate_for(&SignalKind::GRAPH, "graph build")
    }

    /// True when both configs produce identical graphs for the same notes.
    ///
    /// `workers` and `batch_rows` only change how the work is scheduled.
    pub fn same_output_as(&self, other: &GraphConfig) -> bool {
        self.top_k == other.top_k
            && self.min_score == other.min_score
            && self.weights == other.weights
            && self.link_policy == other.link_policy
            && self.tags == other.tags
            && self.temporal_tau_days == other.temporal_tau_days
            && self.temporal_supporting == other.temporal_supporting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        GraphConfig::default().validate().unwrap();
    }

    #[test]
    fn default_weights_rank_link_over_semantic_over_tags_over_time() {
        let w = SignalWeights::default();
        assert!(w.explicit_link > w.semantic_similarity);
        assert!(w.semantic_similarity > w.tag_overlap);
        assert!(w.tag_overlap > w.temporal_proximity);
    }

    #[test]
    fn zero_top_k_is_rejected() {
        let cfg = GraphConfig {
            top_k: 0,
            ..GraphConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(GraphError::Configuration(_))));
    }

    #[test]
    fn negative_weight_is_rejected() {
        let mut cfg = GraphConfig::default();
        cfg.weights.tag_overlap = -0.1;
        assert!(matches!(cfg.validate(), Err(GraphError::Configuration(_))));
    }

    #[test]
    fn all_zero_graph_weights_are_rejected() {
        let mut cfg = GraphConfig::default();
        cfg.weights = SignalWeights {
            explicit_link: 0.0,
            semantic_similarity: 0.0,
            tag_overlap: 0.0,
            temporal_proximity: 0.0,
            textual_relevance: 1.0,
        };
        assert!(matches!(cfg.validate(), Err(GraphError::Configuration(_))));
    }

    #[test]
    fn scheduling_knobs_do_not_change_output_identity() {
        let a = GraphConfig::default();
        let b = GraphConfig {
            workers: 8,
            batch_rows: 3,
            ..GraphConfig::default()
        };
        assert!(a.same_output_as(&b));
        let c = GraphConfig {
            top_k: 3,
            ..GraphConfig::default()
        };
        assert!(!a.same_output_as(&c));
    }
}
