//! Score normalizer and fuser.
//!
//! ```text
//! fused = Σ(wᵢ·vᵢ for present i) / Σ(wᵢ for present i)
//! ```
//!
//! Only present signals take part, so a pair with a single strong signal is
//! not penalised for lacking the others. A pair with no present signal (or
//! whose present signals all carry zero weight) has no evidence of
//! relatedness and yields no score at all.

use serde::{Deserialize, Serialize};

use crate::config::SignalWeights;
use crate::signals::{SignalKind, Signals};

/// One signal's share of a fused score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalContribution {
    pub kind: SignalKind,
    /// Normalized signal value in \[0, 1\].
    pub value: f64,
    /// Weight the value was fused with.
    pub weight: f64,
}

impl SignalContribution {
    /// `weight × value`, the term this signal added to the numerator.
    pub fn weighted(&self) -> f64 {
        self.weight * self.value
    }
}

/// A fused score together with the signals that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fused {
    pub score: f64,
    /// Contributions in [`SignalKind`] declaration order.
    pub contributions: Vec<SignalContribution>,
}

/// Fuse the present signals of `signals` with `weights`.
pub fn fuse(signals: &Signals, weights: &SignalWeights) -> Option<Fused> {
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    let mut contributions = Vec::new();

    for (kind, value) in signals.present() {
        let weight = weights.weight(kind);
        numerator += weight * value;
        denominator += weight;
        contributions.push(SignalContribution {
            kind,
            value,
            weight,
        });
    }

    if contributions.is_empty() || denominator <= 0.0 {
        return None;
    }

    Some(Fused {
        score: (numerator / denominator).clamp(0.0, 1.0),
        contributions,
    })
}

/// Fuse the present signals of `signals` over the signal set a query
/// activated.
///
/// The numerator still sums present signals only, but the denominator is the
/// total weight of `active`, so a note that lacks an activated signal ranks by
/// the weighted contributions it does have. Returns `None` under the same
/// conditions as [`fuse`]. `active` must include every present signal.
pub fn fuse_over(signals: &Signals, weights: &SignalWeights, active: &[SignalKind]) -> Option<Fused> {
    let mut fused = fuse(signals, weights)?;
    let numerator: f64 = fused.contributions.iter().map(SignalContribution::weighted).sum();
    let present: f64 = fused.contributions.iter().map(|c| c.weight).sum();
    let absent: f64 = active
        .iter()
        .filter(|kind| signals.get(**kind).is_none())
        .map(|kind| weights.weight(*kind))
        .sum();

    fused.score = (numerator / (present + absent)).clamp(0.0, 1.0);
    Some(fused)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn no_signals_means_no_score() {
        assert_eq!(fuse(&Signals::new(), &SignalWeights::default()), None);
    }

    #[test]
    fn single_signal_is_not_penalised() {
        let s = Signals::new().with(SignalKind::ExplicitLink, 1.0);
        let fused = fuse(&s, &SignalWeights::default()).unwrap();
        assert!(approx(fused.score, 1.0));
        assert_eq!(fused.contributions.len(), 1);
    }

    #[test]
    fn weighted_average_over_present_signals() {
        let w = SignalWeights::default();
        let s = Signals::new()
            .with(SignalKind::TagOverlap, 0.5)
            .with(SignalKind::SemanticSimilarity, 0.9);
        let fused = fuse(&s, &w).unwrap();
        let expected = (0.6 * 0.5 + 0.8 * 0.9) / (0.6 + 0.8);
        assert!(approx(fused.score, expected));
        assert_eq!(fused.contributions[0].kind, SignalKind::SemanticSimilarity);
        assert_eq!(fused.contributions[1].kind, SignalKind::TagOverlap);
    }

    #[test]
    fn absent_signal_differs_from_present_zero() {
        let w = SignalWeights::default();
        let absent = Signals::new().with(SignalKind::TagOverlap, 0.5);
        let zero = absent.with(SignalKind::SemanticSimilarity, 0.0);

        let absent = fuse(&absent, &w).unwrap();
        let zero = fuse(&zero, &w).unwrap();

        assert!(approx(absent.score, 0.5));
        assert!(approx(zero.score, (0.6 * 0.5) / (0.6 + 0.8)));
        assert!(zero.score < absent.score);
    }

    #[test]
    fn activated_but_absent_signals_dilute_the_score() {
        let w = SignalWeights {
            textual_relevance: 0.1,
            tag_overlap: 1.0,
            ..SignalWeights::default()
        };
        let active = [SignalKind::TagOverlap, SignalKind::TextualRelevance];
        let text_only = Signals::new().with(SignalKind::TextualRelevance, 1.0);
        let tag_only = Signals::new().with(SignalKind::TagOverlap, 1.0);

        let text_only = fuse_over(&text_only, &w, &active).unwrap();
        let tag_only = fuse_over(&tag_only, &w, &active).unwrap();

        assert!(approx(text_only.score, 0.1 / 1.1));
        assert!(approx(tag_only.score, 1.0 / 1.1));
        assert_eq!(text_only.contributions.len(), 1);
    }

    #[test]
    fn fuse_over_present_set_matches_fuse() {
        let w = SignalWeights::default();
        let s = Signals::new()
            .with(SignalKind::TagOverlap, 0.5)
            .with(SignalKind::SemanticSimilarity, 0.9);
        let active = [SignalKind::SemanticSimilarity, SignalKind::TagOverlap];
        assert_eq!(fuse_over(&s, &w, &active), fuse(&s, &w));
        assert_eq!(fuse_over(&Signals::new(), &w, &active), None);
    }

    #[test]
    fn zero_weight_only_signals_yield_nothing() {
        let w = SignalWeights {
            textual_relevance: 0.0,
            ..SignalWeights::default()
        };
        let s = Signals::new().with(SignalKind::TextualRelevance, 0.9);
        assert_eq!(fuse(&s, &w), None);
    }
}
