//! Full-text collaborator.
//!
//! The engine treats full-text ranking as an external service behind
//! [`TextIndex`]. Scores must already be normalized to \[0, 1\]; `None` means
//! "no match", which is not the same as a zero score.

use std::collections::{BTreeSet, HashMap};
use unicode_segmentation::UnicodeSegmentation;

use crate::note::{Note, NoteId};

pub trait TextIndex {
    /// Relevance of `note` for `query` in \[0, 1\], or `None` on no match.
    fn relevance(&self, query: &str, note: &Note) -> Option<f64>;

    /// Every matching note, best first (ties by id ascending). Search calls
    /// this once per query; override it when scoring can share per-query work.
    fn rank_all(&self, query: &str, notes: &[Note]) -> Vec<(NoteId, f64)> {
        let mut ranked: Vec<(NoteId, f64)> = notes
            .iter()
            .filter(|n| !n.is_deleted())
            .filter_map(|n| self.relevance(query, n).map(|score| (n.id.clone(), score)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
    }
}

/// An index that never matches. Used when no full-text backend is wired up.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTextIndex;

impl TextIndex for NoTextIndex {
    fn relevance(&self, _query: &str, _note: &Note) -> Option<f64> {
        None
    }
}

/// In-memory keyword index over note titles and content.
///
/// A note's relevance is the fraction of distinct query terms it contains.
/// Terms are Unicode words, lowercased.
#[derive(Debug, Clone, Default)]
pub struct KeywordIndex {
    terms: HashMap<NoteId, BTreeSet<String>>,
}

impl KeywordIndex {
    pub fn build(notes: &[Note]) -> Self {
        let terms = notes
            .iter()
            .filter(|n| !n.is_deleted())
            .map(|n| (n.id.clone(), note_terms(n)))
            .collect();
        Self { terms }
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

impl KeywordIndex {
    fn coverage(&self, wanted: &BTreeSet<String>, id: &NoteId) -> Option<f64> {
        if wanted.is_empty() {
            return None;
        }
        let have = self.terms.get(id)?;
        let matched = wanted.iter().filter(|t| have.contains(*t)).count();
        (matched > 0).then(|| matched as f64 / wanted.len() as f64)
    }
}

impl TextIndex for KeywordIndex {
    fn relevance(&self, query: &str, note: &Note) -> Option<f64> {
        self.coverage(&terms(query), &note.id)
    }

    // Splits the query once for the whole corpus.
    fn rank_all(&self, query: &str, notes: &[Note]) -> Vec<(NoteId, f64)> {
        let wanted = terms(query);
        let mut ranked: Vec<(NoteId, f64)> = notes
            .iter()
            .filter(|n| !n.is_deleted())
            .filter_map(|n| self.coverage(&wanted, &n.id).map(|score| (n.id.clone(), score)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
    }
}

fn note_terms(note: &Note) -> BTreeSet<String> {
    let mut out = terms(&note.content);
    if let Some(title) = &note.title {
        out.extend(terms(title));
    }
    out
}

fn terms(text: &str) -> BTreeSet<String> {
    text.unicode_words().map(str::to_lowercase).collect()
}
