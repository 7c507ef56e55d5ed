//! Read-only note model consumed by the engine.
//!
//! The note store owns notes; the engine only ever sees a borrowed `&[Note]`
//! snapshot for the duration of one build or query.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::{GraphError, Result};

/// `[[20240101120000]]` or `[[20240101120000|label]]` inside note content.
static WIKI_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[([^\[\]|\s]+)(?:\|[^\]]*)?\]\]").expect("wiki-link pattern is valid")
});

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque, orderable note identifier.
///
/// Identifiers are usually derived from the creation time (see
/// [`NoteId::from_timestamp`]) and therefore sort in creation order, but the
/// engine only relies on them being totally ordered and unique.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(pub String);

impl NoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Time-derived identifier in the `YYYYMMDDHHMMSS` form used by the note store.
    pub fn from_timestamp(at: DateTime<Utc>) -> Self {
        Self(at.format("%Y%m%d%H%M%S").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NoteId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NoteId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

/// Who attached a tag to a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagSource {
    /// Written by the user.
    #[default]
    User,
    /// Suggested by a model (auto-tagging). Older stores call this `ai`.
    #[serde(alias = "ai")]
    Derived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    #[serde(default)]
    pub source: TagSource,
    /// Confidence in \[0.0, 1.0\]. User tags are always 1.0.
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

impl Tag {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: TagSource::User,
            confidence: 1.0,
        }
    }

    pub fn derived(name: impl Into<String>, confidence: f32) -> Self {
        Self {
            name: name.into(),
            source: TagSource::Derived,
            confidence,
        }
    }

    /// Comparison key: trimmed and lowercased, so `DSA` and `dsa ` are one tag.
    pub fn key(&self) -> String {
        self.name.trim().to_lowercase()
    }
}

impl From<&str> for Tag {
    fn from(name: &str) -> Self {
        Tag::user(name)
    }
}

// ---------------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------------

/// A dense embedding, versioned by the model that produced it.
///
/// Two embeddings are only comparable when both `model` and `dimension`
/// match; otherwise the semantic signal between them is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub model: String,
    pub dimension: usize,
    pub vector: Vec<f32>,
}

impl Embedding {
    /// Build an embedding whose declared dimension is the vector length.
    pub fn new(model: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            model: model.into(),
            dimension: vector.len(),
            vector,
        }
    }

    pub fn is_compatible(&self, other: &Embedding) -> bool {
        self.model == other.model && self.dimension == other.dimension
    }

    /// Reject embeddings whose payload disagrees with their declared shape.
    pub fn validate(&self, owner: &str) -> Result<()> {
        if self.dimension == 0 {
            return Err(GraphError::DataIntegrity(format!(
                "{owner}: embedding from model `{}` declares dimension 0",
                self.model
            )));
        }
        if self.vector.len() != self.dimension {
            return Err(GraphError::DataIntegrity(format!(
                "{owner}: embedding from model `{}` declares dimension {} but has {} components",
                self.model,
                self.dimension,
                self.vector.len()
            )));
        }
        if self.vector.iter().any(|x| !x.is_finite()) {
            return Err(GraphError::DataIntegrity(format!(
                "{owner}: embedding from model `{}` contains non-finite components",
                self.model
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Notes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteKind {
    #[default]
    Note,
    Summary,
    Synthesis,
    Quiz,
    Template,
}

/// A note as seen by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    #[serde(default)]
    pub kind: NoteKind,
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub embedding: Option<Embedding>,
    /// Outgoing references recorded in metadata.
    #[serde(default)]
    pub links: Vec<NoteId>,
    /// Source note when this one is a derivative (summary, quiz, ...).
    #[serde(default)]
    pub derived_from: Option<NoteId>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    /// Soft-delete marker. A deleted note is invisible to the engine.
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Note {
    pub fn new(id: impl Into<NoteId>, content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            kind: NoteKind::Note,
            title: None,
            content: content.into(),
            tags: Vec::new(),
            embedding: None,
            links: Vec::new(),
            derived_from: None,
            created_at,
            modified_at: created_at,
            deleted_at: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_kind(mut self, kind: NoteKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<Tag>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Tag>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_link(mut self, target: impl Into<NoteId>) -> Self {
        self.links.push(target.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Embedding) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_derived_from(mut self, source: impl Into<NoteId>) -> Self {
        self.derived_from = Some(source.into());
        self
    }

    pub fn with_modified_at(mut self, at: DateTime<Utc>) -> Self {
        self.modified_at = at;
        self
    }

    pub fn deleted(mut self, at: DateTime<Utc>) -> Self {
        self.deleted_at = Some(at);
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Every note this one points at: metadata links, `[[id]]` links in the
    /// content and the provenance source. Self-references are dropped.
    pub fn references(&self) -> BTreeSet<NoteId> {
        let mut refs: BTreeSet<NoteId> = self.links.iter().cloned().collect();
        for cap in WIKI_LINK.captures_iter(&self.content) {
            refs.insert(NoteId::new(&cap[1]));
        }
        if let Some(source) = &self.derived_from {
            refs.insert(source.clone());
        }
        refs.remove(&self.id);
        refs
    }

    /// Reject notes that indicate upstream corruption.
    pub fn validate(&self) -> Result<()> {
        if self.id.0.trim().is_empty() {
            return Err(GraphError::DataIntegrity("note with empty id".into()));
        }
        if let Some(embedding) = &self.embedding {
            embedding.validate(&format!("note {}", self.id))?;
        }
        for tag in &self.tags {
            if !(0.0..=1.0).contains(&tag.confidence) {
                return Err(GraphError::DataIntegrity(format!(
                    "note {}: tag `{}` has confidence {} outside [0, 1]",
                    self.id, tag.name, tag.confidence
                )));
            }
        }
        Ok(())
    }
}

/// The live notes of a snapshot: soft-deleted notes dropped, the rest
/// validated and sorted by id. Two live notes sharing an id is an integrity
/// error.
pub(crate) fn live_snapshot(notes: &[Note]) -> Result<Vec<&Note>> {
    let mut live: Vec<&Note> = notes.iter().filter(|n| !n.is_deleted()).collect();
    for note in &live {
        note.validate()?;
    }
    live.sort_by(|a, b| a.id.cmp(&b.id));
    if let Some(pair) = live.windows(2).find(|w| w[0].id == w[1].id) {
        return Err(GraphError::DataIntegrity(format!(
            "duplicate note id {}",
            pair[0].id
        )));
    }
    Ok(live)
}
