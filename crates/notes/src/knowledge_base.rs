//! Knowledge base API for personal notes, built on `monoid-graph`.
//!
//! [`KnowledgeBase`] ties the engine to a note store: it keeps the last
//! built graph with its pair cache, feeds the staleness tracker from the
//! store's mutation hooks, and decides on each [`KnowledgeBase::refresh`]
//! whether nothing, an incremental rebuild or a full rebuild is needed.
//!
//! # Usage
//!
//! ```rust
//! use chrono::Utc;
//! use monoid_notes::{KnowledgeBase, Note, NoteId, Refresh};
//!
//! let now = Utc::now();
//! let mut notes = vec![
//!     Note::new("a", "binary search", now).with_tags(["dsa"]),
//!     Note::new("b", "two pointers", now).with_tags(["dsa"]),
//! ];
//!
//! let kb = KnowledgeBase::in_memory().unwrap();
//! kb.refresh(&notes).unwrap();
//! assert_eq!(kb.related(&NoteId::new("a")), vec![NoteId::new("b")]);
//!
//! // The store reports every mutation; the next refresh is incremental.
//! notes.push(Note::new("c", "sliding window", now).with_link("b"));
//! kb.note_created(&notes[2]);
//! let report = kb.refresh(&notes).unwrap();
//! assert!(matches!(report.refresh, Refresh::Incremental { .. }));
//!
//! let hits = kb.search_text("binary", &[], &notes).unwrap();
//! assert_eq!(hits[0].id, NoteId::new("a"));
//! ```

mod embedding;
mod error;
pub mod settings;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use monoid_graph::{
    search_with_cancel, CancelToken, GraphBuilder, IncrementalOutcome, KeywordIndex, Mutation,
    PairCache, SearchMode, StalenessSnapshot, StalenessTracker,
};

pub use embedding::EmbeddingProvider;
pub use error::{Error, Result};
pub use monoid_graph::{
    Freshness, Graph, GraphConfig, GraphStats, IncrementalUnsafe, Note, NoteId, Query,
    SearchResult,
};
pub use settings::Settings;

// ---------------------------------------------------------------------------
// Note source
// ---------------------------------------------------------------------------

/// Where a rebuild reads its snapshot from.
///
/// Rebuilds capture the tracker state *before* loading notes, so a mutation
/// reported while a rebuild is running is never marked as covered.
pub trait NoteSource {
    fn load_notes(&self) -> Result<Vec<Note>>;
}

impl NoteSource for [Note] {
    fn load_notes(&self) -> Result<Vec<Note>> {
        Ok(self.to_vec())
    }
}

impl NoteSource for Vec<Note> {
    fn load_notes(&self) -> Result<Vec<Note>> {
        Ok(self.clone())
    }
}

// ---------------------------------------------------------------------------
// Refresh reporting
// ---------------------------------------------------------------------------

/// What a refresh did.
#[derive(Debug, Clone, PartialEq)]
pub enum Refresh {
    /// The graph was fresh; nothing ran.
    UpToDate,
    Incremental {
        changed: usize,
        recomputed_pairs: usize,
    },
    Full {
        reason: FullRebuildReason,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FullRebuildReason {
    /// Explicit [`KnowledgeBase::rebuild`] call.
    Requested,
    NoPreviousGraph,
    /// Settings changed since the last build.
    Invalidated,
    IncrementalDisabled,
    TooManyChanges { pending: usize, notes: usize },
    /// The incremental path could not prove equivalence.
    Unsafe(IncrementalUnsafe),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshReport {
    pub refresh: Refresh,
    /// Tracker state after the refresh. Stale when notes changed mid-build.
    pub freshness: Freshness,
    pub stats: GraphStats,
}

// ---------------------------------------------------------------------------
// Knowledge base
// ---------------------------------------------------------------------------

struct Built {
    graph: Graph,
    cache: PairCache,
}

/// High-level entry point: one per note store.
///
/// Knowledge bases built with [`KnowledgeBase::new`] or
/// [`KnowledgeBase::open`] share the process-wide tracker, so a process should
/// hold at most one of them. Use [`KnowledgeBase::in_memory`] or
/// [`KnowledgeBase::with_tracker`] when several must coexist.
pub struct KnowledgeBase {
    settings: Settings,
    tracker: Arc<StalenessTracker>,
    embedder: Option<Box<dyn EmbeddingProvider>>,
    cancel: Mutex<CancelToken>,
    built: Mutex<Option<Built>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl KnowledgeBase {
    /// Create a knowledge base wired to the process-wide staleness tracker.
    ///
    /// Only one such knowledge base may live per process: a rebuild clears
    /// the shared tracker's pending changes, including changes another
    /// instance recorded. Give additional instances their own tracker with
    /// [`Self::with_tracker`].
    pub fn new(settings: Settings) -> Result<Self> {
        settings::validate(&settings)?;
        Ok(Self {
            settings,
            tracker: StalenessTracker::global(),
            embedder: None,
            cancel: Mutex::new(CancelToken::new()),
            built: Mutex::new(None),
        })
    }

    /// Default settings and a private tracker.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Settings::default())?.with_tracker(Arc::new(StalenessTracker::new())))
    }

    /// Load settings from a TOML file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(settings::load(path.as_ref())?)
    }

    pub fn with_tracker(mut self, tracker: Arc<StalenessTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    /// Plug in an embedding provider. Its model must match
    /// `embedding.model` when the settings name one.
    pub fn with_embedder(mut self, provider: impl EmbeddingProvider + 'static) -> Result<Self> {
        if let Some(expected) = &self.settings.embedding.model {
            if provider.model() != expected {
                return Err(Error::Embedding(format!(
                    "provider model `{}` does not match configured model `{expected}`",
                    provider.model()
                )));
            }
        }
        self.embedder = Some(Box::new(provider));
        Ok(self)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn tracker(&self) -> &Arc<StalenessTracker> {
        &self.tracker
    }

    /// Replace the graph configuration. The next refresh is a full rebuild.
    pub fn set_graph_config(&mut self, config: GraphConfig) -> Result<()> {
        config.validate()?;
        self.settings.graph = config;
        self.tracker.invalidate();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Mutation hooks
    // -----------------------------------------------------------------------

    pub fn note_created(&self, note: &Note) {
        self.tracker.record(&note.id, Mutation::Created);
    }

    pub fn note_edited(&self, note: &Note) {
        self.tracker.record(&note.id, Mutation::Edited);
    }

    pub fn note_deleted(&self, id: &NoteId) {
        self.tracker.record(id, Mutation::Deleted);
    }

    pub fn freshness(&self) -> Freshness {
        self.tracker.state()
    }

    pub fn pending_changes(&self) -> usize {
        self.tracker.pending_changes()
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    /// Token observed by operations started from now on.
    pub fn cancel_token(&self) -> CancelToken {
        lock(&self.cancel).clone()
    }

    /// Cancel every running build and search. Later operations get a new
    /// token and run normally.
    pub fn cancel(&self) {
        let mut token = lock(&self.cancel);
        token.cancel();
        *token = CancelToken::new();
        tracing::info!("Cancelled running knowledge base operations.");
    }

    // -----------------------------------------------------------------------
    // Rebuilds
    // -----------------------------------------------------------------------

    fn builder(&self) -> Result<GraphBuilder> {
        Ok(GraphBuilder::new(self.settings.graph.clone())?.with_cancel_token(self.cancel_token()))
    }

    /// Full rebuild regardless of tracker state.
    pub fn rebuild<S>(&self, source: &S) -> Result<RefreshReport>
    where
        S: NoteSource + ?Sized,
    {
        let mut built = lock(&self.built);
        let builder = self.builder()?;
        let (snapshot, notes) = self.capture(source)?;
        self.full_rebuild(&mut built, &builder, &snapshot, &notes, FullRebuildReason::Requested)
    }

    /// Bring the graph up to date the cheapest safe way.
    pub fn refresh<S>(&self, source: &S) -> Result<RefreshReport>
    where
        S: NoteSource + ?Sized,
    {
        let mut built = lock(&self.built);
        let builder = self.builder()?;
        let (snapshot, notes) = self.capture(source)?;

        let Some(previous) = built.as_ref() else {
            let reason = FullRebuildReason::NoPreviousGraph;
            return self.full_rebuild(&mut built, &builder, &snapshot, &notes, reason);
        };
        if snapshot.state == Freshness::Fresh {
            return Ok(RefreshReport {
                refresh: Refresh::UpToDate,
                freshness: Freshness::Fresh,
                stats: previous.graph.stats(),
            });
        }
        if snapshot.full_rebuild_required {
            let reason = FullRebuildReason::Invalidated;
            return self.full_rebuild(&mut built, &builder, &snapshot, &notes, reason);
        }
        if !self.settings.refresh.incremental {
            let reason = FullRebuildReason::IncrementalDisabled;
            return self.full_rebuild(&mut built, &builder, &snapshot, &notes, reason);
        }

        let live = notes.iter().filter(|n| !n.is_deleted()).count();
        let pending = snapshot.pending_changes;
        if pending as f64 > self.settings.refresh.max_incremental_fraction * live as f64 {
            let reason = FullRebuildReason::TooManyChanges {
                pending,
                notes: live,
            };
            return self.full_rebuild(&mut built, &builder, &snapshot, &notes, reason);
        }

        let outcome =
            builder.rebuild_incremental(&previous.graph, &previous.cache, &notes, &snapshot.changed)?;
        match outcome {
            IncrementalOutcome::Applied {
                graph,
                cache,
                recomputed_pairs,
            } => {
                let freshness = self.tracker.mark_rebuilt(&snapshot);
                let report = RefreshReport {
                    refresh: Refresh::Incremental {
                        changed: pending,
                        recomputed_pairs,
                    },
                    freshness,
                    stats: graph.stats(),
                };
                *built = Some(Built { graph, cache });
                Ok(report)
            }
            IncrementalOutcome::Unsafe { reason, .. } => {
                tracing::warn!(reason = %reason, "Falling back to a full rebuild.");
                let reason = FullRebuildReason::Unsafe(reason);
                self.full_rebuild(&mut built, &builder, &snapshot, &notes, reason)
            }
        }
    }

    /// Tracker state first, then the notes: anything reported after the
    /// snapshot stays pending even if the notes already reflect it.
    fn capture<S>(&self, source: &S) -> Result<(StalenessSnapshot, Vec<Note>)>
    where
        S: NoteSource + ?Sized,
    {
        let snapshot = self.tracker.snapshot();
        let notes = source.load_notes()?;
        Ok((snapshot, notes))
    }

    fn full_rebuild(
        &self,
        built: &mut Option<Built>,
        builder: &GraphBuilder,
        snapshot: &StalenessSnapshot,
        notes: &[Note],
        reason: FullRebuildReason,
    ) -> Result<RefreshReport> {
        tracing::info!(reason = ?reason, notes = notes.len(), "Running full graph rebuild.");
        let (graph, cache) = builder.build_with_cache(notes)?;
        let freshness = self.tracker.mark_rebuilt(snapshot);
        let report = RefreshReport {
            refresh: Refresh::Full { reason },
            freshness,
            stats: graph.stats(),
        };
        *built = Some(Built { graph, cache });
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Graph queries
    // -----------------------------------------------------------------------

    /// The last built graph, if any. It is marked stale while mutations are
    /// pending; see [`Self::freshness`].
    pub fn graph(&self) -> Option<Graph> {
        let mut graph = lock(&self.built).as_ref().map(|b| b.graph.clone())?;
        if self.tracker.is_stale() {
            graph.mark_stale();
        }
        Some(graph)
    }

    pub fn stats(&self) -> Option<GraphStats> {
        lock(&self.built).as_ref().map(|b| b.graph.stats())
    }

    pub fn related(&self, id: &NoteId) -> Vec<NoteId> {
        lock(&self.built)
            .as_ref()
            .map(|b| b.graph.related(id))
            .unwrap_or_default()
    }

    pub fn hubs(&self, limit: usize) -> Vec<(NoteId, usize)> {
        lock(&self.built)
            .as_ref()
            .map(|b| b.graph.hubs(limit))
            .unwrap_or_default()
    }

    /// The last built graph as pretty JSON, or `None` before the first build.
    pub fn export_json(&self) -> Result<Option<String>> {
        self.graph()
            .map(|graph| serde_json::to_string_pretty(&graph))
            .transpose()
            .map_err(Error::from)
    }

    // -----------------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------------

    /// Hybrid search with the configured options and an in-memory keyword
    /// index over `notes`.
    pub fn search(&self, query: &Query, notes: &[Note]) -> Result<Vec<SearchResult>> {
        let index = KeywordIndex::build(notes);
        let hits = search_with_cancel(
            query,
            notes,
            &self.settings.search,
            &index,
            &self.cancel_token(),
        )?;
        Ok(hits)
    }

    /// Search by text and tags. When the configured mode uses semantic
    /// similarity and a provider is plugged in, the text is embedded too.
    pub fn search_text(&self, text: &str, tags: &[&str], notes: &[Note]) -> Result<Vec<SearchResult>> {
        let mut query = Query::text(text).with_tags(tags.iter().copied());
        let semantic = matches!(
            self.settings.search.mode,
            SearchMode::Semantic | SearchMode::Hybrid
        );
        if semantic && !text.trim().is_empty() {
            if let Some(embedder) = &self.embedder {
                query.embedding = embedder.embed_query(text)?;
            }
        }
        self.search(&query, notes)
    }

    // -----------------------------------------------------------------------
    // Embeddings
    // -----------------------------------------------------------------------

    /// Embed live notes that have no embedding, or one from another model.
    ///
    /// Every note that receives an embedding is reported as edited. Returns
    /// the number of notes updated; zero when no provider is plugged in.
    pub fn embed_missing(&self, notes: &mut [Note]) -> Result<usize> {
        let Some(embedder) = &self.embedder else {
            return Ok(0);
        };
        let model = embedder.model().to_string();
        let mut updated = 0;
        for note in notes
            .iter_mut()
            .filter(|n| embedding::needs_embedding(n, &model))
        {
            let Some(embedding) = embedder.embed_note(note)? else {
                continue;
            };
            embedding.validate(&format!("note {}", note.id))?;
            note.embedding = Some(embedding);
            self.note_edited(note);
            updated += 1;
        }
        tracing::info!(model = %model, updated, "Embedded notes.");
        Ok(updated)
    }
}
