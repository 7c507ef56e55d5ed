//! Graph staleness tracking.
//!
//! A two-state machine, Fresh and Stale. Every note mutation moves it to
//! Stale; a successful rebuild moves it back to Fresh. Alongside the state it
//! keeps the set of notes changed since the last rebuild, which is what an
//! incremental rebuild recomputes.
//!
//! The process-wide instance from [`StalenessTracker::global`] starts Fresh
//! with no pending changes the first time it is touched and is discarded with
//! the process. It is never persisted: a restarted process must rebuild
//! before it can claim a fresh graph.
//!
//! Each mutation is stamped with a generation number. A rebuild works from a
//! [`StalenessSnapshot`] taken before it reads the notes, and on completion
//! only clears changes up to that snapshot's generation, so a mutation that
//! lands while a build is running keeps the graph Stale.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use crate::note::NoteId;

static GLOBAL: OnceLock<Arc<StalenessTracker>> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Fresh,
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mutation {
    Created,
    Edited,
    Deleted,
}

/// Point-in-time copy of the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StalenessSnapshot {
    pub state: Freshness,
    /// Distinct notes changed since the last rebuild.
    pub pending_changes: usize,
    pub changed: BTreeSet<NoteId>,
    /// True when only a full rebuild can make the graph fresh again.
    pub full_rebuild_required: bool,
    pub generation: u64,
}

#[derive(Debug, Default)]
struct Inner {
    generation: u64,
    /// Latest mutation per note and the generation it was recorded at.
    changed: BTreeMap<NoteId, (Mutation, u64)>,
    /// Generation of the latest `invalidate`, until a full rebuild covers it.
    invalidated_at: Option<u64>,
}

impl Inner {
    fn state(&self) -> Freshness {
        if self.changed.is_empty() && self.invalidated_at.is_none() {
            Freshness::Fresh
        } else {
            Freshness::Stale
        }
    }

    fn snapshot(&self) -> StalenessSnapshot {
        StalenessSnapshot {
            state: self.state(),
            pending_changes: self.changed.len(),
            changed: self.changed.keys().cloned().collect(),
            full_rebuild_required: self.invalidated_at.is_some(),
            generation: self.generation,
        }
    }
}

#[derive(Debug, Default)]
pub struct StalenessTracker {
    inner: Mutex<Inner>,
}

impl StalenessTracker {
    /// A private tracker, Fresh and empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide tracker shared by every caller in this process.
    pub fn global() -> Arc<StalenessTracker> {
        GLOBAL
            .get_or_init(|| Arc::new(StalenessTracker::new()))
            .clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The guarded state is always consistent between statements, so a
        // panic in another holder leaves nothing half-written.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a note mutation. Idempotent with respect to state: Stale stays
    /// Stale.
    pub fn record(&self, id: &NoteId, mutation: Mutation) {
        let mut inner = self.lock();
        let was = inner.state();
        inner.generation += 1;
        let generation = inner.generation;
        inner.changed.insert(id.clone(), (mutation, generation));
        if was == Freshness::Fresh {
            tracing::info!(note = %id, ?mutation, "Knowledge graph marked stale.");
        }
    }

    /// Require a full rebuild, e.g. after the graph configuration changed.
    pub fn invalidate(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.invalidated_at = Some(inner.generation);
        tracing::info!("Knowledge graph invalidated; full rebuild required.");
    }

    pub fn state(&self) -> Freshness {
        self.lock().state()
    }

    pub fn is_stale(&self) -> bool {
        self.state() == Freshness::Stale
    }

    pub fn pending_changes(&self) -> usize {
        self.lock().changed.len()
    }

    /// Latest mutation recorded for `id` since the last rebuild.
    pub fn last_mutation(&self, id: &NoteId) -> Option<Mutation> {
        self.lock().changed.get(id).map(|(m, _)| *m)
    }

    pub fn snapshot(&self) -> StalenessSnapshot {
        self.lock().snapshot()
    }

    /// Snapshot for an incremental rebuild. Incremental rebuilds only start
    /// from Stale and never cover an invalidation, so this is `None` when the
    /// graph is Fresh or a full rebuild is required.
    pub fn begin_incremental(&self) -> Option<StalenessSnapshot> {
        let inner = self.lock();
        if inner.state() == Freshness::Fresh || inner.invalidated_at.is_some() {
            return None;
        }
        Some(inner.snapshot())
    }

    /// Record a successful rebuild that covered everything in `snapshot`.
    ///
    /// Changes recorded after the snapshot was taken stay pending. Returns the
    /// resulting state.
    pub fn mark_rebuilt(&self, snapshot: &StalenessSnapshot) -> Freshness {
        let mut inner = self.lock();
        let covered = snapshot.generation;
        inner.changed.retain(|_, (_, generation)| *generation > covered);
        if inner.invalidated_at.is_some_and(|g| g <= covered) {
            inner.invalidated_at = None;
        }
        let state = inner.state();
        match state {
            Freshness::Fresh => tracing::info!(generation = covered, "Knowledge graph is fresh."),
            Freshness::Stale => tracing::info!(
                generation = covered,
                pending = inner.changed.len(),
                "Knowledge graph rebuilt but changed during the build; still stale."
            ),
        }
        state
    }
}
