//! Graph builder: all-pairs scoring, per-note top-K, union edge set.
//!
//! The build is quadratic in the number of live notes. That is deliberate:
//! the graph has to be deterministic and every edge explainable, and the
//! target corpus is a personal notebook of up to a few thousand notes. It is
//! not meant to scale past that.
//!
//! # Parallelism
//!
//! Source rows are split into batches of `batch_rows`. Each batch scores the
//! pairs `(i, j > i)` for its rows on a request-scoped rayon pool and keeps a
//! local top-K per note; the local lists are then merged. Candidates are
//! ordered by fused score descending, then target id ascending. That order is
//! total, so the merged result does not depend on how the rows were split or
//! how many workers ran.
//!
//! # Incremental rebuilds
//!
//! [`GraphBuilder::build_with_cache`] also returns a [`PairCache`] holding the
//! scored pairs. [`GraphBuilder::rebuild_incremental`] recomputes only pairs
//! touching changed notes and reuses the cache for the rest. When it cannot
//! show that the result equals a full rebuild it returns the previous graph
//! marked stale instead.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{GraphConfig, LinkPolicy};
use crate::fusion::{fuse, Fused};
use crate::graph::{Edge, Graph, GraphNode};
use crate::note::{live_snapshot, Note, NoteId};
use crate::signals::{pair_signals, PreparedNote};
use crate::{GraphError, Result};

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Shared flag a caller flips to abandon a running build or query.
///
/// It is checked between pair batches; a cancelled operation returns
/// [`GraphError::Cancelled`] and its partial results are dropped.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(GraphError::Cancelled);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pair scores and the incremental cache
// ---------------------------------------------------------------------------

/// Fused scores for an unordered pair `(lo, hi)`, `lo < hi` by id.
///
/// `forward` is the pair as a candidate of `lo`, `backward` as a candidate of
/// `hi`. Scores below `min_score` are already dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct PairScore {
    pub forward: Option<Fused>,
    pub backward: Option<Fused>,
}

impl PairScore {
    fn is_empty(&self) -> bool {
        self.forward.is_none() && self.backward.is_none()
    }
}

/// Scored pairs from a previous build, reused by incremental rebuilds.
#[derive(Debug, Clone)]
pub struct PairCache {
    config: GraphConfig,
    /// `modified_at` of every live note at build time.
    versions: HashMap<NoteId, DateTime<Utc>>,
    /// Keyed by `(lo, hi)`. Pairs with no surviving score are not stored.
    pairs: HashMap<(NoteId, NoteId), PairScore>,
}

impl PairCache {
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Number of cached pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn covers(&self, id: &NoteId) -> bool {
        self.versions.contains_key(id)
    }

    pub fn pair(&self, a: &NoteId, b: &NoteId) -> Option<&PairScore> {
        let key = if a < b {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        };
        self.pairs.get(&key)
    }
}

/// Why an incremental rebuild could not be proven equal to a full rebuild.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IncrementalUnsafe {
    #[error("graph configuration changed since the cached build")]
    ConfigChanged,
    #[error("note {0} differs from the cached build but was not reported as changed")]
    UnreportedChange(NoteId),
}

/// Result of [`GraphBuilder::rebuild_incremental`].
#[derive(Debug, Clone)]
pub enum IncrementalOutcome {
    /// The rebuilt graph equals what a full rebuild would produce.
    Applied {
        graph: Graph,
        cache: PairCache,
        recomputed_pairs: usize,
    },
    /// Equivalence could not be shown; `graph` is the previous graph marked
    /// stale, and a full rebuild is still owed.
    Unsafe {
        graph: Graph,
        reason: IncrementalUnsafe,
    },
}

// ---------------------------------------------------------------------------
// Top-K selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Candidate {
    /// Index into the id-sorted live notes, so index order is id order.
    target: usize,
    fused: Fused,
}

/// Score descending, then target id ascending.
fn outranks(a: &Candidate, b: &Candidate) -> bool {
    match a.fused.score.total_cmp(&b.fused.score) {
        CmpOrdering::Greater => true,
        CmpOrdering::Less => false,
        CmpOrdering::Equal => a.target < b.target,
    }
}

/// Best-first candidate lists, at most `k` per source.
#[derive(Debug)]
struct TopK {
    k: usize,
    lists: Vec<Vec<Candidate>>,
}

impl TopK {
    fn new(nodes: usize, k: usize) -> Self {
        Self {
            k,
            lists: vec![Vec::new(); nodes],
        }
    }

    fn offer(&mut self, source: usize, candidate: Candidate) {
        let list = &mut self.lists[source];
        let pos = list.partition_point(|c| outranks(c, &candidate));
        if pos >= self.k {
            return;
        }
        list.insert(pos, candidate);
        list.truncate(self.k);
    }

    fn offer_pair(&mut self, lo: usize, hi: usize, score: &PairScore) {
        if let Some(fused) = &score.forward {
            self.offer(
                lo,
                Candidate {
                    target: hi,
                    fused: fused.clone(),
                },
            );
        }
        if let Some(fused) = &score.backward {
            self.offer(
                hi,
                Candidate {
                    target: lo,
                    fused: fused.clone(),
                },
            );
        }
    }

    fn merge(mut self, other: TopK) -> TopK {
        for (source, list) in other.lists.into_iter().enumerate() {
            for candidate in list {
                self.offer(source, candidate);
            }
        }
        self
    }
}

/// What one batch of rows hands back to the merge step.
#[derive(Debug)]
struct BatchOutput {
    top: TopK,
    pairs: Vec<(usize, usize, PairScore)>,
}

impl BatchOutput {
    fn new(nodes: usize, k: usize) -> Self {
        Self {
            top: TopK::new(nodes, k),
            pairs: Vec::new(),
        }
    }

    fn merge(mut self, other: BatchOutput) -> BatchOutput {
        self.top = self.top.merge(other.top);
        self.pairs.extend(other.pairs);
        self
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builds bounded graphs from note snapshots.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    config: GraphConfig,
    cancel: CancelToken,
}

/// Full build with a fresh builder: `build(notes, config) -> Graph`.
pub fn build(notes: &[Note], config: &GraphConfig) -> Result<Graph> {
    GraphBuilder::new(config.clone())?.build(notes)
}

impl GraphBuilder {
    /// Validate `config` and create a builder. Invalid configuration is
    /// reported here, before any scoring.
    pub fn new(config: GraphConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: CancelToken::new(),
        })
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn build(&self, notes: &[Note]) -> Result<Graph> {
        self.build_inner(notes, false).map(|(graph, _)| graph)
    }

    /// Full build that also returns the pair cache for later incremental
    /// rebuilds.
    pub fn build_with_cache(&self, notes: &[Note]) -> Result<(Graph, PairCache)> {
        self.build_inner(notes, true)
    }

    fn build_inner(&self, notes: &[Note], keep_pairs: bool) -> Result<(Graph, PairCache)> {
        let started = Instant::now();
        self.cancel.checkpoint()?;

        let live = live_snapshot(notes)?;
        let prepared: Vec<PreparedNote<'_>> = live
            .iter()
            .map(|n| PreparedNote::new(n, &self.config.tags))
            .collect();
        let n = prepared.len();

        let batches: Vec<Range<usize>> = (0..n)
            .step_by(self.config.batch_rows)
            .map(|start| start..(start + self.config.batch_rows).min(n))
            .collect();

        let output = self.run_batches(batches, n, |rows| {
            self.score_rows(rows, &prepared, keep_pairs)
        })?;
        self.cancel.checkpoint()?;

        let graph = self.materialize(&prepared, output.top);
        let cache = self.cache_from(&prepared, &output.pairs);

        tracing::info!(
            notes = n,
            edges = graph.edge_count(),
            cached_pairs = cache.len(),
            workers = self.config.workers,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Built knowledge graph."
        );

        Ok((graph, cache))
    }

    /// Recompute pairs touching `changed`, reuse `cache` for the rest.
    ///
    /// `changed` lists every note created, edited or deleted since `cache`
    /// was produced. Notes in `changed` that are no longer live are simply
    /// dropped from the graph.
    pub fn rebuild_incremental(
        &self,
        previous: &Graph,
        cache: &PairCache,
        notes: &[Note],
        changed: &BTreeSet<NoteId>,
    ) -> Result<IncrementalOutcome> {
        let started = Instant::now();
        self.cancel.checkpoint()?;

        if !cache.config.same_output_as(&self.config) {
            return Ok(self.unsafe_outcome(previous, IncrementalUnsafe::ConfigChanged));
        }

        let live = live_snapshot(notes)?;
        for note in &live {
            if changed.contains(&note.id) {
                continue;
            }
            if cache.versions.get(&note.id) != Some(&note.modified_at) {
                return Ok(self.unsafe_outcome(
                    previous,
                    IncrementalUnsafe::UnreportedChange(note.id.clone()),
                ));
            }
        }

        let prepared: Vec<PreparedNote<'_>> = live
            .iter()
            .map(|n| PreparedNote::new(n, &self.config.tags))
            .collect();
        let n = prepared.len();
        let index: HashMap<&NoteId, usize> =
            prepared.iter().enumerate().map(|(i, p)| (p.id(), i)).collect();
        let is_changed: Vec<bool> = prepared.iter().map(|p| changed.contains(p.id())).collect();

        // Rows for changed notes; each scores every partner not already
        // covered by an earlier changed row.
        let changed_rows: Vec<usize> = (0..n).filter(|&i| is_changed[i]).collect();
        let recomputed = self.run_batches(
            changed_rows
                .chunks(self.config.batch_rows)
                .map(|chunk| chunk.to_vec())
                .collect(),
            n,
            |rows: Vec<usize>| {
                self.cancel.checkpoint()?;
                let mut out = BatchOutput::new(n, self.config.top_k);
                for c in rows {
                    for j in (0..n).filter(|&j| j != c && !(is_changed[j] && j < c)) {
                        let (lo, hi) = if c < j { (c, j) } else { (j, c) };
                        let score = self.score_pair(&prepared[lo], &prepared[hi]);
                        if !score.is_empty() {
                            out.pairs.push((lo, hi, score));
                        }
                    }
                }
                Ok(out)
            },
        )?;
        let recomputed_pairs = recomputed.pairs.len();

        let mut pairs = recomputed.pairs;
        for ((a, b), score) in &cache.pairs {
            if let (Some(&lo), Some(&hi)) = (index.get(a), index.get(b)) {
                if !is_changed[lo] && !is_changed[hi] {
                    pairs.push((lo, hi, score.clone()));
                }
            }
        }
        self.cancel.checkpoint()?;

        let mut top = TopK::new(n, self.config.top_k);
        for (lo, hi, score) in &pairs {
            top.offer_pair(*lo, *hi, score);
        }

        let graph = self.materialize(&prepared, top);
        let cache = self.cache_from(&prepared, &pairs);

        tracing::info!(
            notes = n,
            changed = changed.len(),
            recomputed_pairs,
            edges = graph.edge_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Incrementally rebuilt knowledge graph."
        );

        Ok(IncrementalOutcome::Applied {
            graph,
            cache,
            recomputed_pairs,
        })
    }

    fn unsafe_outcome(&self, previous: &Graph, reason: IncrementalUnsafe) -> IncrementalOutcome {
        tracing::warn!(reason = %reason, "Incremental rebuild is unsafe; graph marked stale.");
        let mut graph = previous.clone();
        graph.mark_stale();
        IncrementalOutcome::Unsafe { graph, reason }
    }

    /// Run `job` over `batches` on the configured pool and merge the outputs.
    fn run_batches<B, F>(&self, batches: Vec<B>, nodes: usize, job: F) -> Result<BatchOutput>
    where
        B: Send,
        F: Fn(B) -> Result<BatchOutput> + Sync + Send,
    {
        let k = self.config.top_k;
        tracing::debug!(batches = batches.len(), nodes, "Scoring pair batches.");

        if self.config.workers == 1 {
            return batches
                .into_iter()
                .try_fold(BatchOutput::new(nodes, k), |acc, batch| {
                    Ok(acc.merge(job(batch)?))
                });
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build()?;
        pool.install(|| {
            batches
                .into_par_iter()
                .map(&job)
                .try_reduce(|| BatchOutput::new(nodes, k), |a, b| Ok(a.merge(b)))
        })
    }

    fn score_rows(
        &self,
        rows: Range<usize>,
        prepared: &[PreparedNote<'_>],
        keep_pairs: bool,
    ) -> Result<BatchOutput> {
        self.cancel.checkpoint()?;
        let n = prepared.len();
        let mut out = BatchOutput::new(n, self.config.top_k);
        for i in rows {
            for j in (i + 1)..n {
                let score = self.score_pair(&prepared[i], &prepared[j]);
                if score.is_empty() {
                    continue;
                }
                out.top.offer_pair(i, j, &score);
                if keep_pairs {
                    out.pairs.push((i, j, score));
                }
            }
        }
        Ok(out)
    }

    fn score_pair(&self, lo: &PreparedNote<'_>, hi: &PreparedNote<'_>) -> PairScore {
        let (forward, backward) = pair_signals(lo, hi, &self.config);
        let keep = |fused: Fused| (fused.score >= self.config.min_score).then_some(fused);
        let forward = fuse(&forward, &self.config.weights).and_then(keep);
        let backward = match self.config.link_policy {
            // Both views are identical; skip the second fusion.
            LinkPolicy::Symmetric => forward.clone(),
            LinkPolicy::Directed => fuse(&backward, &self.config.weights).and_then(keep),
        };
        PairScore { forward, backward }
    }

    /// Turn per-note top-K lists into the union edge set.
    fn materialize(&self, prepared: &[PreparedNote<'_>], top: TopK) -> Graph {
        let directed = self.config.link_policy == LinkPolicy::Directed;
        let nodes: Vec<GraphNode> = prepared.iter().map(|p| GraphNode::from_note(p.note)).collect();

        let mut kept: BTreeMap<(usize, usize), Edge> = BTreeMap::new();
        // Sources are visited in id order, so when both endpoints of an
        // undirected pair keep it, the smaller id becomes the source.
        for (source, list) in top.lists.into_iter().enumerate() {
            for candidate in list {
                let target = candidate.target;
                let key = if directed || source < target {
                    (source, target)
                } else {
                    (target, source)
                };
                kept.entry(key).or_insert_with(|| Edge {
                    source: prepared[source].id().clone(),
                    target: prepared[target].id().clone(),
                    score: candidate.fused.score,
                    signals: candidate.fused.contributions,
                });
            }
        }

        Graph::from_parts(nodes, kept.into_values().collect(), directed)
    }

    fn cache_from(
        &self,
        prepared: &[PreparedNote<'_>],
        pairs: &[(usize, usize, PairScore)],
    ) -> PairCache {
        PairCache {
            config: self.config.clone(),
            versions: prepared
                .iter()
                .map(|p| (p.id().clone(), p.note.modified_at))
                .collect(),
            pairs: pairs
                .iter()
                .map(|(lo, hi, score)| {
                    (
                        (prepared[*lo].id().clone(), prepared[*hi].id().clone()),
                        score.clone(),
                    )
                })
                .collect(),
        }
    }
}
