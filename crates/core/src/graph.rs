//! The materialized bounded graph and the statistics derived from it.
//!
//! Only nodes and edges are stored. Degree, neighbours, components and
//! density are recomputed from the edge set on every call so they can never
//! drift from it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::fusion::SignalContribution;
use crate::note::{Note, NoteId, NoteKind};

/// A node: the identity of a live note plus a few display attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: NoteId,
    pub title: Option<String>,
    pub kind: NoteKind,
    pub tags: Vec<String>,
}

impl GraphNode {
    pub(crate) fn from_note(note: &Note) -> Self {
        Self {
            id: note.id.clone(),
            title: note.title.clone(),
            kind: note.kind,
            tags: note.tags.iter().map(|t| t.name.clone()).collect(),
        }
    }
}

/// A kept relationship.
///
/// `source` is the endpoint whose top-K selected the edge. In an undirected
/// graph, when both endpoints selected it, the smaller identifier is the
/// source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NoteId,
    pub target: NoteId,
    pub score: f64,
    pub signals: Vec<SignalContribution>,
}

impl Edge {
    pub fn touches(&self, id: &NoteId) -> bool {
        &self.source == id || &self.target == id
    }
}

/// Summary statistics, computed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub density: f64,
    pub components: usize,
    pub largest_component: usize,
}

/// Bounded relationship graph over a note snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    /// Nodes sorted by id.
    nodes: Vec<GraphNode>,
    /// Edges sorted by `(source, target)`.
    edges: Vec<Edge>,
    directed: bool,
    stale: bool,
}

impl Graph {
    pub fn empty(directed: bool) -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            directed,
            stale: false,
        }
    }

    pub(crate) fn from_parts(mut nodes: Vec<GraphNode>, mut edges: Vec<Edge>, directed: bool) -> Self {
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        edges.sort_by(|a, b| a.source.cmp(&b.source).then_with(|| a.target.cmp(&b.target)));
        Self {
            nodes,
            edges,
            directed,
            stale: false,
        }
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn is_directed(&self) -> bool {
        self.directed
    }

    /// True when the graph no longer reflects the note corpus it came from.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &NoteId) -> bool {
        self.nodes.binary_search_by(|n| n.id.cmp(id)).is_ok()
    }

    pub fn node(&self, id: &NoteId) -> Option<&GraphNode> {
        self.nodes
            .binary_search_by(|n| n.id.cmp(id))
            .ok()
            .map(|i| &self.nodes[i])
    }

    /// Edges whose source is `id`; never more than the build's K.
    pub fn edges_from<'a>(&'a self, id: &'a NoteId) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| &e.source == id)
    }

    pub fn out_degree(&self, id: &NoteId) -> usize {
        self.edges_from(id).count()
    }

    /// Number of edges touching `id`, in either direction.
    pub fn degree(&self, id: &NoteId) -> usize {
        self.edges.iter().filter(|e| e.touches(id)).count()
    }

    /// Notes connected to `id` by an edge in either direction, sorted by id.
    pub fn related(&self, id: &NoteId) -> Vec<NoteId> {
        let neighbours: BTreeSet<&NoteId> = self
            .edges
            .iter()
            .filter_map(|e| {
                if &e.source == id {
                    Some(&e.target)
                } else if &e.target == id {
                    Some(&e.source)
                } else {
                    None
                }
            })
            .collect();
        neighbours.into_iter().cloned().collect()
    }

    /// The edge between two notes, if one was kept (either direction for
    /// undirected graphs).
    pub fn edge_between(&self, a: &NoteId, b: &NoteId) -> Option<&Edge> {
        self.edges.iter().find(|e| {
            (&e.source == a && &e.target == b)
                || (!self.directed && &e.source == b && &e.target == a)
        })
    }

    /// Edge count relative to the maximum possible edge count.
    pub fn density(&self) -> f64 {
        let n = self.nodes.len() as f64;
        if n < 2.0 {
            return 0.0;
        }
        let possible = if self.directed {
            n * (n - 1.0)
        } else {
            n * (n - 1.0) / 2.0
        };
        self.edges.len() as f64 / possible
    }

    /// Weakly connected components, largest first, ties by smallest member id.
    /// Members of each component are sorted by id.
    pub fn components(&self) -> Vec<Vec<NoteId>> {
        let index: HashMap<&NoteId, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (&n.id, i))
            .collect();
        let mut sets = DisjointSets::new(self.nodes.len());
        for edge in &self.edges {
            if let (Some(&a), Some(&b)) = (index.get(&edge.source), index.get(&edge.target)) {
                sets.union(a, b);
            }
        }

        let mut groups: BTreeMap<usize, Vec<NoteId>> = BTreeMap::new();
        for (i, node) in self.nodes.iter().enumerate() {
            groups.entry(sets.find(i)).or_default().push(node.id.clone());
        }

        let mut components: Vec<Vec<NoteId>> = groups.into_values().collect();
        components.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a[0].cmp(&b[0])));
        components
    }

    pub fn stats(&self) -> GraphStats {
        let components = self.components();
        GraphStats {
            nodes: self.node_count(),
            edges: self.edge_count(),
            density: self.density(),
            components: components.len(),
            largest_component: components.first().map_or(0, Vec::len),
        }
    }

    /// The `limit` most connected notes, by degree desc then id asc.
    pub fn hubs(&self, limit: usize) -> Vec<(NoteId, usize)> {
        let mut degrees: BTreeMap<&NoteId, usize> =
            self.nodes.iter().map(|n| (&n.id, 0)).collect();
        for edge in &self.edges {
            for end in [&edge.source, &edge.target] {
                if let Some(d) = degrees.get_mut(end) {
                    *d += 1;
                }
            }
        }
        let mut ranked: Vec<(NoteId, usize)> =
            degrees.into_iter().map(|(id, d)| (id.clone(), d)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);
        ranked
    }
}

/// Union-find with path halving and union by size.
struct DisjointSets {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSets {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
    }
}
