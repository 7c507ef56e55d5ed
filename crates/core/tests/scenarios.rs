//! End-to-end scenarios for graph builds and hybrid search.
//!
//! These run the public API only: snapshot in, graph or ranked hits out,
//! with the staleness tracker driving rebuild decisions where it matters.

use chrono::{DateTime, Duration, Utc};

use monoid_graph::{
    build, search, CancelToken, Embedding, Freshness, GraphBuilder, GraphConfig, GraphError,
    IncrementalOutcome, KeywordIndex, Mutation, Note, NoteId, Query, SearchMode, SearchOptions,
    SignalKind, SignalWeights, StalenessTracker, TagMatch,
};

fn base_time() -> DateTime<Utc> {
    "2024-01-01T00:00:00Z".parse().unwrap()
}

fn at(day: i64) -> DateTime<Utc> {
    base_time() + Duration::days(day)
}

fn id(s: &str) -> NoteId {
    NoteId::new(s)
}

/// A mixed corpus: overlapping tags, embeddings for most notes, a few links.
fn generated_corpus(n: usize) -> Vec<Note> {
    const TAGS: [&str; 6] = ["rust", "graphs", "dsa", "async", "databases", "math"];
    (0..n)
        .map(|i| {
            let mut note = Note::new(format!("n{i:03}"), format!("note number {i}"), at(i as i64))
                .with_tags([TAGS[i % 6], TAGS[(i / 2) % 6]]);
            if i % 5 != 0 {
                note = note.with_embedding(Embedding::new(
                    "mini",
                    vec![(i % 5) as f32 + 0.5, (i % 7) as f32 - 3.0, (i % 3) as f32],
                ));
            }
            if i % 4 == 0 && i >= 3 {
                note = note.with_link(format!("n{:03}", i - 3));
            }
            note
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Graph properties
// ---------------------------------------------------------------------------

#[test]
fn build_is_deterministic_across_runs_and_worker_counts() {
    let notes = generated_corpus(40);
    let sequential = GraphConfig {
        top_k: 4,
        min_score: 0.2,
        workers: 1,
        ..GraphConfig::default()
    };
    let parallel = GraphConfig {
        workers: 4,
        batch_rows: 3,
        ..sequential.clone()
    };

    let a = build(&notes, &sequential).unwrap();
    let b = build(&notes, &sequential).unwrap();
    let c = build(&notes, &parallel).unwrap();

    let json_a = serde_json::to_string(&a).unwrap();
    assert_eq!(json_a, serde_json::to_string(&b).unwrap());
    assert_eq!(json_a, serde_json::to_string(&c).unwrap());
}

#[test]
fn persisted_graph_reloads_with_identical_scores() {
    let notes = generated_corpus(40);
    let graph = build(&notes, &GraphConfig::default()).unwrap();
    assert!(!graph.edges().is_empty());

    let json = serde_json::to_string(&graph).unwrap();
    let reloaded: monoid_graph::Graph = serde_json::from_str(&json).unwrap();
    assert_eq!(reloaded, graph);
    assert_eq!(serde_json::to_string(&reloaded).unwrap(), json);
}

#[test]
fn no_note_exceeds_k_outgoing_edges() {
    let notes = generated_corpus(30);
    for k in [1, 2, 5] {
        let cfg = GraphConfig {
            top_k: k,
            min_score: 0.0,
            ..GraphConfig::default()
        };
        let graph = build(&notes, &cfg).unwrap();
        assert_eq!(graph.node_count(), 30);
        for node in graph.nodes() {
            assert!(graph.out_degree(&node.id) <= k);
        }
    }
}

#[test]
fn absent_signal_is_not_a_zero_signal() {
    let cfg = GraphConfig {
        min_score: 0.0,
        ..GraphConfig::default()
    };
    let w = SignalWeights::default();

    // Same tags, same creation time, no embeddings.
    let absent = vec![
        Note::new("a", "", base_time()).with_tag("x"),
        Note::new("b", "", base_time()).with_tag("x"),
    ];
    // Identical except for opposite embeddings: similarity present and 0.0.
    let zero = vec![
        absent[0].clone().with_embedding(Embedding::new("m", vec![1.0, 0.0])),
        absent[1].clone().with_embedding(Embedding::new("m", vec![-1.0, 0.0])),
    ];

    let g_absent = build(&absent, &cfg).unwrap();
    let g_zero = build(&zero, &cfg).unwrap();
    let e_absent = g_absent.edge_between(&id("a"), &id("b")).unwrap();
    let e_zero = g_zero.edge_between(&id("a"), &id("b")).unwrap();

    let expected_absent = (w.tag_overlap + w.temporal_proximity) / (w.tag_overlap + w.temporal_proximity);
    let expected_zero = (w.tag_overlap + w.temporal_proximity)
        / (w.tag_overlap + w.temporal_proximity + w.semantic_similarity);
    assert!((e_absent.score - expected_absent).abs() < 1e-9);
    assert!((e_zero.score - expected_zero).abs() < 1e-9);
    assert!(e_absent
        .signals
        .iter()
        .all(|c| c.kind != SignalKind::SemanticSimilarity));
}

#[test]
fn explicit_link_alone_is_always_a_candidate() {
    let mut weights = SignalWeights::default();
    weights.temporal_proximity = 0.0;
    let cfg = GraphConfig {
        top_k: 1,
        min_score: 1.0,
        weights,
        ..GraphConfig::default()
    };
    let notes = vec![
        Note::new("a", "", at(0)).with_link("b"),
        Note::new("b", "", at(300)),
        Note::new("c", "", at(0)),
    ];
    let graph = build(&notes, &cfg).unwrap();
    let edge = graph.edge_between(&id("a"), &id("b")).unwrap();
    assert_eq!(edge.score, 1.0);
    assert_eq!(graph.edge_count(), 1);
}

#[test]
fn more_shared_tags_never_lower_the_score() {
    let cfg = GraphConfig {
        min_score: 0.0,
        ..GraphConfig::default()
    };
    let a = Note::new("a", "", base_time()).with_tags(["t0", "t1", "t2", "t3", "t4"]);
    let mut previous = 0.0;
    for shared in 1..=5 {
        let tags: Vec<String> = (0..5)
            .map(|i| if i < shared { format!("t{i}") } else { format!("other{i}") })
            .collect();
        let b = Note::new("b", "", base_time()).with_tags(tags.iter().map(String::as_str));
        let graph = build(&[a.clone(), b], &cfg).unwrap();
        let score = graph.edge_between(&id("a"), &id("b")).unwrap().score;
        assert!(score >= previous, "{shared} shared tags scored {score} < {previous}");
        previous = score;
    }
}

#[test]
fn deleted_notes_never_surface() {
    let cfg = GraphConfig {
        min_score: 0.0,
        ..GraphConfig::default()
    };
    let emb = Embedding::new("m", vec![0.3, 0.4, 0.5]);
    let notes = vec![
        Note::new("a", "binary search", base_time())
            .with_tags(["dsa"])
            .with_embedding(emb.clone()),
        Note::new("b", "sorting", at(40)),
        Note::new("gone", "binary search", base_time())
            .with_tags(["dsa"])
            .with_embedding(emb.clone())
            .with_link("a")
            .deleted(at(1)),
    ];

    let graph = build(&notes, &cfg).unwrap();
    assert!(!graph.contains(&id("gone")));
    assert!(graph.edges().iter().all(|e| !e.touches(&id("gone"))));

    let index = KeywordIndex::build(&notes);
    let query = Query::text("binary search")
        .with_tags(["dsa"])
        .with_embedding(emb);
    let hits = search(&query, &notes, &SearchOptions::default(), &index).unwrap();
    assert!(hits.iter().all(|h| h.id != id("gone")));
    assert_eq!(hits[0].id, id("a"));
}

#[test]
fn link_beats_tag_overlap_with_k_of_one() {
    let notes = vec![
        Note::new("n1", "", base_time()).with_tags(["dsa", "two-pointers"]),
        Note::new("n2", "", base_time()).with_tags(["dsa", "sliding-window"]),
        Note::new("n3", "", base_time()).with_link("n1"),
    ];
    let cfg = GraphConfig {
        top_k: 1,
        ..GraphConfig::default()
    };
    let graph = build(&notes, &cfg).unwrap();

    let from_n1: Vec<&NoteId> = graph
        .edges()
        .iter()
        .filter(|e| e.source == id("n1"))
        .map(|e| &e.target)
        .collect();
    assert_eq!(from_n1, vec![&id("n3")]);
    assert_eq!(graph.out_degree(&id("n1")), 1);
}

#[test]
fn stats_follow_the_edge_set() {
    let notes = vec![
        Note::new("a", "", base_time()).with_link("b"),
        Note::new("b", "", base_time()),
        Note::new("c", "", base_time()).with_link("d"),
        Note::new("d", "", base_time()),
        Note::new("e", "", base_time()),
    ];
    let graph = build(&notes, &GraphConfig::default()).unwrap();
    let stats = graph.stats();
    assert_eq!(stats.nodes, 5);
    assert_eq!(stats.edges, 2);
    assert_eq!(stats.components, 3);
    assert_eq!(stats.largest_component, 2);
    assert!((stats.density - 0.2).abs() < 1e-9);
}

// ---------------------------------------------------------------------------
// Hybrid search
// ---------------------------------------------------------------------------

fn search_corpus() -> Vec<Note> {
    vec![
        Note::new("n4", "Binary search over a sorted array", at(1)),
        Note::new("n5", "Dijkstra with a heap", at(2)).with_tags(["algorithms"]),
        Note::new("n6", "Grocery list", at(3)).with_tags(["errands"]),
    ]
}

#[test]
fn hybrid_search_keeps_each_hit_to_its_own_signals() {
    let notes = search_corpus();
    let index = KeywordIndex::build(&notes);
    let options = SearchOptions {
        mode: SearchMode::Hybrid,
        tag_match: TagMatch::Any,
        ..SearchOptions::default()
    };

    let query = Query::text("binary search").with_tags(["algorithms", "graphs"]);
    let hits = search(&query, &notes, &options, &index).unwrap();
    let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, vec!["n4", "n5"]);

    // n4 matches the text only, n5 the tag filter only (1 of 2 tags). Both
    // text and tags are active, so each score is normalized by both weights.
    let w = &options.weights;
    let active = w.textual_relevance + w.tag_overlap;

    let n4 = &hits[0];
    assert_eq!(n4.signals.len(), 1);
    assert_eq!(n4.signals[0].kind, SignalKind::TextualRelevance);
    assert_eq!(n4.signals[0].weight, w.textual_relevance);
    assert!((n4.score - w.textual_relevance / active).abs() < 1e-9);

    let n5 = &hits[1];
    assert_eq!(n5.signals.len(), 1);
    assert_eq!(n5.signals[0].kind, SignalKind::TagOverlap);
    assert!((n5.score - 0.5 * w.tag_overlap / active).abs() < 1e-9);
}

#[test]
fn hybrid_search_order_follows_configured_weights() {
    // n4 is the newer note, so a recency tie-break alone would put it first.
    let notes = vec![
        Note::new("n4", "Binary search over a sorted array", at(1)).with_modified_at(at(9)),
        Note::new("n5", "Shortest paths", at(2)).with_tags(["algorithms"]),
    ];
    let index = KeywordIndex::build(&notes);
    let query = Query::text("binary search").with_tags(["algorithms"]);
    let ranked = |textual_relevance: f64, tag_overlap: f64| {
        let options = SearchOptions {
            weights: SignalWeights {
                textual_relevance,
                tag_overlap,
                ..SignalWeights::default()
            },
            ..SearchOptions::default()
        };
        search(&query, &notes, &options, &index)
            .unwrap()
            .into_iter()
            .map(|hit| hit.id.as_str().to_string())
            .collect::<Vec<_>>()
    };

    assert_eq!(ranked(0.1, 1.0), vec!["n5", "n4"]);
    assert_eq!(ranked(1.0, 0.1), vec!["n4", "n5"]);
}

#[test]
fn hybrid_search_ranks_the_stronger_contribution_first() {
    let notes = vec![
        Note::new("n4", "Binary search over a sorted array", at(1)),
        Note::new("n5", "Shortest paths", at(2)).with_tags(["algorithms"]),
    ];
    let index = KeywordIndex::build(&notes);
    let options = SearchOptions::default();

    // Text covers 2 of 3 query terms for n4; the tag filter fully matches n5.
    let query = Query::text("binary search trees").with_tags(["algorithms"]);
    let hits = search(&query, &notes, &options, &index).unwrap();
    let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, vec!["n5", "n4"]);
    assert_eq!(hits[0].signals.len(), 1);
    assert_eq!(hits[0].signals[0].kind, SignalKind::TagOverlap);
    assert_eq!(hits[1].signals.len(), 1);
    assert_eq!(hits[1].signals[0].kind, SignalKind::TextualRelevance);

    // With nothing present for any note, the result is empty, not an error.
    let nothing = Query::text("zebra").with_tags(["unused"]);
    assert!(search(&nothing, &notes, &options, &index).unwrap().is_empty());
}

#[test]
fn search_is_deterministic() {
    let notes = generated_corpus(25);
    let index = KeywordIndex::build(&notes);
    let query = Query::text("note number")
        .with_tags(["rust", "dsa"])
        .with_embedding(Embedding::new("mini", vec![1.5, -1.0, 1.0]));
    let options = SearchOptions {
        top_n: 10,
        ..SearchOptions::default()
    };
    let a = search(&query, &notes, &options, &index).unwrap();
    let b = search(&query, &notes, &options, &index).unwrap();
    assert_eq!(a.len(), 10);
    assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
}

// ---------------------------------------------------------------------------
// Rebuild flow
// ---------------------------------------------------------------------------

#[test]
fn incremental_rebuild_driven_by_tracker_matches_full() {
    let tracker = StalenessTracker::new();
    let builder = GraphBuilder::new(GraphConfig {
        top_k: 3,
        min_score: 0.1,
        ..GraphConfig::default()
    })
    .unwrap();

    let mut notes = generated_corpus(20);
    let (graph, cache) = builder.build_with_cache(&notes).unwrap();

    notes[4] = notes[4]
        .clone()
        .with_tag("graphs")
        .with_modified_at(at(100));
    tracker.record(&notes[4].id, Mutation::Edited);
    notes[7] = notes[7].clone().deleted(at(101));
    tracker.record(&notes[7].id, Mutation::Deleted);
    notes.push(Note::new("n900", "new", at(102)).with_tags(["rust"]).with_link("n004"));
    tracker.record(&id("n900"), Mutation::Created);

    let snapshot = tracker.begin_incremental().unwrap();
    assert_eq!(snapshot.pending_changes, 3);
    let outcome = builder
        .rebuild_incremental(&graph, &cache, &notes, &snapshot.changed)
        .unwrap();
    let IncrementalOutcome::Applied { graph: incremental, .. } = outcome else {
        panic!("incremental rebuild should apply");
    };
    assert_eq!(tracker.mark_rebuilt(&snapshot), Freshness::Fresh);

    assert_eq!(incremental, builder.build(&notes).unwrap());
    assert!(!incremental.contains(&id("n007")));
}

#[test]
fn changed_weights_force_a_full_rebuild() {
    let tracker = StalenessTracker::new();
    let notes = generated_corpus(10);
    let old = GraphBuilder::new(GraphConfig::default()).unwrap();
    let (graph, cache) = old.build_with_cache(&notes).unwrap();
    tracker.record(&notes[0].id, Mutation::Edited);

    let mut weights = SignalWeights::default();
    weights.tag_overlap = 0.9;
    let new = GraphBuilder::new(GraphConfig {
        weights,
        ..GraphConfig::default()
    })
    .unwrap();

    let snapshot = tracker.begin_incremental().unwrap();
    let outcome = new
        .rebuild_incremental(&graph, &cache, &notes, &snapshot.changed)
        .unwrap();
    let IncrementalOutcome::Unsafe { graph: stale, .. } = outcome else {
        panic!("changed weights must not apply incrementally");
    };
    assert!(stale.is_stale());
    assert!(tracker.is_stale());

    let full = new.build(&notes).unwrap();
    assert_eq!(tracker.mark_rebuilt(&snapshot), Freshness::Fresh);
    assert!(!full.is_stale());
}

#[test]
fn cancelled_build_leaves_tracker_stale() {
    let tracker = StalenessTracker::new();
    tracker.record(&id("n000"), Mutation::Edited);

    let token = CancelToken::new();
    let builder = GraphBuilder::new(GraphConfig::default())
        .unwrap()
        .with_cancel_token(token.clone());
    token.cancel();

    let err = builder.build(&generated_corpus(10)).unwrap_err();
    assert!(matches!(err, GraphError::Cancelled));
    assert_eq!(tracker.state(), Freshness::Stale);
}
