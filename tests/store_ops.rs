//! Library-level invariants across the ingest → search → graph flow.

use ragdag::ingest::{add, AddOptions};
use ragdag::search::{keyword_search, search};
use ragdag::store::Store;
use ragdag::util;

fn init_store() -> (tempfile::TempDir, Store) {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = Store::init(tmp.path()).unwrap();
    (tmp, store)
}

#[tokio::test]
async fn test_added_document_is_searchable_by_unique_term() {
    let (tmp, store) = init_store();
    let source = tmp.path().join("report.md");
    std::fs::write(
        &source,
        "# Report\n\nthe xylophonic measurement was inconclusive\n",
    )
    .unwrap();

    add(&store, &[source], &AddOptions::default()).await.unwrap();

    let results = keyword_search(&store, "xylophonic", None, 10);
    assert!(!results.is_empty());
    assert!(
        results[0].path.starts_with("report/"),
        "result path {} not under the document directory",
        results[0].path
    );
}

#[tokio::test]
async fn test_is_processed_holds_after_add() {
    let (tmp, store) = init_store();
    let source = tmp.path().join("doc.md");
    std::fs::write(&source, "# Doc\n\nbody\n").unwrap();

    add(&store, &[source.clone()], &AddOptions::default())
        .await
        .unwrap();

    let abs = source.canonicalize().unwrap();
    let hash = util::hash_file(&abs).unwrap();
    assert!(store.is_processed(&abs, &hash));
}

#[tokio::test]
async fn test_hybrid_without_provider_matches_keyword() {
    let (tmp, store) = init_store();
    for (name, body) in [
        ("a.md", "# A\n\ndeploy deploy deploy\n"),
        ("b.md", "# B\n\ndeploy mentioned once among quite a few other words\n"),
        ("c.md", "# C\n\nnothing relevant whatsoever\n"),
    ] {
        std::fs::write(tmp.path().join(name), body).unwrap();
        add(&store, &[tmp.path().join(name)], &AddOptions::default())
            .await
            .unwrap();
    }

    let hybrid = search(&store, "deploy", Some("hybrid"), None, Some(10))
        .await
        .unwrap();
    let keyword = search(&store, "deploy", Some("keyword"), None, Some(10))
        .await
        .unwrap();

    let paths = |rs: &[ragdag::search::SearchResult]| -> Vec<String> {
        rs.iter().map(|r| r.path.clone()).collect()
    };
    assert_eq!(paths(&hybrid), paths(&keyword));
}

#[tokio::test]
async fn test_every_chunk_edge_points_at_existing_chunk() {
    let (tmp, store) = init_store();
    for name in ["one.md", "two.md"] {
        std::fs::write(
            tmp.path().join(name),
            "# H\n\nparagraph one\n\nparagraph two\n",
        )
        .unwrap();
    }
    add(
        &store,
        &[tmp.path().join("one.md"), tmp.path().join("two.md")],
        &AddOptions::default(),
    )
    .await
    .unwrap();

    for edge in store.read_edges().unwrap() {
        if edge.source_is_chunk_shaped() {
            assert!(
                store.chunk_exists(&edge.source),
                "edge source {} has no chunk file",
                edge.source
            );
        }
    }
}
