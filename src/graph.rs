//! Graph operations over the edge log.
//!
//! The graph is the append-only `.edges` log plus the chunk tree itself:
//! nodes are strings (chunk-relative paths, absolute source paths, synthetic
//! query nodes) matched by exact equality. Traversal never recurses — trace
//! walks iteratively with a visited set and a hard depth cap.

use std::collections::{BTreeMap, HashSet};

use anyhow::Result;
use serde::Serialize;

use crate::embeddings::{self, BIN_FILE, MANIFEST_FILE};
use crate::store::{Edge, Store, EDGE_CHUNKED_FROM, EDGE_DERIVED_VIA, EDGE_REFERENCES, EDGE_RELATED_TO};

/// Store-wide counts returned by [`summary`].
#[derive(Debug, Clone, Serialize)]
pub struct GraphSummary {
    pub domains: u64,
    pub documents: u64,
    pub chunks: u64,
    pub edges: u64,
    pub edge_types: BTreeMap<String, u64>,
}

/// Count domains, documents, chunks, and edges.
///
/// The domain filter narrows the directory counters; edge counts stay
/// global, since edges are not scoped to a directory.
pub fn summary(store: &Store, domain: Option<&str>) -> Result<GraphSummary> {
    let mut domains = 0u64;
    let mut documents = 0u64;
    let mut chunks = 0u64;

    for name in store.list_domains() {
        if let Some(filter) = domain {
            if name != filter {
                continue;
            }
        }
        domains += 1;
        let domain_dir = store.root().join(&name);
        let Ok(entries) = std::fs::read_dir(&domain_dir) else {
            continue;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            if !entry.path().is_dir() {
                continue;
            }
            documents += 1;
            if let Ok(files) = std::fs::read_dir(entry.path()) {
                chunks += files
                    .filter_map(|e| e.ok())
                    .filter(|e| {
                        let name = e.file_name().to_string_lossy().into_owned();
                        name.ends_with(".txt") && !name.starts_with('_')
                    })
                    .count() as u64;
            }
        }
    }

    let mut edge_types: BTreeMap<String, u64> = BTreeMap::new();
    let mut edges = 0u64;
    for edge in store.read_edges()? {
        edges += 1;
        *edge_types.entry(edge.edge_type).or_insert(0) += 1;
    }

    Ok(GraphSummary {
        domains,
        documents,
        chunks,
        edges,
        edge_types,
    })
}

/// One adjacent node as seen from the queried node.
#[derive(Debug, Clone, Serialize)]
pub struct NeighborEntry {
    pub node: String,
    pub edge_type: String,
    pub metadata: String,
    /// Direction arrow relative to the queried node: `→` out, `←` in.
    pub direction: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Neighbors {
    pub outgoing: Vec<NeighborEntry>,
    pub incoming: Vec<NeighborEntry>,
}

/// All edges touching `node`, split by direction.
pub fn neighbors(store: &Store, node: &str) -> Result<Neighbors> {
    let mut result = Neighbors::default();
    for edge in store.read_edges()? {
        if edge.source == node {
            result.outgoing.push(NeighborEntry {
                node: edge.target,
                edge_type: edge.edge_type,
                metadata: edge.metadata,
                direction: "→".to_string(),
            });
        } else if edge.target == node {
            result.incoming.push(NeighborEntry {
                node: edge.source,
                edge_type: edge.edge_type,
                metadata: edge.metadata,
                direction: "←".to_string(),
            });
        }
    }
    Ok(result)
}

/// One provenance hop. The final hop has no parent and edge type `origin`.
#[derive(Debug, Clone, Serialize)]
pub struct TraceHop {
    pub node: String,
    pub parent: Option<String>,
    pub edge_type: String,
}

/// Pathological chains (or cycles the visited set somehow misses) stop here.
const TRACE_MAX_HOPS: usize = 20;

/// Walk backward through `chunked_from`/`derived_via` edges to the origin.
///
/// Emits one hop per step and terminates with an `origin` hop on a missing
/// parent, a revisited node, or the depth cap — whichever comes first.
pub fn trace(store: &Store, node: &str) -> Result<Vec<TraceHop>> {
    let edges = store.read_edges()?;
    let mut hops = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut current = node.to_string();

    loop {
        if !visited.insert(current.clone()) || hops.len() + 1 >= TRACE_MAX_HOPS {
            hops.push(origin_hop(current));
            break;
        }

        let parent = edges.iter().find(|e| {
            e.source == current
                && (e.edge_type == EDGE_CHUNKED_FROM || e.edge_type == EDGE_DERIVED_VIA)
        });

        match parent {
            Some(edge) => {
                hops.push(TraceHop {
                    node: current,
                    parent: Some(edge.target.clone()),
                    edge_type: edge.edge_type.clone(),
                });
                current = edge.target.clone();
            }
            None => {
                hops.push(origin_hop(current));
                break;
            }
        }
    }

    Ok(hops)
}

fn origin_hop(node: String) -> TraceHop {
    TraceHop {
        node,
        parent: None,
        edge_type: "origin".to_string(),
    }
}

/// Compute `related_to` edges from embedding similarity.
///
/// Every chunk pair within each embedding set scoring at or above
/// `threshold` gains one edge, unless a `related_to` edge already exists in
/// either direction. Domains without embeddings are skipped; a store with no
/// embeddings at all is a no-op returning zero.
pub fn relate(store: &Store, domain: Option<&str>, threshold: f64) -> Result<u64> {
    let mut embed_dirs = Vec::new();
    match domain {
        Some(d) => {
            let dir = store.root().join(d);
            if dir.join(BIN_FILE).is_file() {
                embed_dirs.push(dir);
            }
        }
        None => {
            if store.root().join(BIN_FILE).is_file() {
                embed_dirs.push(store.root().to_path_buf());
            }
            for name in store.list_domains() {
                let dir = store.root().join(name);
                if dir.join(BIN_FILE).is_file() {
                    embed_dirs.push(dir);
                }
            }
        }
    }

    let mut existing = store.related_pairs()?;
    let mut added = 0u64;

    for dir in embed_dirs {
        let set = match embeddings::load_embeddings(&dir.join(BIN_FILE)) {
            Ok(set) => set,
            Err(_) => continue,
        };
        let manifest = match embeddings::load_manifest(&dir.join(MANIFEST_FILE)) {
            Ok(m) => m,
            Err(_) => continue,
        };
        let count = set.vectors.len().min(manifest.len());
        if count < 2 {
            continue;
        }

        let mut new_edges = Vec::new();
        for i in 0..count {
            let row = crate::similarity::cosine_similarity(&set.vectors[i], &set.vectors[i + 1..count]);
            for (offset, score) in row.into_iter().enumerate() {
                let j = i + 1 + offset;
                if (score as f64) < threshold {
                    continue;
                }
                let pair = (manifest[i].clone(), manifest[j].clone());
                if existing.contains(&pair) {
                    continue;
                }
                new_edges.push(Edge::new(
                    &manifest[i],
                    &manifest[j],
                    EDGE_RELATED_TO,
                    &format!("similarity={:.4}", score),
                ));
                existing.insert(pair.clone());
                existing.insert((pair.1, pair.0));
                added += 1;
            }
        }
        store.append_edges(&new_edges)?;
    }

    Ok(added)
}

/// Append one manual edge. Node strings are trusted; no existence check.
pub fn link(store: &Store, source: &str, target: &str, edge_type: Option<&str>) -> Result<()> {
    store.append_edges(&[Edge::new(
        source,
        target,
        edge_type.unwrap_or(EDGE_REFERENCES),
        "",
    )])
}
