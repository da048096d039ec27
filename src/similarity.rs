//! Cosine similarity over the packed embedding files.

use std::collections::HashSet;

use anyhow::Result;
use tracing::debug;

use crate::embeddings::{self, BIN_FILE, MANIFEST_FILE};
use crate::store::Store;

/// Guard against zero-magnitude operands producing NaN.
const NORM_EPSILON: f32 = 1e-10;

/// Cosine similarity of `query` against every row of `matrix`.
///
/// Mismatched-length rows score 0.0; zero vectors score 0.0 rather than NaN.
pub fn cosine_similarity(query: &[f32], matrix: &[Vec<f32>]) -> Vec<f32> {
    let query_norm = norm(query).max(NORM_EPSILON);
    matrix
        .iter()
        .map(|row| {
            if row.len() != query.len() || row.is_empty() {
                return 0.0;
            }
            let dot: f32 = query.iter().zip(row.iter()).map(|(a, b)| a * b).sum();
            dot / (query_norm * norm(row).max(NORM_EPSILON))
        })
        .collect()
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Rank chunks by cosine similarity to `query_vector`.
///
/// Loads the named domain's embedding pair, or every domain's when `domain`
/// is `None`. `candidates`, when given, restricts scoring to those manifest
/// rows. Missing or empty embedding files contribute nothing — an entirely
/// embedding-less store yields an empty result, not an error.
pub fn search_vectors(
    store: &Store,
    query_vector: &[f32],
    domain: Option<&str>,
    candidates: Option<&[String]>,
    top_k: usize,
) -> Result<Vec<(String, f32)>> {
    let mut embed_dirs = Vec::new();
    match domain {
        Some(d) => {
            let dir = store.root().join(d);
            if dir.is_dir() {
                embed_dirs.push(dir);
            }
        }
        None => {
            // Flat-mode stores keep their embedding pair at the root.
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

    let candidate_set: Option<HashSet<&str>> =
        candidates.map(|c| c.iter().map(|s| s.as_str()).collect());

    let mut results: Vec<(String, f32)> = Vec::new();

    for dir in embed_dirs {
        let bin_path = dir.join(BIN_FILE);
        let manifest_path = dir.join(MANIFEST_FILE);
        if !bin_path.is_file() || !manifest_path.is_file() {
            continue;
        }

        let set = match embeddings::load_embeddings_mmap(&bin_path) {
            Ok(set) => set,
            Err(e) => {
                debug!("skipping unreadable embeddings in {}: {:#}", dir.display(), e);
                continue;
            }
        };
        let manifest = embeddings::load_manifest(&manifest_path)?;
        if manifest.len() != set.vectors.len() {
            debug!(
                "manifest/header count mismatch in {}, treating as corrupt",
                dir.display()
            );
            continue;
        }

        let (paths, vectors): (Vec<&String>, Vec<Vec<f32>>) = match &candidate_set {
            Some(keep) => manifest
                .iter()
                .zip(set.vectors.into_iter())
                .filter(|(p, _)| keep.contains(p.as_str()))
                .unzip(),
            None => manifest.iter().zip(set.vectors.into_iter()).unzip(),
        };
        if paths.is_empty() {
            continue;
        }

        let scores = cosine_similarity(query_vector, &vectors);
        for (path, score) in paths.into_iter().zip(scores) {
            results.push((path.clone(), score));
        }
    }

    results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(top_k);
    Ok(results)
}
