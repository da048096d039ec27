//! Store maintenance: verify, repair, gc, reindex.
//!
//! Verify only reports; repair and gc rewrite the logs (temp file + rename)
//! to drop rows that reference things that no longer exist. Reindex rebuilds
//! a domain's embedding pair from scratch through the configured provider.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::embeddings::{self, BIN_FILE, MANIFEST_FILE};
use crate::error::RagError;
use crate::provider::{self, EmbedConfig};
use crate::store::Store;

/// Counts from a verify scan. Non-zero anomaly counters mean the store
/// needs repair, gc, or reindex.
#[derive(Debug, Default, Clone, Serialize)]
pub struct VerifyReport {
    pub chunks: u64,
    pub unreadable_chunks: u64,
    pub embedding_sets: u64,
    pub corrupt_embeddings: u64,
    pub orphan_edges: u64,
    pub stale_processed: u64,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.unreadable_chunks == 0
            && self.corrupt_embeddings == 0
            && self.orphan_edges == 0
            && self.stale_processed == 0
    }
}

/// Scan the whole store for anomalies without modifying anything.
pub fn verify(store: &Store) -> Result<VerifyReport> {
    let mut report = VerifyReport::default();

    for path in store.chunk_files(None) {
        report.chunks += 1;
        if std::fs::read_to_string(&path).is_err() {
            warn!("unreadable chunk: {}", path.display());
            report.unreadable_chunks += 1;
        }
    }

    // Every manifest must have a companion binary with a valid header whose
    // count matches the manifest's row count.
    let mut embed_dirs = vec![store.root().to_path_buf()];
    for name in store.list_domains() {
        embed_dirs.push(store.root().join(name));
    }
    for dir in embed_dirs {
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            continue;
        }
        report.embedding_sets += 1;
        let rows = match embeddings::load_manifest(&manifest_path) {
            Ok(rows) => rows.len(),
            Err(_) => {
                report.corrupt_embeddings += 1;
                continue;
            }
        };
        match embeddings::load_embeddings(&dir.join(BIN_FILE)) {
            Ok(set) if set.vectors.len() == rows => {}
            _ => {
                warn!("embedding set in {} fails validation", dir.display());
                report.corrupt_embeddings += 1;
            }
        }
    }

    for edge in store.read_edges()? {
        if edge.source_is_chunk_shaped() && !store.chunk_exists(&edge.source) {
            report.orphan_edges += 1;
        }
    }

    for record in store.read_processed()? {
        if !std::path::Path::new(&record.source).exists() {
            report.stale_processed += 1;
        }
    }

    Ok(report)
}

/// Rewrite the edge log without orphaned rows.
///
/// Edges whose source is not chunk-shaped (absolute paths, query nodes) are
/// never removed — they cannot be verified against the chunk tree. The
/// processed log is untouched. Returns the number of removed edges.
pub fn repair(store: &Store) -> Result<u64> {
    let edges = store.read_edges()?;
    let before = edges.len() as u64;
    let kept: Vec<_> = edges
        .into_iter()
        .filter(|e| !e.source_is_chunk_shaped() || store.chunk_exists(&e.source))
        .collect();
    let removed = before - kept.len() as u64;
    if removed > 0 {
        store.rewrite_edges(&kept)?;
        info!("repair removed {} orphaned edges", removed);
    }
    Ok(removed)
}

/// Counts from a gc pass.
#[derive(Debug, Default, Clone, Serialize)]
pub struct GcReport {
    pub removed_edges: u64,
    pub removed_processed: u64,
}

/// Repair plus stale-record collection on the processed log.
pub fn gc(store: &Store) -> Result<GcReport> {
    let removed_edges = repair(store)?;

    let records = store.read_processed()?;
    let before = records.len() as u64;
    let kept: Vec<_> = records
        .into_iter()
        .filter(|r| std::path::Path::new(&r.source).exists())
        .collect();
    let removed_processed = before - kept.len() as u64;
    if removed_processed > 0 {
        store.rewrite_processed(&kept)?;
        info!("gc removed {} stale processed records", removed_processed);
    }

    Ok(GcReport {
        removed_edges,
        removed_processed,
    })
}

/// Batch size for provider calls during reindex.
const REINDEX_BATCH: usize = 64;

/// Delete and rebuild embedding pairs from the chunk tree.
///
/// `domain` limits the rebuild to one domain; `None` rebuilds every
/// embedding scope, including root-level flat documents. Requires a
/// configured provider — fails with `ProviderUnavailable` otherwise.
pub async fn reindex(store: &Store, domain: Option<&str>) -> Result<u64> {
    let config = EmbedConfig::from_store(store.config());
    if !config.is_enabled() {
        return Err(RagError::ProviderUnavailable(
            "reindex requires embedding.provider to be configured".to_string(),
        )
        .into());
    }

    // Group chunks by their embedding scope: the domain directory, or the
    // store root for flat documents.
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for path in store.chunk_files(domain) {
        let rel = store.rel_path(&path);
        groups
            .entry(Store::domain_of(&rel))
            .or_default()
            .push(rel);
    }

    let mut written = 0u64;

    for (scope, chunk_paths) in groups {
        let dir = if scope.is_empty() {
            store.root().to_path_buf()
        } else {
            store.root().join(&scope)
        };

        // Drop the old pair so a failed rebuild is visible to verify.
        let _ = std::fs::remove_file(dir.join(BIN_FILE));
        let _ = std::fs::remove_file(dir.join(MANIFEST_FILE));

        let mut texts = Vec::new();
        let mut paths = Vec::new();
        for rel in chunk_paths {
            match store.read_chunk(&rel) {
                Ok(text) if !text.trim().is_empty() => {
                    texts.push(text);
                    paths.push(rel);
                }
                _ => {}
            }
        }
        if texts.is_empty() {
            continue;
        }

        for (batch_texts, batch_paths) in texts
            .chunks(REINDEX_BATCH)
            .zip(paths.chunks(REINDEX_BATCH))
        {
            let vectors = provider::embed_texts(&config, batch_texts).await?;
            embeddings::write_embeddings(
                &dir,
                &vectors,
                batch_paths,
                config.dimensions,
                &config.model,
                true,
            )?;
            written += vectors.len() as u64;
        }
        info!("reindexed {} chunks in {}", texts.len(), dir.display());
    }

    Ok(written)
}
