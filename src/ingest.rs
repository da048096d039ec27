//! Ingestion pipeline orchestration.
//!
//! `add` walks the input paths and runs each file through parse → chunk →
//! atomic store → edge emission → incremental embed. Per-file failures are
//! logged and counted, never fatal to the batch. The observable order per
//! file is: chunks appear, processed-log record updates, edge-log appends,
//! then embeddings (when a provider is configured).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::chunk::{self, Strategy};
use crate::parse::{self, FileType};
use crate::provider::{self, EmbedConfig};
use crate::store::Store;
use crate::util;

/// Deadline for a single external decoder invocation.
const EXTRACT_DEADLINE: Duration = Duration::from_secs(30);

/// Counts returned by [`add`].
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct AddReport {
    pub files: u64,
    pub chunks: u64,
    pub skipped: u64,
}

/// Options for [`add`].
#[derive(Debug, Clone)]
pub struct AddOptions {
    /// Target domain; `auto` resolves through `.domain-rules` with an
    /// `unsorted` fallback; `None` stores documents at the store root.
    pub domain: Option<String>,
    /// Force flat mode regardless of `domain`.
    pub flat: bool,
    /// Embed new chunks when a provider is configured.
    pub embed: bool,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            domain: None,
            flat: false,
            embed: true,
        }
    }
}

/// Ingest files or directory trees into the store.
pub async fn add(store: &Store, paths: &[PathBuf], opts: &AddOptions) -> Result<AddReport> {
    let mut report = AddReport::default();
    let embed_config = EmbedConfig::from_store(store.config());

    for input in paths {
        if !input.exists() {
            warn!("path not found, skipping: {}", input.display());
            report.skipped += 1;
            continue;
        }
        for file in collect_files(input) {
            match add_one(store, &file, opts, &embed_config).await {
                Ok(Some(chunk_count)) => {
                    report.files += 1;
                    report.chunks += chunk_count as u64;
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    warn!("failed to ingest {}: {:#}", file.display(), e);
                    report.skipped += 1;
                }
            }
        }
    }

    // Optional follow-up pass wiring freshly embedded chunks together.
    if store.config().get_bool("edges.auto_relate", false) {
        let threshold = store.config().get_f64("edges.relate_threshold", 0.8);
        let domain = match (&opts.domain, opts.flat) {
            (Some(d), false) if d != "auto" => Some(d.as_str()),
            _ => None,
        };
        match crate::graph::relate(store, domain, threshold) {
            Ok(added) => debug!("auto-relate added {} edges", added),
            Err(e) => warn!("auto-relate failed: {:#}", e),
        }
    }

    Ok(report)
}

/// All regular files under `input` (itself, when it is a file), sorted,
/// skipping dotfiles and anything inside `.ragdag` or `.git`.
fn collect_files(input: &Path) -> Vec<PathBuf> {
    if input.is_file() {
        return vec![input.to_path_buf()];
    }
    let mut files: Vec<PathBuf> = WalkDir::new(input)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Ingest a single file. `Ok(None)` means the file was skipped (already
/// processed, empty, or unextractable).
async fn add_one(
    store: &Store,
    file: &Path,
    opts: &AddOptions,
    embed_config: &EmbedConfig,
) -> Result<Option<usize>> {
    let abs_path = file.canonicalize()?;
    let content_hash = util::hash_file(&abs_path)?;

    if store.is_processed(&abs_path, &content_hash) {
        debug!("unchanged, skipping: {}", abs_path.display());
        return Ok(None);
    }

    let ftype = parse::detect(&abs_path);
    let text = match parse::parse_file(&abs_path, ftype, EXTRACT_DEADLINE).await {
        Ok(text) => text,
        Err(e) => match ftype {
            // Binary formats have nothing sensible to fall back to.
            FileType::Pdf | FileType::Docx => {
                warn!("cannot extract {}: {:#}", abs_path.display(), e);
                return Ok(None);
            }
            _ => {
                warn!(
                    "extraction failed for {}, storing raw text: {:#}",
                    abs_path.display(),
                    e
                );
                parse::read_lossy(&abs_path)?
            }
        },
    };

    if text.trim().is_empty() {
        debug!("no text content, skipping: {}", abs_path.display());
        return Ok(None);
    }

    let configured = Strategy::parse(&store.config().get("general.chunk_strategy", "heading"));
    let strategy = Strategy::for_file(ftype, configured);
    let chunk_size = store.config().get_usize("general.chunk_size", 1000);
    let overlap = store.config().get_usize("general.chunk_overlap", 100);

    let mut chunks = chunk::chunk_text(&text, strategy, chunk_size, overlap);
    if chunks.is_empty() {
        chunks = vec![text];
    }

    let doc_name = {
        let stem = abs_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let sanitized = util::sanitize(&stem);
        if sanitized.is_empty() {
            "document".to_string()
        } else {
            sanitized
        }
    };

    let domain = resolve_domain(store, &abs_path, opts);

    let (doc_rel, count) = store.replace_document(&domain, &doc_name, &chunks)?;
    store.record_processed(&abs_path, &content_hash, &domain)?;
    store.replace_chunk_edges(&doc_rel, &abs_path.to_string_lossy())?;

    if opts.embed && embed_config.is_enabled() {
        if let Err(e) = embed_document(store, &doc_rel, &domain, embed_config).await {
            warn!("embedding failed for {}: {:#}", doc_rel, e);
        }
    }

    Ok(Some(count))
}

fn resolve_domain(store: &Store, abs_path: &Path, opts: &AddOptions) -> String {
    if opts.flat {
        return String::new();
    }
    match opts.domain.as_deref() {
        None | Some("") => String::new(),
        Some("auto") => store
            .apply_domain_rules(&abs_path.to_string_lossy())
            .unwrap_or_else(|| "unsorted".to_string()),
        Some(d) => util::sanitize(d),
    }
}

/// Embed every chunk of a freshly stored document and append the vectors to
/// the domain's embedding pair.
async fn embed_document(
    store: &Store,
    doc_rel: &str,
    domain: &str,
    config: &EmbedConfig,
) -> Result<()> {
    let doc_dir = store.root().join(doc_rel);
    let mut names: Vec<String> = std::fs::read_dir(&doc_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".txt") && !n.starts_with('_'))
        .collect();
    names.sort();

    let mut texts = Vec::new();
    let mut chunk_paths = Vec::new();
    for name in names {
        let text = std::fs::read_to_string(doc_dir.join(&name))?;
        if text.trim().is_empty() {
            continue;
        }
        texts.push(text);
        chunk_paths.push(format!("{}/{}", doc_rel, name));
    }
    if texts.is_empty() {
        return Ok(());
    }

    let vectors = provider::embed_texts(config, &texts).await?;

    let embed_dir = if domain.is_empty() {
        store.root().to_path_buf()
    } else {
        store.root().join(domain)
    };
    crate::embeddings::write_embeddings(
        &embed_dir,
        &vectors,
        &chunk_paths,
        config.dimensions,
        &config.model,
        true,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Store, EDGE_CHUNKED_FROM};

    fn init_store() -> (tempfile::TempDir, Store) {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = Store::init(tmp.path()).unwrap();
        (tmp, store)
    }

    fn three_heading_doc() -> String {
        let section = "lorem ipsum dolor sit amet consectetur adipiscing elit sed do eiusmod \
                       tempor incididunt ut labore et dolore magna aliqua ut enim ad minim";
        format!(
            "# First\n{}\n# Second\n{}\n# Third\n{}\n",
            section, section, section
        )
    }

    #[tokio::test]
    async fn test_add_markdown_three_headings() {
        let (tmp, store) = init_store();
        store.config().set("general.chunk_overlap", "0").unwrap();
        let source = tmp.path().join("guide.md");
        std::fs::write(&source, three_heading_doc()).unwrap();

        let report = add(&store, &[source.clone()], &AddOptions::default())
            .await
            .unwrap();
        assert_eq!(report.files, 1);
        assert_eq!(report.chunks, 3);
        assert_eq!(report.skipped, 0);

        for name in ["01.txt", "02.txt", "03.txt"] {
            assert!(store.chunk_exists(&format!("guide/{}", name)), "{}", name);
        }

        // One chunked_from edge per chunk, targeting the absolute source.
        let abs = source.canonicalize().unwrap();
        let edges = store.read_edges().unwrap();
        let chunked: Vec<_> = edges
            .iter()
            .filter(|e| e.edge_type == EDGE_CHUNKED_FROM)
            .collect();
        assert_eq!(chunked.len(), 3);
        assert!(chunked.iter().all(|e| e.target == abs.to_string_lossy()));

        // Processed log has exactly one record with the source's SHA-256.
        let records = store.read_processed().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].hash, util::hash_file(&abs).unwrap());
    }

    #[tokio::test]
    async fn test_add_dedup_skips_unchanged() {
        let (tmp, store) = init_store();
        let source = tmp.path().join("note.md");
        std::fs::write(&source, "# Note\n\ncontent here\n").unwrap();

        let first = add(&store, &[source.clone()], &AddOptions::default())
            .await
            .unwrap();
        assert_eq!(first.files, 1);

        let second = add(&store, &[source], &AddOptions::default())
            .await
            .unwrap();
        assert_eq!(second.files, 0);
        assert_eq!(second.skipped, 1);
    }

    #[tokio::test]
    async fn test_reingest_replaces_chunks_and_record() {
        let (tmp, store) = init_store();
        store.config().set("general.chunk_overlap", "0").unwrap();
        let source = tmp.path().join("guide.md");
        std::fs::write(&source, three_heading_doc()).unwrap();
        add(&store, &[source.clone()], &AddOptions::default())
            .await
            .unwrap();
        assert!(store.chunk_exists("guide/03.txt"));

        // Same path, different (shorter) body.
        std::fs::write(&source, "# Only\nshort body\n").unwrap();
        let report = add(&store, &[source.clone()], &AddOptions::default())
            .await
            .unwrap();
        assert_eq!(report.files, 1);

        assert!(store.chunk_exists("guide/01.txt"));
        assert!(!store.chunk_exists("guide/02.txt"));
        assert!(!store.chunk_exists("guide/03.txt"));

        let abs = source.canonicalize().unwrap();
        let records = store.read_processed().unwrap();
        let matching: Vec<_> = records
            .iter()
            .filter(|r| r.source == abs.to_string_lossy())
            .collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].hash, util::hash_file(&abs).unwrap());
    }

    #[tokio::test]
    async fn test_add_directory_skips_hidden() {
        let (tmp, store) = init_store();
        let dir = tmp.path().join("docs");
        std::fs::create_dir_all(dir.join(".git")).unwrap();
        std::fs::write(dir.join("a.md"), "# A\ncontent\n").unwrap();
        std::fs::write(dir.join("b.txt"), "plain text body\n").unwrap();
        std::fs::write(dir.join(".hidden"), "nope").unwrap();
        std::fs::write(dir.join(".git/config"), "nope").unwrap();

        let report = add(&store, &[dir], &AddOptions::default()).await.unwrap();
        assert_eq!(report.files, 2);
    }

    #[tokio::test]
    async fn test_add_with_domain_and_auto() {
        let (tmp, store) = init_store();
        std::fs::write(store.rules_path(), "handbook → hr\n").unwrap();

        let handbook = tmp.path().join("handbook.md");
        std::fs::write(&handbook, "# Handbook\npolicies\n").unwrap();
        let other = tmp.path().join("misc.md");
        std::fs::write(&other, "# Misc\nstuff\n").unwrap();

        let opts = AddOptions {
            domain: Some("auto".to_string()),
            ..Default::default()
        };
        add(&store, &[handbook, other], &opts).await.unwrap();

        assert!(store.chunk_exists("hr/handbook/01.txt"));
        assert!(store.chunk_exists("unsorted/misc/01.txt"));
    }

    #[tokio::test]
    async fn test_add_empty_file_skipped() {
        let (tmp, store) = init_store();
        let source = tmp.path().join("empty.txt");
        std::fs::write(&source, "   \n  ").unwrap();
        let report = add(&store, &[source], &AddOptions::default())
            .await
            .unwrap();
        assert_eq!(report.files, 0);
        assert_eq!(report.skipped, 1);
    }
}
