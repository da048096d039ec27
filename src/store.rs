//! Store layout and persistence protocol.
//!
//! A store is a `.ragdag/` directory: domain directories holding document
//! directories of `NN.txt` chunks, plus three dot-files at the root — the
//! `.config` INI, the tab-separated `.processed` and `.edges` logs, and
//! `.domain-rules`. All log mutation goes through a per-store mutex and a
//! write-temp-then-rename discipline; chunk replacement stages into a
//! sibling directory and renames last, so a crashed ingest leaves the
//! previous chunk set intact.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::warn;
use walkdir::WalkDir;

use crate::config::{write_atomic, ConfigFile};
use crate::error::RagError;
use crate::util::{self, STORE_DIR_NAME};

pub const EDGE_CHUNKED_FROM: &str = "chunked_from";
pub const EDGE_DERIVED_VIA: &str = "derived_via";
pub const EDGE_RELATED_TO: &str = "related_to";
pub const EDGE_REFERENCES: &str = "references";
pub const EDGE_RETRIEVED: &str = "retrieved";

const EDGES_HEADER: &str = "# source\ttarget\tedge_type\tmetadata";
const PROCESSED_HEADER: &str = "# source_path\tcontent_hash\tdomain\ttimestamp";
const RULES_HEADER: &str = "# patterns → domain (first match wins)";

/// A typed directed relation between two node strings.
///
/// The type set is open: unknown types are stored and returned verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub edge_type: String,
    pub metadata: String,
}

impl Edge {
    pub fn new(source: &str, target: &str, edge_type: &str, metadata: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            edge_type: edge_type.to_string(),
            metadata: metadata.to_string(),
        }
    }

    /// Parse one log line; comments, blanks, and rows with fewer than three
    /// fields yield `None`.
    pub fn parse(line: &str) -> Option<Edge> {
        let line = line.trim_end_matches('\n');
        if line.trim().is_empty() || line.starts_with('#') {
            return None;
        }
        let mut parts = line.splitn(4, '\t');
        let source = parts.next()?.to_string();
        let target = parts.next()?.to_string();
        let edge_type = parts.next()?.to_string();
        if source.is_empty() || target.is_empty() || edge_type.is_empty() {
            return None;
        }
        let metadata = parts.next().unwrap_or("").to_string();
        Some(Edge {
            source,
            target,
            edge_type,
            metadata,
        })
    }

    pub fn to_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}",
            self.source, self.target, self.edge_type, self.metadata
        )
    }

    /// Whether the source node looks like a chunk path (store-relative,
    /// `.txt`). Absolute source paths and synthetic query nodes are not
    /// chunk-shaped and cannot be verified against the chunk tree.
    pub fn source_is_chunk_shaped(&self) -> bool {
        !self.source.starts_with('/') && self.source.ends_with(".txt")
    }
}

/// One `.processed` record: the last ingest of a source file.
#[derive(Debug, Clone)]
pub struct ProcessedRecord {
    pub source: String,
    pub hash: String,
    pub domain: String,
    pub timestamp: String,
}

impl ProcessedRecord {
    pub fn parse(line: &str) -> Option<ProcessedRecord> {
        if line.trim().is_empty() || line.starts_with('#') {
            return None;
        }
        let mut parts = line.splitn(4, '\t');
        Some(ProcessedRecord {
            source: parts.next()?.to_string(),
            hash: parts.next()?.to_string(),
            domain: parts.next().unwrap_or("").to_string(),
            timestamp: parts.next().unwrap_or("").to_string(),
        })
    }

    pub fn to_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}",
            self.source, self.hash, self.domain, self.timestamp
        )
    }
}

/// Handle on one `.ragdag` store.
///
/// Holds no document state in memory; every operation reads what it needs
/// from disk. The mutex only serializes in-process log writers.
pub struct Store {
    root: PathBuf,
    config: ConfigFile,
    write_lock: Mutex<()>,
}

impl Store {
    /// Create the store under `base` (idempotent) and write defaults.
    pub fn init(base: &Path) -> Result<Store> {
        let root = base.join(STORE_DIR_NAME);
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create {}", root.display()))?;

        let store = Store::at_root(root);
        store.config.write_defaults()?;
        store.ensure_log(&store.edges_path(), EDGES_HEADER)?;
        store.ensure_log(&store.processed_path(), PROCESSED_HEADER)?;
        store.ensure_log(&store.rules_path(), RULES_HEADER)?;
        Ok(store)
    }

    /// Open the store whose root directory is `root` (the `.ragdag` dir).
    pub fn at_root(root: PathBuf) -> Store {
        let config = ConfigFile::new(&root);
        Store {
            root,
            config,
            write_lock: Mutex::new(()),
        }
    }

    /// Discover the store from a starting directory (or `RAGDAG_STORE`).
    pub fn discover(start: &Path) -> Result<Store, RagError> {
        Ok(Store::at_root(util::find_store(start)?))
    }

    fn ensure_log(&self, path: &Path, header: &str) -> Result<()> {
        if !path.exists() {
            write_atomic(path, &format!("{}\n", header))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn edges_path(&self) -> PathBuf {
        self.root.join(".edges")
    }

    pub fn processed_path(&self) -> PathBuf {
        self.root.join(".processed")
    }

    pub fn rules_path(&self) -> PathBuf {
        self.root.join(".domain-rules")
    }

    // ── Edge log ─────────────────────────────────────────────────────────

    pub fn read_edges(&self) -> Result<Vec<Edge>> {
        let Ok(text) = std::fs::read_to_string(self.edges_path()) else {
            return Ok(Vec::new());
        };
        Ok(text.lines().filter_map(Edge::parse).collect())
    }

    /// Append edges to the log, creating it with a header if absent.
    pub fn append_edges(&self, edges: &[Edge]) -> Result<()> {
        if edges.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().unwrap();
        self.ensure_log(&self.edges_path(), EDGES_HEADER)?;
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(self.edges_path())?;
        let mut buf = String::new();
        for edge in edges {
            buf.push_str(&edge.to_line());
            buf.push('\n');
        }
        file.write_all(buf.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Replace the whole edge log (repair/gc and re-ingest edge rewrites).
    pub fn rewrite_edges(&self, edges: &[Edge]) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        self.rewrite_edges_locked(edges)
    }

    fn rewrite_edges_locked(&self, edges: &[Edge]) -> Result<()> {
        let mut out = String::from(EDGES_HEADER);
        out.push('\n');
        for edge in edges {
            out.push_str(&edge.to_line());
            out.push('\n');
        }
        write_atomic(&self.edges_path(), &out)
    }

    /// Drop prior `chunked_from` edges for `source`, then append one per
    /// chunk file now present under `doc_rel`. Edges of every other type
    /// survive re-ingest untouched.
    pub fn replace_chunk_edges(&self, doc_rel: &str, source: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let mut edges: Vec<Edge> = self
            .read_edges()?
            .into_iter()
            .filter(|e| !(e.edge_type == EDGE_CHUNKED_FROM && e.target == source))
            .collect();

        let doc_dir = self.root.join(doc_rel);
        let mut chunk_names: Vec<String> = std::fs::read_dir(&doc_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".txt") && !name.starts_with('_'))
            .collect();
        chunk_names.sort();

        for name in chunk_names {
            edges.push(Edge::new(
                &format!("{}/{}", doc_rel, name),
                source,
                EDGE_CHUNKED_FROM,
                "",
            ));
        }
        self.rewrite_edges_locked(&edges)
    }

    // ── Processed log ────────────────────────────────────────────────────

    pub fn read_processed(&self) -> Result<Vec<ProcessedRecord>> {
        let Ok(text) = std::fs::read_to_string(self.processed_path()) else {
            return Ok(Vec::new());
        };
        Ok(text.lines().filter_map(ProcessedRecord::parse).collect())
    }

    /// Exact `(path, hash)` dedup check against the processed log.
    ///
    /// Readers use the last matching record for a path; substring matches
    /// never count.
    pub fn is_processed(&self, source: &Path, hash: &str) -> bool {
        let source = source.to_string_lossy();
        let Ok(records) = self.read_processed() else {
            return false;
        };
        records
            .iter()
            .rev()
            .find(|r| r.source == source)
            .map(|r| r.hash == hash)
            .unwrap_or(false)
    }

    /// Replace any prior record for `source` and append the new one.
    pub fn record_processed(&self, source: &Path, hash: &str, domain: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let source = source.to_string_lossy();
        let mut records: Vec<ProcessedRecord> = self
            .read_processed()?
            .into_iter()
            .filter(|r| r.source != source)
            .collect();
        records.push(ProcessedRecord {
            source: source.into_owned(),
            hash: hash.to_string(),
            domain: domain.to_string(),
            timestamp: util::iso_now(),
        });
        self.rewrite_processed_locked(&records)
    }

    pub fn rewrite_processed(&self, records: &[ProcessedRecord]) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        self.rewrite_processed_locked(records)
    }

    fn rewrite_processed_locked(&self, records: &[ProcessedRecord]) -> Result<()> {
        let mut out = String::from(PROCESSED_HEADER);
        out.push('\n');
        for r in records {
            out.push_str(&r.to_line());
            out.push('\n');
        }
        write_atomic(&self.processed_path(), &out)
    }

    // ── Domain rules ─────────────────────────────────────────────────────

    /// First `.domain-rules` rule whose pattern list has a substring of the
    /// lowercased source path wins. Returns `None` when nothing matches.
    pub fn apply_domain_rules(&self, source_path: &str) -> Option<String> {
        let text = std::fs::read_to_string(self.rules_path()).ok()?;
        let source_lower = source_path.to_lowercase();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((patterns, domain)) = line.split_once('→') else {
                continue;
            };
            let domain = domain.trim();
            if domain.is_empty() {
                continue;
            }
            for pattern in patterns.split_whitespace() {
                if source_lower.contains(&pattern.to_lowercase()) {
                    return Some(domain.to_string());
                }
            }
        }
        None
    }

    // ── Chunk placement ──────────────────────────────────────────────────

    /// Atomically replace the chunk set of `domain/doc` (or `doc` in flat
    /// mode) with `chunks`. Returns the store-relative document path and the
    /// chunk count.
    ///
    /// Staging goes to a `<target>.new.<pid>` sibling; the final step is a
    /// rename (new document) or a move of the staged `*.txt` after deleting
    /// the previous set (re-ingest), which is the sole atomicity guarantee.
    pub fn replace_document(
        &self,
        domain: &str,
        doc: &str,
        chunks: &[String],
    ) -> Result<(String, usize)> {
        let doc_rel = if domain.is_empty() {
            doc.to_string()
        } else {
            format!("{}/{}", domain, doc)
        };
        let target = self.root.join(&doc_rel);
        let staging = self
            .root
            .join(format!("{}.new.{}", doc_rel, std::process::id()));

        if staging.exists() {
            std::fs::remove_dir_all(&staging)?;
        }
        std::fs::create_dir_all(&staging)?;
        let count = crate::chunk::write_chunks(&staging, chunks)?;

        if target.is_dir() {
            // Re-ingest: clear out every old chunk, then move the staged set in.
            for entry in std::fs::read_dir(&target)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.ends_with(".txt") {
                    std::fs::remove_file(entry.path())?;
                }
            }
            for entry in std::fs::read_dir(&staging)? {
                let entry = entry?;
                std::fs::rename(entry.path(), target.join(entry.file_name()))?;
            }
            std::fs::remove_dir_all(&staging)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::rename(&staging, &target)
                .with_context(|| format!("failed to place {}", target.display()))?;
        }

        Ok((doc_rel, count))
    }

    // ── Listing helpers ──────────────────────────────────────────────────

    /// First-level non-dot directories (domains, or flat-mode documents).
    pub fn list_domains(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| !n.starts_with('.'))
            .collect();
        names.sort();
        names
    }

    /// All chunk files under `domain` (or the whole store), excluding
    /// reserved `_`-prefixed scratch files.
    pub fn chunk_files(&self, domain: Option<&str>) -> Vec<PathBuf> {
        let base = match domain {
            Some(d) => self.root.join(d),
            None => self.root.clone(),
        };
        let mut files: Vec<PathBuf> = WalkDir::new(&base)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                let name = e.file_name().to_string_lossy();
                name.ends_with(".txt") && !name.starts_with('_')
            })
            .map(|e| e.into_path())
            .collect();
        files.sort();
        files
    }

    /// Store-relative form of an absolute path inside the store.
    pub fn rel_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Domain inferred from a chunk's relative path: the first segment of a
    /// `domain/doc/NN.txt` path, empty in flat mode.
    pub fn domain_of(rel_path: &str) -> String {
        let parts: Vec<&str> = rel_path.split('/').collect();
        if parts.len() >= 3 {
            parts[0].to_string()
        } else {
            String::new()
        }
    }

    pub fn read_chunk(&self, rel_path: &str) -> Result<String> {
        let path = self.root.join(rel_path);
        std::fs::read_to_string(&path).with_context(|| format!("missing chunk {}", rel_path))
    }

    /// Existing-chunk check for edge verification.
    pub fn chunk_exists(&self, rel_path: &str) -> bool {
        self.root.join(rel_path).is_file()
    }

    /// Existing `related_to` pairs in either direction, for relate's dedup.
    pub fn related_pairs(&self) -> Result<HashSet<(String, String)>> {
        let mut pairs = HashSet::new();
        for edge in self.read_edges()? {
            if edge.edge_type == EDGE_RELATED_TO {
                pairs.insert((edge.source.clone(), edge.target.clone()));
                pairs.insert((edge.target, edge.source));
            }
        }
        Ok(pairs)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("root", &self.root).finish()
    }
}
