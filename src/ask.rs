//! Context-assembly question answering.
//!
//! Retrieval, a single hop of graph expansion, token-budgeted context
//! assembly, and an optional LLM call. Without an LLM provider the pipeline
//! still returns the assembled context and sources — the ask surface is
//! useful as pure retrieval.

use anyhow::Result;
use serde::Serialize;
use tracing::debug;

use crate::llm::LlmConfig;
use crate::search::{self, SearchMode, SearchResult};
use crate::store::{Edge, Store, EDGE_REFERENCES, EDGE_RELATED_TO, EDGE_RETRIEVED};
use crate::util;

/// Result of one ask invocation. `answer` is `None` when no LLM ran.
#[derive(Debug, Clone, Serialize)]
pub struct AskResult {
    pub answer: Option<String>,
    pub context: String,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AskOptions {
    pub domain: Option<String>,
    pub top_k: Option<usize>,
    pub use_llm: bool,
}

impl Default for AskOptions {
    fn default() -> Self {
        Self {
            domain: None,
            top_k: None,
            use_llm: true,
        }
    }
}

pub async fn ask(store: &Store, question: &str, opts: &AskOptions) -> Result<AskResult> {
    let top_k = opts
        .top_k
        .unwrap_or_else(|| store.config().get_usize("search.top_k", 10));

    // Retrieval mode follows config, but vector-only stores still ask
    // through hybrid's keyword degradation.
    let mode = match store.config().get("search.default_mode", "hybrid").as_str() {
        "keyword" => SearchMode::Keyword,
        _ => SearchMode::Hybrid,
    };
    let primary = search::search(
        store,
        question,
        Some(mode.as_str()),
        opts.domain.as_deref(),
        Some(top_k),
    )
    .await?;

    if primary.is_empty() {
        return Ok(AskResult {
            answer: None,
            context: String::new(),
            sources: Vec::new(),
        });
    }

    let expanded = expand(store, &primary)?;

    let mut all: Vec<SearchResult> = primary.clone();
    all.extend(expanded);
    all.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let (context, sources) = assemble_context(store, &all);

    let llm_config = LlmConfig::from_store(store.config());
    let answer = if opts.use_llm && llm_config.is_enabled() {
        let template = std::fs::read_to_string(store.root().join("prompt.txt")).ok();
        Some(crate::llm::get_answer(&llm_config, template.as_deref(), question, &context).await?)
    } else {
        None
    };

    if store.config().get_bool("edges.record_queries", false) {
        record_query(store, &primary)?;
    }

    Ok(AskResult {
        answer,
        context,
        sources,
    })
}

/// One hop outward: for every primary candidate, pull in the targets of its
/// `related_to` and `references` edges at half the candidate's score.
fn expand(store: &Store, primary: &[SearchResult]) -> Result<Vec<SearchResult>> {
    let edges = store.read_edges()?;
    let mut seen: std::collections::HashSet<String> =
        primary.iter().map(|r| r.path.clone()).collect();
    let mut expanded = Vec::new();

    for candidate in primary {
        for edge in &edges {
            if edge.source != candidate.path {
                continue;
            }
            if edge.edge_type != EDGE_RELATED_TO && edge.edge_type != EDGE_REFERENCES {
                continue;
            }
            if seen.contains(&edge.target) {
                continue;
            }
            let Ok(content) = store.read_chunk(&edge.target) else {
                continue;
            };
            seen.insert(edge.target.clone());
            expanded.push(SearchResult {
                path: edge.target.clone(),
                score: candidate.score / 2.0,
                content,
                domain: Store::domain_of(&edge.target),
            });
        }
    }

    debug!("graph expansion added {} chunks", expanded.len());
    Ok(expanded)
}

/// Walk the ranked list, appending chunks until the token budget would be
/// exceeded. Each chunk gets a source delimiter header; duplicate paths are
/// added once.
fn assemble_context(store: &Store, ranked: &[SearchResult]) -> (String, Vec<String>) {
    let max_context = store.config().get_usize("llm.max_context", 8000);

    let mut parts = Vec::new();
    let mut sources = Vec::new();
    let mut used_tokens = 0usize;
    let mut seen: std::collections::HashSet<&str> = std::collections::HashSet::new();

    for result in ranked {
        if !seen.insert(&result.path) {
            continue;
        }
        let chunk_tokens = util::estimate_tokens(&result.content);
        if used_tokens + chunk_tokens > max_context {
            break;
        }
        parts.push(format!(
            "--- Source: {} (score: {:.4}) ---\n{}",
            result.path, result.score, result.content
        ));
        sources.push(result.path.clone());
        used_tokens += chunk_tokens;
    }

    (parts.join("\n\n"), sources)
}

/// Record this query as a synthetic node with `retrieved` edges to each
/// primary chunk.
fn record_query(store: &Store, primary: &[SearchResult]) -> Result<()> {
    let timestamp = util::iso_now();
    let query_node = format!("query_{}", timestamp);
    let edges: Vec<Edge> = primary
        .iter()
        .map(|r| Edge::new(&query_node, &r.path, EDGE_RETRIEVED, &timestamp))
        .collect();
    store.append_edges(&edges)
}
