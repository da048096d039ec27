//! Keyword, vector, and hybrid search.
//!
//! Keyword scoring is a TF-like density: total substring matches scaled by
//! content length. Hybrid runs keyword as a pre-filter, scores the survivors
//! with the vector engine, and fuses both via configured weights. Every
//! vector-path failure degrades to keyword results instead of propagating,
//! so a store without embeddings is still fully searchable.

use anyhow::{bail, Result};
use serde::Serialize;
use tracing::debug;

use crate::provider::{self, EmbedConfig};
use crate::similarity;
use crate::store::Store;

/// One search hit. `score` is the raw keyword score in keyword mode and a
/// `[0, 1]` fused score otherwise.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub path: String,
    pub score: f64,
    pub content: String,
    pub domain: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Keyword,
    Vector,
    Hybrid,
}

impl SearchMode {
    pub fn parse(name: &str) -> Result<SearchMode> {
        match name {
            "keyword" => Ok(SearchMode::Keyword),
            "vector" => Ok(SearchMode::Vector),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => bail!(
                "unknown search mode '{}': use keyword, vector, or hybrid",
                other
            ),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Keyword => "keyword",
            SearchMode::Vector => "vector",
            SearchMode::Hybrid => "hybrid",
        }
    }
}

/// Search the store. `mode` and `top_k` default from `[search]` config.
pub async fn search(
    store: &Store,
    query: &str,
    mode: Option<&str>,
    domain: Option<&str>,
    top_k: Option<usize>,
) -> Result<Vec<SearchResult>> {
    let mode = match mode {
        Some(m) => SearchMode::parse(m)?,
        None => SearchMode::parse(&store.config().get("search.default_mode", "hybrid"))?,
    };
    let top_k = top_k.unwrap_or_else(|| store.config().get_usize("search.top_k", 10));

    match mode {
        SearchMode::Keyword => Ok(keyword_search(store, query, domain, top_k)),
        SearchMode::Vector => vector_search(store, query, domain, top_k).await,
        SearchMode::Hybrid => hybrid_search(store, query, domain, top_k).await,
    }
}

/// Pure filesystem keyword search.
///
/// Tokens shorter than two characters are discarded; each remaining token
/// counts substring occurrences in the lowercased chunk. Chunks with no
/// matches are skipped; the rest score
/// `floor(total_matches * 10000 / content_chars)`.
pub fn keyword_search(
    store: &Store,
    query: &str,
    domain: Option<&str>,
    top_k: usize,
) -> Vec<SearchResult> {
    let query_lower = query.to_lowercase();
    let tokens: Vec<&str> = query_lower
        .split_whitespace()
        .filter(|w| w.chars().count() >= 2)
        .collect();
    if tokens.is_empty() {
        return Vec::new();
    }

    let mut results = Vec::new();
    for path in store.chunk_files(domain) {
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let content_lower = content.to_lowercase();
        let content_len = content_lower.chars().count();
        if content_len == 0 {
            continue;
        }

        let matches: usize = tokens
            .iter()
            .map(|t| content_lower.matches(t).count())
            .sum();
        if matches == 0 {
            continue;
        }

        let rel_path = store.rel_path(&path);
        results.push(SearchResult {
            domain: Store::domain_of(&rel_path),
            path: rel_path,
            score: (matches * 10000 / content_len) as f64,
            content,
        });
    }

    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(top_k);
    results
}

/// Embed the query with the configured provider and rank by cosine.
async fn vector_search(
    store: &Store,
    query: &str,
    domain: Option<&str>,
    top_k: usize,
) -> Result<Vec<SearchResult>> {
    let config = EmbedConfig::from_store(store.config());
    let query_vector = provider::embed_query(&config, query).await?;
    let scored = similarity::search_vectors(store, &query_vector, domain, None, top_k)?;
    Ok(materialize(
        store,
        scored.into_iter().map(|(p, s)| (p, s as f64)).collect(),
    ))
}

/// Keyword pre-filter, vector scoring over the survivors, weighted fusion.
///
/// Degrades to keyword when embeddings are disabled, and falls back to the
/// keyword results on any vector-path error.
async fn hybrid_search(
    store: &Store,
    query: &str,
    domain: Option<&str>,
    top_k: usize,
) -> Result<Vec<SearchResult>> {
    let config = EmbedConfig::from_store(store.config());
    if !config.is_enabled() {
        return Ok(keyword_search(store, query, domain, top_k));
    }

    let kw_results = keyword_search(store, query, domain, top_k * 3);

    match hybrid_vector_pass(store, query, domain, top_k, &config, &kw_results).await {
        Ok(results) => Ok(results),
        Err(e) => {
            debug!("hybrid vector pass failed, falling back to keyword: {:#}", e);
            let mut fallback = kw_results;
            fallback.truncate(top_k);
            Ok(fallback)
        }
    }
}

async fn hybrid_vector_pass(
    store: &Store,
    query: &str,
    domain: Option<&str>,
    top_k: usize,
    config: &EmbedConfig,
    kw_results: &[SearchResult],
) -> Result<Vec<SearchResult>> {
    let query_vector = provider::embed_query(config, query).await?;
    let candidates: Vec<String> = kw_results.iter().map(|r| r.path.clone()).collect();
    let vec_results =
        similarity::search_vectors(store, &query_vector, domain, Some(&candidates), top_k * 2)?;

    let kw_weight = store.config().get_f64("search.keyword_weight", 0.3);
    let vec_weight = store.config().get_f64("search.vector_weight", 0.7);

    // Max-scale both score sets within the candidate pool.
    let max_kw = kw_results.iter().map(|r| r.score).fold(0.0f64, f64::max);
    let max_vec = vec_results
        .iter()
        .map(|(_, s)| *s as f64)
        .fold(0.0f64, f64::max);

    let mut fused: Vec<(String, f64)> = vec_results
        .into_iter()
        .map(|(path, vec_score)| {
            let kw_score = kw_results
                .iter()
                .find(|r| r.path == path)
                .map(|r| r.score)
                .unwrap_or(0.0);
            let ks = if max_kw > 1e-10 { kw_score / max_kw } else { 0.0 };
            let vs = if max_vec > 1e-10 {
                vec_score as f64 / max_vec
            } else {
                0.0
            };
            (path, kw_weight * ks + vec_weight * vs)
        })
        .collect();

    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused.truncate(top_k);

    Ok(materialize(store, fused))
}

/// Attach chunk content and domain to scored paths.
fn materialize(store: &Store, scored: Vec<(String, f64)>) -> Vec<SearchResult> {
    scored
        .into_iter()
        .map(|(path, score)| SearchResult {
            content: store.read_chunk(&path).unwrap_or_default(),
            domain: Store::domain_of(&path),
            path,
            score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn init_store() -> (tempfile::TempDir, Store) {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = Store::init(tmp.path()).unwrap();
        (tmp, store)
    }

    #[test]
    fn test_keyword_prefers_denser_chunk() {
        let (_tmp, store) = init_store();
        store
            .replace_document(
                "d",
                "dense",
                &["search search search search".to_string()],
            )
            .unwrap();
        store
            .replace_document(
                "d",
                "sparse",
                &["search one two three four five six seven eight nine ten eleven twelve \
                   thirteen fourteen fifteen sixteen seventeen eighteen nineteen twenty"
                    .to_string()],
            )
            .unwrap();

        let results = keyword_search(&store, "search", None, 10);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].path, "d/dense/01.txt");
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn test_keyword_skips_nonmatching_and_short_tokens() {
        let (_tmp, store) = init_store();
        store
            .replace_document("d", "doc", &["alpha beta gamma".to_string()])
            .unwrap();

        assert!(keyword_search(&store, "zeta", None, 10).is_empty());
        // Single-char tokens are dropped; "a" alone finds nothing.
        assert!(keyword_search(&store, "a", None, 10).is_empty());
    }

    #[test]
    fn test_keyword_domain_scope() {
        let (_tmp, store) = init_store();
        store
            .replace_document("one", "doc", &["needle here".to_string()])
            .unwrap();
        store
            .replace_document("two", "doc", &["needle there".to_string()])
            .unwrap();

        let scoped = keyword_search(&store, "needle", Some("one"), 10);
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].domain, "one");

        let all = keyword_search(&store, "needle", None, 10);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_keyword_score_formula() {
        let (_tmp, store) = init_store();
        // 2 matches of "ab" in 10 chars → floor(2 * 10000 / 10) = 2000.
        store
            .replace_document("d", "doc", &["ab cdab cd".to_string()])
            .unwrap();
        let results = keyword_search(&store, "ab", None, 10);
        assert_eq!(results[0].score, 2000.0);
    }

    #[tokio::test]
    async fn test_hybrid_degrades_to_keyword_without_provider() {
        let (_tmp, store) = init_store();
        store
            .replace_document("d", "doc", &["needle in haystack".to_string()])
            .unwrap();

        let hybrid = search(&store, "needle", Some("hybrid"), None, Some(10))
            .await
            .unwrap();
        let keyword = search(&store, "needle", Some("keyword"), None, Some(10))
            .await
            .unwrap();

        assert_eq!(hybrid.len(), keyword.len());
        assert_eq!(hybrid[0].path, keyword[0].path);
        assert_eq!(hybrid[0].score, keyword[0].score);
    }

    #[tokio::test]
    async fn test_default_mode_comes_from_config() {
        let (_tmp, store) = init_store();
        store.config().set("search.default_mode", "keyword").unwrap();
        store
            .replace_document("d", "doc", &["findable text".to_string()])
            .unwrap();
        let results = search(&store, "findable", None, None, None).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_mode_rejected() {
        let (_tmp, store) = init_store();
        assert!(search(&store, "q", Some("psychic"), None, None).await.is_err());
    }
}
