//! Tool surface for the JSON-RPC server.
//!
//! One tool per library operation, each taking the same inputs as the
//! library call and returning a human-readable text rendering — numbered
//! search results, markdown-style sources in ask, count summaries for the
//! maintenance operations. The registry is shared between the JSON-RPC
//! endpoint and the `GET /tools/list` discovery route.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::ask::AskOptions;
use crate::graph;
use crate::ingest::AddOptions;
use crate::maintenance;
use crate::search;
use crate::store::Store;

/// Context handed to every tool execution.
pub struct ToolContext {
    pub store: Arc<Store>,
}

/// A callable tool exposed over the RPC surface.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name; also the JSON-RPC method name.
    fn name(&self) -> &str;

    /// One-line description for discovery.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters object.
    fn parameters_schema(&self) -> Value;

    /// Execute with a JSON parameters object, returning display text.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String>;
}

/// Registry of all tools served by the RPC endpoint.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry pre-loaded with one tool per library operation.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchTool));
        registry.register(Box::new(AskTool));
        registry.register(Box::new(AddTool));
        registry.register(Box::new(GraphTool));
        registry.register(Box::new(NeighborsTool));
        registry.register(Box::new(TraceTool));
        registry.register(Box::new(RelateTool));
        registry.register(Box::new(LinkTool));
        registry.register(Box::new(VerifyTool));
        registry.register(Box::new(RepairTool));
        registry.register(Box::new(GcTool));
        registry.register(Box::new(ReindexTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn opt_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn req_str(params: &Value, key: &str) -> Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("missing required parameter '{}'", key))
}

// ── search ───────────────────────────────────────────────────────────────

pub struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search the knowledge base (keyword, vector, or hybrid)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "mode": { "type": "string", "enum": ["keyword", "vector", "hybrid"] },
                "domain": { "type": "string", "description": "Limit to one domain" },
                "top_k": { "type": "integer", "description": "Max results" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let query = req_str(&params, "query")?;
        let mode = opt_str(&params, "mode");
        let domain = opt_str(&params, "domain");
        let top_k = params.get("top_k").and_then(|v| v.as_u64()).map(|n| n as usize);

        let results = search::search(
            &ctx.store,
            &query,
            mode.as_deref(),
            domain.as_deref(),
            top_k,
        )
        .await?;

        if results.is_empty() {
            return Ok("No results found.".to_string());
        }

        let mut parts = Vec::new();
        for (i, r) in results.iter().enumerate() {
            let preview: String = r.content.chars().take(200).collect::<String>().replace('\n', " ");
            parts.push(format!(
                "{}. **{}** (score: {:.4})\n   {}",
                i + 1,
                r.path,
                r.score,
                preview
            ));
        }
        Ok(parts.join("\n\n"))
    }
}

// ── ask ──────────────────────────────────────────────────────────────────

pub struct AskTool;

#[async_trait]
impl Tool for AskTool {
    fn name(&self) -> &str {
        "ask"
    }

    fn description(&self) -> &str {
        "Answer a question with retrieval-augmented generation"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": { "type": "string", "description": "The question to answer" },
                "domain": { "type": "string", "description": "Limit retrieval to one domain" },
                "use_llm": { "type": "boolean", "default": true },
                "top_k": { "type": "integer" }
            },
            "required": ["question"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let question = req_str(&params, "question")?;
        let opts = AskOptions {
            domain: opt_str(&params, "domain"),
            top_k: params.get("top_k").and_then(|v| v.as_u64()).map(|n| n as usize),
            use_llm: params.get("use_llm").and_then(|v| v.as_bool()).unwrap_or(true),
        };

        let result = crate::ask::ask(&ctx.store, &question, &opts).await?;
        let body = result.answer.unwrap_or(result.context);
        if result.sources.is_empty() {
            return Ok(body);
        }
        let sources: Vec<String> = result.sources.iter().map(|s| format!("- {}", s)).collect();
        Ok(format!("{}\n\n**Sources:**\n{}", body, sources.join("\n")))
    }
}

// ── add ──────────────────────────────────────────────────────────────────

pub struct AddTool;

#[async_trait]
impl Tool for AddTool {
    fn name(&self) -> &str {
        "add"
    }

    fn description(&self) -> &str {
        "Ingest a file or directory into the knowledge base"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File or directory to ingest" },
                "domain": { "type": "string", "description": "Domain name, or 'auto' for rules" },
                "flat": { "type": "boolean", "default": false },
                "embed": { "type": "boolean", "default": true }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let path = req_str(&params, "path")?;
        let opts = AddOptions {
            domain: opt_str(&params, "domain"),
            flat: params.get("flat").and_then(|v| v.as_bool()).unwrap_or(false),
            embed: params.get("embed").and_then(|v| v.as_bool()).unwrap_or(true),
        };

        let report = crate::ingest::add(&ctx.store, &[path.into()], &opts).await?;
        Ok(format!(
            "Ingested {} files ({} chunks), skipped {}.",
            report.files, report.chunks, report.skipped
        ))
    }
}

// ── graph ────────────────────────────────────────────────────────────────

pub struct GraphTool;

#[async_trait]
impl Tool for GraphTool {
    fn name(&self) -> &str {
        "graph"
    }

    fn description(&self) -> &str {
        "Knowledge graph summary statistics"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "domain": { "type": "string", "description": "Limit counts to one domain" }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let domain = opt_str(&params, "domain");
        let stats = graph::summary(&ctx.store, domain.as_deref())?;
        let mut out = format!(
            "domains: {}\ndocuments: {}\nchunks: {}\nedges: {}",
            stats.domains, stats.documents, stats.chunks, stats.edges
        );
        for (etype, count) in &stats.edge_types {
            out.push_str(&format!("\n  {}: {}", etype, count));
        }
        Ok(out)
    }
}

// ── neighbors ────────────────────────────────────────────────────────────

pub struct NeighborsTool;

#[async_trait]
impl Tool for NeighborsTool {
    fn name(&self) -> &str {
        "neighbors"
    }

    fn description(&self) -> &str {
        "List nodes connected to a node, by direction"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "node": { "type": "string", "description": "Node id (chunk path or source path)" }
            },
            "required": ["node"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let node = req_str(&params, "node")?;
        let result = graph::neighbors(&ctx.store, &node)?;
        if result.outgoing.is_empty() && result.incoming.is_empty() {
            return Ok(format!("No edges touch {}.", node));
        }
        let mut lines = Vec::new();
        for n in &result.outgoing {
            lines.push(format!("{} {} [{}] {}", n.direction, n.node, n.edge_type, n.metadata));
        }
        for n in &result.incoming {
            lines.push(format!("{} {} [{}] {}", n.direction, n.node, n.edge_type, n.metadata));
        }
        Ok(lines.join("\n"))
    }
}

// ── trace ────────────────────────────────────────────────────────────────

pub struct TraceTool;

#[async_trait]
impl Tool for TraceTool {
    fn name(&self) -> &str {
        "trace"
    }

    fn description(&self) -> &str {
        "Walk a node's provenance chain back to its origin"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "node": { "type": "string", "description": "Node id to trace" }
            },
            "required": ["node"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let node = req_str(&params, "node")?;
        let hops = graph::trace(&ctx.store, &node)?;
        let lines: Vec<String> = hops
            .iter()
            .map(|h| match &h.parent {
                Some(parent) => format!("{} → {} [{}]", h.node, parent, h.edge_type),
                None => format!("{} (origin)", h.node),
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

// ── relate ───────────────────────────────────────────────────────────────

pub struct RelateTool;

#[async_trait]
impl Tool for RelateTool {
    fn name(&self) -> &str {
        "relate"
    }

    fn description(&self) -> &str {
        "Create related_to edges between semantically similar chunks"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "domain": { "type": "string" },
                "threshold": { "type": "number", "default": 0.8 }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let domain = opt_str(&params, "domain");
        let threshold = params
            .get("threshold")
            .and_then(|v| v.as_f64())
            .unwrap_or_else(|| ctx.store.config().get_f64("edges.relate_threshold", 0.8));
        let added = graph::relate(&ctx.store, domain.as_deref(), threshold)?;
        Ok(format!(
            "Added {} related_to edges (threshold={}).",
            added, threshold
        ))
    }
}

// ── link ─────────────────────────────────────────────────────────────────

pub struct LinkTool;

#[async_trait]
impl Tool for LinkTool {
    fn name(&self) -> &str {
        "link"
    }

    fn description(&self) -> &str {
        "Create a manual edge between two nodes"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "source": { "type": "string" },
                "target": { "type": "string" },
                "edge_type": { "type": "string", "default": "references" }
            },
            "required": ["source", "target"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let source = req_str(&params, "source")?;
        let target = req_str(&params, "target")?;
        let edge_type = opt_str(&params, "edge_type");
        graph::link(&ctx.store, &source, &target, edge_type.as_deref())?;
        Ok(format!("Linked {} → {}.", source, target))
    }
}

// ── maintenance ──────────────────────────────────────────────────────────

pub struct VerifyTool;

#[async_trait]
impl Tool for VerifyTool {
    fn name(&self) -> &str {
        "verify"
    }

    fn description(&self) -> &str {
        "Check store integrity without modifying anything"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<String> {
        let report = maintenance::verify(&ctx.store)?;
        Ok(format!(
            "chunks: {} ({} unreadable)\nembedding sets: {} ({} corrupt)\norphan edges: {}\nstale processed: {}\n{}",
            report.chunks,
            report.unreadable_chunks,
            report.embedding_sets,
            report.corrupt_embeddings,
            report.orphan_edges,
            report.stale_processed,
            if report.is_clean() { "Store is clean." } else { "Issues found — run repair or gc." }
        ))
    }
}

pub struct RepairTool;

#[async_trait]
impl Tool for RepairTool {
    fn name(&self) -> &str {
        "repair"
    }

    fn description(&self) -> &str {
        "Rewrite the edge log without orphaned rows"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<String> {
        let removed = maintenance::repair(&ctx.store)?;
        Ok(format!("Removed {} orphaned edges.", removed))
    }
}

pub struct GcTool;

#[async_trait]
impl Tool for GcTool {
    fn name(&self) -> &str {
        "gc"
    }

    fn description(&self) -> &str {
        "Remove orphaned edges and stale processed records"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<String> {
        let report = maintenance::gc(&ctx.store)?;
        Ok(format!(
            "Removed {} orphaned edges and {} stale processed records.",
            report.removed_edges, report.removed_processed
        ))
    }
}

pub struct ReindexTool;

#[async_trait]
impl Tool for ReindexTool {
    fn name(&self) -> &str {
        "reindex"
    }

    fn description(&self) -> &str {
        "Rebuild embeddings from the chunk tree"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "domain": { "type": "string", "description": "Limit rebuild to one domain" }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let domain = opt_str(&params, "domain");
        let written = maintenance::reindex(&ctx.store, domain.as_deref()).await?;
        Ok(format!("Reindexed {} chunk vectors.", written))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> (tempfile::TempDir, ToolContext) {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = Store::init(tmp.path()).unwrap();
        (
            tmp,
            ToolContext {
                store: Arc::new(store),
            },
        )
    }

    #[test]
    fn test_registry_has_all_operations() {
        let registry = ToolRegistry::with_builtins();
        for name in [
            "search", "ask", "add", "graph", "neighbors", "trace", "relate", "link", "verify",
            "repair", "gc", "reindex",
        ] {
            assert!(registry.find(name).is_some(), "missing tool {}", name);
        }
        assert!(registry.find("nope").is_none());
    }

    #[tokio::test]
    async fn test_search_tool_formats_results() {
        let (_tmp, ctx) = ctx();
        ctx.store
            .replace_document("d", "doc", &["findme content here".to_string()])
            .unwrap();
        let registry = ToolRegistry::with_builtins();
        let tool = registry.find("search").unwrap();
        let out = tool
            .execute(json!({ "query": "findme", "mode": "keyword" }), &ctx)
            .await
            .unwrap();
        assert!(out.starts_with("1. **d/doc/01.txt**"));
    }

    #[tokio::test]
    async fn test_search_tool_requires_query() {
        let (_tmp, ctx) = ctx();
        let registry = ToolRegistry::with_builtins();
        let tool = registry.find("search").unwrap();
        assert!(tool.execute(json!({}), &ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_graph_tool_text() {
        let (_tmp, ctx) = ctx();
        let registry = ToolRegistry::with_builtins();
        let tool = registry.find("graph").unwrap();
        let out = tool.execute(json!({}), &ctx).await.unwrap();
        assert!(out.contains("domains: 0"));
        assert!(out.contains("edges: 0"));
    }

    #[tokio::test]
    async fn test_link_and_trace_tools() {
        let (_tmp, ctx) = ctx();
        let registry = ToolRegistry::with_builtins();
        registry
            .find("link")
            .unwrap()
            .execute(json!({ "source": "a/x/01.txt", "target": "/src.md", "edge_type": "chunked_from" }), &ctx)
            .await
            .unwrap();

        let out = registry
            .find("trace")
            .unwrap()
            .execute(json!({ "node": "a/x/01.txt" }), &ctx)
            .await
            .unwrap();
        assert!(out.contains("a/x/01.txt → /src.md [chunked_from]"));
        assert!(out.contains("(origin)"));
    }
}
