//! # ragdag
//!
//! **A flat-file knowledge-graph engine for retrieval-augmented generation.**
//!
//! ragdag ingests heterogeneous documents (markdown, text, code, CSV/JSON,
//! PDF/HTML/DOCX via external extractors), cuts them into chunks stored as
//! plain files organized by domain, and maintains a content-addressed edge
//! log relating chunks to their sources and to each other. On top of the
//! store it serves keyword, vector, and hybrid search plus context-assembly
//! question answering — as a library, an HTTP API, and a JSON-RPC tool
//! server.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌─────────────────┐
//! │  Parser   │──▶│   Chunker    │──▶│   .ragdag/       │
//! │ md/csv/…  │   │ 4 strategies │   │ chunks + 3 logs  │
//! └───────────┘   └──────────────┘   │ + embeddings.bin │
//!                                    └────────┬─────────┘
//!                          ┌─────────────────┼─────────────────┐
//!                          ▼                 ▼                 ▼
//!                    ┌──────────┐      ┌──────────┐      ┌──────────┐
//!                    │  Search  │      │   Ask    │      │  Graph   │
//!                    │ kw/vec/hy│      │ RAG ctx  │      │ ops      │
//!                    └──────────┘      └──────────┘      └──────────┘
//! ```
//!
//! ## Store layout
//!
//! Everything lives in one `.ragdag/` directory: first-level domain
//! directories hold document directories of `NN.txt` chunk files; the store
//! root carries the `.config` INI, the tab-separated `.edges` and
//! `.processed` logs, `.domain-rules`, and per-domain `embeddings.bin` +
//! `manifest.tsv` pairs. State is never held in memory across calls — every
//! operation reads what it needs from disk.
//!
//! ## Quick start
//!
//! ```bash
//! ragdag init                      # create .ragdag/ with defaults
//! ragdag add docs/ --domain auto   # parse, chunk, store, link
//! ragdag search "deployment"       # hybrid search (degrades to keyword)
//! ragdag ask "how do we deploy?"   # budgeted context + optional LLM
//! ragdag serve                     # HTTP API + JSON-RPC tools
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`util`] | Sanitization, content hashing, token estimation, store discovery |
//! | [`error`] | [`RagError`] taxonomy |
//! | [`config`] | Sectioned INI config store with atomic writes |
//! | [`parse`] | File-type detection and text extraction |
//! | [`chunk`] | heading / paragraph / fixed / function chunking |
//! | [`store`] | Store layout, logs, domain rules, atomic chunk placement |
//! | [`ingest`] | The add pipeline: parse → chunk → store → edges → embed |
//! | [`embeddings`] | Binary embeddings codec + TSV manifest |
//! | [`provider`] | Embedding provider capability (openai, ollama, none) |
//! | [`llm`] | LLM provider capability (openai, anthropic, ollama, none) |
//! | [`similarity`] | Cosine scoring over packed vectors |
//! | [`search`] | Keyword / vector / hybrid search with degradation |
//! | [`graph`] | Summary, neighbors, trace, relate, link |
//! | [`ask`] | Retrieval, 1-hop expansion, budgeted context, LLM answer |
//! | [`maintenance`] | verify / repair / gc / reindex |
//! | [`server`] | Axum HTTP API + JSON-RPC tool endpoint |
//! | [`tools`] | Tool trait and registry backing the RPC surface |

pub mod ask;
pub mod chunk;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod graph;
pub mod ingest;
pub mod llm;
pub mod maintenance;
pub mod parse;
pub mod provider;
pub mod search;
pub mod server;
pub mod similarity;
pub mod store;
pub mod tools;
pub mod util;

pub use ask::{ask, AskOptions, AskResult};
pub use error::RagError;
pub use graph::{link, neighbors, relate, summary, trace, GraphSummary, Neighbors, TraceHop};
pub use ingest::{add, AddOptions, AddReport};
pub use maintenance::{gc, reindex, repair, verify, GcReport, VerifyReport};
pub use search::{search, SearchMode, SearchResult};
pub use store::{Edge, Store};
