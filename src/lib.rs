//! # Context Fusion
//!
//! Cache-aware knowledge retrieval for AI assistants. Before a prompt is
//! assembled, a query is answered from cache or fanned out to three
//! sources in parallel (the user's personal records, external knowledge
//! providers, and a vector-similarity index), and the results are fused
//! into one scored [`EnhancedResult`](context_fusion_core::models::EnhancedResult).
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────────┐
//!   query ──────▶ │  RetrievalOrchestrator   │ ◀──▶ QueryCache ──┐
//!                 └──┬──────────┬─────────┬──┘                   │
//!                    ▼          ▼         ▼                      ▼
//!               Personal    External   VectorIndex         ┌──────────┐
//!                    │          │         │                │  SQLite  │
//!                    └──────────┴─────────┴──────────────▶ │ (sqlx)   │
//!                                                          └──────────┘
//! ```
//!
//! The runtime-agnostic pieces (models, cache, fusion, vector index, store
//! traits) live in the `context-fusion-core` crate. This crate adds the
//! SQLite backend, HTTP providers, the orchestrator, the server, and the
//! `cfx` CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the store traits |
//! | [`embedding`] | Embedding providers |
//! | [`personal`] | Personal knowledge source |
//! | [`providers`] | External knowledge providers (Wikipedia, OpenLibrary, Crossref) |
//! | [`external`] | External knowledge source |
//! | [`orchestrator`] | Retrieval orchestration |
//! | [`prompt`] | Prompt assembly contract |
//! | [`server`] | HTTP server |
//! | [`commands`], [`stats`] | CLI commands |
//! | [`logging`] | Tracing setup |

pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod external;
pub mod logging;
pub mod migrate;
pub mod orchestrator;
pub mod personal;
pub mod prompt;
pub mod providers;
pub mod server;
pub mod sqlite_store;
pub mod stats;
