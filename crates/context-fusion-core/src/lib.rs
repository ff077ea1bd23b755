//! # Context Fusion Core
//!
//! Shared, runtime-agnostic logic for Context Fusion: data models, the
//! backing-store traits, the query cache, the vector index, time-sensitivity
//! detection, and the fusion/scoring algorithm.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem dependencies.
//! Everything that needs a runtime or a network (the orchestrator's task
//! fan-out, the SQLite backend, embedding providers) lives in the
//! `context-fusion` app crate.

pub mod cache;
pub mod embedding;
pub mod fusion;
pub mod models;
pub mod sensitivity;
pub mod store;
pub mod vector;
