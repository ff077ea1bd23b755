//! Prompt assembly contract.
//!
//! Turning an [`EnhancedResult`] into prompt text is left to the embedding
//! application. This crate only fixes the shape of that collaborator.
//! [`EnhancedResult::items`] gives implementations a single ordered walk over
//! every item kind.

use context_fusion_core::models::{EnhancedResult, QueryMode};

/// Builds the final prompt context from a fused retrieval result.
pub trait PromptAssembler: Send + Sync {
    /// Render `result` for a query made in `mode`. Personal-mode callers
    /// typically place personal knowledge ahead of external snippets.
    fn assemble(&self, result: &EnhancedResult, mode: QueryMode) -> String;
}
