//! Retrieval-augmented grounding.
//!
//! This module provides:
//! - `VectorIndex`: disk-persisted flat vector store over document chunks
//! - `should_search_web`: heuristic gate for supplementing with web search
//! - `RagEngine`: assembles the grounding context and provenance record
//! - `SourceReference`: tagged provenance unit (document or web)

mod engine;
mod heuristic;
mod sources;
mod vector_index;

pub use engine::{RagConfig, RagEngine};
pub use heuristic::should_search_web;
pub use sources::{SourceReference, WEB_RELEVANCE_SCORE};
pub use vector_index::{ChunkMetadata, ScoredChunk, VectorIndex};
