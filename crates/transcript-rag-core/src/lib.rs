//! # Transcript RAG Core
//!
//! Shared, I/O-free logic for Transcript RAG: data models, the vector index
//! abstraction, two-tier retrieval with parent expansion, confidence
//! scoring, mode routing, and session-scoped conversation memory.
//!
//! This crate contains no HTTP or filesystem code and uses tokio only for
//! its async mutex. Network collaborators (embedder, synthesizer) are
//! reached through traits that the `transcript-rag` app crate implements.
//!
//! ## Query flow
//!
//! ```text
//! query ─▶ SafetyCheck ─▶ QueryExpander ─▶ Embedder ─▶ VectorIndex ×2
//!                                                        │
//!            ParentStore ◀── parent expansion ◀──────────┘
//!                 │
//!                 ▼
//!        dedup (parent) ─▶ cap (document) ─▶ ConfidenceScorer ─▶ ModeRouter
//!                                                                  │
//!                                         rag ─▶ context blocks ─▶ Synthesizer
//! ```

pub mod answer;
pub mod cache;
pub mod confidence;
pub mod context;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod expand;
pub mod memory;
pub mod models;
pub mod parents;
pub mod pipeline;
pub mod router;
pub mod safety;
pub mod store;
pub mod tiering;

pub use error::RagError;
