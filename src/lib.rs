//! # Transcript RAG
//!
//! Confidence-gated question answering over podcast transcripts.
//!
//! Episodes are split into large parent windows and small child chunks.
//! Child chunks are embedded into two indexes (core advice, longtail
//! anecdotes). At query time the best children are retrieved, expanded to
//! their parents, deduplicated per idea, scored, and either synthesized
//! into a cited answer or routed to plain conversation when the evidence
//! is too weak.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌────────────────────┐
//! │ episode JSON │──▶│ index build  │──▶│ core.index/.meta   │
//! │ (chunks_dir) │   │ classify+emb │   │ longtail.index/... │
//! └──────────────┘   └──────────────┘   └─────────┬──────────┘
//!                                                 │
//!                       ┌─────────────────────────┤
//!                       ▼                         ▼
//!                  ┌──────────┐             ┌──────────┐
//!                  │   CLI    │             │   HTTP   │
//!                  │  (trag)  │             │  (axum)  │
//!                  └──────────┘             └──────────┘
//! ```
//!
//! The retrieval, scoring and routing logic lives in the I/O-free
//! [`transcript_rag_core`] crate. This crate adds configuration, provider
//! clients, persistence and the two front ends.
//!
//! ## Quick Start
//!
//! ```bash
//! trag index build              # embed chunks_dir into the index dir
//! trag search "prioritization"  # inspect retrieval
//! trag ask "how do I prioritize a roadmap?"
//! trag serve                    # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`embedding`] | Embedding providers (hash, OpenAI, Ollama, fastembed) |
//! | [`llm`] | LLM synthesizer and prompts |
//! | [`index_file`] | Index + sidecar metadata persistence |
//! | [`ingest`] | Episode loading and index build |
//! | [`app`] | Runtime assembly shared by CLI and server |
//! | [`server`] | HTTP API |

pub mod app;
pub mod ask;
pub mod config;
pub mod embedding;
pub mod index_file;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod search;
pub mod server;
pub mod stats;
