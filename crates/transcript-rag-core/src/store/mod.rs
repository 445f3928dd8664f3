//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the storage seam of the retrieval pipeline.
//! Two instances are used at serving time, one per [`Tier`](crate::models::Tier).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{VectorMetadata, VectorRecord};

/// A single nearest-neighbour hit.
#[derive(Debug, Clone)]
pub struct IndexHit {
    /// Chunk id the vector was stored under.
    pub id: String,
    /// Cosine similarity to the query.
    pub score: f32,
    pub metadata: VectorMetadata,
}

/// Equality filters over [`VectorMetadata::field`] values.
///
/// All entries must match (AND). An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataFilter {
    pub equals: BTreeMap<String, String>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality constraint.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.equals.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.equals.is_empty()
    }

    pub fn matches(&self, meta: &VectorMetadata) -> bool {
        self.equals
            .iter()
            .all(|(k, v)| meta.field(k).as_deref() == Some(v.as_str()))
    }
}

/// Append-only nearest-neighbour index.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorIndex::upsert) | Append a batch of records |
/// | [`search`](VectorIndex::search) | Top-k by cosine similarity |
/// | [`len`](VectorIndex::len) | Number of stored vectors |
///
/// There is no delete or update-in-place. Correcting data means rebuilding.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Configured vector dimensionality.
    fn dims(&self) -> usize;

    /// Append records. Rejects the whole batch with
    /// [`RagError::DimensionMismatch`](crate::RagError::DimensionMismatch)
    /// if any vector has the wrong length.
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()>;

    /// Return up to `top_k` hits ordered by descending similarity, ties
    /// broken by insertion order.
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<IndexHit>>;

    /// Number of stored vectors.
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tier;

    fn meta(doc: &str, speaker: Option<&str>) -> VectorMetadata {
        VectorMetadata {
            chunk_id: "c".into(),
            text: "t".into(),
            document_id: Some(doc.into()),
            parent_id: Some("p".into()),
            start_seconds: 0.0,
            end_seconds: 1.0,
            speaker: speaker.map(String::from),
            tier: Tier::Core,
            title: None,
            guest: None,
            publish_date: None,
            topics: vec![],
        }
    }

    #[test]
    fn test_filter_empty_matches_all() {
        assert!(MetadataFilter::new().matches(&meta("ep1", None)));
    }

    #[test]
    fn test_filter_all_constraints_must_match() {
        let f = MetadataFilter::new()
            .with("document_id", "ep1")
            .with("tier", "core");
        assert!(f.matches(&meta("ep1", None)));
        assert!(!f.matches(&meta("ep2", None)));
    }

    #[test]
    fn test_filter_on_absent_field_never_matches() {
        let f = MetadataFilter::new().with("speaker", "Lenny");
        assert!(!f.matches(&meta("ep1", None)));
        assert!(f.matches(&meta("ep1", Some("Lenny"))));
    }
}
