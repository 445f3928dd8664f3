//! In-memory flat [`VectorIndex`] implementation.
//!
//! Stores L2-normalized vectors in a `Vec` behind `std::sync::RwLock`.
//! Search is brute-force inner product over all stored vectors, which for
//! normalized vectors is exact cosine similarity.
//!
//! Upserts validate and normalize the whole batch before taking the write
//! lock, so a concurrent search sees either none or all of a batch.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::{dot, l2_normalize};
use crate::models::{VectorMetadata, VectorRecord};
use crate::RagError;

use super::{IndexHit, MetadataFilter, VectorIndex};

#[derive(Debug)]
struct StoredVector {
    id: String,
    vector: Vec<f32>,
    metadata: VectorMetadata,
}

/// Exact inner-product index held entirely in memory.
#[derive(Debug)]
pub struct FlatIndex {
    dims: usize,
    entries: RwLock<Vec<StoredVector>>,
}

impl FlatIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Rebuild an index from persisted, positionally aligned parts.
    ///
    /// Fails with [`RagError::Integrity`] when the two sequences differ in
    /// length and with [`RagError::DimensionMismatch`] on a wrong-sized
    /// vector.
    pub fn from_parts(
        dims: usize,
        vectors: Vec<Vec<f32>>,
        metadata: Vec<VectorMetadata>,
    ) -> Result<Self, RagError> {
        if vectors.len() != metadata.len() {
            return Err(RagError::Integrity(format!(
                "index has {} vectors but metadata has {} records",
                vectors.len(),
                metadata.len()
            )));
        }
        let mut entries = Vec::with_capacity(vectors.len());
        for (mut vector, metadata) in vectors.into_iter().zip(metadata) {
            if vector.len() != dims {
                return Err(RagError::DimensionMismatch {
                    expected: dims,
                    got: vector.len(),
                });
            }
            l2_normalize(&mut vector);
            entries.push(StoredVector {
                id: metadata.chunk_id.clone(),
                vector,
                metadata,
            });
        }
        Ok(Self {
            dims,
            entries: RwLock::new(entries),
        })
    }

    /// Copy out vectors and metadata in insertion order for persistence.
    pub fn snapshot(&self) -> (Vec<Vec<f32>>, Vec<VectorMetadata>) {
        let entries = self.read();
        entries
            .iter()
            .map(|e| (e.vector.clone(), e.metadata.clone()))
            .unzip()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<StoredVector>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<StoredVector>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl VectorIndex for FlatIndex {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        let mut batch = Vec::with_capacity(records.len());
        for rec in records {
            if rec.vector.len() != self.dims {
                return Err(RagError::DimensionMismatch {
                    expected: self.dims,
                    got: rec.vector.len(),
                }
                .into());
            }
            let mut vector = rec.vector;
            l2_normalize(&mut vector);
            batch.push(StoredVector {
                id: rec.id,
                vector,
                metadata: rec.metadata,
            });
        }
        self.write().extend(batch);
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<IndexHit>> {
        if query.len() != self.dims {
            return Err(RagError::DimensionMismatch {
                expected: self.dims,
                got: query.len(),
            }
            .into());
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let mut q = query.to_vec();
        l2_normalize(&mut q);

        let entries = self.read();
        let mut scored: Vec<(usize, f32)> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| filter.map_or(true, |f| f.matches(&e.metadata)))
            .map(|(i, e)| (i, dot(&q, &e.vector)))
            .collect();
        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| IndexHit {
                id: entries[i].id.clone(),
                score,
                metadata: entries[i].metadata.clone(),
            })
            .collect())
    }

    async fn len(&self) -> usize {
        self.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;
    use crate::models::Tier;

    fn record(id: &str, doc: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            vector,
            metadata: VectorMetadata {
                chunk_id: id.to_string(),
                text: format!("text of {}", id),
                document_id: Some(doc.to_string()),
                parent_id: Some(format!("{}-p0", doc)),
                start_seconds: 0.0,
                end_seconds: 30.0,
                speaker: None,
                tier: Tier::Core,
                title: None,
                guest: None,
                publish_date: None,
                topics: vec![],
            },
        }
    }

    #[tokio::test]
    async fn test_search_score_equals_cosine() {
        let idx = FlatIndex::new(3);
        let raw = vec![
            vec![1.0, 2.0, 3.0],
            vec![-1.0, 0.5, 2.0],
            vec![4.0, -3.0, 0.0],
        ];
        let records = raw
            .iter()
            .enumerate()
            .map(|(i, v)| record(&format!("c{}", i), "ep1", v.clone()))
            .collect();
        idx.upsert(records).await.unwrap();

        let query = vec![0.3, -1.2, 2.2];
        let hits = idx.search(&query, 10, None).await.unwrap();
        assert_eq!(hits.len(), 3);
        for hit in &hits {
            let i: usize = hit.id[1..].parse().unwrap();
            let expected = cosine_similarity(&query, &raw[i]);
            assert!((hit.score - expected).abs() < 1e-5);
        }
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_ties_broken_by_insertion_order() {
        let idx = FlatIndex::new(2);
        idx.upsert(vec![
            record("first", "ep1", vec![1.0, 0.0]),
            record("second", "ep1", vec![2.0, 0.0]),
            record("third", "ep1", vec![0.0, 1.0]),
        ])
        .await
        .unwrap();
        let hits = idx.search(&[1.0, 0.0], 2, None).await.unwrap();
        assert_eq!(hits[0].id, "first");
        assert_eq!(hits[1].id, "second");
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejects_whole_batch() {
        let idx = FlatIndex::new(3);
        let err = idx
            .upsert(vec![
                record("ok", "ep1", vec![1.0, 0.0, 0.0]),
                record("bad", "ep1", vec![1.0, 0.0]),
            ])
            .await
            .unwrap_err();
        let rag = err.downcast_ref::<RagError>().unwrap();
        assert!(matches!(
            rag,
            RagError::DimensionMismatch {
                expected: 3,
                got: 2
            }
        ));
        assert_eq!(idx.len().await, 0);
    }

    #[tokio::test]
    async fn test_search_with_filter_and_top_k() {
        let idx = FlatIndex::new(2);
        idx.upsert(vec![
            record("a", "ep1", vec![1.0, 0.0]),
            record("b", "ep2", vec![0.9, 0.1]),
            record("c", "ep2", vec![0.8, 0.2]),
        ])
        .await
        .unwrap();
        let f = MetadataFilter::new().with("document_id", "ep2");
        let hits = idx.search(&[1.0, 0.0], 1, Some(&f)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
        assert!(idx.search(&[1.0, 0.0], 0, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_from_parts_preserves_alignment() {
        let idx = FlatIndex::new(2);
        idx.upsert(vec![
            record("a", "ep1", vec![3.0, 4.0]),
            record("b", "ep2", vec![0.0, 2.0]),
        ])
        .await
        .unwrap();
        let (vectors, metadata) = idx.snapshot();
        assert_eq!(metadata[0].chunk_id, "a");
        assert!((vectors[0][0] - 0.6).abs() < 1e-6);

        let restored = FlatIndex::from_parts(2, vectors, metadata).unwrap();
        let hits = restored.search(&[0.0, 1.0], 1, None).await.unwrap();
        assert_eq!(hits[0].id, "b");
    }

    #[test]
    fn test_from_parts_misaligned_is_integrity_error() {
        let err = FlatIndex::from_parts(2, vec![vec![1.0, 0.0]], vec![]).err().unwrap();
        assert!(err.is_integrity());
    }
}
