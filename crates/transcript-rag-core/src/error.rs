//! Error taxonomy for retrieval and index operations.
//!
//! Integrity failures indicate a corrupted build and abort the operation.
//! Not-found and upstream failures degrade gracefully where a fallback
//! exists. Validation failures reject input before it reaches the pipeline.

/// Errors raised by the core pipeline.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    /// The corpus or an index is internally inconsistent (child references a
    /// missing parent, duplicate parent id, index/metadata misalignment).
    #[error("integrity error: {0}")]
    Integrity(String),

    /// A vector's length does not match the index dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Dimension the index was configured with.
        expected: usize,
        /// Dimension of the offending vector.
        got: usize,
    },

    /// A lookup missed (parent chunk, session).
    #[error("not found: {0}")]
    NotFound(String),

    /// The embedder or synthesizer failed.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// The embedder or synthesizer exceeded its time budget.
    #[error("upstream timed out after {0}ms")]
    Timeout(u64),

    /// Malformed input such as an empty query.
    #[error("invalid input: {0}")]
    Validation(String),
}

impl RagError {
    /// Whether this error signals a corrupted build.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity(_) | Self::DimensionMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_errors_are_fatal() {
        let e = RagError::Integrity("child c1 references missing parent p9".into());
        assert!(e.is_integrity());

        let e = RagError::DimensionMismatch {
            expected: 384,
            got: 768,
        };
        assert!(e.is_integrity());
        assert_eq!(
            e.to_string(),
            "embedding dimension mismatch: expected 384, got 768"
        );
    }

    #[test]
    fn test_non_integrity_errors() {
        assert!(!RagError::Upstream("503".into()).is_integrity());
        assert!(!RagError::NotFound("p1".into()).is_integrity());
        assert_eq!(
            RagError::Timeout(30_000).to_string(),
            "upstream timed out after 30000ms"
        );
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = RagError::Integrity("bad".into()).into();
        let rag = err.downcast_ref::<RagError>().unwrap();
        assert!(rag.is_integrity());
    }
}
