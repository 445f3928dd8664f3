//! Confidence scoring.
//!
//! Retrieval output passes through a second, stricter score floor, then a
//! one-source-per-document diversity pass, and the surviving scores decide
//! whether an answer may speak with authority.
//!
//! Thresholds are calibrated to one embedding model's score distribution
//! and are therefore configuration, see [`ConfidenceThresholds`].

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::RetrievalResult;
use crate::pipeline::sort_by_score;

/// Discrete evidence strength. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::High => "high",
        }
    }

    /// Whether the evidence is strong enough to ground an answer.
    pub fn is_grounding(&self) -> bool {
        *self >= ConfidenceLevel::Medium
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceResult {
    pub level: ConfidenceLevel,
    /// Mean score of qualifying results, rounded to 3 decimals.
    pub avg_score: f32,
    pub num_sources: usize,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceThresholds {
    /// Precision floor applied before synthesis.
    pub min_score: f32,
    pub high_threshold: f32,
    pub medium_threshold: f32,
    pub high_min_sources: usize,
    pub max_sources: usize,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            min_score: 0.60,
            high_threshold: 0.65,
            medium_threshold: 0.52,
            high_min_sources: 2,
            max_sources: 5,
        }
    }
}

/// Pure, synchronous scorer.
#[derive(Debug, Clone, Default)]
pub struct ConfidenceScorer {
    pub thresholds: ConfidenceThresholds,
}

impl ConfidenceScorer {
    pub fn new(thresholds: ConfidenceThresholds) -> Self {
        Self { thresholds }
    }

    /// Drop everything under `min_score`.
    pub fn filter_by_score(&self, results: &[RetrievalResult]) -> Vec<RetrievalResult> {
        results
            .iter()
            .filter(|r| r.score >= self.thresholds.min_score)
            .cloned()
            .collect()
    }

    /// Greedy scan in input order: at most one result per document id,
    /// stopping at `max_sources`. Results without a document id are skipped.
    pub fn apply_diversity_constraint(&self, results: &[RetrievalResult]) -> Vec<RetrievalResult> {
        let max = self.thresholds.max_sources;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for r in results {
            if out.len() >= max {
                break;
            }
            if let Some(doc) = r.document_id.as_deref() {
                if seen.insert(doc) {
                    out.push(r.clone());
                }
            }
        }
        out
    }

    pub fn compute_confidence(&self, results: &[RetrievalResult]) -> ConfidenceResult {
        let t = &self.thresholds;
        if results.is_empty() {
            return ConfidenceResult {
                level: ConfidenceLevel::Low,
                avg_score: 0.0,
                num_sources: 0,
                explanation: "No relevant sources found".into(),
            };
        }

        let valid: Vec<f32> = results
            .iter()
            .map(|r| r.score)
            .filter(|s| *s >= t.min_score)
            .collect();
        if valid.is_empty() {
            return ConfidenceResult {
                level: ConfidenceLevel::Low,
                avg_score: 0.0,
                num_sources: 0,
                explanation: "No sources met relevance threshold".into(),
            };
        }

        let n = valid.len();
        let avg = valid.iter().sum::<f32>() / n as f32;
        let (level, explanation) = if avg >= t.high_threshold && n >= t.high_min_sources {
            (
                ConfidenceLevel::High,
                format!("Strong grounding: {} sources, avg score {:.2}", n, avg),
            )
        } else if avg >= t.medium_threshold {
            (
                ConfidenceLevel::Medium,
                format!("Moderate grounding: {} sources, avg score {:.2}", n, avg),
            )
        } else {
            (
                ConfidenceLevel::Low,
                "Weak grounding: scores below threshold".to_string(),
            )
        };

        ConfidenceResult {
            level,
            avg_score: (avg * 1000.0).round() / 1000.0,
            num_sources: n,
            explanation,
        }
    }

    /// Best `max_sources` sources by score, descending.
    pub fn limit_sources(&self, sources: &[RetrievalResult]) -> Vec<RetrievalResult> {
        let mut sorted = sources.to_vec();
        sort_by_score(&mut sorted);
        sorted.truncate(self.thresholds.max_sources);
        sorted
    }
}
