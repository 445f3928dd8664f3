//! Mode routing.
//!
//! A query is answered from the transcripts only when retrieval is strong
//! *and* the query looks like it belongs to the corpus domain. Safety mode
//! is decided upstream by a [`SafetyCheck`](crate::safety::SafetyCheck) and
//! never reaches [`decide_mode`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::confidence::ConfidenceLevel;

/// How a query is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerMode {
    /// Grounded in retrieved transcript excerpts, with citations.
    Rag,
    /// General conversation, no citations.
    Conversation,
    /// Refused by the safety check.
    Safety,
}

impl AnswerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerMode::Rag => "rag",
            AnswerMode::Conversation => "conversation",
            AnswerMode::Safety => "safety",
        }
    }
}

impl fmt::Display for AnswerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Product-management vocabulary used for domain-intent detection.
pub const DEFAULT_DOMAIN_KEYWORDS: &[&str] = &[
    "product",
    "pm",
    "features",
    "prioritize",
    "roadmap",
    "users",
    "growth",
    "metrics",
    "revenue",
    "pricing",
    "retention",
    "activation",
    "strategy",
    "okr",
    "kpi",
    "sprint",
    "agile",
    "backlog",
    "stakeholder",
    "mvp",
    "user research",
    "customer",
    "feedback",
    "iteration",
    "launch",
    "release",
    "a/b test",
    "experiment",
    "hypothesis",
    "market",
    "competitor",
    "positioning",
    "segmentation",
    "onboarding",
    "churn",
    "engagement",
    "conversion",
    "funnel",
    "journey",
    "persona",
    "jobs to be done",
    "discovery",
    "delivery",
    "outcome",
    "output",
    "impact",
    "prioritization",
    "framework",
    "rice",
    "ice",
    "moscow",
    "north star",
    "leading indicator",
    "lagging indicator",
];

/// Keyword set for the domain-intent test. Stored lowercased.
#[derive(Debug, Clone)]
pub struct DomainVocabulary {
    keywords: Vec<String>,
}

impl Default for DomainVocabulary {
    fn default() -> Self {
        Self::new(DEFAULT_DOMAIN_KEYWORDS.iter().copied())
    }
}

impl DomainVocabulary {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// Case-insensitive substring match against any keyword.
    pub fn has_domain_intent(&self, query: &str) -> bool {
        let q = query.to_lowercase();
        self.keywords.iter().any(|k| q.contains(k.as_str()))
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }
}

/// Two-factor gate: `Rag` iff confidence is medium or high and the query
/// has domain intent. Otherwise `Conversation`.
pub fn decide_mode(confidence: ConfidenceLevel, has_domain_intent: bool) -> AnswerMode {
    if confidence.is_grounding() && has_domain_intent {
        AnswerMode::Rag
    } else {
        AnswerMode::Conversation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_mode_truth_table() {
        let levels = [
            ConfidenceLevel::Low,
            ConfidenceLevel::Medium,
            ConfidenceLevel::High,
        ];
        for level in levels {
            for intent in [true, false] {
                let expected_rag = level != ConfidenceLevel::Low && intent;
                let mode = decide_mode(level, intent);
                assert_eq!(mode == AnswerMode::Rag, expected_rag, "{:?} {}", level, intent);
                assert_ne!(mode, AnswerMode::Safety);
            }
        }
    }

    #[test]
    fn test_domain_intent() {
        let vocab = DomainVocabulary::default();
        assert!(vocab.has_domain_intent("How do I prioritize features?"));
        assert!(vocab.has_domain_intent("Tell me about NORTH STAR metrics"));
        assert!(!vocab.has_domain_intent("What's your favorite color?"));
        assert!(!vocab.has_domain_intent(""));
    }

    #[test]
    fn test_custom_vocabulary_normalized() {
        let vocab = DomainVocabulary::new(["  Latency ", "", "SLO"]);
        assert_eq!(vocab.len(), 2);
        assert!(vocab.has_domain_intent("what is our slo?"));
        assert!(!vocab.has_domain_intent("roadmap"));
    }

    #[test]
    fn test_mode_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&AnswerMode::Rag).unwrap(), "\"rag\"");
        assert_eq!(AnswerMode::Conversation.to_string(), "conversation");
    }
}
