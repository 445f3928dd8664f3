//! Content-safety check run before any retrieval.
//!
//! A non-`None` [`SafetyCheck::check`] result is terminal for the query:
//! no retrieval, no memory write, no follow-up generation.

use serde::Serialize;

/// Why a query was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyKind {
    SelfHarm,
    Harmful,
}

/// Terminal response for a refused query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyResponse {
    pub kind: SafetyKind,
    pub message: String,
}

/// Collaborator that screens raw query text.
pub trait SafetyCheck: Send + Sync {
    fn check(&self, query: &str) -> Option<SafetyResponse>;
}

pub const DEFAULT_SELF_HARM_TERMS: &[&str] = &[
    "kill myself",
    "suicide",
    "end my life",
    "want to die",
    "don't want to live",
    "better off dead",
    "hurt myself",
    "self harm",
    "suicidal",
];

pub const DEFAULT_HARMFUL_TERMS: &[&str] = &[
    "how to hack",
    "how to steal",
    "illegal",
    "exploit vulnerability",
    "bypass security",
    "credit card fraud",
];

pub const CRISIS_MESSAGE: &str = "I can't help with that, but you don't have to handle \
things alone. If this is serious, please reach out to someone you trust or a professional \
resource in your area.\n\n\
Crisis Resources:\n\
• National Suicide Prevention Lifeline: 988 (US)\n\
• Crisis Text Line: Text HOME to 741741\n\
• International Association for Suicide Prevention: https://www.iasp.info/resources/Crisis_Centres/";

pub const REDIRECT_MESSAGE: &str = "I'm designed to help with product management questions. \
I can't assist with that request, but I'd be happy to help with topics like prioritization, \
growth strategy, user research, or product leadership.";

/// Case-insensitive phrase matcher. Self-harm terms are checked first.
#[derive(Debug, Clone)]
pub struct KeywordSafetyGuard {
    self_harm: Vec<String>,
    harmful: Vec<String>,
}

impl Default for KeywordSafetyGuard {
    fn default() -> Self {
        Self::new(
            DEFAULT_SELF_HARM_TERMS.iter().copied(),
            DEFAULT_HARMFUL_TERMS.iter().copied(),
        )
    }
}

impl KeywordSafetyGuard {
    pub fn new<A, B, S, T>(self_harm: A, harmful: B) -> Self
    where
        A: IntoIterator<Item = S>,
        B: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Self {
            self_harm: self_harm
                .into_iter()
                .map(|s| s.as_ref().to_lowercase())
                .collect(),
            harmful: harmful
                .into_iter()
                .map(|s| s.as_ref().to_lowercase())
                .collect(),
        }
    }
}

impl SafetyCheck for KeywordSafetyGuard {
    fn check(&self, query: &str) -> Option<SafetyResponse> {
        let q = query.to_lowercase();
        if self.self_harm.iter().any(|t| q.contains(t.as_str())) {
            return Some(SafetyResponse {
                kind: SafetyKind::SelfHarm,
                message: CRISIS_MESSAGE.to_string(),
            });
        }
        if self.harmful.iter().any(|t| q.contains(t.as_str())) {
            return Some(SafetyResponse {
                kind: SafetyKind::Harmful,
                message: REDIRECT_MESSAGE.to_string(),
            });
        }
        None
    }
}
