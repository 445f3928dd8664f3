//! Chunk classification and index tiering.
//!
//! [`ChunkClassifier`] is a lightweight rule-based labeller run over child
//! chunks before embedding. A [`TierPolicy`] then decides which index, if
//! any, each chunk goes to. Two policies exist and one is selected from
//! configuration:
//!
//! - [`SingleTierPolicy`]: every embeddable chunk goes to core.
//! - [`ClassifierTierPolicy`]: content to core, anecdotes to longtail.

use serde::{Deserialize, Serialize};

use crate::models::Tier;

/// Classifier label for a child chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    /// Advice, frameworks, opinions.
    Content,
    /// Personal stories.
    Anecdote,
    /// Intro/outro boilerplate.
    Meta,
    /// Ads and promos.
    Sponsor,
    /// Short filler without signal words.
    Banter,
}

impl ChunkKind {
    pub fn is_embeddable(&self) -> bool {
        matches!(self, ChunkKind::Content | ChunkKind::Anecdote)
    }
}

const SPONSOR_PHRASES: &[&str] = &[
    "sponsor",
    "sponsored",
    "brought to you by",
    "use code",
    "sign up at",
    "visit",
    "dot com",
    "free trial",
    "limited time",
];

const META_PHRASES: &[&str] = &[
    "welcome to the podcast",
    "thanks for listening",
    "subscribe on",
    "leave a review",
    "see you next episode",
];

const ANECDOTE_INDICATORS: &[&str] = &[
    "i remember",
    "when i",
    "one time",
    "years ago",
    "back when",
    "story",
    "told me",
    "happened",
    "experience",
    "once",
];

const SIGNAL_WORDS: &[&str] = &[
    "prioritize",
    "decide",
    "approach",
    "framework",
    "tradeoff",
    "strategy",
    "method",
    "process",
    "technique",
    "principle",
    "how to",
    "what is",
    "why",
    "because",
    "should",
    "recommend",
];

/// Rule-based child chunk classifier.
#[derive(Debug, Clone)]
pub struct ChunkClassifier {
    /// Chunks shorter than this with no signal word are banter.
    pub min_content_words: usize,
    /// Indicator hits needed to call a chunk an anecdote.
    pub anecdote_threshold: usize,
}

impl Default for ChunkClassifier {
    fn default() -> Self {
        Self {
            min_content_words: 25,
            anecdote_threshold: 2,
        }
    }
}

impl ChunkClassifier {
    pub fn classify(&self, text: &str) -> ChunkKind {
        let t = text.to_lowercase();
        let t = t.trim();

        if SPONSOR_PHRASES.iter().any(|k| t.contains(k)) {
            return ChunkKind::Sponsor;
        }
        if META_PHRASES.iter().any(|k| t.contains(k)) {
            return ChunkKind::Meta;
        }
        let words = text.split_whitespace().count();
        if words < self.min_content_words && !SIGNAL_WORDS.iter().any(|s| t.contains(s)) {
            return ChunkKind::Banter;
        }
        let anecdote_hits = ANECDOTE_INDICATORS
            .iter()
            .filter(|i| t.contains(*i))
            .count();
        if anecdote_hits >= self.anecdote_threshold {
            return ChunkKind::Anecdote;
        }
        ChunkKind::Content
    }
}

/// Per-kind counts from an index build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassificationStats {
    pub total: usize,
    pub content: usize,
    pub anecdote: usize,
    pub meta: usize,
    pub sponsor: usize,
    pub banter: usize,
    pub embeddable: usize,
}

impl ClassificationStats {
    pub fn record(&mut self, kind: ChunkKind) {
        self.total += 1;
        match kind {
            ChunkKind::Content => self.content += 1,
            ChunkKind::Anecdote => self.anecdote += 1,
            ChunkKind::Meta => self.meta += 1,
            ChunkKind::Sponsor => self.sponsor += 1,
            ChunkKind::Banter => self.banter += 1,
        }
        if kind.is_embeddable() {
            self.embeddable += 1;
        }
    }
}

/// Strategy deciding which index a classified chunk is stored in.
pub trait TierPolicy: Send + Sync {
    /// Short name for logs and stats.
    fn name(&self) -> &'static str;
    /// `None` means the chunk is not embedded at all.
    fn tier_for(&self, kind: ChunkKind) -> Option<Tier>;
}

/// Everything embeddable lands in the core index.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleTierPolicy;

impl TierPolicy for SingleTierPolicy {
    fn name(&self) -> &'static str {
        "single"
    }

    fn tier_for(&self, kind: ChunkKind) -> Option<Tier> {
        kind.is_embeddable().then_some(Tier::Core)
    }
}

/// Content to core, anecdotes to longtail.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassifierTierPolicy;

impl TierPolicy for ClassifierTierPolicy {
    fn name(&self) -> &'static str {
        "classifier"
    }

    fn tier_for(&self, kind: ChunkKind) -> Option<Tier> {
        match kind {
            ChunkKind::Content => Some(Tier::Core),
            ChunkKind::Anecdote => Some(Tier::Longtail),
            _ => None,
        }
    }
}

/// Build a policy from its configuration name.
pub fn policy_from_name(name: &str) -> Option<Box<dyn TierPolicy>> {
    match name {
        "single" => Some(Box::new(SingleTierPolicy)),
        "classifier" => Some(Box::new(ClassifierTierPolicy)),
        _ => None,
    }
}
