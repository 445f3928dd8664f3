//! Core data models for the transcript corpus and per-query results.
//!
//! The corpus is a set of [`Episode`]s, each split into large
//! [`ParentChunk`] windows which are in turn split into small child
//! [`Chunk`]s. Only child chunks are embedded. Parents exist for context
//! expansion at answer time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fallback label when neither a speaker nor a guest is known.
pub const UNKNOWN_SPEAKER: &str = "Unknown";

/// Which index a child chunk lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Substantive advice, frameworks, opinions.
    Core,
    /// Personal anecdotes and stories.
    Longtail,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Core => "core",
            Tier::Longtail => "longtail",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = crate::RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "core" => Ok(Tier::Core),
            "longtail" => Ok(Tier::Longtail),
            other => Err(crate::RagError::Validation(format!(
                "unknown tier '{}', expected core or longtail",
                other
            ))),
        }
    }
}

/// An episode (document). Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub guest: Option<String>,
    #[serde(default)]
    pub publish_date: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
}

/// A 5–7 minute transcript window, the unit of context expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentChunk {
    pub id: String,
    pub document_id: String,
    pub text: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
}

/// A ~30 second transcript window, the unit of embedding and retrieval.
///
/// Every child has exactly one parent in the same document, and its text is
/// drawn from that parent's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub parent_id: String,
    pub text: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
    #[serde(default)]
    pub speaker: Option<String>,
}

/// Display metadata denormalized onto every stored vector.
///
/// Persisted in the sidecar metadata file, positionally aligned with the
/// vectors in the index file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub chunk_id: String,
    pub text: String,
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub start_seconds: f64,
    pub end_seconds: f64,
    #[serde(default)]
    pub speaker: Option<String>,
    pub tier: Tier,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub guest: Option<String>,
    #[serde(default)]
    pub publish_date: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
}

impl VectorMetadata {
    /// Build the stored metadata for a child chunk of `episode`.
    pub fn for_chunk(chunk: &Chunk, episode: &Episode, tier: Tier) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            text: chunk.text.clone(),
            document_id: non_empty(&chunk.document_id),
            parent_id: non_empty(&chunk.parent_id),
            start_seconds: chunk.start_seconds,
            end_seconds: chunk.end_seconds,
            speaker: chunk.speaker.as_deref().and_then(non_empty),
            tier,
            title: episode.title.clone(),
            guest: episode.guest.clone(),
            publish_date: episode.publish_date.clone(),
            topics: episode.topics.clone(),
        }
    }

    /// Look up a filterable field by name.
    ///
    /// Unknown keys return `None`, so a filter on them never matches.
    pub fn field(&self, key: &str) -> Option<String> {
        match key {
            "chunk_id" | "id" => Some(self.chunk_id.clone()),
            "document_id" => self.document_id.clone(),
            "parent_id" => self.parent_id.clone(),
            "speaker" => self.speaker.clone(),
            "tier" => Some(self.tier.to_string()),
            "title" => self.title.clone(),
            "guest" => self.guest.clone(),
            "publish_date" => self.publish_date.clone(),
            _ => None,
        }
    }
}

/// A record handed to [`VectorIndex::upsert`](crate::store::VectorIndex::upsert).
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: VectorMetadata,
}

/// One retrieved child chunk, normalized at the index boundary.
///
/// Lives for the duration of a single query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub text: String,
    pub score: f32,
    pub document_id: Option<String>,
    pub parent_id: Option<String>,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub speaker: Option<String>,
    pub tier: Tier,
    /// Full parent text once expanded.
    pub parent_text: Option<String>,
    pub title: Option<String>,
    pub guest: Option<String>,
}

impl RetrievalResult {
    /// Convert an index hit, tagging it with the tier it was searched in.
    pub fn from_hit(hit: &crate::store::IndexHit, tier: Tier) -> Self {
        let m = &hit.metadata;
        Self {
            chunk_id: hit.id.clone(),
            text: m.text.clone(),
            score: hit.score,
            document_id: m.document_id.as_deref().and_then(non_empty),
            parent_id: m.parent_id.as_deref().and_then(non_empty),
            start_seconds: m.start_seconds,
            end_seconds: m.end_seconds,
            speaker: m.speaker.as_deref().and_then(non_empty),
            tier,
            parent_text: None,
            title: m.title.as_deref().and_then(non_empty),
            guest: m.guest.as_deref().and_then(non_empty),
        }
    }

    /// The `(document_id, parent_id)` grouping key, if both are present.
    pub fn idea_key(&self) -> Option<(&str, &str)> {
        match (self.document_id.as_deref(), self.parent_id.as_deref()) {
            (Some(d), Some(p)) => Some((d, p)),
            _ => None,
        }
    }

    /// Speaker name for citations. See [`resolve_speaker`].
    pub fn speaker_name(&self) -> &str {
        resolve_speaker(self.speaker.as_deref(), self.guest.as_deref())
    }

    /// Text handed to the synthesizer: the expanded parent when available.
    pub fn context_text(&self) -> &str {
        self.parent_text.as_deref().unwrap_or(&self.text)
    }
}

/// Resolve the display speaker for a citation.
///
/// Precedence: the chunk's own speaker label, then the episode guest, then
/// [`UNKNOWN_SPEAKER`]. Blank strings count as absent.
pub fn resolve_speaker<'a>(speaker: Option<&'a str>, guest: Option<&'a str>) -> &'a str {
    speaker
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| guest.map(str::trim).filter(|g| !g.is_empty()))
        .unwrap_or(UNKNOWN_SPEAKER)
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}
