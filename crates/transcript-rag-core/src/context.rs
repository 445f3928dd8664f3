//! Synthesizer context blocks and citations.
//!
//! The synthesizer never sees raw retrieval output. It gets at most
//! `max_chunks` size-bounded [`ContextBlock`]s, each tagged with a weight
//! and a 1-based source index, plus the query's confidence level.

use serde::{Deserialize, Serialize};

use crate::confidence::ConfidenceLevel;
use crate::models::RetrievalResult;

/// Characters of child text shown in a citation preview.
pub const PREVIEW_CHARS: usize = 150;

/// Seconds of lead-in before a citation deep link's start time.
pub const DEEP_LINK_LEAD_SECS: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceWeight {
    High,
    Medium,
    Low,
}

impl SourceWeight {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceWeight::High => "HIGH",
            SourceWeight::Medium => "MEDIUM",
            SourceWeight::Low => "LOW",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPolicy {
    pub max_chunks: usize,
    pub max_chars_per_chunk: usize,
    /// A period past this fraction of the budget becomes the cut point.
    pub sentence_cut_ratio: f32,
    pub high_weight: f32,
    pub medium_weight: f32,
}

impl Default for ContextPolicy {
    fn default() -> Self {
        Self {
            max_chunks: 5,
            max_chars_per_chunk: 600,
            sentence_cut_ratio: 0.8,
            high_weight: 0.70,
            medium_weight: 0.55,
        }
    }
}

impl ContextPolicy {
    pub fn weight_for(&self, score: f32) -> SourceWeight {
        if score >= self.high_weight {
            SourceWeight::High
        } else if score >= self.medium_weight {
            SourceWeight::Medium
        } else {
            SourceWeight::Low
        }
    }
}

/// One excerpt handed to the synthesizer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextBlock {
    /// 1-based, stable within one query.
    pub source_index: usize,
    pub weight: SourceWeight,
    pub speaker: String,
    pub title: String,
    pub timestamp: String,
    pub text: String,
}

/// Everything the synthesizer may see for a grounded answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisContext {
    pub blocks: Vec<ContextBlock>,
    pub confidence: ConfidenceLevel,
}

impl SynthesisContext {
    /// Render the blocks as prompt text, blank-line separated.
    pub fn render(&self) -> String {
        self.blocks
            .iter()
            .map(|b| {
                format!(
                    "SOURCE [{}] - Confidence: {}\nSpeaker: {}\nEpisode: {}\nTimestamp: {}\nExcerpt:\n{}\n",
                    b.source_index,
                    b.weight.as_str(),
                    b.speaker,
                    b.title,
                    b.timestamp,
                    b.text
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Build at most `policy.max_chunks` blocks from already-ranked results.
pub fn build_context(
    results: &[RetrievalResult],
    confidence: ConfidenceLevel,
    policy: &ContextPolicy,
) -> SynthesisContext {
    let blocks = results
        .iter()
        .take(policy.max_chunks)
        .enumerate()
        .map(|(i, r)| ContextBlock {
            source_index: i + 1,
            weight: policy.weight_for(r.score),
            speaker: r.speaker_name().to_string(),
            title: display_title(r),
            timestamp: format_timestamp(r.start_seconds),
            text: truncate_at_sentence(
                r.context_text(),
                policy.max_chars_per_chunk,
                policy.sentence_cut_ratio,
            ),
        })
        .collect();
    SynthesisContext { blocks, confidence }
}

/// Cut `text` to `max_chars` characters, preferring the last period when it
/// falls past `ratio` of the budget, and append `"..."`.
///
/// Text within budget is returned unchanged.
pub fn truncate_at_sentence(text: &str, max_chars: usize, ratio: f32) -> String {
    let cut = match text.char_indices().nth(max_chars) {
        Some((byte, _)) => byte,
        None => return text.to_string(),
    };
    let mut truncated = &text[..cut];
    if let Some(dot) = truncated.rfind('.') {
        let dot_chars = truncated[..dot].chars().count();
        if dot_chars as f32 > max_chars as f32 * ratio {
            truncated = &truncated[..=dot];
        }
    }
    format!("{}...", truncated)
}

/// `M:SS` from a start offset in seconds.
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

/// Watch link starting a few seconds before the cited moment.
pub fn deep_link(document_id: &str, start_seconds: f64) -> String {
    let t = (start_seconds - DEEP_LINK_LEAD_SECS).max(0.0) as u64;
    format!("https://www.youtube.com/watch?v={}&t={}s", document_id, t)
}

pub fn thumbnail_url(document_id: &str) -> String {
    format!("https://img.youtube.com/vi/{}/mqdefault.jpg", document_id)
}

fn display_title(r: &RetrievalResult) -> String {
    match (&r.title, &r.document_id) {
        (Some(t), _) => t.clone(),
        (None, Some(d)) => format!("Episode {}", d),
        (None, None) => "Unknown episode".to_string(),
    }
}

/// A source shown to the user alongside an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub source_num: usize,
    pub speaker: String,
    pub title: String,
    pub timestamp: String,
    pub url: String,
    pub thumbnail_url: String,
    pub document_id: String,
    pub text_preview: String,
    pub score: f32,
}

/// Citations numbered to match the context blocks' source indexes.
pub fn build_citations(results: &[RetrievalResult]) -> Vec<Citation> {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let doc = r.document_id.clone().unwrap_or_default();
            Citation {
                source_num: i + 1,
                speaker: r.speaker_name().to_string(),
                title: display_title(r),
                timestamp: format_timestamp(r.start_seconds),
                url: deep_link(&doc, r.start_seconds),
                thumbnail_url: thumbnail_url(&doc),
                document_id: doc,
                text_preview: preview(&r.text),
                score: r.score,
            }
        })
        .collect()
}

fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((byte, _)) => format!("{}...", &text[..byte]),
        None => text.to_string(),
    }
}
