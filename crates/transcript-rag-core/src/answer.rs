//! Post-processing of synthesizer output.
//!
//! Models drift from the requested plain-text layout, so output is
//! normalized (markdown stripped, list markers unified to `•`) before it is
//! split into sections. Refusals are detected here too: a refused answer
//! must not carry citations.

use serde::{Deserialize, Serialize};

use crate::context::Citation;

/// Maximum key ideas kept from a parsed answer.
pub const MAX_KEY_IDEAS: usize = 5;

/// Maximum follow-up questions surfaced.
pub const MAX_FOLLOW_UPS: usize = 3;

const BULLET: char = '•';

pub const REFUSAL_PHRASES: &[&str] = &[
    "i cannot provide",
    "i can't help with",
    "i'm unable to assist",
    "cannot help with that",
    "i cannot assist",
    "i'm not able to",
    "i can't assist",
    "i cannot answer",
    "against my guidelines",
    "i'm sorry, but i can't",
    "i apologize, but i cannot",
    "not able to provide",
    "i can't provide",
    "unable to help",
];

const GENERIC_QUESTION_MARKERS: &[&str] = &[
    "what stage",
    "tell me more",
    "can you clarify",
    "what is your",
    "what are your",
    "what do you think",
    "how does that sound",
    "does that make sense",
    "any other questions",
    "what else",
    "anything else",
    "what challenges",
    "what problems",
    "what situation",
    "your product",
    "your company",
    "your team",
    "your experience",
];

/// Structured answer sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerSections {
    pub direct_answer: String,
    pub key_ideas: Vec<String>,
    pub common_pitfall: String,
    pub summary: String,
}

/// Whether `answer` reads as a model refusal.
pub fn is_refusal(answer: &str) -> bool {
    let lower = answer.to_lowercase();
    REFUSAL_PHRASES.iter().any(|p| lower.contains(p))
}

/// Strip markdown leaks and unify list markers.
///
/// - up to three leading `#` are removed
/// - `**` is removed everywhere
/// - `- `, `* ` and `N. ` at line start become `• `
/// - runs of three or more newlines collapse to two
pub fn normalize_output(text: &str) -> String {
    let without_bold = text.replace("**", "");
    let lines: Vec<String> = without_bold.split('\n').map(normalize_line).collect();
    let mut out = String::with_capacity(without_bold.len());
    let mut newlines = 0usize;
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            newlines += 1;
        }
        if line.is_empty() && i + 1 < lines.len() {
            continue;
        }
        for _ in 0..newlines.min(2) {
            out.push('\n');
        }
        newlines = 0;
        out.push_str(line);
    }
    out.trim().to_string()
}

fn normalize_line(line: &str) -> String {
    let mut l = line;
    let hashes = l.chars().take_while(|c| *c == '#').count().min(3);
    if hashes > 0 {
        l = l[hashes..].trim_start();
    }
    if let Some(rest) = strip_marker(l) {
        return format!("{} {}", BULLET, rest);
    }
    l.to_string()
}

/// Return the text after a `-`, `*` or `N.` list marker followed by
/// whitespace, if present.
fn strip_marker(line: &str) -> Option<&str> {
    let after = if let Some(rest) = line.strip_prefix('-').or_else(|| line.strip_prefix('*')) {
        rest
    } else {
        let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return None;
        }
        line[digits..].strip_prefix('.')?
    };
    let trimmed = after.trim_start();
    if trimmed.len() == after.len() {
        return None;
    }
    Some(trimmed)
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Direct,
    Ideas,
    Pitfall,
    Summary,
}

fn section_header(lower: &str) -> Option<Section> {
    let named = |name: &str| lower == name || lower.starts_with(&format!("{}:", name));
    if named("direct answer") {
        Some(Section::Direct)
    } else if named("key ideas") {
        Some(Section::Ideas)
    } else if named("common pitfall") {
        Some(Section::Pitfall)
    } else if named("summary") {
        Some(Section::Summary)
    } else if lower.contains("1.") && lower.contains("direct") {
        Some(Section::Direct)
    } else if lower.contains("2.") && lower.contains("key") {
        Some(Section::Ideas)
    } else if lower.contains("3.") && lower.contains("pitfall") {
        Some(Section::Pitfall)
    } else if lower.contains("4.") && lower.contains("summary") {
        Some(Section::Summary)
    } else {
        None
    }
}

/// Normalize and split a raw answer into sections.
///
/// Without recognizable structure the whole normalized text becomes the
/// direct answer.
pub fn parse_answer_sections(raw: &str) -> AnswerSections {
    let text = normalize_output(raw);
    let mut direct = Vec::new();
    let mut ideas = Vec::new();
    let mut pitfall = Vec::new();
    let mut summary = Vec::new();
    let mut current: Option<Section> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(s) = section_header(&line.to_lowercase()) {
            current = Some(s);
            continue;
        }
        let bulleted = line.starts_with(BULLET);
        match current {
            Some(Section::Direct) if !bulleted => direct.push(line),
            Some(Section::Pitfall) if !bulleted => pitfall.push(line),
            Some(Section::Summary) if !bulleted => summary.push(line),
            Some(Section::Ideas) => {
                let starts_numbered = line.chars().next().is_some_and(|c| c.is_ascii_digit())
                    && line.chars().take(3).any(|c| c == '.');
                let idea = if bulleted {
                    line.trim_start_matches(|c: char| c == BULLET || c == ' ').trim()
                } else if line.starts_with('-') || line.starts_with('*') || starts_numbered {
                    line.trim_start_matches(|c: char| "-•* 0123456789.".contains(c))
                        .trim()
                } else {
                    ""
                };
                if !idea.is_empty() {
                    ideas.push(idea.to_string());
                }
            }
            _ => {}
        }
    }

    let mut sections = AnswerSections {
        direct_answer: direct.join(" "),
        key_ideas: ideas.into_iter().take(MAX_KEY_IDEAS).collect(),
        common_pitfall: pitfall.join(" "),
        summary: summary.join(" "),
    };
    if sections.direct_answer.is_empty() && sections.key_ideas.is_empty() {
        sections.direct_answer = text;
    }
    sections
}

/// Extract follow-up questions from a synthesizer response.
///
/// A JSON array of strings anywhere in the response is preferred. Failing
/// that, lines longer than 15 characters that end in `?` are used.
pub fn parse_follow_ups(response: &str) -> Vec<String> {
    if let Some(start) = response.find('[') {
        if let Some(len) = response[start..].find(']') {
            let slice = &response[start..=start + len];
            if let Ok(items) = serde_json::from_str::<Vec<serde_json::Value>>(slice) {
                return items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
            }
        }
    }

    response
        .lines()
        .map(str::trim)
        .filter(|l| l.contains('?'))
        .map(|l| {
            l.trim_start_matches(|c: char| c.is_ascii_digit() || ".-*\"'[]".contains(c))
                .trim()
                .trim_matches(|c: char| "\"'[]".contains(c))
                .to_string()
        })
        .filter(|q| q.chars().count() > 15 && q.ends_with('?'))
        .take(MAX_FOLLOW_UPS)
        .collect()
}

/// Drop low-effort questions that push the conversation back at the user.
pub fn filter_generic_questions(questions: Vec<String>) -> Vec<String> {
    questions
        .into_iter()
        .filter(|q| {
            let lower = q.to_lowercase();
            !GENERIC_QUESTION_MARKERS.iter().any(|m| lower.contains(m))
        })
        .collect()
}

/// Parse, filter and bound follow-ups. Fewer than two survivors yields
/// none at all.
pub fn select_follow_ups(response: &str) -> Vec<String> {
    let filtered = filter_generic_questions(parse_follow_ups(response));
    if filtered.len() < 2 {
        return Vec::new();
    }
    filtered.into_iter().take(MAX_FOLLOW_UPS).collect()
}

/// Themes handed to follow-up generation: speaker perspectives, episode
/// titles and the opening phrase of each preview, case-insensitively
/// deduplicated, at most five.
pub fn source_topics(citations: &[Citation]) -> Vec<String> {
    let mut topics = Vec::new();
    let mut speakers = std::collections::HashSet::new();
    for c in citations.iter().take(5) {
        if c.speaker != crate::models::UNKNOWN_SPEAKER && speakers.insert(c.speaker.clone()) {
            topics.push(format!("{}'s perspective", c.speaker));
        }
        let title = c.title.strip_prefix("Episode with ").unwrap_or(&c.title).trim();
        if !title.is_empty() {
            topics.push(title.to_string());
        }
        if c.text_preview.chars().count() > 30 {
            let first = c.text_preview.split('.').next().unwrap_or_default().trim();
            let len = first.chars().count();
            if len > 20 && len < 100 {
                topics.push(first.to_string());
            }
        }
    }
    let mut seen = std::collections::HashSet::new();
    topics
        .into_iter()
        .filter(|t| seen.insert(t.to_lowercase()))
        .take(5)
        .collect()
}
