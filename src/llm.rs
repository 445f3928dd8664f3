//! LLM-backed [`Synthesizer`].
//!
//! Prompts are built by pure functions so they can be tested without a
//! model. Transport is a single chat call per operation against either an
//! OpenAI-compatible `/v1/chat/completions` endpoint or Ollama's
//! `/api/chat`. Failures are returned as [`RagError::Upstream`] or
//! [`RagError::Timeout`]; the engine decides how to degrade.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use transcript_rag_core::confidence::ConfidenceLevel;
use transcript_rag_core::context::SynthesisContext;
use transcript_rag_core::engine::{SynthesisDepth, Synthesizer};
use transcript_rag_core::memory::StructuredContext;
use transcript_rag_core::RagError;

use crate::config::LlmConfig;

/// Answers longer than this are truncated before being shown to the
/// follow-up generator.
const FOLLOW_UP_ANSWER_CHARS: usize = 400;
/// Rolling summaries are capped at this many characters.
const SUMMARY_MAX_CHARS: usize = 400;

const SECTION_SEPARATOR: &str = "\n\n---\n\n";

pub const ANSWER_SYSTEM_PROMPT: &str = "You are a senior product management advisor answering \
questions from podcast transcript excerpts.

Rules:
1. Answer ONLY from the verified sources. Never invent quotes, people or numbers.
2. Cite every claim with [SOURCE X], matching the numbered excerpts.
3. If the sources do not cover the question, say so briefly.
4. Do not use markdown: no headings, no bold, no numbered lists.

Use exactly this format:

Direct Answer
<two or three sentences>

Key Ideas
• <one-line insight>
• <one-line insight>
• <one-line insight>

Common Pitfall
<one sentence>

Summary
<one sentence>";

const FORMAT_REMINDER: &str = "Respond in the Direct Answer / Key Ideas / Common Pitfall / \
Summary format, with bullet points (•) under Key Ideas and no markdown.";

pub const FOLLOW_UP_SYSTEM_PROMPT: &str = "You suggest follow-up questions for a product \
management learner. Propose 2 or 3 questions that go deeper into the themes of the answer \
they just read. Avoid generic clarifications such as \"can you elaborate\". Return only a \
JSON array of strings.";

pub const SUMMARY_SYSTEM_PROMPT: &str = "Summarize this product management conversation for \
continuity. Keep the topics discussed, frameworks mentioned, recommendations given and the \
user's apparent goal. Stay under 80 words.";

pub const CONVERSATION_SYSTEM_PROMPT: &str = "You are a friendly, experienced product \
management mentor. Answer conversationally and briefly. You do not have transcript sources \
for this question, so do not cite any, and gently steer back toward product topics when the \
question is unrelated.";

/// Guidance appended to the user prompt for each confidence level.
pub fn confidence_note(level: ConfidenceLevel) -> &'static str {
    match level {
        ConfidenceLevel::High => "Sources are strong and directly relevant. Be authoritative.",
        ConfidenceLevel::Medium => {
            "Sources are relevant but not comprehensive. Be balanced and note gaps."
        }
        ConfidenceLevel::Low => "Sources are weak. Acknowledge limitations and be concise.",
    }
}

/// User prompt for a grounded answer. Sections appear in a fixed order:
/// summary, sources, recent turns, question.
pub fn build_answer_prompt(
    query: &str,
    context: &SynthesisContext,
    memory: &StructuredContext,
) -> String {
    let mut sections = Vec::new();
    if !memory.summary_memory.is_empty() {
        sections.push(format!(
            "CONVERSATION SUMMARY (earlier discussion):\n{}",
            memory.summary_memory
        ));
    }
    sections.push(format!(
        "VERIFIED SOURCES (grounded excerpts, cite as [SOURCE X]):\n\n{}",
        context.render()
    ));
    if !memory.recent_turns.is_empty() {
        sections.push(format!("RECENT CONVERSATION:\n{}", memory.recent_turns));
    }
    sections.push(format!(
        "USER QUESTION:\n{}\n\nCONFIDENCE LEVEL: {}\n{}\n\n{}",
        query,
        context.confidence.as_str().to_uppercase(),
        confidence_note(context.confidence),
        FORMAT_REMINDER
    ));
    sections.join(SECTION_SEPARATOR)
}

pub fn build_follow_up_prompt(
    query: &str,
    answer: &str,
    topics: &[String],
    confidence: ConfidenceLevel,
) -> String {
    let themes = if topics.is_empty() {
        "general product management".to_string()
    } else {
        topics.join(", ")
    };
    format!(
        "Original question: {}\n\nAnswer given:\n{}\n\nKey Themes from Sources: {}\n\n\
         Answer confidence: {}\n\nReturn a JSON array of 2-3 follow-up questions.",
        query,
        truncate_chars(answer, FOLLOW_UP_ANSWER_CHARS),
        themes,
        confidence.as_str()
    )
}

pub fn build_summary_prompt(previous: &str, recent_turns: &str) -> String {
    let ctx = if previous.is_empty() {
        recent_turns.to_string()
    } else {
        format!("Previous summary: {}\n\nNew turns:\n{}", previous, recent_turns)
    };
    format!("Conversation:\n{}\n\nSummary:", ctx)
}

pub fn build_conversation_prompt(query: &str, history: &str) -> String {
    if history.is_empty() {
        format!(
            "Question: {}\n\nRespond as a friendly product management mentor in a few sentences.",
            query
        )
    } else {
        format!(
            "Previous conversation:\n{}\n\nCurrent question: {}\n\n\
             Continue the conversation naturally in a few sentences.",
            history, query
        )
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte, _)) => format!("{}...", &text[..byte]),
        None => text.to_string(),
    }
}

/// Build the configured synthesizer, or `None` when `[llm]` is disabled.
pub fn create_synthesizer(config: &LlmConfig) -> Result<Option<Arc<dyn Synthesizer>>> {
    let backend = match config.provider.as_str() {
        "disabled" => return Ok(None),
        "openai" => {
            let api_key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
            Backend::OpenAI {
                api_key,
                base_url: config
                    .url
                    .clone()
                    .unwrap_or_else(|| "https://api.openai.com".to_string()),
            }
        }
        "ollama" => Backend::Ollama {
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
        },
        other => bail!("Unknown llm provider: {}", other),
    };
    Ok(Some(Arc::new(LlmSynthesizer::new(config, backend)?)))
}

enum Backend {
    OpenAI { api_key: String, base_url: String },
    Ollama { base_url: String },
}

/// Chat-completion synthesizer.
pub struct LlmSynthesizer {
    backend: Backend,
    model: String,
    client: reqwest::Client,
    temperature: f32,
    max_tokens: u32,
    timeout_secs: u64,
}

impl LlmSynthesizer {
    fn new(config: &LlmConfig, backend: Backend) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for {} provider", config.provider))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            backend,
            model,
            client,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout_secs: config.timeout_secs,
        })
    }

    async fn chat(&self, system: &str, user: &str, max_tokens: u32) -> Result<String> {
        let messages = serde_json::json!([
            { "role": "system", "content": system },
            { "role": "user", "content": user }
        ]);

        let request = match &self.backend {
            Backend::OpenAI { api_key, base_url } => self
                .client
                .post(format!("{}/v1/chat/completions", base_url.trim_end_matches('/')))
                .bearer_auth(api_key)
                .json(&serde_json::json!({
                    "model": self.model,
                    "messages": messages,
                    "temperature": self.temperature,
                    "max_tokens": max_tokens,
                })),
            Backend::Ollama { base_url } => self
                .client
                .post(format!("{}/api/chat", base_url.trim_end_matches('/')))
                .json(&serde_json::json!({
                    "model": self.model,
                    "messages": messages,
                    "stream": false,
                    "options": { "temperature": self.temperature, "num_predict": max_tokens },
                })),
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RagError::Timeout(self.timeout_secs * 1000)
            } else {
                RagError::Upstream(format!("llm connection error: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::Upstream(format!("llm API error {}: {}", status, body)).into());
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RagError::Upstream(format!("llm returned invalid JSON: {}", e)))?;
        let content = match self.backend {
            Backend::OpenAI { .. } => parse_openai_chat(&json),
            Backend::Ollama { .. } => parse_ollama_chat(&json),
        }?;
        debug!(model = %self.model, chars = content.len(), "llm response received");
        Ok(content)
    }
}

/// Extract `choices[0].message.content`.
pub fn parse_openai_chat(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| RagError::Upstream("llm response missing choices[0].message.content".into()).into())
}

/// Extract `message.content`.
pub fn parse_ollama_chat(json: &serde_json::Value) -> Result<String> {
    json.pointer("/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| RagError::Upstream("llm response missing message.content".into()).into())
}

#[async_trait]
impl Synthesizer for LlmSynthesizer {
    async fn synthesize(
        &self,
        query: &str,
        context: &SynthesisContext,
        memory: &StructuredContext,
        depth: SynthesisDepth,
    ) -> Result<String> {
        let max_tokens = match depth {
            SynthesisDepth::Fast => self.max_tokens,
            SynthesisDepth::Deep => self.max_tokens.saturating_mul(2),
        };
        let prompt = build_answer_prompt(query, context, memory);
        self.chat(ANSWER_SYSTEM_PROMPT, &prompt, max_tokens).await
    }

    async fn converse(&self, query: &str, history: &str) -> Result<String> {
        let prompt = build_conversation_prompt(query, history);
        self.chat(CONVERSATION_SYSTEM_PROMPT, &prompt, self.max_tokens).await
    }

    async fn follow_ups(
        &self,
        query: &str,
        answer: &str,
        topics: &[String],
        confidence: ConfidenceLevel,
    ) -> Result<String> {
        let prompt = build_follow_up_prompt(query, answer, topics, confidence);
        self.chat(FOLLOW_UP_SYSTEM_PROMPT, &prompt, 200).await
    }

    async fn summarize(&self, previous: &str, recent_turns: &str) -> Result<String> {
        let prompt = build_summary_prompt(previous, recent_turns);
        let summary = self.chat(SUMMARY_SYSTEM_PROMPT, &prompt, 150).await?;
        Ok(summary.chars().take(SUMMARY_MAX_CHARS).collect())
    }
}
