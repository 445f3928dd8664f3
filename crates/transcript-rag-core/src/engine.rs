//! Per-query answer engine.
//!
//! ```text
//! Incoming ──▶ safety check ──▶ REFUSED (terminal, mode = safety)
//!                   │
//!                   ▼ safe
//!               [cache, first turn only]
//!                   │
//!                   ▼
//!               retrieve ──▶ filter ──▶ diversity ──▶ confidence
//!                                                        │
//!                               ┌──── decide_mode ◀──────┘
//!                               ▼
//!                     RAG (terminal) | CONVERSATION (terminal)
//! ```
//!
//! Retrieval failures are returned as errors. Synthesis failures are not:
//! the response keeps its sources and sets `synthesis_failed`.
//!
//! The session's mutex is held for the whole request, so turns from
//! concurrent requests on one session id never interleave.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::answer::{
    is_refusal, parse_answer_sections, select_follow_ups, source_topics, AnswerSections,
};
use crate::cache::{cache_key, CacheStats, ResponseCache};
use crate::confidence::{ConfidenceLevel, ConfidenceResult, ConfidenceScorer};
use crate::context::{build_citations, build_context, Citation, ContextPolicy, SynthesisContext};
use crate::memory::{Role, SessionStats, SessionStore, StructuredContext};
use crate::models::RetrievalResult;
use crate::pipeline::{RetrieveOptions, Retriever};
use crate::router::{decide_mode, AnswerMode, DomainVocabulary};
use crate::safety::SafetyCheck;
use crate::RagError;

/// Shown when no synthesizer is configured or it failed.
pub const RETRIEVAL_ONLY_ANSWER: &str =
    "Synthesis is unavailable right now. The most relevant transcript excerpts are listed as sources.";

/// Shown in conversation mode when no synthesizer is configured or it failed.
pub const CONVERSATION_FALLBACK: &str =
    "I couldn't find strong support for that in the transcripts. Try asking about a specific \
     product topic such as prioritization, roadmaps or user research.";

/// How much effort the synthesizer should spend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisDepth {
    #[default]
    Fast,
    Deep,
}

impl SynthesisDepth {
    pub fn as_str(&self) -> &'static str {
        match self {
            SynthesisDepth::Fast => "fast",
            SynthesisDepth::Deep => "deep",
        }
    }
}

/// External answer generator.
///
/// Implementations own prompts and transport. Every method may fail; the
/// engine decides how each failure degrades.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Grounded answer from curated context blocks.
    async fn synthesize(
        &self,
        query: &str,
        context: &SynthesisContext,
        memory: &StructuredContext,
        depth: SynthesisDepth,
    ) -> Result<String>;

    /// Ungrounded conversational reply. `history` may be empty.
    async fn converse(&self, query: &str, history: &str) -> Result<String>;

    /// Raw follow-up suggestions, parsed by [`select_follow_ups`].
    async fn follow_ups(
        &self,
        query: &str,
        answer: &str,
        topics: &[String],
        confidence: ConfidenceLevel,
    ) -> Result<String>;

    /// New rolling summary from the previous one and recent turns.
    async fn summarize(&self, previous: &str, recent_turns: &str) -> Result<String>;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub use_longtail: bool,
    #[serde(default)]
    pub depth: SynthesisDepth,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub query: String,
    pub answer: AnswerSections,
    pub sources: Vec<Citation>,
    pub confidence: ConfidenceLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_detail: Option<ConfidenceResult>,
    pub mode: AnswerMode,
    pub session_id: String,
    pub turn_count: usize,
    pub follow_ups: Vec<String>,
    pub safety_refusal: bool,
    pub synthesis_failed: bool,
    pub cached: bool,
    pub latency_ms: u64,
}

/// Engine tunables that are not owned by a collaborator.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub context: ContextPolicy,
    pub use_query_expansion: bool,
    /// Budget for the flat history handed to conversation mode.
    pub conversation_context_chars: usize,
    /// Turns fed to the summarizer.
    pub summary_turns: usize,
    pub cache_max_entries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context: ContextPolicy::default(),
            use_query_expansion: true,
            conversation_context_chars: 1500,
            summary_turns: 4,
            cache_max_entries: 256,
        }
    }
}

/// Snapshot of one session for inspection endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub turn_count: usize,
    pub summary: String,
    pub context_preview: String,
}

const CONTEXT_PREVIEW_CHARS: usize = 500;

pub struct AnswerEngine {
    retriever: Arc<dyn Retriever>,
    safety: Arc<dyn SafetyCheck>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    sessions: Arc<SessionStore>,
    scorer: ConfidenceScorer,
    vocabulary: DomainVocabulary,
    cache: ResponseCache<QueryResponse>,
    config: EngineConfig,
}

impl AnswerEngine {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        safety: Arc<dyn SafetyCheck>,
        synthesizer: Option<Arc<dyn Synthesizer>>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        let config = EngineConfig::default();
        Self {
            retriever,
            safety,
            synthesizer,
            sessions,
            scorer: ConfidenceScorer::default(),
            vocabulary: DomainVocabulary::default(),
            cache: ResponseCache::new(config.cache_max_entries),
            config,
        }
    }

    pub fn with_scorer(mut self, scorer: ConfidenceScorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_vocabulary(mut self, vocabulary: DomainVocabulary) -> Self {
        self.vocabulary = vocabulary;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.cache = ResponseCache::new(config.cache_max_entries);
        self.config = config;
        self
    }

    pub fn has_synthesizer(&self) -> bool {
        self.synthesizer.is_some()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn session_stats(&self) -> SessionStats {
        self.sessions.stats()
    }

    /// Answer one query.
    pub async fn answer(&self, req: QueryRequest) -> Result<QueryResponse> {
        let started = Instant::now();
        let query = req.query.trim().to_string();
        if query.is_empty() {
            return Err(RagError::Validation("query must not be empty".into()).into());
        }

        let session_id = req
            .session_id
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let handle = self.sessions.get_or_create(&session_id);
        let mut memory = handle.lock().await;

        if let Some(refusal) = self.safety.check(&query) {
            info!(session = %session_id, kind = ?refusal.kind, "safety refusal");
            return Ok(QueryResponse {
                query,
                answer: AnswerSections {
                    direct_answer: refusal.message,
                    ..Default::default()
                },
                sources: Vec::new(),
                confidence: ConfidenceLevel::Low,
                confidence_detail: None,
                mode: AnswerMode::Safety,
                session_id,
                turn_count: memory.turn_count(),
                follow_ups: Vec::new(),
                safety_refusal: true,
                synthesis_failed: false,
                cached: false,
                latency_ms: elapsed_ms(started),
            });
        }

        let first_turn = memory.turn_count() == 0;
        let key = cache_key(&query, req.depth.as_str());
        if first_turn {
            if let Some(mut hit) = self.cache.get(&key) {
                let now = self.sessions.now();
                memory.add_turn(Role::User, query.as_str(), None, now);
                memory.add_turn(
                    Role::Assistant,
                    hit.answer.direct_answer.as_str(),
                    Some(AnswerMode::Rag),
                    now,
                );
                info!(session = %session_id, "cache hit");
                hit.session_id = session_id;
                hit.turn_count = memory.turn_count();
                hit.cached = true;
                hit.latency_ms = elapsed_ms(started);
                return Ok(hit);
            }
            debug!(session = %session_id, "cache miss");
        }

        let opts = RetrieveOptions {
            use_longtail: req.use_longtail,
            use_query_expansion: self.config.use_query_expansion,
            filter: None,
        };
        let results = self.retriever.retrieve(&query, &opts).await?;

        memory.add_turn(Role::User, query.as_str(), None, self.sessions.now());

        let filtered = self.scorer.filter_by_score(&results);
        let diverse = self.scorer.apply_diversity_constraint(&filtered);
        let confidence = self.scorer.compute_confidence(&diverse);
        let domain_intent = self.vocabulary.has_domain_intent(&query);
        let mode = decide_mode(confidence.level, domain_intent);
        info!(
            session = %session_id,
            retrieved = results.len(),
            filtered = filtered.len(),
            diverse = diverse.len(),
            confidence = %confidence.level,
            avg_score = confidence.avg_score,
            domain_intent,
            mode = %mode,
            "query routed"
        );

        let continuing = memory.turn_count() > 1;
        let mut response = match mode {
            AnswerMode::Rag => {
                let structured = if continuing {
                    memory.structured_context()
                } else {
                    StructuredContext::default()
                };
                self.answer_grounded(&query, &diverse, confidence, &structured, req.depth)
                    .await
            }
            _ => {
                let history = if continuing {
                    memory.context(self.config.conversation_context_chars)
                } else {
                    String::new()
                };
                self.answer_conversation(&query, &history, confidence).await
            }
        };

        memory.add_turn(
            Role::Assistant,
            response.answer.direct_answer.as_str(),
            Some(response.mode),
            self.sessions.now(),
        );

        if let Some(synth) = &self.synthesizer {
            if memory.should_summarize() {
                let recent = memory.recent_turns_for_summary(self.config.summary_turns);
                let previous = memory.summary().to_string();
                match synth.summarize(&previous, &recent).await {
                    Ok(summary) => {
                        debug!(session = %session_id, "summary updated");
                        memory.update_summary(summary.trim());
                    }
                    Err(e) => warn!(session = %session_id, error = %e, "summarization failed"),
                }
            }
        }

        response.query = query;
        response.session_id = session_id;
        response.turn_count = memory.turn_count();
        response.latency_ms = elapsed_ms(started);

        if first_turn
            && response.mode == AnswerMode::Rag
            && !response.synthesis_failed
            && !response.sources.is_empty()
        {
            self.cache.insert(key, response.clone());
        }
        Ok(response)
    }

    async fn answer_grounded(
        &self,
        query: &str,
        diverse: &[RetrievalResult],
        confidence: ConfidenceResult,
        memory: &StructuredContext,
        depth: SynthesisDepth,
    ) -> QueryResponse {
        // Context blocks and citations share one slice so source numbers line up.
        let mut cited = self.scorer.limit_sources(diverse);
        cited.truncate(self.config.context.max_chunks);
        let context = build_context(&cited, confidence.level, &self.config.context);
        let raw = match &self.synthesizer {
            Some(synth) => match synth.synthesize(query, &context, memory, depth).await {
                Ok(text) => Some(text),
                Err(e) => {
                    warn!(error = %e, "synthesis failed, returning retrieval-only answer");
                    None
                }
            },
            None => None,
        };

        let citations = build_citations(&cited);
        let Some(raw) = raw else {
            return grounded_response(
                AnswerSections {
                    direct_answer: RETRIEVAL_ONLY_ANSWER.to_string(),
                    ..Default::default()
                },
                citations,
                confidence,
                Vec::new(),
                true,
            );
        };

        let answer = parse_answer_sections(&raw);
        if is_refusal(&raw) {
            info!("synthesizer refused, hiding citations");
            let detail = ConfidenceResult {
                level: ConfidenceLevel::Low,
                ..confidence
            };
            return grounded_response(answer, Vec::new(), detail, Vec::new(), false);
        }

        let mut follow_ups = Vec::new();
        if confidence.level.is_grounding() {
            if let Some(synth) = &self.synthesizer {
                let topics = source_topics(&citations);
                match synth
                    .follow_ups(query, &answer.direct_answer, &topics, confidence.level)
                    .await
                {
                    Ok(raw) => follow_ups = select_follow_ups(&raw),
                    Err(e) => warn!(error = %e, "follow-up generation failed"),
                }
            }
        }

        grounded_response(answer, citations, confidence, follow_ups, false)
    }

    async fn answer_conversation(
        &self,
        query: &str,
        history: &str,
        confidence: ConfidenceResult,
    ) -> QueryResponse {
        let (text, failed) = match &self.synthesizer {
            Some(synth) => match synth.converse(query, history).await {
                Ok(text) => (text.trim().to_string(), false),
                Err(e) => {
                    warn!(error = %e, "conversation reply failed");
                    (CONVERSATION_FALLBACK.to_string(), true)
                }
            },
            None => (CONVERSATION_FALLBACK.to_string(), true),
        };
        QueryResponse {
            query: String::new(),
            answer: AnswerSections {
                direct_answer: text,
                ..Default::default()
            },
            sources: Vec::new(),
            confidence: confidence.level,
            confidence_detail: Some(confidence),
            mode: AnswerMode::Conversation,
            session_id: String::new(),
            turn_count: 0,
            follow_ups: Vec::new(),
            safety_refusal: false,
            synthesis_failed: failed,
            cached: false,
            latency_ms: 0,
        }
    }

    /// Turn count, summary and a short history preview for one session.
    pub async fn session_info(&self, session_id: &str) -> Option<SessionInfo> {
        let handle = self.sessions.get(session_id)?;
        let memory = handle.lock().await;
        let context = memory.context(self.config.conversation_context_chars);
        let context_preview = match context.char_indices().nth(CONTEXT_PREVIEW_CHARS) {
            Some((byte, _)) => format!("{}...", &context[..byte]),
            None => context,
        };
        Some(SessionInfo {
            session_id: session_id.to_string(),
            turn_count: memory.turn_count(),
            summary: memory.summary().to_string(),
            context_preview,
        })
    }

    /// Forget a session. Returns whether it existed.
    pub fn clear_session(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id)
    }
}

fn grounded_response(
    answer: AnswerSections,
    sources: Vec<Citation>,
    confidence: ConfidenceResult,
    follow_ups: Vec<String>,
    synthesis_failed: bool,
) -> QueryResponse {
    QueryResponse {
        query: String::new(),
        answer,
        sources,
        confidence: confidence.level,
        confidence_detail: Some(confidence),
        mode: AnswerMode::Rag,
        session_id: String::new(),
        turn_count: 0,
        follow_ups,
        safety_refusal: false,
        synthesis_failed,
        cached: false,
        latency_ms: 0,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ManualClock, SessionConfig};
    use crate::models::{Tier, VectorMetadata};
    use crate::safety::KeywordSafetyGuard;
    use crate::store::IndexHit;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn result(doc: &str, parent: &str, score: f32) -> RetrievalResult {
        RetrievalResult::from_hit(
            &IndexHit {
                id: format!("{}-{}", doc, parent),
                score,
                metadata: VectorMetadata {
                    chunk_id: format!("{}-{}", doc, parent),
                    text: format!("advice from {}", doc),
                    document_id: Some(doc.into()),
                    parent_id: Some(parent.into()),
                    start_seconds: 60.0,
                    end_seconds: 90.0,
                    speaker: None,
                    tier: Tier::Core,
                    title: Some(format!("Episode {}", doc)),
                    guest: Some("Guest".into()),
                    publish_date: None,
                    topics: vec![],
                },
            },
            Tier::Core,
        )
    }

    struct SpyRetriever {
        results: Vec<RetrievalResult>,
        calls: AtomicUsize,
        fail: bool,
    }

    impl SpyRetriever {
        fn new(results: Vec<RetrievalResult>) -> Arc<Self> {
            Arc::new(Self {
                results,
                calls: AtomicUsize::new(0),
                fail: false,
            })
        }
    }

    #[async_trait]
    impl Retriever for SpyRetriever {
        async fn retrieve(
            &self,
            _query: &str,
            _opts: &RetrieveOptions,
        ) -> Result<Vec<RetrievalResult>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RagError::Upstream("embedder down".into()).into());
            }
            Ok(self.results.clone())
        }
    }

    #[derive(Default)]
    struct SpySynth {
        answer: String,
        fail_synthesis: bool,
        synth_calls: AtomicUsize,
        converse_calls: AtomicUsize,
        follow_up_calls: AtomicUsize,
        summary_calls: AtomicUsize,
        seen_context: Mutex<Option<SynthesisContext>>,
    }

    impl SpySynth {
        fn answering(answer: &str) -> Arc<Self> {
            Arc::new(Self {
                answer: answer.to_string(),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl Synthesizer for SpySynth {
        async fn synthesize(
            &self,
            _query: &str,
            context: &SynthesisContext,
            _memory: &StructuredContext,
            _depth: SynthesisDepth,
        ) -> Result<String> {
            self.synth_calls.fetch_add(1, Ordering::SeqCst);
            *self.seen_context.lock().unwrap() = Some(context.clone());
            if self.fail_synthesis {
                return Err(RagError::Timeout(30).into());
            }
            Ok(self.answer.clone())
        }

        async fn converse(&self, _query: &str, _history: &str) -> Result<String> {
            self.converse_calls.fetch_add(1, Ordering::SeqCst);
            Ok("Blue, probably.".into())
        }

        async fn follow_ups(
            &self,
            _query: &str,
            _answer: &str,
            _topics: &[String],
            _confidence: ConfidenceLevel,
        ) -> Result<String> {
            self.follow_up_calls.fetch_add(1, Ordering::SeqCst);
            Ok(r#"["How do you run a RICE scoring session?", "When should a roadmap be revisited?"]"#.into())
        }

        async fn summarize(&self, _previous: &str, _recent: &str) -> Result<String> {
            self.summary_calls.fetch_add(1, Ordering::SeqCst);
            Ok("User asks about prioritization.".into())
        }
    }

    fn sessions() -> Arc<SessionStore> {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()));
        Arc::new(SessionStore::new(SessionConfig::default(), clock))
    }

    fn engine(retriever: Arc<SpyRetriever>, synth: Option<Arc<SpySynth>>) -> AnswerEngine {
        AnswerEngine::new(
            retriever,
            Arc::new(KeywordSafetyGuard::default()),
            synth.map(|s| s as Arc<dyn Synthesizer>),
            sessions(),
        )
    }

    fn strong_results() -> Vec<RetrievalResult> {
        vec![
            result("ep1", "p1", 0.82),
            result("ep2", "p1", 0.74),
            result("ep1", "p2", 0.70),
            result("ep3", "p4", 0.40),
        ]
    }

    const STRUCTURED: &str = "Direct Answer\nScore features by impact and effort.\n\
                              Key Ideas\n- Use RICE\n- Say no often\n\
                              Common Pitfall\nPrioritizing by loudest voice.\n\
                              Summary\nImpact first.";

    #[tokio::test]
    async fn test_safety_precedence_skips_everything() {
        let retriever = SpyRetriever::new(strong_results());
        let synth = SpySynth::answering(STRUCTURED);
        let engine = engine(retriever.clone(), Some(synth.clone()));

        let resp = engine
            .answer(QueryRequest::new("I want to die, how do I prioritize features").in_session("s1"))
            .await
            .unwrap();

        assert_eq!(resp.mode, AnswerMode::Safety);
        assert!(resp.safety_refusal);
        assert!(resp.sources.is_empty());
        assert!(resp.follow_ups.is_empty());
        assert!(resp.answer.direct_answer.contains("988"));
        assert_eq!(resp.turn_count, 0);
        assert_eq!(retriever.calls.load(Ordering::SeqCst), 0);
        assert_eq!(synth.synth_calls.load(Ordering::SeqCst), 0);
        assert_eq!(synth.follow_up_calls.load(Ordering::SeqCst), 0);
        assert_eq!(synth.summary_calls.load(Ordering::SeqCst), 0);
        let info = engine.session_info("s1").await.unwrap();
        assert_eq!(info.turn_count, 0);
    }

    #[tokio::test]
    async fn test_grounded_answer_high_confidence() {
        let retriever = SpyRetriever::new(strong_results());
        let synth = SpySynth::answering(STRUCTURED);
        let engine = engine(retriever, Some(synth.clone()));

        let resp = engine
            .answer(QueryRequest::new("How do I prioritize features?"))
            .await
            .unwrap();

        assert_eq!(resp.mode, AnswerMode::Rag);
        assert_eq!(resp.confidence, ConfidenceLevel::High);
        assert_eq!(resp.answer.direct_answer, "Score features by impact and effort.");
        assert_eq!(resp.answer.key_ideas, vec!["Use RICE", "Say no often"]);
        assert!(resp.sources.len() <= 5);
        let docs: std::collections::HashSet<_> =
            resp.sources.iter().map(|c| c.document_id.clone()).collect();
        assert_eq!(docs.len(), resp.sources.len());
        assert_eq!(resp.follow_ups.len(), 2);
        assert_eq!(resp.turn_count, 2);
        assert!(!resp.synthesis_failed);

        let ctx = synth.seen_context.lock().unwrap().clone().unwrap();
        assert_eq!(ctx.blocks.len(), 2);
        assert_eq!(ctx.confidence, ConfidenceLevel::High);
    }

    #[tokio::test]
    async fn test_citations_match_context_blocks_when_context_is_smaller() {
        let retriever = SpyRetriever::new(vec![
            result("ep1", "p1", 0.82),
            result("ep2", "p1", 0.80),
            result("ep3", "p1", 0.78),
            result("ep4", "p1", 0.76),
        ]);
        let synth = SpySynth::answering(STRUCTURED);
        let mut config = EngineConfig::default();
        config.context.max_chunks = 2;
        let engine = engine(retriever, Some(synth.clone())).with_config(config);

        let resp = engine
            .answer(QueryRequest::new("How do I prioritize features?"))
            .await
            .unwrap();

        let ctx = synth.seen_context.lock().unwrap().clone().unwrap();
        assert_eq!(ctx.blocks.len(), 2);
        assert_eq!(resp.sources.len(), ctx.blocks.len());
        for (block, source) in ctx.blocks.iter().zip(&resp.sources) {
            assert_eq!(block.source_index, source.source_num);
            assert_eq!(block.title, source.title);
        }
        assert_eq!(resp.sources[1].document_id, "ep2");
    }

    #[tokio::test]
    async fn test_off_domain_query_goes_to_conversation() {
        let retriever = SpyRetriever::new(strong_results());
        let synth = SpySynth::answering(STRUCTURED);
        let engine = engine(retriever, Some(synth.clone()));

        let resp = engine
            .answer(QueryRequest::new("What's your favorite color?"))
            .await
            .unwrap();

        assert_eq!(resp.mode, AnswerMode::Conversation);
        assert!(resp.sources.is_empty());
        assert!(resp.follow_ups.is_empty());
        assert_eq!(resp.answer.direct_answer, "Blue, probably.");
        assert_eq!(synth.synth_calls.load(Ordering::SeqCst), 0);
        assert_eq!(synth.converse_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_weak_evidence_goes_to_conversation() {
        let retriever = SpyRetriever::new(vec![result("ep1", "p1", 0.45)]);
        let engine = engine(retriever, Some(SpySynth::answering(STRUCTURED)));
        let resp = engine
            .answer(QueryRequest::new("How do I build a product roadmap?"))
            .await
            .unwrap();
        assert_eq!(resp.mode, AnswerMode::Conversation);
        assert_eq!(resp.confidence, ConfidenceLevel::Low);
    }

    #[tokio::test]
    async fn test_synthesis_failure_keeps_sources() {
        let retriever = SpyRetriever::new(strong_results());
        let synth = Arc::new(SpySynth {
            fail_synthesis: true,
            ..Default::default()
        });
        let engine = engine(retriever, Some(synth.clone()));

        let resp = engine
            .answer(QueryRequest::new("How do I prioritize features?"))
            .await
            .unwrap();

        assert_eq!(resp.mode, AnswerMode::Rag);
        assert!(resp.synthesis_failed);
        assert_eq!(resp.answer.direct_answer, RETRIEVAL_ONLY_ANSWER);
        assert_eq!(resp.sources.len(), 2);
        assert_eq!(synth.follow_up_calls.load(Ordering::SeqCst), 0);
        assert_eq!(engine.cache_stats().size, 0);
    }

    #[tokio::test]
    async fn test_without_synthesizer_is_retrieval_only() {
        let engine = engine(SpyRetriever::new(strong_results()), None);
        let resp = engine
            .answer(QueryRequest::new("How do I prioritize features?"))
            .await
            .unwrap();
        assert!(resp.synthesis_failed);
        assert!(!resp.sources.is_empty());
    }

    #[tokio::test]
    async fn test_refusal_hides_citations() {
        let synth = SpySynth::answering("I'm sorry, but I can't help with that request.");
        let engine = engine(SpyRetriever::new(strong_results()), Some(synth.clone()));
        let resp = engine
            .answer(QueryRequest::new("How do I prioritize features?"))
            .await
            .unwrap();
        assert_eq!(resp.mode, AnswerMode::Rag);
        assert!(resp.sources.is_empty());
        assert_eq!(resp.confidence, ConfidenceLevel::Low);
        assert!(resp.follow_ups.is_empty());
        assert_eq!(synth.follow_up_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retrieval_error_is_not_downgraded() {
        let retriever = Arc::new(SpyRetriever {
            results: vec![],
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let engine = engine(retriever, None);
        let err = engine
            .answer(QueryRequest::new("How do I prioritize?").in_session("s"))
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<RagError>(), Some(RagError::Upstream(_))));
        assert_eq!(engine.session_info("s").await.unwrap().turn_count, 0);
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let retriever = SpyRetriever::new(vec![]);
        let engine = engine(retriever.clone(), None);
        let err = engine.answer(QueryRequest::new("   ")).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<RagError>(), Some(RagError::Validation(_))));
        assert_eq!(retriever.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_first_turn_cache_hit() {
        let retriever = SpyRetriever::new(strong_results());
        let engine = engine(retriever.clone(), Some(SpySynth::answering(STRUCTURED)));

        let first = engine
            .answer(QueryRequest::new("How do I prioritize features?").in_session("a"))
            .await
            .unwrap();
        let second = engine
            .answer(QueryRequest::new("How do I prioritize features?").in_session("b"))
            .await
            .unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(second.session_id, "b");
        assert_eq!(second.turn_count, 2);
        assert_eq!(second.answer, first.answer);
        assert_eq!(retriever.calls.load(Ordering::SeqCst), 1);

        let mut deep = QueryRequest::new("How do I prioritize features?").in_session("c");
        deep.depth = SynthesisDepth::Deep;
        assert!(!engine.answer(deep).await.unwrap().cached);
    }

    #[tokio::test]
    async fn test_follow_up_turns_bypass_cache_and_summarize() {
        let retriever = SpyRetriever::new(strong_results());
        let synth = SpySynth::answering(STRUCTURED);
        let engine = engine(retriever.clone(), Some(synth.clone()));

        for _ in 0..2 {
            engine
                .answer(QueryRequest::new("How do I prioritize features?").in_session("s"))
                .await
                .unwrap();
        }

        assert_eq!(retriever.calls.load(Ordering::SeqCst), 2);
        let info = engine.session_info("s").await.unwrap();
        assert_eq!(info.turn_count, 4);
        assert_eq!(synth.summary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(info.summary, "User asks about prioritization.");
        assert!(info.context_preview.starts_with("User: How do I prioritize"));
    }

    #[tokio::test]
    async fn test_clear_session() {
        let engine = engine(SpyRetriever::new(vec![]), None);
        engine
            .answer(QueryRequest::new("hello there").in_session("x"))
            .await
            .unwrap();
        assert!(engine.clear_session("x"));
        assert!(engine.session_info("x").await.is_none());
        assert!(!engine.clear_session("x"));
    }
}
