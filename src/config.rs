//! TOML configuration.
//!
//! Every section is optional and falls back to the defaults below, so a
//! minimal file only needs `[index] dir` and `[corpus] chunks_dir`. See
//! `config/trag.example.toml` for a full example.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use transcript_rag_core::confidence::ConfidenceThresholds;
use transcript_rag_core::context::ContextPolicy;
use transcript_rag_core::memory::SessionConfig;
use transcript_rag_core::pipeline::RetrievalParams;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub confidence: ConfidenceConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub domain: DomainConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_core_name")]
    pub core_name: String,
    #[serde(default = "default_longtail_name")]
    pub longtail_name: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
            core_name: default_core_name(),
            longtail_name: default_longtail_name(),
            dims: default_dims(),
        }
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("./data/index")
}
fn default_core_name() -> String {
    "core".to_string()
}
fn default_longtail_name() -> String {
    "longtail".to_string()
}
fn default_dims() -> usize {
    384
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_chunks_dir")]
    pub chunks_dir: PathBuf,
    /// `single` or `classifier`.
    #[serde(default = "default_tiering")]
    pub tiering: String,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            chunks_dir: default_chunks_dir(),
            tiering: default_tiering(),
        }
    }
}

fn default_chunks_dir() -> PathBuf {
    PathBuf::from("./data/chunks")
}
fn default_tiering() -> String {
    "classifier".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_core_top_k")]
    pub core_top_k: usize,
    #[serde(default = "default_longtail_top_k")]
    pub longtail_top_k: usize,
    #[serde(default = "default_min_score_threshold")]
    pub min_score_threshold: f32,
    #[serde(default = "default_longtail_trigger_hits")]
    pub longtail_trigger_hits: usize,
    #[serde(default = "default_max_per_document")]
    pub max_per_document: usize,
    #[serde(default = "default_true")]
    pub use_query_expansion: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            core_top_k: default_core_top_k(),
            longtail_top_k: default_longtail_top_k(),
            min_score_threshold: default_min_score_threshold(),
            longtail_trigger_hits: default_longtail_trigger_hits(),
            max_per_document: default_max_per_document(),
            use_query_expansion: true,
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            core_top_k: self.core_top_k,
            longtail_top_k: self.longtail_top_k,
            min_score_threshold: self.min_score_threshold,
            longtail_trigger_hits: self.longtail_trigger_hits,
            max_per_document: self.max_per_document,
        }
    }
}

fn default_core_top_k() -> usize {
    20
}
fn default_longtail_top_k() -> usize {
    10
}
fn default_min_score_threshold() -> f32 {
    0.3
}
fn default_longtail_trigger_hits() -> usize {
    5
}
fn default_max_per_document() -> usize {
    5
}
fn default_true() -> bool {
    true
}

/// Thresholds are calibrated per embedding model.
#[derive(Debug, Deserialize, Clone)]
pub struct ConfidenceConfig {
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f32,
    #[serde(default = "default_medium_threshold")]
    pub medium_threshold: f32,
    #[serde(default = "default_high_min_sources")]
    pub high_min_sources: usize,
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            high_threshold: default_high_threshold(),
            medium_threshold: default_medium_threshold(),
            high_min_sources: default_high_min_sources(),
            max_sources: default_max_sources(),
        }
    }
}

impl ConfidenceConfig {
    pub fn thresholds(&self) -> ConfidenceThresholds {
        ConfidenceThresholds {
            min_score: self.min_score,
            high_threshold: self.high_threshold,
            medium_threshold: self.medium_threshold,
            high_min_sources: self.high_min_sources,
            max_sources: self.max_sources,
        }
    }
}

fn default_min_score() -> f32 {
    0.60
}
fn default_high_threshold() -> f32 {
    0.65
}
fn default_medium_threshold() -> f32 {
    0.52
}
fn default_high_min_sources() -> usize {
    2
}
fn default_max_sources() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
    #[serde(default = "default_max_chars_per_chunk")]
    pub max_chars_per_chunk: usize,
    #[serde(default = "default_sentence_cut_ratio")]
    pub sentence_cut_ratio: f32,
    #[serde(default = "default_high_weight")]
    pub high_weight: f32,
    #[serde(default = "default_medium_weight")]
    pub medium_weight: f32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_chunks: default_max_chunks(),
            max_chars_per_chunk: default_max_chars_per_chunk(),
            sentence_cut_ratio: default_sentence_cut_ratio(),
            high_weight: default_high_weight(),
            medium_weight: default_medium_weight(),
        }
    }
}

impl ContextConfig {
    pub fn policy(&self) -> ContextPolicy {
        ContextPolicy {
            max_chunks: self.max_chunks,
            max_chars_per_chunk: self.max_chars_per_chunk,
            sentence_cut_ratio: self.sentence_cut_ratio,
            high_weight: self.high_weight,
            medium_weight: self.medium_weight,
        }
    }
}

fn default_max_chunks() -> usize {
    5
}
fn default_max_chars_per_chunk() -> usize {
    600
}
fn default_sentence_cut_ratio() -> f32 {
    0.8
}
fn default_high_weight() -> f32 {
    0.70
}
fn default_medium_weight() -> f32 {
    0.55
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `disabled`, `hash`, `openai`, `ollama` or `local`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for Ollama (default: `http://localhost:11434`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `disabled`, `openai` or `ollama`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            timeout_secs: default_llm_timeout_secs(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    800
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_summarize_after_turns")]
    pub summarize_after_turns: usize,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_evict_fraction")]
    pub evict_fraction: f64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            summarize_after_turns: default_summarize_after_turns(),
            ttl_secs: default_ttl_secs(),
            max_sessions: default_max_sessions(),
            evict_fraction: default_evict_fraction(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl MemoryConfig {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_turns: self.max_turns,
            summarize_after_turns: self.summarize_after_turns,
            ttl_secs: self.ttl_secs,
            max_sessions: self.max_sessions,
            evict_fraction: self.evict_fraction,
            sweep_interval_secs: self.sweep_interval_secs,
        }
    }
}

fn default_max_turns() -> usize {
    8
}
fn default_summarize_after_turns() -> usize {
    3
}
fn default_ttl_secs() -> u64 {
    1800
}
fn default_max_sessions() -> usize {
    1000
}
fn default_evict_fraction() -> f64 {
    0.1
}
fn default_sweep_interval_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_entries(),
        }
    }
}

fn default_cache_entries() -> usize {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

/// Optional vocabulary overrides. Empty lists keep the built-in sets.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DomainConfig {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub self_harm_terms: Vec<String>,
    #[serde(default)]
    pub harmful_terms: Vec<String>,
}

impl Config {
    pub fn core_index_path(&self) -> PathBuf {
        self.index.dir.join(&self.index.core_name)
    }

    pub fn longtail_index_path(&self) -> PathBuf {
        self.index.dir.join(&self.index.longtail_name)
    }

    pub fn parents_path(&self) -> PathBuf {
        self.index.dir.join("parents.json")
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.index.dims == 0 {
        bail!("index.dims must be > 0");
    }
    if config.index.core_name == config.index.longtail_name {
        bail!("index.core_name and index.longtail_name must differ");
    }

    match config.corpus.tiering.as_str() {
        "single" | "classifier" => {}
        other => bail!(
            "Unknown tiering policy: '{}'. Must be single or classifier.",
            other
        ),
    }

    let r = &config.retrieval;
    if !(0.0..=1.0).contains(&r.min_score_threshold) {
        bail!("retrieval.min_score_threshold must be in [0.0, 1.0]");
    }
    if r.core_top_k == 0 {
        bail!("retrieval.core_top_k must be >= 1");
    }
    if r.max_per_document == 0 {
        bail!("retrieval.max_per_document must be >= 1");
    }

    let c = &config.confidence;
    for (name, v) in [
        ("min_score", c.min_score),
        ("high_threshold", c.high_threshold),
        ("medium_threshold", c.medium_threshold),
    ] {
        if !(0.0..=1.0).contains(&v) {
            bail!("confidence.{} must be in [0.0, 1.0]", name);
        }
    }
    if c.medium_threshold > c.high_threshold {
        bail!("confidence.medium_threshold must be <= confidence.high_threshold");
    }
    if c.max_sources == 0 {
        bail!("confidence.max_sources must be >= 1");
    }

    let ctx = &config.context;
    if ctx.max_chunks == 0 {
        bail!("context.max_chunks must be >= 1");
    }
    if ctx.max_chars_per_chunk == 0 {
        bail!("context.max_chars_per_chunk must be > 0");
    }
    if !(ctx.sentence_cut_ratio > 0.0 && ctx.sentence_cut_ratio <= 1.0) {
        bail!("context.sentence_cut_ratio must be in (0.0, 1.0]");
    }
    if ctx.medium_weight > ctx.high_weight {
        bail!("context.medium_weight must be <= context.high_weight");
    }

    let m = &config.memory;
    if m.max_turns == 0 {
        bail!("memory.max_turns must be >= 1");
    }
    if !(m.evict_fraction > 0.0 && m.evict_fraction <= 1.0) {
        bail!("memory.evict_fraction must be in (0.0, 1.0]");
    }

    let e = &config.embedding;
    match e.provider.as_str() {
        "disabled" | "hash" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, openai, ollama, or local.",
            other
        ),
    }
    if matches!(e.provider.as_str(), "openai" | "ollama") {
        if e.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                e.provider
            );
        }
        if e.dims.is_none() || e.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                e.provider
            );
        }
    }
    if let Some(d) = e.dims {
        if e.is_enabled() && d != config.index.dims {
            bail!(
                "embedding.dims ({}) must match index.dims ({})",
                d,
                config.index.dims
            );
        }
    }
    if e.batch_size == 0 {
        bail!("embedding.batch_size must be >= 1");
    }

    let l = &config.llm;
    match l.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown llm provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if l.is_enabled() && l.model.is_none() {
        bail!("llm.model must be specified when provider is '{}'", l.provider);
    }

    Ok(())
}
