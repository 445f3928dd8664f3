//! Runtime assembly: configuration → loaded indexes → [`AnswerEngine`].
//!
//! Shared by the CLI commands and the HTTP server so both answer queries
//! through the same collaborators.

use anyhow::{bail, Result};
use std::sync::Arc;
use tracing::info;

use transcript_rag_core::confidence::ConfidenceScorer;
use transcript_rag_core::embedding::Embedder;
use transcript_rag_core::engine::{AnswerEngine, EngineConfig, Synthesizer};
use transcript_rag_core::memory::{SessionStore, SystemClock};
use transcript_rag_core::parents::ParentStore;
use transcript_rag_core::pipeline::RetrievalPipeline;
use transcript_rag_core::router::DomainVocabulary;
use transcript_rag_core::safety::{KeywordSafetyGuard, DEFAULT_HARMFUL_TERMS, DEFAULT_SELF_HARM_TERMS};
use transcript_rag_core::store::memory::FlatIndex;
use transcript_rag_core::store::VectorIndex;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::index_file;
use crate::ingest::load_parent_store;
use crate::llm::create_synthesizer;

/// Everything needed to serve queries.
pub struct Runtime {
    pub engine: Arc<AnswerEngine>,
    pub pipeline: Arc<RetrievalPipeline>,
    pub core: Arc<FlatIndex>,
    pub longtail: Option<Arc<FlatIndex>>,
    pub parents: Arc<ParentStore>,
    pub embedding_model: String,
}

impl Runtime {
    /// Load indexes and build providers from `config`.
    pub fn load(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding, config.index.dims)?;
        let synthesizer = create_synthesizer(&config.llm)?;
        Self::with_providers(config, embedder, synthesizer)
    }

    /// Like [`Runtime::load`] with caller-supplied providers.
    pub fn with_providers(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        synthesizer: Option<Arc<dyn Synthesizer>>,
    ) -> Result<Self> {
        let dims = config.index.dims;
        let core_path = config.core_index_path();
        if !index_file::exists(&core_path) {
            bail!(
                "No index found at {}. Run `trag index build` first.",
                core_path.display()
            );
        }
        let core = Arc::new(index_file::load_index(&core_path, dims)?);

        let longtail_path = config.longtail_index_path();
        let longtail = if index_file::exists(&longtail_path) {
            Some(Arc::new(index_file::load_index(&longtail_path, dims)?))
        } else {
            info!(path = %longtail_path.display(), "no longtail index; core only");
            None
        };

        let parents = Arc::new(load_parent_store(config)?);
        let embedding_model = embedder.model_name().to_string();

        let pipeline = Arc::new(
            RetrievalPipeline::new(
                embedder,
                core.clone() as Arc<dyn VectorIndex>,
                longtail.clone().map(|l| l as Arc<dyn VectorIndex>),
                parents.clone(),
            )
            .with_params(config.retrieval.params()),
        );

        let engine = Arc::new(build_engine(config, pipeline.clone(), synthesizer));

        Ok(Self {
            engine,
            pipeline,
            core,
            longtail,
            parents,
            embedding_model,
        })
    }

    pub async fn core_len(&self) -> usize {
        self.core.len().await
    }

    pub async fn longtail_len(&self) -> usize {
        match &self.longtail {
            Some(l) => l.len().await,
            None => 0,
        }
    }
}

/// Wire the answer engine's policy objects from configuration.
pub fn build_engine(
    config: &Config,
    pipeline: Arc<RetrievalPipeline>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
) -> AnswerEngine {
    let domain = &config.domain;
    let self_harm = or_defaults(&domain.self_harm_terms, DEFAULT_SELF_HARM_TERMS);
    let harmful = or_defaults(&domain.harmful_terms, DEFAULT_HARMFUL_TERMS);
    let safety = KeywordSafetyGuard::new(self_harm, harmful);
    let vocabulary = if domain.keywords.is_empty() {
        DomainVocabulary::default()
    } else {
        DomainVocabulary::new(&domain.keywords)
    };

    let sessions = Arc::new(SessionStore::new(
        config.memory.session_config(),
        Arc::new(SystemClock),
    ));

    AnswerEngine::new(pipeline, Arc::new(safety), synthesizer, sessions)
        .with_scorer(ConfidenceScorer::new(config.confidence.thresholds()))
        .with_vocabulary(vocabulary)
        .with_config(EngineConfig {
            context: config.context.policy(),
            use_query_expansion: config.retrieval.use_query_expansion,
            cache_max_entries: config.cache.max_entries,
            ..EngineConfig::default()
        })
}

fn or_defaults(configured: &[String], defaults: &[&str]) -> Vec<String> {
    if configured.is_empty() {
        defaults.iter().map(|s| s.to_string()).collect()
    } else {
        configured.to_vec()
    }
}
