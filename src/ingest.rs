//! Index build: episode JSON files → parent store + two vector indexes.
//!
//! Flow:
//!
//! ```text
//! *.json ─▶ parse ─▶ validate every episode ─▶ classify + tier ─▶ embed (batched)
//!                                                                     │
//!          <index dir>/{core,longtail}.index|.meta, parents.json ◀────┘
//! ```
//!
//! Validation of every episode happens before the first embedding call, so
//! a child that references a missing parent aborts the build with
//! [`RagError::Integrity`] without spending any embedding budget.
//!
//! Episode file shape:
//!
//! ```json
//! {
//!   "metadata": { "video_id": "…", "title": "…", "guest": "…", "topics": [] },
//!   "parent_chunks": [{ "id": "parent_0", "text": "…", "start_seconds": 0, "end_seconds": 360 }],
//!   "child_chunks": [{ "id": "child_0", "parent_id": "parent_0", "text": "…",
//!                      "start_seconds": 0, "end_seconds": 30, "speaker": "…",
//!                      "enriched_text": "…" }]
//! }
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use transcript_rag_core::embedding::Embedder;
use transcript_rag_core::models::{Chunk, Episode, ParentChunk, Tier, VectorMetadata, VectorRecord};
use transcript_rag_core::parents::{validate_episode, ParentStore};
use transcript_rag_core::store::memory::FlatIndex;
use transcript_rag_core::store::VectorIndex;
use transcript_rag_core::tiering::{policy_from_name, ChunkClassifier, ClassificationStats};

use crate::config::Config;
use crate::index_file::{self, BuildManifest};

/// Aggregate file written by older chunkers; it duplicates the per-episode files.
const AGGREGATE_FILE: &str = "all_chunks.json";

#[derive(Debug, Deserialize)]
struct EpisodeFile {
    metadata: EpisodeMetadata,
    #[serde(default)]
    parent_chunks: Vec<RawParent>,
    #[serde(default)]
    child_chunks: Vec<RawChild>,
}

#[derive(Debug, Deserialize)]
struct EpisodeMetadata {
    video_id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    guest: Option<String>,
    #[serde(default)]
    publish_date: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawParent {
    id: String,
    text: String,
    start_seconds: f64,
    end_seconds: f64,
}

#[derive(Debug, Deserialize)]
struct RawChild {
    id: String,
    text: String,
    start_seconds: f64,
    end_seconds: f64,
    #[serde(default)]
    speaker: Option<String>,
    parent_id: String,
    #[serde(default)]
    enriched_text: Option<String>,
}

/// One parsed episode.
#[derive(Debug, Clone)]
pub struct LoadedEpisode {
    pub episode: Episode,
    pub parents: Vec<ParentChunk>,
    pub children: Vec<Chunk>,
    /// Text to embed per child: the enriched text when present.
    pub embed_texts: Vec<String>,
}

/// Parse one episode file. Child ids are namespaced by episode so they are
/// unique across the whole index.
pub fn parse_episode(json: &str) -> Result<LoadedEpisode> {
    let file: EpisodeFile = serde_json::from_str(json)?;
    let doc = file.metadata.video_id;

    let parents = file
        .parent_chunks
        .into_iter()
        .map(|p| ParentChunk {
            id: p.id,
            document_id: doc.clone(),
            text: p.text,
            start_seconds: p.start_seconds,
            end_seconds: p.end_seconds,
        })
        .collect();

    let mut children = Vec::with_capacity(file.child_chunks.len());
    let mut embed_texts = Vec::with_capacity(file.child_chunks.len());
    for c in file.child_chunks {
        embed_texts.push(
            c.enriched_text
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| c.text.clone()),
        );
        children.push(Chunk {
            id: format!("{}:{}", doc, c.id),
            document_id: doc.clone(),
            parent_id: c.parent_id,
            text: c.text,
            start_seconds: c.start_seconds,
            end_seconds: c.end_seconds,
            speaker: c.speaker,
        });
    }

    Ok(LoadedEpisode {
        episode: Episode {
            id: doc,
            title: file.metadata.title,
            guest: file.metadata.guest,
            publish_date: file.metadata.publish_date,
            topics: file.metadata.topics,
        },
        parents,
        children,
        embed_texts,
    })
}

/// Read every episode file under `dir`, sorted by path.
pub fn load_episodes(dir: &Path) -> Result<Vec<LoadedEpisode>> {
    let mut paths: Vec<_> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .filter(|p| p.file_name().and_then(|n| n.to_str()) != Some(AGGREGATE_FILE))
        .collect();
    paths.sort();

    let mut episodes = Vec::with_capacity(paths.len());
    for path in paths {
        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let episode =
            parse_episode(&json).with_context(|| format!("Failed to parse {}", path.display()))?;
        debug!(
            file = %path.display(),
            parents = episode.parents.len(),
            children = episode.children.len(),
            "loaded episode"
        );
        episodes.push(episode);
    }
    Ok(episodes)
}

/// Parent store for serving: every episode under `[corpus].chunks_dir` plus
/// the build's `parents.json` cache. Either source may be absent.
pub fn load_parent_store(config: &Config) -> Result<ParentStore> {
    let mut store = ParentStore::new();

    if config.corpus.chunks_dir.is_dir() {
        for loaded in load_episodes(&config.corpus.chunks_dir)? {
            store.insert_episode(&loaded.episode, &loaded.parents, &loaded.children)?;
        }
    } else {
        warn!(
            dir = %config.corpus.chunks_dir.display(),
            "chunks directory not found; parent expansion will rely on the build cache"
        );
    }

    let cache = config.parents_path();
    if cache.is_file() {
        let n = index_file::load_parent_cache(&mut store, &cache)?;
        debug!(entries = n, "loaded parent cache");
    }

    info!(parents = store.len(), cached = store.cached_len(), "parent store ready");
    Ok(store)
}

/// Outcome of [`build_index`].
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub manifest: BuildManifest,
    pub classification: ClassificationStats,
}

/// Build both indexes from `[corpus].chunks_dir` and save them under
/// `[index].dir`.
pub async fn build_index(config: &Config, embedder: Arc<dyn Embedder>) -> Result<BuildReport> {
    let episodes = load_episodes(&config.corpus.chunks_dir)?;
    build_from_episodes(config, embedder, episodes).await
}

pub async fn build_from_episodes(
    config: &Config,
    embedder: Arc<dyn Embedder>,
    episodes: Vec<LoadedEpisode>,
) -> Result<BuildReport> {
    let dims = config.index.dims;
    let policy = policy_from_name(&config.corpus.tiering)
        .ok_or_else(|| anyhow::anyhow!("Unknown tiering policy: {}", config.corpus.tiering))?;
    let classifier = ChunkClassifier::default();

    for loaded in &episodes {
        validate_episode(&loaded.episode, &loaded.parents, &loaded.children)?;
    }

    let mut parents = ParentStore::new();
    let mut classification = ClassificationStats::default();
    let mut pending: Vec<(String, VectorMetadata)> = Vec::new();

    for loaded in &episodes {
        parents.insert_episode(&loaded.episode, &loaded.parents, &loaded.children)?;
        for p in &loaded.parents {
            parents.cache_parent_text(&loaded.episode.id, &p.id, p.text.clone());
        }

        for (child, embed_text) in loaded.children.iter().zip(&loaded.embed_texts) {
            let kind = classifier.classify(&child.text);
            classification.record(kind);
            if let Some(tier) = policy.tier_for(kind) {
                pending.push((
                    embed_text.clone(),
                    VectorMetadata::for_chunk(child, &loaded.episode, tier),
                ));
            }
        }
    }

    info!(
        episodes = episodes.len(),
        chunks = classification.total,
        embeddable = pending.len(),
        policy = policy.name(),
        "classified chunks"
    );

    let core = FlatIndex::new(dims);
    let longtail = FlatIndex::new(dims);
    let batch_size = config.embedding.batch_size.max(1);

    std::fs::create_dir_all(&config.index.dir).with_context(|| {
        format!("Failed to create index directory: {}", config.index.dir.display())
    })?;
    index_file::save_parent_cache(&parents, &config.parents_path())?;

    for batch in pending.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|(t, _)| t.clone()).collect();
        let vectors = embedder.embed(&texts).await?;
        if vectors.len() != batch.len() {
            anyhow::bail!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                batch.len()
            );
        }

        let mut core_records = Vec::new();
        let mut longtail_records = Vec::new();
        for ((_, metadata), vector) in batch.iter().zip(vectors) {
            let record = VectorRecord {
                id: metadata.chunk_id.clone(),
                vector,
                metadata: metadata.clone(),
            };
            match metadata.tier {
                Tier::Core => core_records.push(record),
                Tier::Longtail => longtail_records.push(record),
            }
        }
        core.upsert(core_records).await?;
        longtail.upsert(longtail_records).await?;
        // Persist every batch so a failed build keeps what was embedded.
        index_file::save_index(&core, dims, &config.core_index_path())?;
        index_file::save_index(&longtail, dims, &config.longtail_index_path())?;
        debug!(embedded = batch.len(), "embedded and saved batch");
    }

    if pending.is_empty() {
        index_file::save_index(&core, dims, &config.core_index_path())?;
        index_file::save_index(&longtail, dims, &config.longtail_index_path())?;
    }

    let manifest = BuildManifest {
        built_at: chrono::Utc::now(),
        embedding_model: embedder.model_name().to_string(),
        dims,
        tiering: policy.name().to_string(),
        episodes: episodes.len(),
        parents: parents.len(),
        core_vectors: core.len().await,
        longtail_vectors: longtail.len().await,
        skipped_chunks: classification.total - classification.embeddable,
    };
    index_file::save_manifest(&manifest, &config.index.dir)?;

    info!(
        core = manifest.core_vectors,
        longtail = manifest.longtail_vectors,
        parents = manifest.parents,
        "index build complete"
    );

    Ok(BuildReport {
        manifest,
        classification,
    })
}

/// CLI entry point for `trag index build`.
pub async fn run_index_build(config: &Config, embedder: Arc<dyn Embedder>, dry_run: bool) -> Result<()> {
    if dry_run {
        let episodes = load_episodes(&config.corpus.chunks_dir)?;
        for loaded in &episodes {
            validate_episode(&loaded.episode, &loaded.parents, &loaded.children)?;
        }
        let chunks: usize = episodes.iter().map(|e| e.children.len()).sum();
        println!("index build (dry-run)");
        println!("  episodes: {}", episodes.len());
        println!("  child chunks: {}", chunks);
        println!("ok");
        return Ok(());
    }

    let report = build_index(config, embedder).await?;
    let m = &report.manifest;
    let c = &report.classification;
    println!("index build");
    println!("  episodes: {}", m.episodes);
    println!("  parents: {}", m.parents);
    println!(
        "  chunks: {} (content {}, anecdote {}, meta {}, sponsor {}, banter {})",
        c.total, c.content, c.anecdote, c.meta, c.sponsor, c.banter
    );
    println!("  core vectors: {}", m.core_vectors);
    println!("  longtail vectors: {}", m.longtail_vectors);
    println!("  model: {} ({} dims)", m.embedding_model, m.dims);
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use tempfile::TempDir;
    use transcript_rag_core::RagError;

    const EPISODE: &str = r#"{
        "metadata": { "video_id": "ep1", "title": "Prioritization", "guest": "Shreyas Doshi", "topics": ["strategy"] },
        "parent_chunks": [
            { "id": "parent_0", "text": "The whole five minute window about prioritizing work.", "start_seconds": 0, "end_seconds": 360 }
        ],
        "child_chunks": [
            { "id": "child_0", "parent_id": "parent_0", "text": "You should prioritize by impact first.",
              "start_seconds": 12, "end_seconds": 40, "enriched_text": "Prioritization: You should prioritize by impact first." },
            { "id": "child_1", "parent_id": "parent_0", "text": "This episode is brought to you by Acme.",
              "start_seconds": 40, "end_seconds": 70 }
        ]
    }"#;

    fn config(tmp: &TempDir) -> Config {
        let mut config = Config::default();
        config.index.dir = tmp.path().join("index");
        config.index.dims = 32;
        config.corpus.chunks_dir = tmp.path().join("chunks");
        config
    }

    #[test]
    fn test_parse_episode_namespaces_children() {
        let loaded = parse_episode(EPISODE).unwrap();
        assert_eq!(loaded.episode.id, "ep1");
        assert_eq!(loaded.children[0].id, "ep1:child_0");
        assert_eq!(loaded.children[0].parent_id, "parent_0");
        assert!(loaded.embed_texts[0].starts_with("Prioritization:"));
        assert_eq!(loaded.embed_texts[1], loaded.children[1].text);
    }

    #[test]
    fn test_load_episodes_skips_aggregate_file() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("ep1.json"), EPISODE).unwrap();
        std::fs::write(tmp.path().join(AGGREGATE_FILE), "[]").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();
        assert_eq!(load_episodes(tmp.path()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_build_skips_sponsor_and_saves_pair() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);
        let report = build_from_episodes(
            &config,
            Arc::new(HashEmbedder::new(32)),
            vec![parse_episode(EPISODE).unwrap()],
        )
        .await
        .unwrap();

        assert_eq!(report.classification.sponsor, 1);
        assert_eq!(report.manifest.core_vectors, 1);
        assert_eq!(report.manifest.skipped_chunks, 1);
        assert!(index_file::exists(&config.core_index_path()));
        assert!(index_file::exists(&config.longtail_index_path()));

        let core = index_file::load_index(&config.core_index_path(), 32).unwrap();
        assert_eq!(core.len().await, 1);
    }

    #[tokio::test]
    async fn test_missing_parent_aborts_before_embedding() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);
        let mut loaded = parse_episode(EPISODE).unwrap();
        loaded.children[0].parent_id = "parent_9".into();

        let err = build_from_episodes(&config, Arc::new(HashEmbedder::new(32)), vec![loaded])
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::Integrity(_))
        ));
        assert!(!config.index.dir.exists());
    }

    #[tokio::test]
    async fn test_parent_store_falls_back_to_cache() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);
        build_from_episodes(
            &config,
            Arc::new(HashEmbedder::new(32)),
            vec![parse_episode(EPISODE).unwrap()],
        )
        .await
        .unwrap();

        let store = load_parent_store(&config).unwrap();
        assert!(store.is_empty());
        assert!(store.cached_text("ep1", "parent_0").is_some());
    }

    struct FailsOnSecondBatch {
        inner: HashEmbedder,
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Embedder for FailsOnSecondBatch {
        fn model_name(&self) -> &str {
            "hash"
        }
        fn dims(&self) -> usize {
            self.inner.dims()
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call == 1 {
                anyhow::bail!("upstream unavailable");
            }
            self.inner.embed(texts).await
        }
    }

    #[tokio::test]
    async fn test_failed_build_keeps_earlier_batches() {
        let tmp = TempDir::new().unwrap();
        let mut config = config(&tmp);
        config.embedding.batch_size = 1;
        let episode = r#"{
            "metadata": { "video_id": "ep2", "title": "Roadmaps" },
            "parent_chunks": [
                { "id": "parent_0", "text": "Roadmaps and metrics.", "start_seconds": 0, "end_seconds": 360 }
            ],
            "child_chunks": [
                { "id": "child_0", "parent_id": "parent_0", "text": "You should prioritize features by customer impact.", "start_seconds": 0, "end_seconds": 30 },
                { "id": "child_1", "parent_id": "parent_0", "text": "You should pick one metric and focus the team on moving it.", "start_seconds": 30, "end_seconds": 60 }
            ]
        }"#;
        let embedder = Arc::new(FailsOnSecondBatch {
            inner: HashEmbedder::new(32),
            calls: Default::default(),
        });

        let result = build_from_episodes(&config, embedder, vec![parse_episode(episode).unwrap()]).await;
        assert!(result.is_err());

        let core = index_file::load_index(&config.core_index_path(), 32).unwrap();
        assert_eq!(core.len().await, 1);
        assert!(config.parents_path().exists());
        assert!(index_file::load_manifest(&config.index.dir).unwrap().is_none());
    }
}
