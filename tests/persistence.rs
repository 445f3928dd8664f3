//! Build → save → reload → answer, through the real index files.

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use transcript_rag::app::Runtime;
use transcript_rag::config::Config;
use transcript_rag::embedding::HashEmbedder;
use transcript_rag::index_file;
use transcript_rag::ingest::build_index;
use transcript_rag_core::embedding::Embedder;
use transcript_rag_core::engine::QueryRequest;
use transcript_rag_core::pipeline::RetrieveOptions;
use transcript_rag_core::router::AnswerMode;
use transcript_rag_core::RagError;

const DIMS: usize = 64;

const ROADMAP: &str = "You should prioritize features by the customer problem they solve, because a roadmap is a list of bets and not a list of promises.";
const METRICS: &str = "Pick one north star metric and explain why it matters, because teams that track everything end up improving nothing in particular.";
const STORY: &str = "I remember once at my first startup we shipped a feature nobody asked for and the whole experience taught me to talk to users before writing code.";

fn episode_json(video_id: &str) -> String {
    serde_json::json!({
        "metadata": {
            "video_id": video_id,
            "title": "Roadmaps that work",
            "guest": "Jane Doe",
            "topics": ["prioritization", "metrics"]
        },
        "parent_chunks": [
            { "id": "parent_0", "text": format!("{} {}", ROADMAP, METRICS), "start_seconds": 0.0, "end_seconds": 360.0 },
            { "id": "parent_1", "text": STORY, "start_seconds": 360.0, "end_seconds": 720.0 }
        ],
        "child_chunks": [
            { "id": "child_0", "parent_id": "parent_0", "text": ROADMAP, "start_seconds": 0.0, "end_seconds": 30.0, "speaker": "Jane Doe" },
            { "id": "child_1", "parent_id": "parent_0", "text": METRICS, "start_seconds": 30.0, "end_seconds": 60.0, "speaker": "Jane Doe" },
            { "id": "child_2", "parent_id": "parent_1", "text": STORY, "start_seconds": 360.0, "end_seconds": 390.0, "speaker": "Jane Doe" }
        ]
    })
    .to_string()
}

fn setup(root: &Path) -> Config {
    let chunks = root.join("chunks");
    std::fs::create_dir_all(&chunks).unwrap();
    std::fs::write(chunks.join("ep1.json"), episode_json("ep1")).unwrap();

    let mut config = Config::default();
    config.index.dir = root.join("index");
    config.index.dims = DIMS;
    config.corpus.chunks_dir = chunks;
    config.embedding.provider = "hash".into();
    config.retrieval.use_query_expansion = false;
    config
}

fn embedder() -> Arc<dyn Embedder> {
    Arc::new(HashEmbedder::new(DIMS))
}

#[tokio::test]
async fn built_index_reloads_and_retrieves_with_parent_text() {
    let tmp = TempDir::new().unwrap();
    let config = setup(tmp.path());

    let report = build_index(&config, embedder()).await.unwrap();
    assert_eq!(report.manifest.episodes, 1);
    assert_eq!(report.manifest.parents, 2);
    assert_eq!(report.classification.total, 3);
    assert_eq!(report.manifest.core_vectors, 2);
    assert_eq!(report.manifest.longtail_vectors, 1);

    let manifest = index_file::load_manifest(&config.index.dir).unwrap().unwrap();
    assert_eq!(manifest.embedding_model, "hash");
    assert_eq!(manifest.core_vectors, 2);

    let runtime = Runtime::with_providers(&config, embedder(), None).unwrap();
    assert_eq!(runtime.core_len().await, 2);
    assert_eq!(runtime.longtail_len().await, 1);
    assert_eq!(runtime.parents.cached_len(), 2);

    let opts = RetrieveOptions {
        use_query_expansion: false,
        ..RetrieveOptions::default()
    };
    let results = runtime.pipeline.retrieve(ROADMAP, &opts).await.unwrap();
    let top = &results[0];
    assert_eq!(top.chunk_id, "ep1:child_0");
    assert!((top.score - 1.0).abs() < 1e-4);
    assert_eq!(top.document_id.as_deref(), Some("ep1"));
    let parent = top.parent_text.as_deref().unwrap();
    assert!(parent.contains(METRICS));
    // child_1 shares the parent, so it cannot appear as a separate idea
    assert!(results.iter().all(|r| r.chunk_id != "ep1:child_1"));
}

#[tokio::test]
async fn reloaded_runtime_answers_from_sources_without_a_synthesizer() {
    let tmp = TempDir::new().unwrap();
    let config = setup(tmp.path());
    build_index(&config, embedder()).await.unwrap();

    let runtime = Runtime::with_providers(&config, embedder(), None).unwrap();
    let response = runtime.engine.answer(QueryRequest::new(ROADMAP)).await.unwrap();

    assert_eq!(response.mode, AnswerMode::Rag);
    assert!(response.synthesis_failed);
    assert!(!response.sources.is_empty());
    assert_eq!(response.sources[0].source_num, 1);
    assert_eq!(response.sources[0].document_id, "ep1");
    assert_eq!(response.turn_count, 2);
}

#[tokio::test]
async fn missing_index_asks_for_a_build() {
    let tmp = TempDir::new().unwrap();
    let config = setup(tmp.path());
    let err = Runtime::with_providers(&config, embedder(), None)
        .err()
        .unwrap()
        .to_string();
    assert!(err.contains("trag index build"), "{}", err);
}

#[tokio::test]
async fn loading_with_other_dims_is_a_dimension_mismatch() {
    let tmp = TempDir::new().unwrap();
    let mut config = setup(tmp.path());
    build_index(&config, embedder()).await.unwrap();

    config.index.dims = 32;
    let err = Runtime::with_providers(&config, Arc::new(HashEmbedder::new(32)), None)
        .err()
        .unwrap();
    assert!(matches!(
        err.downcast_ref::<RagError>(),
        Some(RagError::DimensionMismatch { expected: 32, got: 64 })
    ));
}

#[tokio::test]
async fn edited_metadata_sidecar_fails_integrity() {
    let tmp = TempDir::new().unwrap();
    let config = setup(tmp.path());
    build_index(&config, embedder()).await.unwrap();

    let meta = index_file::meta_file(&config.core_index_path());
    let mut text = std::fs::read_to_string(&meta).unwrap();
    text = text.replace("Roadmaps that work", "Roadmaps that fail");
    std::fs::write(&meta, text).unwrap();

    let err = Runtime::with_providers(&config, embedder(), None).err().unwrap();
    let rag = err.downcast_ref::<RagError>().unwrap();
    assert!(rag.is_integrity());
}
