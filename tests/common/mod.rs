//! Shared fixtures: an embedder with a fixed query table and a corpus
//! builder that places each chunk at an exact cosine score from the query.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use transcript_rag_core::embedding::Embedder;
use transcript_rag_core::models::{Chunk, Episode, ParentChunk, Tier, VectorMetadata, VectorRecord};
use transcript_rag_core::parents::ParentStore;
use transcript_rag_core::store::memory::FlatIndex;
use transcript_rag_core::store::VectorIndex;

pub const DIMS: usize = 8;

/// Unit vector along the first axis. Every known query embeds to this.
pub fn query_vector() -> Vec<f32> {
    let mut v = vec![0.0; DIMS];
    v[0] = 1.0;
    v
}

/// A unit vector whose cosine with [`query_vector`] is exactly `score`.
pub fn vector_at(score: f32, axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIMS];
    v[0] = score;
    v[1 + axis % (DIMS - 1)] = (1.0 - score * score).max(0.0).sqrt();
    v
}

/// Embeds listed queries to [`query_vector`], everything else to an
/// orthogonal axis, and counts calls.
#[derive(Default)]
pub struct TableEmbedder {
    known: Vec<String>,
    pub calls: AtomicUsize,
}

impl TableEmbedder {
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(queries: I) -> Self {
        Self {
            known: queries.into_iter().map(Into::into).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for TableEmbedder {
    fn model_name(&self) -> &str {
        "table"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                if self.known.iter().any(|k| k == t) {
                    query_vector()
                } else {
                    let mut v = vec![0.0; DIMS];
                    v[DIMS - 1] = 1.0;
                    v
                }
            })
            .collect())
    }
}

/// One child chunk placed at a fixed score.
#[derive(Debug, Clone)]
pub struct Placed {
    pub doc: &'static str,
    pub parent: &'static str,
    pub child: &'static str,
    pub score: f32,
    pub tier: Tier,
}

pub fn core(doc: &'static str, parent: &'static str, child: &'static str, score: f32) -> Placed {
    Placed {
        doc,
        parent,
        child,
        score,
        tier: Tier::Core,
    }
}

pub fn longtail(doc: &'static str, parent: &'static str, child: &'static str, score: f32) -> Placed {
    Placed {
        tier: Tier::Longtail,
        ..core(doc, parent, child, score)
    }
}

pub fn parent_text(doc: &str, parent: &str) -> String {
    format!("Full parent window {} of episode {}.", parent, doc)
}

pub struct Corpus {
    pub core: Arc<FlatIndex>,
    pub longtail: Arc<FlatIndex>,
    pub parents: Arc<ParentStore>,
}

/// Build both indexes and a parent store holding every referenced parent.
pub async fn corpus(placed: &[Placed]) -> Corpus {
    let mut episodes: BTreeMap<&str, (Vec<ParentChunk>, Vec<Chunk>)> = BTreeMap::new();
    let mut seen_parents: HashMap<(&str, &str), ()> = HashMap::new();
    let mut core_records = Vec::new();
    let mut longtail_records = Vec::new();

    for (i, p) in placed.iter().enumerate() {
        let entry = episodes.entry(p.doc).or_default();
        if seen_parents.insert((p.doc, p.parent), ()).is_none() {
            entry.0.push(ParentChunk {
                id: p.parent.into(),
                document_id: p.doc.into(),
                text: parent_text(p.doc, p.parent),
                start_seconds: 0.0,
                end_seconds: 360.0,
            });
        }
        let chunk = Chunk {
            id: p.child.into(),
            document_id: p.doc.into(),
            parent_id: p.parent.into(),
            text: format!("child {} text", p.child),
            start_seconds: 30.0 * i as f64,
            end_seconds: 30.0 * (i + 1) as f64,
            speaker: None,
        };
        let episode = episode(p.doc);
        let record = VectorRecord {
            id: chunk.id.clone(),
            vector: vector_at(p.score, i),
            metadata: VectorMetadata::for_chunk(&chunk, &episode, p.tier),
        };
        match p.tier {
            Tier::Core => core_records.push(record),
            Tier::Longtail => longtail_records.push(record),
        }
        entry.1.push(chunk);
    }

    let mut parents = ParentStore::new();
    for (doc, (ps, cs)) in &episodes {
        parents
            .insert_episode(&episode(doc), ps, cs)
            .expect("fixture episodes are consistent");
    }

    let core = FlatIndex::new(DIMS);
    core.upsert(core_records).await.unwrap();
    let longtail = FlatIndex::new(DIMS);
    longtail.upsert(longtail_records).await.unwrap();

    Corpus {
        core: Arc::new(core),
        longtail: Arc::new(longtail),
        parents: Arc::new(parents),
    }
}

pub fn episode(doc: &str) -> Episode {
    Episode {
        id: doc.into(),
        title: Some(format!("Episode {}", doc)),
        guest: Some(format!("Guest {}", doc)),
        publish_date: None,
        topics: vec![],
    }
}
