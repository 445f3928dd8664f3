//! Two-tier retrieval with parent expansion and idea-level dedup.
//!
//! # Algorithm
//!
//! 1. Expand the query into variants (or use the query alone).
//! 2. Per variant, embed and search the core index. When fewer than
//!    `longtail_trigger_hits` core hits clear the score floor, or the
//!    caller asks for it, also search the longtail index.
//! 3. Merge all hits, keeping the first occurrence of each chunk id.
//! 4. Drop hits below `min_score_threshold`.
//! 5. Sort by score, descending.
//! 6. Attach full parent text: parent store, then build cache, then the
//!    child's own text.
//! 7. Keep the best result per `(document_id, parent_id)`. Results missing
//!    either id are dropped.
//! 8. Cap surviving results per document.
//! 9. Sort by score, descending.
//!
//! Steps 3–9 are exposed as pure functions so they can be tested without
//! an index.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::embedding::Embedder;
use crate::expand::QueryExpander;
use crate::models::{RetrievalResult, Tier};
use crate::parents::{Expansion, ParentStore};
use crate::store::{IndexHit, MetadataFilter, VectorIndex};
use crate::RagError;

/// Tunables for [`RetrievalPipeline::retrieve`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalParams {
    pub core_top_k: usize,
    pub longtail_top_k: usize,
    /// Recall floor applied to every hit.
    pub min_score_threshold: f32,
    /// Search longtail when fewer core hits than this clear the floor.
    pub longtail_trigger_hits: usize,
    pub max_per_document: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            core_top_k: 20,
            longtail_top_k: 10,
            min_score_threshold: 0.3,
            longtail_trigger_hits: 5,
            max_per_document: 5,
        }
    }
}

/// Per-call switches for [`RetrievalPipeline::retrieve`].
#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    pub use_longtail: bool,
    pub use_query_expansion: bool,
    pub filter: Option<MetadataFilter>,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            use_longtail: false,
            use_query_expansion: true,
            filter: None,
        }
    }
}

/// Anything that turns a query into ranked, parent-expanded results.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, opts: &RetrieveOptions) -> Result<Vec<RetrievalResult>>;
}

/// Orchestrates expander, embedder, both indexes and the parent store.
pub struct RetrievalPipeline {
    embedder: Arc<dyn Embedder>,
    core: Arc<dyn VectorIndex>,
    longtail: Option<Arc<dyn VectorIndex>>,
    parents: Arc<ParentStore>,
    expander: QueryExpander,
    params: RetrievalParams,
}

impl RetrievalPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        core: Arc<dyn VectorIndex>,
        longtail: Option<Arc<dyn VectorIndex>>,
        parents: Arc<ParentStore>,
    ) -> Self {
        Self {
            embedder,
            core,
            longtail,
            parents,
            expander: QueryExpander::default(),
            params: RetrievalParams::default(),
        }
    }

    pub fn with_params(mut self, params: RetrievalParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_expander(mut self, expander: QueryExpander) -> Self {
        self.expander = expander;
        self
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    pub fn parents(&self) -> &ParentStore {
        &self.parents
    }

    /// Run the full retrieval algorithm for one query.
    pub async fn retrieve(
        &self,
        query: &str,
        opts: &RetrieveOptions,
    ) -> Result<Vec<RetrievalResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::Validation("query must not be empty".into()).into());
        }

        let variants = if opts.use_query_expansion {
            self.expander.expand(query)
        } else {
            vec![query.to_string()]
        };

        let vectors = self.embedder.embed(&variants).await?;
        if vectors.len() != variants.len() {
            return Err(RagError::Upstream(format!(
                "embedder returned {} vectors for {} inputs",
                vectors.len(),
                variants.len()
            ))
            .into());
        }

        let p = &self.params;
        let filter = opts.filter.as_ref();
        let mut raw: Vec<(IndexHit, Tier)> = Vec::new();
        let mut longtail_searches = 0usize;

        for (variant, qv) in variants.iter().zip(vectors.iter()) {
            let core_hits = self.core.search(qv, p.core_top_k, filter).await?;
            let strong_hits = core_hits
                .iter()
                .filter(|h| h.score >= p.min_score_threshold)
                .count();
            debug!(variant = %variant, core = core_hits.len(), strong_hits, "core search");
            raw.extend(core_hits.into_iter().map(|h| (h, Tier::Core)));

            if opts.use_longtail || strong_hits < p.longtail_trigger_hits {
                if let Some(longtail) = &self.longtail {
                    let lt_hits = longtail.search(qv, p.longtail_top_k, filter).await?;
                    debug!(variant = %variant, longtail = lt_hits.len(), "longtail search");
                    longtail_searches += 1;
                    raw.extend(lt_hits.into_iter().map(|h| (h, Tier::Longtail)));
                }
            }
        }

        let raw_count = raw.len();
        let mut results = merge_hits(raw, p.min_score_threshold);
        let merged = results.len();

        let degraded = expand_parents(&mut results, &self.parents);
        let results = dedup_by_parent(results);
        let deduped = results.len();
        let mut results = cap_per_document(results, p.max_per_document);
        sort_by_score(&mut results);

        info!(
            variants = variants.len(),
            raw = raw_count,
            merged,
            deduped,
            returned = results.len(),
            longtail_searches,
            degraded_parents = degraded,
            "retrieval complete"
        );
        Ok(results)
    }
}

#[async_trait]
impl Retriever for RetrievalPipeline {
    async fn retrieve(&self, query: &str, opts: &RetrieveOptions) -> Result<Vec<RetrievalResult>> {
        RetrievalPipeline::retrieve(self, query, opts).await
    }
}

/// Merge hits in arrival order, first occurrence of a chunk id wins, then
/// drop anything under `min_score` and sort descending.
pub fn merge_hits(hits: Vec<(IndexHit, Tier)>, min_score: f32) -> Vec<RetrievalResult> {
    let mut seen = std::collections::HashSet::new();
    let mut results: Vec<RetrievalResult> = hits
        .into_iter()
        .filter(|(hit, _)| seen.insert(hit.id.clone()))
        .filter(|(hit, _)| hit.score >= min_score)
        .map(|(hit, tier)| RetrievalResult::from_hit(&hit, tier))
        .collect();
    sort_by_score(&mut results);
    results
}

/// Attach full parent text to every result with an idea key.
///
/// Returns how many results fell back to their own child text.
pub fn expand_parents(results: &mut [RetrievalResult], parents: &ParentStore) -> usize {
    let mut degraded = 0;
    for r in results.iter_mut() {
        let (doc, pid) = match (r.document_id.clone(), r.parent_id.clone()) {
            (Some(d), Some(p)) => (d, p),
            _ => continue,
        };
        match parents.expansion(&doc, &pid) {
            Ok(Expansion::Store(rec)) => {
                r.parent_text = Some(rec.text.clone());
                if r.title.is_none() {
                    r.title = rec.title.clone();
                }
                if r.guest.is_none() {
                    r.guest = rec.guest.clone();
                }
            }
            Ok(Expansion::BuildCache(text)) => r.parent_text = Some(text.to_string()),
            Err(e) => {
                warn!(
                    chunk_id = %r.chunk_id,
                    error = %e,
                    "using child text as context"
                );
                r.parent_text = Some(r.text.clone());
                degraded += 1;
            }
        }
    }
    degraded
}

/// Keep the highest-scoring result per `(document_id, parent_id)`.
///
/// Results missing either id are dropped. Output order follows the first
/// appearance of each key.
pub fn dedup_by_parent(results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
    let mut slot: HashMap<(String, String), usize> = HashMap::new();
    let mut out: Vec<RetrievalResult> = Vec::new();
    for r in results {
        let key = match r.idea_key() {
            Some((d, p)) => (d.to_string(), p.to_string()),
            None => continue,
        };
        match slot.get(&key) {
            Some(&i) => {
                if r.score > out[i].score {
                    out[i] = r;
                }
            }
            None => {
                slot.insert(key, out.len());
                out.push(r);
            }
        }
    }
    out
}

/// Keep at most `max_per_document` results per document, in input order.
pub fn cap_per_document(results: Vec<RetrievalResult>, max_per_document: usize) -> Vec<RetrievalResult> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    results
        .into_iter()
        .filter(|r| {
            let doc = r.document_id.clone().unwrap_or_default();
            let n = counts.entry(doc).or_insert(0);
            *n += 1;
            *n <= max_per_document
        })
        .collect()
}

/// Stable descending sort by score.
pub fn sort_by_score(results: &mut [RetrievalResult]) {
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
}
