//! Parent chunk store.
//!
//! Maps a `(document_id, parent_id)` key to the full, untruncated parent
//! text plus the display metadata needed for citations. Populated from the
//! corpus before serving and read-only afterwards.
//!
//! A secondary text cache holds parent text captured at index-build time.
//! Parent expansion consults it when the primary lookup misses.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::models::{Chunk, Episode, ParentChunk};
use crate::RagError;

/// What a [`ParentStore::lookup`] returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentRecord {
    pub text: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub title: Option<String>,
    pub guest: Option<String>,
}

/// Parent text found for expansion, and where it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Expansion<'a> {
    Store(&'a ParentRecord),
    BuildCache(&'a str),
}

impl Expansion<'_> {
    pub fn text(&self) -> &str {
        match self {
            Expansion::Store(rec) => &rec.text,
            Expansion::BuildCache(text) => text,
        }
    }
}

type Key = (String, String);

#[derive(Debug, Default)]
pub struct ParentStore {
    parents: HashMap<Key, ParentRecord>,
    build_cache: HashMap<Key, String>,
}

impl ParentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an episode's parents after validating its children against them.
    ///
    /// Nothing is inserted if validation fails.
    pub fn insert_episode(
        &mut self,
        episode: &Episode,
        parents: &[ParentChunk],
        children: &[Chunk],
    ) -> Result<(), RagError> {
        validate_episode(episode, parents, children)?;
        for p in parents {
            self.parents.insert(
                (episode.id.clone(), p.id.clone()),
                ParentRecord {
                    text: p.text.clone(),
                    start_seconds: p.start_seconds,
                    end_seconds: p.end_seconds,
                    title: episode.title.clone(),
                    guest: episode.guest.clone(),
                },
            );
        }
        Ok(())
    }

    pub fn lookup(&self, document_id: &str, parent_id: &str) -> Option<&ParentRecord> {
        self.parents
            .get(&(document_id.to_string(), parent_id.to_string()))
    }

    /// Record parent text captured during index build.
    pub fn cache_parent_text(&mut self, document_id: &str, parent_id: &str, text: String) {
        self.build_cache
            .insert((document_id.to_string(), parent_id.to_string()), text);
    }

    pub fn cached_text(&self, document_id: &str, parent_id: &str) -> Option<&str> {
        self.build_cache
            .get(&(document_id.to_string(), parent_id.to_string()))
            .map(String::as_str)
    }

    /// Full parent text for expansion: the store first, then the build cache.
    pub fn expansion(&self, document_id: &str, parent_id: &str) -> Result<Expansion<'_>, RagError> {
        if let Some(rec) = self.lookup(document_id, parent_id) {
            return Ok(Expansion::Store(rec));
        }
        self.cached_text(document_id, parent_id)
            .map(Expansion::BuildCache)
            .ok_or_else(|| RagError::NotFound(format!("parent {}/{}", document_id, parent_id)))
    }

    /// Export the build cache as `(document_id, parent_id, text)` triples,
    /// sorted for stable output.
    pub fn build_cache_entries(&self) -> Vec<(String, String, String)> {
        let mut out: Vec<_> = self
            .build_cache
            .iter()
            .map(|((d, p), t)| (d.clone(), p.clone(), t.clone()))
            .collect();
        out.sort();
        out
    }

    /// Number of parents in the primary store.
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn cached_len(&self) -> usize {
        self.build_cache.len()
    }
}

/// Check parent uniqueness and child-to-parent resolution for one episode.
///
/// Any failure is a [`RagError::Integrity`]: duplicate parent ids, a parent
/// or child claiming a different document, or a child whose `parent_id`
/// does not name a parent of this episode.
pub fn validate_episode(
    episode: &Episode,
    parents: &[ParentChunk],
    children: &[Chunk],
) -> Result<(), RagError> {
    let mut ids = HashSet::with_capacity(parents.len());
    for p in parents {
        if p.document_id != episode.id {
            return Err(RagError::Integrity(format!(
                "parent {} belongs to document {} but was listed under {}",
                p.id, p.document_id, episode.id
            )));
        }
        if !ids.insert(p.id.as_str()) {
            return Err(RagError::Integrity(format!(
                "duplicate parent id {} in document {}",
                p.id, episode.id
            )));
        }
    }
    for c in children {
        if c.document_id != episode.id {
            return Err(RagError::Integrity(format!(
                "child {} belongs to document {} but was listed under {}",
                c.id, c.document_id, episode.id
            )));
        }
        if !ids.contains(c.parent_id.as_str()) {
            return Err(RagError::Integrity(format!(
                "child {} references missing parent {} in document {}",
                c.id, c.parent_id, episode.id
            )));
        }
    }
    Ok(())
}
