//! On-disk index layout.
//!
//! Each tier is persisted as a pair of files that must be saved and loaded
//! together:
//!
//! | File | Contents |
//! |------|----------|
//! | `<name>.index` | header + row-major little-endian f32 vectors |
//! | `<name>.meta` | JSON array of [`VectorMetadata`], one per vector |
//!
//! Vector `i` in the index file belongs to metadata record `i`. The header
//! stores the vector count and the SHA-256 of the metadata file, so a pair
//! whose halves come from different builds is rejected with
//! [`RagError::Integrity`] instead of silently returning wrong citations.
//!
//! Header (little-endian):
//!
//! ```text
//! magic    8 bytes  "TRAGIDX1"
//! version  u32      1
//! dims     u32
//! count    u64
//! meta     32 bytes SHA-256 of <name>.meta
//! ```
//!
//! The build also writes `parents.json` (parent text cache for expansion
//! when the corpus is not available at serving time) and `manifest.json`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use transcript_rag_core::embedding::{blob_to_vec, vec_to_blob};
use transcript_rag_core::models::VectorMetadata;
use transcript_rag_core::parents::ParentStore;
use transcript_rag_core::store::memory::FlatIndex;
use transcript_rag_core::RagError;

const MAGIC: &[u8; 8] = b"TRAGIDX1";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 8 + 4 + 4 + 8 + 32;

pub fn index_file(stem: &Path) -> PathBuf {
    with_suffix(stem, "index")
}

pub fn meta_file(stem: &Path) -> PathBuf {
    with_suffix(stem, "meta")
}

fn with_suffix(stem: &Path, ext: &str) -> PathBuf {
    let mut s = stem.as_os_str().to_os_string();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

/// Whether both halves of an index pair exist.
pub fn exists(stem: &Path) -> bool {
    index_file(stem).is_file() && meta_file(stem).is_file()
}

/// Write `index` as `<stem>.index` + `<stem>.meta`.
pub fn save_index(index: &FlatIndex, dims: usize, stem: &Path) -> Result<()> {
    if let Some(dir) = stem.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create index directory: {}", dir.display()))?;
    }

    let (vectors, metadata) = index.snapshot();
    let meta_bytes = serde_json::to_vec(&metadata)?;
    let digest = Sha256::digest(&meta_bytes);

    let mut out = Vec::with_capacity(HEADER_LEN + vectors.len() * dims * 4);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(dims as u32).to_le_bytes());
    out.extend_from_slice(&(vectors.len() as u64).to_le_bytes());
    out.extend_from_slice(&digest);
    for v in &vectors {
        if v.len() != dims {
            return Err(RagError::DimensionMismatch {
                expected: dims,
                got: v.len(),
            }
            .into());
        }
        out.extend_from_slice(&vec_to_blob(v));
    }

    let meta_path = meta_file(stem);
    std::fs::write(&meta_path, &meta_bytes)
        .with_context(|| format!("Failed to write {}", meta_path.display()))?;
    let index_path = index_file(stem);
    std::fs::write(&index_path, &out)
        .with_context(|| format!("Failed to write {}", index_path.display()))?;
    Ok(())
}

/// Load an index pair, verifying header, checksum and alignment.
///
/// `expected_dims` is the configured dimensionality; a file built for a
/// different model fails with [`RagError::DimensionMismatch`].
pub fn load_index(stem: &Path, expected_dims: usize) -> Result<FlatIndex> {
    let index_path = index_file(stem);
    let meta_path = meta_file(stem);
    let bytes = std::fs::read(&index_path)
        .with_context(|| format!("Failed to read {}", index_path.display()))?;
    let meta_bytes = std::fs::read(&meta_path)
        .with_context(|| format!("Failed to read {}", meta_path.display()))?;

    let integrity = |msg: String| RagError::Integrity(format!("{}: {}", index_path.display(), msg));

    if bytes.len() < HEADER_LEN || &bytes[..8] != MAGIC {
        return Err(integrity("not a transcript index file".into()).into());
    }
    let version = u32::from_le_bytes(read_array(&bytes[8..12]));
    if version != FORMAT_VERSION {
        return Err(integrity(format!("unsupported format version {}", version)).into());
    }
    let dims = u32::from_le_bytes(read_array(&bytes[12..16])) as usize;
    let count = u64::from_le_bytes(read_array(&bytes[16..24])) as usize;
    let stored_digest = &bytes[24..HEADER_LEN];

    if dims != expected_dims {
        return Err(RagError::DimensionMismatch {
            expected: expected_dims,
            got: dims,
        }
        .into());
    }
    if Sha256::digest(&meta_bytes).as_slice() != stored_digest {
        return Err(integrity(format!(
            "{} does not belong to this index (checksum mismatch)",
            meta_path.display()
        ))
        .into());
    }

    let body = &bytes[HEADER_LEN..];
    if body.len() != count * dims * 4 {
        return Err(integrity(format!(
            "expected {} bytes of vector data, found {}",
            count * dims * 4,
            body.len()
        ))
        .into());
    }

    let metadata: Vec<VectorMetadata> = serde_json::from_slice(&meta_bytes)
        .map_err(|e| integrity(format!("invalid metadata: {}", e)))?;
    let vectors: Vec<Vec<f32>> = if dims == 0 {
        Vec::new()
    } else {
        body.chunks_exact(dims * 4).map(blob_to_vec).collect()
    };

    Ok(FlatIndex::from_parts(dims, vectors, metadata)?)
}

fn read_array<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    out
}

#[derive(Debug, Serialize, Deserialize)]
struct ParentCacheEntry {
    document_id: String,
    parent_id: String,
    text: String,
}

/// Persist the parent text cache.
pub fn save_parent_cache(parents: &ParentStore, path: &Path) -> Result<()> {
    let entries: Vec<ParentCacheEntry> = parents
        .build_cache_entries()
        .into_iter()
        .map(|(document_id, parent_id, text)| ParentCacheEntry {
            document_id,
            parent_id,
            text,
        })
        .collect();
    let json = serde_json::to_vec_pretty(&entries)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Load a parent text cache into `parents`. Returns the number of entries.
pub fn load_parent_cache(parents: &mut ParentStore, path: &Path) -> Result<usize> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let entries: Vec<ParentCacheEntry> = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    let n = entries.len();
    for e in entries {
        parents.cache_parent_text(&e.document_id, &e.parent_id, e.text);
    }
    Ok(n)
}

/// Summary of one build, written next to the index files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildManifest {
    pub built_at: DateTime<Utc>,
    pub embedding_model: String,
    pub dims: usize,
    pub tiering: String,
    pub episodes: usize,
    pub parents: usize,
    pub core_vectors: usize,
    pub longtail_vectors: usize,
    pub skipped_chunks: usize,
}

pub fn manifest_path(dir: &Path) -> PathBuf {
    dir.join("manifest.json")
}

pub fn save_manifest(manifest: &BuildManifest, dir: &Path) -> Result<()> {
    let path = manifest_path(dir);
    std::fs::write(&path, serde_json::to_vec_pretty(manifest)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn load_manifest(dir: &Path) -> Result<Option<BuildManifest>> {
    let path = manifest_path(dir);
    if !path.is_file() {
        return Ok(None);
    }
    let bytes = std::fs::read(&path)?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}
