//! Index statistics.
//!
//! Summarizes what `trag index build` produced: vector counts per tier,
//! parent coverage, file sizes and the build manifest.

use anyhow::Result;
use std::path::Path;

use transcript_rag_core::store::VectorIndex;

use crate::config::Config;
use crate::index_file;

/// Run the stats command: load the index files and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    println!("Transcript RAG — Index Stats");
    println!("============================");
    println!();
    println!("  Index dir:   {}", config.index.dir.display());

    for (label, stem) in [
        ("Core", config.core_index_path()),
        ("Longtail", config.longtail_index_path()),
    ] {
        if !index_file::exists(&stem) {
            println!("  {:<12} (missing)", format!("{}:", label));
            continue;
        }
        let index = index_file::load_index(&stem, config.index.dims)?;
        let size = file_size(&index_file::index_file(&stem)) + file_size(&index_file::meta_file(&stem));
        println!(
            "  {:<12} {} vectors ({})",
            format!("{}:", label),
            index.len().await,
            format_bytes(size)
        );
    }

    let parents = config.parents_path();
    if parents.is_file() {
        println!("  Parents:     {}", format_bytes(file_size(&parents)));
    }

    if let Some(m) = index_file::load_manifest(&config.index.dir)? {
        println!();
        println!("  Built:       {}", m.built_at.format("%Y-%m-%d %H:%M:%S UTC"));
        println!("  Model:       {} ({} dims)", m.embedding_model, m.dims);
        println!("  Tiering:     {}", m.tiering);
        println!("  Episodes:    {}", m.episodes);
        println!("  Parents:     {}", m.parents);
        println!("  Skipped:     {} chunks", m.skipped_chunks);
    }
    Ok(())
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
