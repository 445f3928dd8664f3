//! `trag search`: retrieval without synthesis.
//!
//! Prints the ranked, parent-deduplicated results exactly as the answer
//! engine would receive them, before the confidence filter. Useful for
//! tuning thresholds against a real corpus.

use anyhow::Result;

use transcript_rag_core::context::{deep_link, format_timestamp};
use transcript_rag_core::pipeline::RetrieveOptions;

use crate::app::Runtime;
use crate::config::Config;

pub async fn run_search(
    config: &Config,
    query: &str,
    use_longtail: bool,
    expand: bool,
    limit: usize,
    json: bool,
) -> Result<()> {
    let runtime = Runtime::load(config)?;
    let opts = RetrieveOptions {
        use_longtail,
        use_query_expansion: expand,
        filter: None,
    };
    let mut results = runtime.pipeline.retrieve(query, &opts).await?;
    results.truncate(limit);

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, r) in results.iter().enumerate() {
        let doc = r.document_id.as_deref().unwrap_or("?");
        println!(
            "{}. [{:.3}] {} / {}",
            i + 1,
            r.score,
            r.tier,
            r.title.as_deref().unwrap_or(doc)
        );
        println!("    speaker: {}", r.speaker_name());
        println!("    at: {}", format_timestamp(r.start_seconds));
        if r.document_id.is_some() {
            println!("    url: {}", deep_link(doc, r.start_seconds));
        }
        println!("    excerpt: \"{}\"", r.text.replace('\n', " ").trim());
        println!(
            "    parent: {}",
            if r.parent_text.is_some() { "expanded" } else { "child only" }
        );
        println!("    id: {}", r.chunk_id);
        println!();
    }
    Ok(())
}
