//! `trag ask`: answer one question from the command line.

use anyhow::Result;

use transcript_rag_core::engine::{QueryRequest, QueryResponse, SynthesisDepth};

use crate::app::Runtime;
use crate::config::Config;

pub async fn run_ask(
    config: &Config,
    query: &str,
    session: Option<String>,
    use_longtail: bool,
    deep: bool,
    json: bool,
) -> Result<()> {
    let runtime = Runtime::load(config)?;
    let request = QueryRequest {
        query: query.to_string(),
        session_id: session,
        use_longtail,
        depth: if deep {
            SynthesisDepth::Deep
        } else {
            SynthesisDepth::Fast
        },
    };
    let response = runtime.engine.answer(request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }
    Ok(())
}

fn print_response(r: &QueryResponse) {
    println!(
        "mode: {}  confidence: {}  session: {}",
        r.mode,
        r.confidence.as_str(),
        r.session_id
    );
    if r.synthesis_failed {
        println!("(synthesis unavailable; showing retrieved sources)");
    }
    println!();
    println!("{}", r.answer.direct_answer);

    if !r.answer.key_ideas.is_empty() {
        println!();
        println!("Key Ideas");
        for idea in &r.answer.key_ideas {
            println!("  • {}", idea);
        }
    }
    if !r.answer.common_pitfall.is_empty() {
        println!();
        println!("Common Pitfall");
        println!("  {}", r.answer.common_pitfall);
    }
    if !r.answer.summary.is_empty() {
        println!();
        println!("Summary");
        println!("  {}", r.answer.summary);
    }

    if !r.sources.is_empty() {
        println!();
        println!("Sources");
        for s in &r.sources {
            println!(
                "  [{}] {} / {} @ {} ({:.2})",
                s.source_num, s.speaker, s.title, s.timestamp, s.score
            );
            println!("      {}", s.url);
        }
    }

    if !r.follow_ups.is_empty() {
        println!();
        println!("Follow-ups");
        for q in &r.follow_ups {
            println!("  - {}", q);
        }
    }
}
