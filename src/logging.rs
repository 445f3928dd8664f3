//! Tracing subscriber setup for the `trag` binary.
//!
//! `RUST_LOG` takes precedence over the default filter. Logs go to stderr
//! so command output on stdout stays machine-readable.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "transcript_rag=info,transcript_rag_core=info";

pub fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
