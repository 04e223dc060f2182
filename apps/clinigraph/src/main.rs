//! # Clinigraph
//!
//! Command-line front end for the clinigraph identity and normalization
//! engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │          apps/clinigraph (THE BINARY)          │
//! │                                                │
//! │  ┌─────────────┐        ┌──────────────────┐   │
//! │  │   CLI       │        │    Settings      │   │
//! │  │  (clap)     │        │ (clinigraph.toml)│   │
//! │  └──────┬──────┘        └────────┬─────────┘   │
//! │         └───────────┬────────────┘             │
//! │                     ▼                          │
//! │           ┌──────────────────┐                 │
//! │           │ clinigraph-core  │                 │
//! │           │   (THE LOGIC)    │                 │
//! │           └──────────────────┘                 │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! clinigraph init
//! clinigraph resolve --root-type http://smartplatforms.org/med#medication \
//!     --context http://localhost:7000/records/R1 -f meds.json
//! clinigraph normalize --record http://localhost:7000/records/R2 -f problems.json
//! clinigraph status --json-mode
//! ```

use clap::Parser;
use clinigraph::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // CLINIGRAPH_LOG_FORMAT=json enables machine-parseable output.
    let log_format =
        std::env::var("CLINIGRAPH_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "clinigraph=info".into());

    // Logs go to stderr so graph documents on stdout stay parseable.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if let Err(e) = cli::execute(cli) {
        tracing::error!(retryable = e.is_retryable(), "Error: {}", e);
        std::process::exit(1);
    }
}
