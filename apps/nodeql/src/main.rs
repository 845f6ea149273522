//! # nodeql
//!
//! Command line front-end of the schema-driven GraphQL client.
//!
//! ## Usage
//!
//! ```bash
//! # Validate a schema document
//! nodeql schema check schema.json
//!
//! # Print the query for a kind, no network involved
//! nodeql query render schema.json InfraSite --filter name__value=paris --depth 2
//!
//! # Talk to a server (address and token from nodeql.toml / NODEQL_*)
//! nodeql --config nodeql.toml get schema.json InfraSite --id 1799f3ab
//! nodeql diff feature-1
//! ```

use clap::Parser;
use nodeql::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // NODEQL_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("NODEQL_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "nodeql=info,nodeql_core=info".into());

    // Logs go to stderr so command output stays pipeable.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
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

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
