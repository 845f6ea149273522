//! # nodeql CLI Module
//!
//! This module implements the CLI interface for nodeql.
//!
//! ## Available Commands
//!
//! - `schema check` - Load a schema document and report its kinds
//! - `query render` - Print the GraphQL text for a read (no network)
//! - `get` - Fetch one node from a live server
//! - `diff` - Print the change summary of a branch

mod commands;

use crate::config::AppConfig;
use crate::error::AppError;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// nodeql - schema-driven GraphQL client
#[derive(Parser, Debug)]
#[command(name = "nodeql")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Schema document operations
    Schema {
        #[command(subcommand)]
        action: SchemaAction,
    },

    /// Query construction
    Query {
        #[command(subcommand)]
        action: QueryAction,
    },

    /// Fetch a single node from the server
    Get(GetArgs),

    /// Show the change summary of a branch
    Diff {
        /// Branch to summarize
        branch: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum SchemaAction {
    /// Load a schema document and list its kinds
    Check {
        /// Schema document (JSON)
        file: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub enum QueryAction {
    /// Print the query for a kind without sending it
    Render(RenderArgs),
}

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Schema document (JSON)
    pub schema: PathBuf,

    /// Node kind to query
    pub kind: String,

    /// Filter as key=value; values parse as JSON when they can
    #[arg(short, long = "filter")]
    pub filters: Vec<String>,

    /// Field path to include
    #[arg(short, long)]
    pub include: Vec<String>,

    /// Field path to exclude
    #[arg(short, long)]
    pub exclude: Vec<String>,

    /// Relationship depth
    #[arg(short, long)]
    pub depth: Option<usize>,

    /// First node of the page
    #[arg(long)]
    pub offset: Option<usize>,

    /// Page size
    #[arg(long)]
    pub limit: Option<usize>,

    /// Target branch
    #[arg(short, long)]
    pub branch: Option<String>,
}

#[derive(Args, Debug)]
pub struct GetArgs {
    /// Schema document (JSON)
    pub schema: PathBuf,

    /// Node kind to fetch
    pub kind: String,

    /// Node id
    #[arg(long)]
    pub id: Option<String>,

    /// Human friendly id component (repeat for each component)
    #[arg(long)]
    pub hfid: Vec<String>,

    /// Relationship depth
    #[arg(short, long)]
    pub depth: Option<usize>,

    /// Target branch
    #[arg(short, long)]
    pub branch: Option<String>,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), AppError> {
    let json_mode = cli.json_mode;

    match cli.command {
        Commands::Schema {
            action: SchemaAction::Check { file },
        } => cmd_schema_check(&file, json_mode),
        Commands::Query {
            action: QueryAction::Render(args),
        } => cmd_query_render(&args, json_mode),
        Commands::Get(args) => {
            let config = AppConfig::load(cli.config.as_deref())?;
            cmd_get(&config, &args, json_mode).await
        }
        Commands::Diff { branch } => {
            let config = AppConfig::load(cli.config.as_deref())?;
            cmd_diff(&config, &branch, json_mode).await
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn render_arguments_parse() {
        let cli = Cli::try_parse_from([
            "nodeql", "query", "render", "schema.json", "InfraSite", "--filter", "name__value=paris",
            "--include", "devices", "--offset", "10", "--limit", "5",
        ])
        .unwrap();
        let Commands::Query {
            action: QueryAction::Render(args),
        } = cli.command
        else {
            panic!("expected query render");
        };
        assert_eq!(args.kind, "InfraSite");
        assert_eq!(args.filters, vec!["name__value=paris"]);
        assert_eq!(args.include, vec!["devices"]);
        assert_eq!((args.offset, args.limit), (Some(10), Some(5)));
    }
}
