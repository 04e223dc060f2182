//! # Clinigraph CLI Module
//!
//! This module implements the CLI interface for Clinigraph.
//!
//! ## Available Commands
//!
//! - `init` - Create a new database
//! - `status` - Show directory and triple counts
//! - `resolve` - Hash-resolve an entity tree and store it
//! - `normalize` - Mint identifiers for statements and store them
//! - `lookup` - Look up an identity hash or an external reference
//! - `alert` - Validate an alert document
//! - `types` - List the loaded ontology

mod commands;

use crate::settings::{Overrides, Settings};
use clap::{ArgGroup, Parser, Subcommand};
use clinigraph_core::ClinigraphError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Clinigraph - identity resolution for clinical RDF submissions
///
/// Gives anonymous nodes stable, content-derived identifiers and links
/// clinical statements to their medical record.
#[derive(Parser, Debug)]
#[command(name = "clinigraph")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Settings file (defaults to ./clinigraph.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the redb database
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Base address for minted identifiers
    #[arg(short = 'B', long, global = true)]
    pub base_url: Option<String>,

    /// Ontology TOML replacing the built-in one
    #[arg(short = 'O', long, global = true)]
    pub ontology: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new empty database
    Init {
        /// Replace an existing database
        #[arg(short, long)]
        force: bool,
    },

    /// Show directory and triple counts
    Status,

    /// Resolve the anonymous entity tree of a submission
    Resolve {
        /// Root semantic type IRI
        #[arg(short = 't', long)]
        root_type: String,

        /// Context IRI, usually the owning record
        #[arg(short, long)]
        context: String,

        /// Graph document to resolve
        #[arg(short, long)]
        file: PathBuf,

        /// Write the resolved graph here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Resolve without writing to the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Normalize statements and external references for a record
    Normalize {
        /// Record IRI the statements belong to
        #[arg(short, long)]
        record: String,

        /// Request path to extract placeholder values from (needs --type)
        #[arg(long, requires = "type_iri")]
        path: Option<String>,

        /// Semantic type whose template --path is matched against
        #[arg(long = "type", requires = "path")]
        type_iri: Option<String>,

        /// Extra placeholder binding, NAME=VALUE (repeatable)
        #[arg(long = "bind", value_name = "NAME=VALUE")]
        bind: Vec<String>,

        /// Graph document to normalize
        #[arg(short, long)]
        file: PathBuf,

        /// Write the normalized graph here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Normalize without writing to the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Look up an identity hash or an external reference
    #[command(group(ArgGroup::new("key").required(true).args(["hash", "external"])))]
    Lookup {
        /// Identifying hash
        #[arg(long)]
        hash: Option<String>,

        /// External reference IRI
        #[arg(long)]
        external: Option<String>,
    },

    /// Validate an alert document and print it
    Alert {
        /// Graph document holding the alert
        #[arg(short, long)]
        file: PathBuf,
    },

    /// List the loaded ontology
    Types,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), ClinigraphError> {
    let settings = Settings::load(cli.config.as_deref())?
        .with_env()
        .with_overrides(Overrides {
            base_url: cli.base_url,
            database: cli.database,
            ontology: cli.ontology,
        })?;
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Init { force }) => cmd_init(&settings, force),
        Some(Commands::Status) => cmd_status(&settings, json_mode),
        Some(Commands::Resolve {
            root_type,
            context,
            file,
            output,
            dry_run,
        }) => cmd_resolve(
            &settings,
            json_mode,
            &ResolveArgs {
                root_type,
                context,
                file,
                output,
                dry_run,
            },
        ),
        Some(Commands::Normalize {
            record,
            path,
            type_iri,
            bind,
            file,
            output,
            dry_run,
        }) => cmd_normalize(
            &settings,
            json_mode,
            &NormalizeArgs {
                record,
                request: type_iri.zip(path),
                bind,
                file,
                output,
                dry_run,
            },
        ),
        Some(Commands::Lookup { hash, external }) => {
            cmd_lookup(&settings, json_mode, hash.as_deref(), external.as_deref())
        }
        Some(Commands::Alert { file }) => cmd_alert(json_mode, &file),
        Some(Commands::Types) => cmd_types(&settings, json_mode),
        None => {
            // No subcommand - show status by default
            cmd_status(&settings, json_mode)
        }
    }
}
