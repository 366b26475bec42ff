//! This module defines the command-line interface for the application using `clap`.
//!
//! It provides a `Cli` struct that represents the parsed command-line arguments,
//! and a `Commands` enum that represents the available subcommands and their
//! options.
//!
//! # Examples
//!
//! Parsing command-line arguments:
//!
//! ```no_run
//! use clap::Parser;
//! use medvec::commands::{Cli, Commands};
//!
//! let cli = Cli::parse();
//! match cli.command {
//!     Commands::Search { query, namespace, .. } => {
//!         println!("searching {namespace} for {query}");
//!     }
//!     _ => {}
//! }
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Path to the configuration file. Defaults to `config.yaml` in the platform config directory.
    #[arg(long, short = 'c', global = true, env = "MEDVEC_CONFIG")]
    pub config: Option<PathBuf>,

    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

/// Represents the available subcommands and their options.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Write a default configuration file with placeholder credentials.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// List the namespaces of the index with their record counts.
    #[clap(name = "namespaces", alias = "ns")]
    Namespaces,

    /// Show a single namespace.
    Describe { namespace: String },

    /// Crawl vectors page by page, across every namespace unless one is given.
    #[clap(name = "collect", alias = "c")]
    Collect {
        #[arg(long, short = 'n')]
        namespace: Option<String>,
    },

    /// Take a small nearest-to-origin sample from the first few namespaces.
    Sample {
        #[arg(long, short = 'n')]
        namespace: Option<String>,
    },

    /// Collect (or sample) vectors and print their 3D PCA projection as JSON.
    #[clap(name = "project", alias = "p")]
    Project {
        #[arg(long, short = 'n')]
        namespace: Option<String>,

        /// Use the namespace sampler instead of the paginated crawl.
        #[arg(long)]
        sample: bool,
    },

    /// Semantic search: embed the query and rank records in a namespace.
    #[clap(name = "search", alias = "s")]
    Search {
        query: String,

        #[arg(long, short = 'n')]
        namespace: String,

        #[arg(long, short = 'k', default_value_t = crate::search::DEFAULT_TOP_K)]
        top_k: usize,

        /// Metadata filter as a JSON object, forwarded verbatim.
        #[arg(long, short = 'f', value_parser = parse_filter)]
        filter: Option<serde_json::Value>,
    },
}

fn parse_filter(raw: &str) -> Result<serde_json::Value, String> {
    match serde_json::from_str(raw) {
        Ok(value @ serde_json::Value::Object(_)) => Ok(value),
        Ok(_) => Err("filter must be a JSON object".to_string()),
        Err(err) => Err(format!("invalid JSON: {err}")),
    }
}
