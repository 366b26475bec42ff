//! # Medvec (library root)
//!
//! This crate provides the plumbing behind the **`mvx`** CLI: exploring a medical
//! retrieval index (a Pinecone-style vector store fed by a Jina-style embedding API).
//!
//! - HTTP plumbing with per-client credentials and uniform errors (`client`).
//! - Service gateways for the vector index and the embedding provider (`vector_store`, `embedding`).
//! - Cursor-based, multi-namespace crawl with pacing, retry and a page ceiling (`collector`).
//! - A cheaper bounded sample across namespaces (`sampler`).
//! - PCA down to three components for plotting (`projection`).
//! - Natural-language search: embed, then similarity query (`search`).
//! - CLI parsing, configuration and terminal rendering (`commands`, `config`, `pretty`).
//!
//! ## Data flow
//!
//! ```text
//! CLI command ─► collector / sampler / search ─► gateways ─► ApiClient ─► upstream
//!                       ▲                                                     │
//!                       └──────────── merged batch / ranked matches ◄─────────┘
//! ```
//!
//! ## Configuration directory
//! By default the configuration lives under your per-platform config directory, e.g.:
//!
//! - macOS: `~/Library/Application Support/com.medvec.mvx/config.yaml`
//! - Linux (XDG): `~/.config/mvx/config.yaml`
//! - Windows: `C:\Users\<you>\AppData\Roaming\medvec\mvx\config\config.yaml`
//!
//! ## Modules
//! - [`client`], [`collector`], [`commands`], [`config`], [`embedding`], [`pretty`],
//!   [`projection`], [`sampler`], [`search`], [`vector_store`]

use directories::ProjectDirs;
use std::error::Error;
use std::path::PathBuf;

pub mod client;
pub mod collector;
pub mod commands;
pub mod config;
pub mod embedding;
pub mod pretty;
pub mod projection;
pub mod sampler;
pub mod search;
pub mod vector_store;

/// File name of the configuration inside [`config_dir`].
pub const CONFIG_FILE: &str = "config.yaml";

/// Return the per-platform configuration directory used by `mvx`.
///
/// This uses [`directories::ProjectDirs`] with the application triple
/// `("com", "medvec", "mvx")`, so you get the right place on each OS.
///
/// The directory is **not** created by this function; callers that need it should
/// create it with `fs::create_dir_all`.
///
/// # Errors
/// Returns an error if the platform configuration directory cannot be determined
/// (which is rare but possible in heavily sandboxed environments).
///
/// # Examples
/// ```no_run
/// let cfg = medvec::config_dir().expect("has a config dir");
/// println!("config at {}", cfg.display());
/// ```
pub fn config_dir() -> Result<PathBuf, Box<dyn Error>> {
    let proj_dirs = ProjectDirs::from("com", "medvec", "mvx")
        .ok_or("Unable to determine config directory")?;
    let config_dir = proj_dirs.config_dir().to_path_buf();

    Ok(config_dir)
}

/// Resolve the configuration file: an explicit path wins, else `config_dir()/config.yaml`.
pub fn config_path(explicit: Option<PathBuf>) -> Result<PathBuf, Box<dyn Error>> {
    match explicit {
        Some(path) => Ok(path),
        None => Ok(config_dir()?.join(CONFIG_FILE)),
    }
}
