//! Main module for the medical vector explorer CLI (mvx).
//!
//! This module provides the main function: it installs logging, parses the command
//! line, loads the configuration and dispatches to the library.
//!
//! # Examples
//!
//! Writing a default configuration, then listing namespaces:
//!
//! ```sh
//! mvx init
//! mvx namespaces
//! ```
//!
//! Crawling one namespace and projecting it to 3D:
//!
//! ```sh
//! mvx project --namespace cardiology > points.json
//! ```
//!
//! Semantic search with a metadata filter:
//!
//! ```sh
//! mvx search "chest pain on exertion" -n cardiology -k 5 --filter '{"year": {"$gte": 2020}}'
//! ```

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use medvec::{
    client::UnauthorizedHook,
    collector::{CollectionOutcome, CollectionSession, VectorCollector},
    commands::{Cli, Commands},
    config::{self, ExplorerConfig},
    pretty,
    projection::{ProjectionUpdate, Projector, ReducedPoint},
    sampler::NamespaceSampler,
    search::SemanticSearch,
    vector_store::VectorStoreGateway,
};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::{
    error::Error,
    fs,
    io::stdout,
    path::Path,
    sync::Arc,
    time::Duration,
};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

static TRACING: OnceCell<()> = OnceCell::new();

const DEFAULT_LOG_FILTER: &str = "warn,medvec=info,mvx=info";

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

/// Main asynchronous function of the CLI.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the command fails.
async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config_path = medvec::config_path(cli.config)?;

    if let Commands::Init { force } = cli.command {
        return init(&config_path, force);
    }

    debug!("Loading config from: {}", config_path.display());
    let path = config_path
        .to_str()
        .ok_or("configuration path is not valid UTF-8")?;
    let config = config::load_config(path).map_err(|err| {
        format!(
            "could not load {}: {err} (run `mvx init` to create one)",
            config_path.display()
        )
    })?;
    debug!("Config loaded: {:?}", config);

    let on_unauthorized = unauthorized_hook();
    let mut out = stdout();

    match cli.command {
        Commands::Init { .. } => {}
        Commands::Namespaces => {
            let store = config.vector_store_gateway(&on_unauthorized)?;
            let response = store.list_namespaces().await?;
            pretty::print_namespaces(&mut out, &response.namespaces)?;
        }
        Commands::Describe { namespace } => {
            let store = config.vector_store_gateway(&on_unauthorized)?;
            let info = store.describe_namespace(&namespace).await?;
            pretty::print_namespace(&mut out, &info)?;
        }
        Commands::Collect { namespace } => {
            let store = config.vector_store_gateway(&on_unauthorized)?;
            let (outcome, _) = collect(&config, store, namespace).await?;
            pretty::print_collection_summary(&mut out, &outcome)?;
        }
        Commands::Sample { namespace } => {
            let store = config.vector_store_gateway(&on_unauthorized)?;
            let sampler = NamespaceSampler::new(store, config.sampler_settings());
            let batch = sampler.sample(namespace.as_deref()).await?;
            pretty::print_sample_summary(&mut out, &batch)?;
        }
        Commands::Project { namespace, sample } => {
            let store = config.vector_store_gateway(&on_unauthorized)?;
            // A sample is a single awaited call, so it is settled once it returns.
            let (vectors, settled) = if sample {
                let batch = NamespaceSampler::new(store, config.sampler_settings())
                    .sample(namespace.as_deref())
                    .await?;
                (batch.vectors, true)
            } else {
                let (outcome, settled) = collect(&config, store, namespace.clone()).await?;
                (outcome.vectors, settled)
            };
            project(namespace, sample, &vectors, settled)?;
        }
        Commands::Search {
            query,
            namespace,
            top_k,
            filter,
        } => {
            let search = SemanticSearch::new(
                config.embedding_gateway(&on_unauthorized)?,
                config.vector_store_gateway(&on_unauthorized)?,
            );
            let response = search.search(&namespace, &query, top_k, filter).await?;
            pretty::print_matches(&mut out, &query, &response)?;
        }
    }

    Ok(())
}

fn unauthorized_hook() -> UnauthorizedHook {
    Arc::new(|| {
        error!(
            "authentication failed (401): re-check JINA_API_KEY / PINECONE_API_KEY or the keys in config.yaml"
        );
    })
}

fn spinner() -> Result<ProgressBar, Box<dyn Error>> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")?);
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message("collecting vectors");
    Ok(spinner)
}

/// Paginated crawl with a progress spinner on stderr. Also returns whether the session
/// settled, which gates the projection.
async fn collect(
    config: &ExplorerConfig,
    store: VectorStoreGateway,
    namespace: Option<String>,
) -> Result<(CollectionOutcome, bool), Box<dyn Error>> {
    let collector = VectorCollector::new(store, config.collector_settings());
    let mut session = CollectionSession::new(namespace);
    let spinner = spinner()?;

    let result = collector
        .drive(&mut session, |session| {
            spinner.set_message(format!(
                "{} vectors from {} page(s)",
                session.vectors().len(),
                session.steps()
            ));
        })
        .await;
    spinner.finish_and_clear();
    result?;

    let settled = session.is_settled();
    Ok((session.into_outcome(), settled))
}

#[derive(Serialize)]
struct ProjectionOutput<'a> {
    namespace: Option<String>,
    mode: &'static str,
    vectors: usize,
    revision: u64,
    points: &'a [ReducedPoint],
}

fn project(
    namespace: Option<String>,
    sample: bool,
    vectors: &[Vec<f32>],
    settled: bool,
) -> Result<(), Box<dyn Error>> {
    let mut projector = Projector::new();
    match projector.refresh(vectors, settled) {
        ProjectionUpdate::Updated(count) => info!("projected {count} vectors to 3D"),
        ProjectionUpdate::Cleared => info!("no vectors to project"),
        ProjectionUpdate::Failed => return Err("PCA failed on the collected vectors".into()),
        ProjectionUpdate::Deferred => {
            return Err("collection is still in flight, nothing to project".into());
        }
    }

    let output = ProjectionOutput {
        namespace,
        mode: if sample { "sample" } else { "paginated" },
        vectors: vectors.len(),
        revision: projector.revision(),
        points: projector.points(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Writes a default configuration with placeholder credentials.
///
/// # Errors
///
/// Returns an error if the file exists (without `--force`), or on any filesystem or
/// serialization failure.
fn init(path: &Path, force: bool) -> Result<(), Box<dyn Error>> {
    if path.exists() && !force {
        return Err(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )
        .into());
    }
    if let Some(dir) = path.parent() {
        info!("Creating config directory: {}", dir.display());
        fs::create_dir_all(dir)?;
    }

    info!("Creating config file: {}", path.display());
    let config_yaml = serde_yaml::to_string(&ExplorerConfig::template())?;
    fs::write(path, config_yaml)?;
    println!(
        "Wrote {}. Fill in the keys or export JINA_API_KEY, PINECONE_API_KEY and PINECONE_INDEX_HOST.",
        path.display()
    );

    Ok(())
}
