//! # Namespace sampler
//!
//! A cheaper alternative to the paginated crawl: instead of listing and fetching ids,
//! each namespace is asked for its nearest neighbours of an all-zero query vector with
//! raw values included. That yields a small, bounded sample per namespace in a single
//! request, which is enough for a first 3D picture of the index.
//!
//! Failures are handled per namespace: a namespace whose query fails is logged and
//! skipped, and the remaining ones are still sampled. Only a failure to list the
//! namespaces themselves aborts the run.

use crate::client::ApiError;
use crate::vector_store::{QueryRequest, VectorStoreGateway};
use std::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_NAMESPACES: usize = 3;
pub const DEFAULT_SELECTED_TOP_K: usize = 50;
pub const DEFAULT_ALL_TOP_K: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerSettings {
    /// At most this many namespaces are sampled.
    pub max_namespaces: usize,
    /// Vectors per namespace when a single namespace is selected.
    pub selected_top_k: usize,
    /// Vectors per namespace when sampling across namespaces.
    pub all_top_k: usize,
    /// Length of the zero query vector.
    pub dimensions: usize,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            max_namespaces: DEFAULT_MAX_NAMESPACES,
            selected_top_k: DEFAULT_SELECTED_TOP_K,
            all_top_k: DEFAULT_ALL_TOP_K,
            dimensions: crate::embedding::DEFAULT_DIMENSIONS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch {
    pub vectors: Vec<Vec<f32>>,
    pub total_sampled_vectors: usize,
    pub namespaces_count: usize,
    pub max_vectors_per_namespace: usize,
    pub selected_namespace: Option<String>,
    /// Namespaces whose query failed and were skipped.
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NamespaceSampler {
    store: VectorStoreGateway,
    settings: SamplerSettings,
}

impl NamespaceSampler {
    pub fn new(store: VectorStoreGateway, settings: SamplerSettings) -> Self {
        Self { store, settings }
    }

    pub async fn sample(&self, selector: Option<&str>) -> Result<SampleBatch, ApiError> {
        let started = Instant::now();
        let namespaces = match selector {
            Some(namespace) => vec![namespace.to_string()],
            None => self.store.namespace_names().await?,
        };
        let to_process: Vec<String> = namespaces
            .iter()
            .take(self.settings.max_namespaces)
            .cloned()
            .collect();
        debug!(
            processing = to_process.len(),
            total = namespaces.len(),
            "sampling namespaces"
        );

        let per_namespace = if selector.is_some() {
            self.settings.selected_top_k
        } else {
            self.settings.all_top_k
        };
        let zero = vec![0.0_f32; self.settings.dimensions];

        let mut vectors = Vec::new();
        let mut skipped = Vec::new();
        for namespace in &to_process {
            let request = QueryRequest::new(namespace.clone(), zero.clone(), per_namespace)
                .with_values(true);
            match self.store.query(&request).await {
                Ok(response) => {
                    let before = vectors.len();
                    vectors.extend(
                        response
                            .matches
                            .into_iter()
                            .filter_map(|m| m.values)
                            .filter(|values| !values.is_empty()),
                    );
                    debug!(namespace = %namespace, sampled = vectors.len() - before, "namespace sampled");
                }
                Err(err) => {
                    warn!(namespace = %namespace, status = %err.status, "skipping namespace: {}", err.message);
                    skipped.push(namespace.clone());
                }
            }
        }

        info!(
            vectors = vectors.len(),
            namespaces = to_process.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sample collected"
        );

        Ok(SampleBatch {
            total_sampled_vectors: vectors.len(),
            vectors,
            namespaces_count: to_process.len(),
            max_vectors_per_namespace: per_namespace,
            selected_namespace: selector.map(str::to_string),
            skipped,
        })
    }
}
