//! # Paginated vector collector
//!
//! Crawls the index page by page across namespaces and accumulates the dense values
//! of every vector it sees. The crawl is a small state machine over two nested
//! cursors:
//!
//! ```text
//!   PageCursor { namespace_index, cursor }
//!        │
//!        ▼
//!   list ids (≤ page_size) in namespaces[namespace_index] at cursor
//!        │
//!        ├─ empty page ──► next namespace (has_more) or done
//!        │
//!        └─ ids ──► fetch values in one call ──► append to batch
//!                    │
//!                    ├─ store returned a token ──► same namespace, new cursor
//!                    └─ no token ────────────────► next namespace (if any)
//! ```
//!
//! Steps run strictly one after another: each step's output is the next step's
//! cursor. Every page after the first waits [`CollectorSettings::request_delay`],
//! and a run stops after [`CollectorSettings::max_pages`] steps regardless of how
//! much data remains.
//!
//! A failed step is retried (never on `401`) with exponentially growing backoff. If
//! it still fails, the run aborts with [`CollectorError::Step`], which carries the
//! cursor so the same [`CollectionSession`] can be resumed with
//! [`VectorCollector::drive`].
//!
//! ## Sessions and stale pages
//! A [`CollectionSession`] is keyed by its namespace selector. Changing the selector
//! with [`CollectionSession::select`] discards the batch and bumps an epoch; any step
//! result that was started under an older epoch is dropped by
//! [`CollectionSession::complete_step`] instead of being merged.

use crate::client::ApiError;
use crate::vector_store::VectorStoreGateway;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_millis(300);
pub const DEFAULT_MAX_PAGES: usize = 50;
pub const DEFAULT_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_millis(5000);

#[derive(Debug, Error)]
pub enum CollectorError {
    /// A page step failed after exhausting its retries.
    #[error("page step {step} ({cursor:?}) failed: {source}")]
    Step {
        step: usize,
        cursor: PageCursor,
        #[source]
        source: ApiError,
    },
}

impl CollectorError {
    pub fn api_error(&self) -> &ApiError {
        match self {
            CollectorError::Step { source, .. } => source,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.api_error().is_unauthorized()
    }
}

/// Resumption point: a store-issued token (only valid for its namespace) plus the
/// index of that namespace in the resolved namespace list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageCursor {
    pub cursor: Option<String>,
    pub namespace_index: usize,
}

impl PageCursor {
    /// First page of the first namespace.
    pub fn initial() -> Self {
        Self::default()
    }
}

/// Output of one page step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageStep {
    pub vectors: Vec<Vec<f32>>,
    pub total_sampled_vectors: usize,
    pub has_more: bool,
    pub next_cursor: Option<String>,
    pub next_namespace_index: usize,
    /// Namespace this step listed, `None` when there was nothing to list.
    pub namespace: Option<String>,
    pub namespaces_count: usize,
}

impl PageStep {
    fn finished(namespace: Option<String>, namespace_index: usize, namespaces_count: usize) -> Self {
        Self {
            has_more: false,
            next_namespace_index: namespace_index,
            namespace,
            namespaces_count,
            ..Self::default()
        }
    }

    /// Cursor for the following step, `None` once the crawl is complete.
    pub fn next_page_cursor(&self) -> Option<PageCursor> {
        self.has_more.then(|| PageCursor {
            cursor: self.next_cursor.clone(),
            namespace_index: self.next_namespace_index,
        })
    }
}

/// Pacing, paging and retry knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorSettings {
    pub page_size: usize,
    pub request_delay: Duration,
    pub max_pages: usize,
    pub retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            request_delay: DEFAULT_REQUEST_DELAY,
            max_pages: DEFAULT_MAX_PAGES,
            retries: DEFAULT_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            retry_max_delay: DEFAULT_RETRY_MAX_DELAY,
        }
    }
}

impl CollectorSettings {
    /// `min(base * 2^attempt, max)`, with `attempt` counted from zero.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.retry_base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.retry_max_delay)
    }
}

/// Handle for a step in flight; remembers the epoch it was started under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepTicket {
    pub epoch: u64,
    pub cursor: PageCursor,
}

/// What [`CollectionSession::complete_step`] did with a step result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMerge {
    Merged { has_more: bool },
    Stale,
}

/// Accumulated state of one collection session (one namespace selector).
#[derive(Debug, Clone, Default)]
pub struct CollectionSession {
    selector: Option<String>,
    epoch: u64,
    in_flight: bool,
    batch: Vec<Vec<f32>>,
    steps: usize,
    namespaces_count: usize,
    visited: Vec<String>,
    next: Option<PageCursor>,
}

impl CollectionSession {
    pub fn new(selector: Option<String>) -> Self {
        Self {
            selector,
            next: Some(PageCursor::initial()),
            ..Self::default()
        }
    }

    pub fn selector(&self) -> Option<&str> {
        self.selector.as_deref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Switch the namespace selector. A different selector resets the batch and
    /// invalidates every step still in flight. Returns whether anything changed.
    pub fn select(&mut self, selector: Option<String>) -> bool {
        if self.selector == selector {
            return false;
        }
        debug!(from = ?self.selector, to = ?selector, "collection session reset");
        *self = Self {
            epoch: self.epoch + 1,
            ..Self::new(selector)
        };
        true
    }

    /// Start the next step, or `None` when the crawl is complete.
    pub fn begin_step(&mut self) -> Option<StepTicket> {
        let cursor = self.next.clone()?;
        self.in_flight = true;
        Some(StepTicket {
            epoch: self.epoch,
            cursor,
        })
    }

    /// Merge a finished step, unless it belongs to an older epoch.
    pub fn complete_step(&mut self, ticket: &StepTicket, mut step: PageStep) -> StepMerge {
        if ticket.epoch != self.epoch {
            debug!(
                ticket_epoch = ticket.epoch,
                epoch = self.epoch,
                "discarding page from an abandoned session"
            );
            return StepMerge::Stale;
        }

        self.in_flight = false;
        if self.steps == 0 {
            self.namespaces_count = step.namespaces_count;
        }
        self.steps += 1;
        if let Some(namespace) = step.namespace.take() {
            if self.visited.last() != Some(&namespace) {
                self.visited.push(namespace);
            }
        }
        self.next = step.next_page_cursor();
        self.batch.append(&mut step.vectors);
        StepMerge::Merged {
            has_more: step.has_more,
        }
    }

    /// Mark a failed step as no longer in flight. The cursor is left untouched so the
    /// same step can be retried.
    pub fn fail_step(&mut self, ticket: &StepTicket) {
        if ticket.epoch == self.epoch {
            self.in_flight = false;
        }
    }

    /// All vectors collected so far, in crawl order.
    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.batch
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn namespaces_count(&self) -> usize {
        self.namespaces_count
    }

    /// Namespaces listed so far, each once, in visiting order.
    pub fn visited_namespaces(&self) -> &[String] {
        &self.visited
    }

    pub fn has_more(&self) -> bool {
        self.next.is_some()
    }

    pub fn next_cursor(&self) -> Option<&PageCursor> {
        self.next.as_ref()
    }

    /// `true` when no step is in flight.
    pub fn is_settled(&self) -> bool {
        !self.in_flight
    }

    pub fn into_outcome(self) -> CollectionOutcome {
        CollectionOutcome {
            has_more: self.has_more(),
            vectors: self.batch,
            steps: self.steps,
            namespaces_count: self.namespaces_count,
            namespaces: self.visited,
        }
    }
}

/// Result of a full collection run.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionOutcome {
    pub vectors: Vec<Vec<f32>>,
    pub steps: usize,
    pub namespaces_count: usize,
    pub namespaces: Vec<String>,
    /// `true` when the run stopped at the page ceiling with data left.
    pub has_more: bool,
}

/// Drives page steps against a [`VectorStoreGateway`].
#[derive(Debug, Clone)]
pub struct VectorCollector {
    store: VectorStoreGateway,
    settings: CollectorSettings,
}

impl VectorCollector {
    pub fn new(store: VectorStoreGateway, settings: CollectorSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }

    async fn resolve_namespaces(&self, selector: Option<&str>) -> Result<Vec<String>, ApiError> {
        match selector {
            Some(namespace) => Ok(vec![namespace.to_string()]),
            None => self.store.namespace_names().await,
        }
    }

    /// Execute one page step at `cursor`.
    pub async fn fetch_page(
        &self,
        selector: Option<&str>,
        cursor: &PageCursor,
    ) -> Result<PageStep, ApiError> {
        let started = Instant::now();
        let namespaces = self.resolve_namespaces(selector).await?;
        let index = cursor.namespace_index;

        let Some(namespace) = namespaces.get(index) else {
            debug!(index, namespaces = namespaces.len(), "no namespace at cursor, collection finished");
            return Ok(PageStep::finished(None, index, namespaces.len()));
        };

        debug!(namespace = %namespace, cursor = ?cursor.cursor, "listing vectors");
        let page = self
            .store
            .list_vectors(namespace, Some(self.settings.page_size), cursor.cursor.as_deref())
            .await?;

        if page.vectors.is_empty() {
            let next_index = index + 1;
            if next_index < namespaces.len() {
                debug!(next = %namespaces[next_index], "namespace exhausted, moving on");
                return Ok(PageStep {
                    has_more: true,
                    next_cursor: None,
                    next_namespace_index: next_index,
                    namespace: Some(namespace.clone()),
                    namespaces_count: namespaces.len(),
                    ..PageStep::default()
                });
            }
            debug!("no more namespaces to process");
            return Ok(PageStep::finished(Some(namespace.clone()), index, namespaces.len()));
        }

        let ids = page.ids();
        let fetched = self.store.fetch_vectors(namespace, &ids).await?;
        let vectors = fetched.values_in_order(&ids);

        let next_token = page.next_token().map(str::to_string);
        let next_namespace_index = if next_token.is_some() { index } else { index + 1 };
        let has_more = next_token.is_some() || next_namespace_index < namespaces.len();

        debug!(
            namespace = %namespace,
            ids = ids.len(),
            vectors = vectors.len(),
            has_more,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "page fetched"
        );

        Ok(PageStep {
            total_sampled_vectors: vectors.len(),
            vectors,
            has_more,
            next_cursor: next_token,
            next_namespace_index,
            namespace: Some(namespace.clone()),
            namespaces_count: namespaces.len(),
        })
    }

    async fn fetch_page_with_retry(
        &self,
        selector: Option<&str>,
        cursor: &PageCursor,
    ) -> Result<PageStep, ApiError> {
        let mut attempt = 0;
        loop {
            match self.fetch_page(selector, cursor).await {
                Ok(step) => return Ok(step),
                Err(err) if attempt < self.settings.retries && !err.is_unauthorized() => {
                    let delay = self.settings.retry_delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        status = %err.status,
                        "page step failed, retrying: {}",
                        err.message
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Collect everything reachable from the initial cursor for `selector`.
    pub async fn collect(&self, selector: Option<&str>) -> Result<CollectionOutcome, CollectorError> {
        let mut session = CollectionSession::new(selector.map(str::to_string));
        self.drive(&mut session, |_| {}).await?;
        Ok(session.into_outcome())
    }

    /// Run steps on `session` until it has nothing more to fetch or the page ceiling
    /// is reached. `on_step` sees the session after each merged step.
    pub async fn drive<F>(
        &self,
        session: &mut CollectionSession,
        mut on_step: F,
    ) -> Result<(), CollectorError>
    where
        F: FnMut(&CollectionSession),
    {
        let started = Instant::now();
        while session.steps() < self.settings.max_pages {
            let Some(ticket) = session.begin_step() else {
                break;
            };
            if session.steps() > 0 && !self.settings.request_delay.is_zero() {
                tokio::time::sleep(self.settings.request_delay).await;
            }

            let selector = session.selector().map(str::to_string);
            match self
                .fetch_page_with_retry(selector.as_deref(), &ticket.cursor)
                .await
            {
                Ok(step) => {
                    if session.complete_step(&ticket, step) == StepMerge::Stale {
                        break;
                    }
                    on_step(session);
                }
                Err(source) => {
                    session.fail_step(&ticket);
                    return Err(CollectorError::Step {
                        step: session.steps(),
                        cursor: ticket.cursor,
                        source,
                    });
                }
            }
        }

        if session.has_more() {
            warn!(
                max_pages = self.settings.max_pages,
                "page ceiling reached with data remaining"
            );
        }
        info!(
            vectors = session.vectors().len(),
            steps = session.steps(),
            namespaces = session.namespaces_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "collection finished"
        );
        Ok(())
    }
}
