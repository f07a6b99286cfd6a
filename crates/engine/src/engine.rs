//! Retrieval engine: drives sessions and accumulates rows on disk
//!
//! Two traversal modes share one session per call:
//!
//! - **Exhaustive** ([`RetrievalEngine::fetch_all`]): entities are requested
//!   in chunks of `record_chunk`; within a chunk, values are paged
//!   `page_size` at a time until a short page arrives.
//! - **Sampled** ([`RetrievalEngine::fetch_sample`]): a duplicate-free random
//!   set of entity positions, fetched one at a time in ascending order.
//!
//! Rows are normalised page by page and appended to a [`SpillSequence`], so
//! memory use stays flat regardless of result size. Cancellation is checked
//! between pages and between chunks; on cancellation or any fatal error the
//! partial output is closed before the error propagates.

use crate::clock::{Sleeper, ThreadSleeper};
use crate::config::RetrievalConfig;
use crate::normalize::fix_payloads;
use crate::session::RetrievalSession;
use harvest_core::{
    Error, ExecutionContext, FieldCatalog, FieldSelection, QueryDescriptor, Result, Row,
    SearchStatus, ServiceAdapter, StaticCatalog,
};
use harvest_storage::{AppendStore, SpillSequence};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

/// How a request traverses its result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetrievalMode {
    /// Every matched entity, in result order
    #[default]
    Exhaustive,
    /// A uniform random subset of matched entities
    Sampled,
}

/// One retrieval as requested by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalRequest {
    /// What to search for
    pub query: QueryDescriptor,
    /// First entity position, 1-based
    pub start: u64,
    /// Entity cap; zero means unlimited
    pub max_results: u64,
    /// Traversal mode
    pub mode: RetrievalMode,
    /// Join structure payloads onto the result
    pub add_structures: bool,
}

impl RetrievalRequest {
    /// Exhaustive, uncapped request starting at the first entity
    pub fn new(query: QueryDescriptor) -> Self {
        Self {
            query,
            start: 1,
            max_results: 0,
            mode: RetrievalMode::Exhaustive,
            add_structures: false,
        }
    }

    /// Start at entity `start` (values below 1 mean 1)
    pub fn starting_at(mut self, start: u64) -> Self {
        self.start = start;
        self
    }

    /// Retrieve at most `max_results` entities
    pub fn limit(mut self, max_results: u64) -> Self {
        self.max_results = max_results;
        self
    }

    /// Use sampling mode
    pub fn sampled(mut self) -> Self {
        self.mode = RetrievalMode::Sampled;
        self
    }

    /// Enrich the result with structure payloads
    pub fn with_structures(mut self) -> Self {
        self.add_structures = true;
        self
    }

    fn effective_start(&self) -> u64 {
        self.start.max(1)
    }

    fn effective_max(&self) -> u64 {
        if self.max_results == 0 {
            u64::MAX
        } else {
            self.max_results
        }
    }
}

/// Rows of a finished retrieval and the service's total match count.
///
/// `total_count` may exceed `rows.len()` when a cap applied, or fall short of
/// it when entities carry several values each.
#[derive(Debug)]
pub struct Retrieval {
    /// Retrieved rows, spilled to disk
    pub rows: SpillSequence<Row>,
    /// Matched entities reported by the service
    pub total_count: u64,
}

/// Drives retrieval sessions against one service adapter.
pub struct RetrievalEngine<A, C = &'static StaticCatalog, S = ThreadSleeper> {
    pub(crate) adapter: A,
    pub(crate) catalog: C,
    sleeper: S,
    pub(crate) config: RetrievalConfig,
    seed: Option<u64>,
}

impl<A: ServiceAdapter> RetrievalEngine<A> {
    /// Engine with the embedded catalog, real sleeping and default config
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            catalog: StaticCatalog::global(),
            sleeper: ThreadSleeper,
            config: RetrievalConfig::default(),
            seed: None,
        }
    }
}

impl<A, C, S> RetrievalEngine<A, C, S>
where
    A: ServiceAdapter,
    C: FieldCatalog,
    S: Sleeper,
{
    /// Replace the field catalog
    pub fn with_catalog<C2: FieldCatalog>(self, catalog: C2) -> RetrievalEngine<A, C2, S> {
        RetrievalEngine {
            adapter: self.adapter,
            catalog,
            sleeper: self.sleeper,
            config: self.config,
            seed: self.seed,
        }
    }

    /// Replace the sleep strategy used while polling
    pub fn with_sleeper<S2: Sleeper>(self, sleeper: S2) -> RetrievalEngine<A, C, S2> {
        RetrievalEngine {
            adapter: self.adapter,
            catalog: self.catalog,
            sleeper,
            config: self.config,
            seed: self.seed,
        }
    }

    /// Replace the configuration
    pub fn with_config(mut self, config: RetrievalConfig) -> Self {
        self.config = config;
        self
    }

    /// Seed sampling so the chosen positions are reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Active configuration
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Field catalog in use
    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Service adapter in use
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Run a request end to end.
    ///
    /// Dispatches on the request mode, then joins structures onto the result
    /// when asked to.
    pub fn retrieve(
        &self,
        request: &RetrievalRequest,
        ctx: &dyn ExecutionContext,
    ) -> Result<Retrieval> {
        let start = request.effective_start();
        let max = request.effective_max();

        let Retrieval { rows, total_count } = match request.mode {
            RetrievalMode::Exhaustive => self.fetch_all(&request.query, start, max, ctx)?,
            RetrievalMode::Sampled => self.fetch_sample(&request.query, start, max, ctx)?,
        };

        let rows = if request.add_structures {
            self.add_structures(rows, ctx)?
        } else {
            rows
        };

        Ok(Retrieval { rows, total_count })
    }

    /// Retrieve every value of every matched entity from `start` on, up to
    /// `max_results` entities.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for an invalid configuration
    /// - the adapter's error if the initial search fails
    /// - `Cancelled` from the context, after closing the partial output
    /// - storage errors, after closing the partial output
    ///
    /// Failed page fetches are logged and count as empty pages.
    pub fn fetch_all(
        &self,
        query: &QueryDescriptor,
        start: u64,
        max_results: u64,
        ctx: &dyn ExecutionContext,
    ) -> Result<Retrieval> {
        self.config.validate()?;
        let start = start.max(1);
        let mut session = self.session();
        let state = session.search(query, max_results)?;

        let num = self.retrievable(state.status, state.total_count, max_results);
        ctx.report_message(&format!("search resulted in {} hits", num));

        let mut out = self.new_sequence();
        if num > 0 {
            if let Err(e) = self.fill_exhaustive(&mut session, query, start, num, &mut out, ctx) {
                abandon(out, &e);
                session.log_summary();
                return Err(e);
            }
        }

        info!(
            target: "harvest::engine",
            data_type = %query.data_type,
            total_count = state.total_count,
            rows = out.len(),
            "Exhaustive retrieval complete"
        );
        session.log_summary();

        Ok(Retrieval {
            rows: out,
            total_count: state.total_count,
        })
    }

    fn fill_exhaustive(
        &self,
        session: &mut RetrievalSession<'_, A, S>,
        query: &QueryDescriptor,
        start: u64,
        num: u64,
        out: &mut SpillSequence<Row>,
        ctx: &dyn ExecutionContext,
    ) -> Result<()> {
        let code = query.data_type.as_str();
        let single = self.catalog.is_single_valued(code);
        let chunk = self.config.record_chunk.min(num);
        let last_entity = start.saturating_add(num - 1);
        let page_size = self.config.page_size;

        let mut first = start;
        while first <= last_entity {
            let last = first.saturating_add(chunk - 1).min(last_entity);
            ctx.report_progress((first - start) as f64 / num as f64);

            let mut page_start = 1;
            let mut pages = 0;
            loop {
                if pages >= self.config.max_pages {
                    warn!(
                        target: "harvest::engine",
                        first,
                        last,
                        max_pages = self.config.max_pages,
                        "Page bound reached, moving to next chunk"
                    );
                    break;
                }

                let selection = if single {
                    FieldSelection::whole(code)
                } else {
                    FieldSelection::windowed(code, page_start, page_start + page_size - 1)
                };
                let mut rows = self.fetch_or_empty(session, &selection, first, last)?;
                pages += 1;
                page_start += page_size;

                let returned = rows.len() as u64;
                if returned > 0 {
                    fix_payloads(&mut rows, &self.catalog, self.config.max_decompressed_bytes);
                    out.add_all(&rows)?;
                }
                ctx.check_cancelled()?;

                if single || returned < page_size {
                    break;
                }
            }

            ctx.check_cancelled()?;
            if out.is_empty() {
                debug!(
                    target: "harvest::engine",
                    first,
                    last,
                    "First chunk returned no rows, stopping"
                );
                break;
            }
            first = first.saturating_add(chunk);
        }
        ctx.report_progress(1.0);
        Ok(())
    }

    /// Retrieve a random subset of `max_results` entities from `start` on.
    ///
    /// Positions are distinct, drawn uniformly from `start..=total_count` and
    /// fetched in ascending order. With a seed set on the engine the same
    /// positions are drawn every time.
    ///
    /// # Errors
    ///
    /// As [`fetch_all`](Self::fetch_all).
    pub fn fetch_sample(
        &self,
        query: &QueryDescriptor,
        start: u64,
        max_results: u64,
        ctx: &dyn ExecutionContext,
    ) -> Result<Retrieval> {
        self.config.validate()?;
        let start = start.max(1);
        let mut session = self.session();
        let state = session.search(query, max_results)?;

        let available = self
            .retrievable(state.status, state.total_count, u64::MAX)
            .saturating_sub(start - 1);
        let num = available.min(max_results);
        ctx.report_message(&format!("sampling {} of {} hits", num, state.total_count));

        let mut out = self.new_sequence();
        if num > 0 {
            let positions = self.sample_positions(available, num, start);
            let filled =
                self.fill_sample(&mut session, query, &positions, max_results, &mut out, ctx);
            if let Err(e) = filled {
                abandon(out, &e);
                session.log_summary();
                return Err(e);
            }
        }

        info!(
            target: "harvest::engine",
            data_type = %query.data_type,
            total_count = state.total_count,
            sampled = num,
            rows = out.len(),
            "Sampled retrieval complete"
        );
        session.log_summary();

        Ok(Retrieval {
            rows: out,
            total_count: state.total_count,
        })
    }

    fn fill_sample(
        &self,
        session: &mut RetrievalSession<'_, A, S>,
        query: &QueryDescriptor,
        positions: &[u64],
        max_results: u64,
        out: &mut SpillSequence<Row>,
        ctx: &dyn ExecutionContext,
    ) -> Result<()> {
        let code = query.data_type.as_str();
        let selection = if self.catalog.is_single_valued(code) {
            FieldSelection::whole(code)
        } else {
            FieldSelection::windowed(code, 1, 1)
        };
        let cap = usize::try_from(max_results).unwrap_or(usize::MAX);

        for (i, &position) in positions.iter().enumerate() {
            ctx.report_progress(i as f64 / positions.len() as f64);
            let mut rows = self.fetch_or_empty(session, &selection, position, position)?;
            if !rows.is_empty() {
                fix_payloads(&mut rows, &self.catalog, self.config.max_decompressed_bytes);
                out.add_all(&rows)?;
            }
            ctx.check_cancelled()?;
            if out.len() > cap {
                break;
            }
        }

        out.truncate(cap)?;
        ctx.report_progress(1.0);
        Ok(())
    }

    /// Sorted, distinct positions `start..start + available`, `num` of them
    fn sample_positions(&self, available: u64, num: u64, start: u64) -> Vec<u64> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let length = usize::try_from(available).unwrap_or(usize::MAX);
        let amount = usize::try_from(num).unwrap_or(usize::MAX).min(length);

        let mut positions: Vec<u64> = rand::seq::index::sample(&mut rng, length, amount)
            .into_iter()
            .map(|i| start + i as u64)
            .collect();
        positions.sort_unstable();
        positions
    }

    /// Page fetch where a non-fatal adapter failure counts as an empty page
    fn fetch_or_empty(
        &self,
        session: &mut RetrievalSession<'_, A, S>,
        selection: &FieldSelection,
        first: u64,
        last: u64,
    ) -> Result<Vec<Row>> {
        match session.fetch_range(selection, first, last) {
            Ok(rows) => Ok(rows),
            Err(e) if !e.is_fatal() => {
                warn!(
                    target: "harvest::engine",
                    selection = %selection,
                    first,
                    last,
                    error = %e,
                    "Page fetch failed, treating as empty"
                );
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    fn retrievable(&self, status: SearchStatus, total_count: u64, max_results: u64) -> u64 {
        if status == SearchStatus::Error {
            warn!(
                target: "harvest::engine",
                total_count,
                "Service reported a failed search, nothing to retrieve"
            );
            return 0;
        }
        total_count.min(max_results)
    }

    pub(crate) fn session(&self) -> RetrievalSession<'_, A, S> {
        RetrievalSession::new(&self.adapter, &self.sleeper, &self.config)
    }

    pub(crate) fn new_sequence(&self) -> SpillSequence<Row> {
        let store =
            AppendStore::new(self.config.spill_dir()).with_reserve(self.config.spill_reserve);
        SpillSequence::with_store(store)
    }
}

/// Close a partially filled sequence on the way out of a failed retrieval
pub(crate) fn abandon(mut rows: SpillSequence<Row>, reason: &Error) {
    let discarded = rows.len();
    if let Err(e) = rows.close() {
        warn!(target: "harvest::engine", error = %e, "Failed to close partial output");
    }
    debug!(
        target: "harvest::engine",
        discarded,
        reason = %reason,
        "Discarded partial output"
    );
}
