//! Testing utilities for retrieval
//!
//! Deterministic stand-ins for every collaborator the engine talks to:
//!
//! - **SyntheticService**: in-memory [`ServiceAdapter`] with call counting,
//!   running-search simulation and failure injection
//! - **ManualSleeper**: records requested sleeps instead of blocking
//! - **CancelAfter**: execution context that cancels after N checks
//!
//! # Example
//!
//! ```ignore
//! use harvest_engine::testing::{CancelAfter, ManualSleeper, SyntheticService};
//!
//! let service = SyntheticService::with_entities(120, 1).running_for(2);
//! let engine = RetrievalEngine::new(&service).with_sleeper(ManualSleeper::new());
//! ```

use harvest_core::catalog::FIELD_XRN;
use harvest_core::{
    Error, ExecutionContext, FieldCatalog, FieldSelection, QueryDescriptor, Result, Row,
    SearchResponse, SearchStatus, ServiceAdapter, StaticCatalog,
};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::time::Duration;

use crate::clock::Sleeper;

/// Label of the per-entity fact generated by [`SyntheticService::with_entities`]
pub const FACT_LABEL: &str = "Melting Point (MP.MP)";

/// Row for value `value` of entity `entity`, both 1-based
pub fn fact_row(entity: u64, value: u64) -> Row {
    let mut row = Row::new();
    row.insert(StaticCatalog::global().label(FIELD_XRN), entity.to_string());
    row.insert(FACT_LABEL, format!("{}.{}", entity, value));
    row
}

/// One recorded `fetch_page` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Result-set handle
    pub handle: String,
    /// Requested field class and value window
    pub selection: FieldSelection,
    /// First entity, 1-based
    pub first: u64,
    /// Last entity, inclusive
    pub last: u64,
}

#[derive(Default)]
struct CallLog {
    searches: Vec<QueryDescriptor>,
    polls: u32,
    page_calls: u64,
    pages: Vec<PageRequest>,
    result_sets: FxHashMap<String, Vec<Vec<Row>>>,
}

/// In-memory remote service.
///
/// Every search matches the configured entities, each of which owns an
/// ordered list of value rows. A windowed selection returns the rows inside
/// the window; a whole selection returns all of them. Searches whose extra clause is a key lookup
/// (`IDE.XRN=a;b` or `RX.ID=a;b`) instead match the registered structure rows
/// for those keys, one entity per known key.
pub struct SyntheticService {
    entities: Vec<Vec<Row>>,
    structures: FxHashMap<String, Row>,
    running_polls: u32,
    fail_search: bool,
    failing_searches: FxHashSet<u64>,
    error_status: bool,
    failing_pages: FxHashSet<u64>,
    log: Mutex<CallLog>,
}

impl SyntheticService {
    /// Service whose searches match nothing
    pub fn empty() -> Self {
        Self::from_entities(Vec::new())
    }

    /// `entities` matched entities with `values` fact rows each
    pub fn with_entities(entities: u64, values: u64) -> Self {
        Self::from_entities(
            (1..=entities)
                .map(|e| (1..=values).map(|v| fact_row(e, v)).collect())
                .collect(),
        )
    }

    /// Matched entities with explicit rows
    pub fn from_entities(entities: Vec<Vec<Row>>) -> Self {
        Self {
            entities,
            structures: FxHashMap::default(),
            running_polls: 0,
            fail_search: false,
            failing_searches: FxHashSet::default(),
            error_status: false,
            failing_pages: FxHashSet::default(),
            log: Mutex::new(CallLog::default()),
        }
    }

    /// Register the structure row returned for key lookups of `key`
    pub fn with_structure(mut self, key: impl Into<String>, row: Row) -> Self {
        self.structures.insert(key.into(), row);
        self
    }

    /// Report `running` until this many polls have been made
    pub fn running_for(mut self, polls: u32) -> Self {
        self.running_polls = polls;
        self
    }

    /// Fail every search
    pub fn failing_search(mut self) -> Self {
        self.fail_search = true;
        self
    }

    /// Fail the given `search` calls, counted from 1
    pub fn failing_search_calls(mut self, calls: impl IntoIterator<Item = u64>) -> Self {
        self.failing_searches.extend(calls);
        self
    }

    /// Accept searches but report them as failed remotely
    pub fn reporting_error(mut self) -> Self {
        self.error_status = true;
        self
    }

    /// Fail the given `fetch_page` calls, counted from 1
    pub fn failing_page_calls(mut self, calls: impl IntoIterator<Item = u64>) -> Self {
        self.failing_pages.extend(calls);
        self
    }

    /// Every search issued so far
    pub fn searches(&self) -> Vec<QueryDescriptor> {
        self.log.lock().searches.clone()
    }

    /// Polls issued so far
    pub fn polls(&self) -> u32 {
        self.log.lock().polls
    }

    /// `fetch_page` calls so far, failed ones included
    pub fn page_calls(&self) -> u64 {
        self.log.lock().page_calls
    }

    /// Every `fetch_page` call in order
    pub fn page_requests(&self) -> Vec<PageRequest> {
        self.log.lock().pages.clone()
    }

    fn status(&self, polls: u32) -> SearchStatus {
        if self.error_status {
            SearchStatus::Error
        } else if polls < self.running_polls {
            SearchStatus::Running
        } else {
            SearchStatus::Ok
        }
    }

    fn key_lookup(&self, clause: &str) -> Option<Vec<Vec<Row>>> {
        let keys = clause
            .strip_prefix("IDE.XRN=")
            .or_else(|| clause.strip_prefix("RX.ID="))?;
        Some(
            keys.split(';')
                .filter_map(|k| self.structures.get(k.trim()))
                .map(|row| vec![row.clone()])
                .collect(),
        )
    }
}

impl ServiceAdapter for SyntheticService {
    fn search(&self, query: &QueryDescriptor) -> Result<SearchResponse> {
        let mut log = self.log.lock();
        log.searches.push(query.clone());
        let call = log.searches.len() as u64;
        if self.fail_search || self.failing_searches.contains(&call) {
            return Err(Error::RemoteUnavailable(format!("search call {} rejected", call)));
        }

        let matched = query
            .extra_clause
            .as_deref()
            .and_then(|clause| self.key_lookup(clause))
            .unwrap_or_else(|| self.entities.clone());

        let handle = format!("rs-{}", log.searches.len());
        let count = matched.len() as u64;
        log.result_sets.insert(handle.clone(), matched);

        Ok(SearchResponse {
            handle,
            count,
            status: self.status(log.polls),
        })
    }

    fn poll(&self, handle: &str, _probe_field: &str) -> Result<SearchResponse> {
        let mut log = self.log.lock();
        log.polls += 1;
        let count = match log.result_sets.get(handle) {
            Some(set) => set.len() as u64,
            None => return Err(Error::RemoteUnavailable(format!("unknown handle {}", handle))),
        };
        Ok(SearchResponse {
            handle: handle.to_string(),
            count,
            status: self.status(log.polls),
        })
    }

    fn fetch_page(
        &self,
        handle: &str,
        selection: &FieldSelection,
        first: u64,
        last: u64,
    ) -> Result<Vec<Row>> {
        let mut log = self.log.lock();
        log.page_calls += 1;
        let call = log.page_calls;
        log.pages.push(PageRequest {
            handle: handle.to_string(),
            selection: selection.clone(),
            first,
            last,
        });
        if self.failing_pages.contains(&call) {
            return Err(Error::RemoteUnavailable(format!("page call {} dropped", call)));
        }

        let set = log
            .result_sets
            .get(handle)
            .ok_or_else(|| Error::RemoteUnavailable(format!("unknown handle {}", handle)))?;

        let (skip, take) = match selection.range {
            Some((from, to)) => (from.saturating_sub(1), to.saturating_sub(from) + 1),
            None => (0, u64::MAX),
        };

        let mut rows = Vec::new();
        for entity in set
            .iter()
            .skip(first.saturating_sub(1) as usize)
            .take(last.saturating_sub(first).saturating_add(1) as usize)
        {
            rows.extend(
                entity
                    .iter()
                    .skip(skip as usize)
                    .take(take as usize)
                    .cloned(),
            );
        }
        Ok(rows)
    }
}

/// Sleeper that records durations and returns immediately.
#[derive(Debug, Default)]
pub struct ManualSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualSleeper {
    /// Create a sleeper with no recorded sleeps
    pub fn new() -> Self {
        Self::default()
    }

    /// Every duration slept so far
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl Sleeper for ManualSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
    }
}

/// Execution context that passes `n` cancellation checks, then cancels.
///
/// Messages and progress reports are recorded for assertions.
#[derive(Debug)]
pub struct CancelAfter {
    remaining: Mutex<Option<usize>>,
    checks: Mutex<usize>,
    messages: Mutex<Vec<String>>,
    progress: Mutex<Vec<f64>>,
}

impl CancelAfter {
    /// Cancel on the `(n + 1)`th check
    pub fn new(n: usize) -> Self {
        Self::with_budget(Some(n))
    }

    /// Never cancel; only record
    pub fn never() -> Self {
        Self::with_budget(None)
    }

    fn with_budget(remaining: Option<usize>) -> Self {
        Self {
            remaining: Mutex::new(remaining),
            checks: Mutex::new(0),
            messages: Mutex::new(Vec::new()),
            progress: Mutex::new(Vec::new()),
        }
    }

    /// Cancellation checks made so far
    pub fn checks(&self) -> usize {
        *self.checks.lock()
    }

    /// Messages reported so far
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    /// Progress fractions reported so far
    pub fn progress(&self) -> Vec<f64> {
        self.progress.lock().clone()
    }
}

impl ExecutionContext for CancelAfter {
    fn report_progress(&self, fraction: f64) {
        self.progress.lock().push(fraction);
    }

    fn report_message(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }

    fn check_cancelled(&self) -> Result<()> {
        *self.checks.lock() += 1;
        let mut remaining = self.remaining.lock();
        match remaining.as_mut() {
            None => Ok(()),
            Some(0) => Err(Error::Cancelled),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
        }
    }
}
