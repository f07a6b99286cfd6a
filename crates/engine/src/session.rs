//! Retrieval session: one search against the remote service
//!
//! A session issues a single search, waits out a still-running result set by
//! polling, and then serves page requests against the resulting handle.
//!
//! ```text
//! Idle --search--> Searching --ok--> Ready
//!                      |
//!                      +--running--> (poll x N) --ok--> Ready
//!                      |                  |
//!                      |                  +--budget spent--> Running
//!                      +--error--> Error
//! ```
//!
//! A session that is still `Running` after its poll budget proceeds anyway:
//! the caller pages against the last known count.

use crate::clock::Sleeper;
use crate::config::RetrievalConfig;
use harvest_core::{
    Error, FieldSelection, QueryDescriptor, Result, Row, SearchResponse, SearchStatus,
    ServiceAdapter,
};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No search issued yet
    Idle,
    /// Initial search in flight
    Searching,
    /// Result set complete; pages may be requested
    Ready,
    /// Poll budget spent while the service was still computing
    Running,
    /// The search failed
    Error,
}

/// Handle, count and status of the session's result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    /// Result-set handle
    pub handle: String,
    /// Total matched entities reported by the service
    pub total_count: u64,
    /// Last reported computation status
    pub status: SearchStatus,
}

impl SessionState {
    fn from_response(response: SearchResponse) -> Self {
        Self {
            handle: response.handle,
            total_count: response.count,
            status: response.status,
        }
    }
}

/// Request counters for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Remote calls issued (search, polls and pages)
    pub requests: u64,
    /// Remote calls that failed
    pub failed_requests: u64,
    /// Polls issued while waiting on a running search
    pub polls: u32,
    /// Rows received across all pages
    pub rows_received: u64,
    /// Time spent inside remote calls and poll waits
    pub elapsed: Duration,
}

/// One search and the page requests made against its result set.
pub struct RetrievalSession<'a, A, S> {
    adapter: &'a A,
    sleeper: &'a S,
    config: &'a RetrievalConfig,
    phase: SessionPhase,
    state: Option<SessionState>,
    stats: SessionStats,
}

impl<'a, A, S> RetrievalSession<'a, A, S>
where
    A: ServiceAdapter,
    S: Sleeper,
{
    /// Create an idle session
    pub fn new(adapter: &'a A, sleeper: &'a S, config: &'a RetrievalConfig) -> Self {
        Self {
            adapter,
            sleeper,
            config,
            phase: SessionPhase::Idle,
            state: None,
            stats: SessionStats::default(),
        }
    }

    /// Issue the search and wait until the result set is usable.
    ///
    /// While the service reports `running`, sleeps `poll_interval` and
    /// re-probes the handle, up to `poll_attempts` times. A failed poll keeps
    /// the previous state. When the budget runs out the session proceeds
    /// with whatever count it last saw.
    ///
    /// `max_results` only bounds the log line; the caller applies the cap.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if this session has already searched
    /// - the adapter's error if the initial search fails
    pub fn search(&mut self, query: &QueryDescriptor, max_results: u64) -> Result<SessionState> {
        if self.phase != SessionPhase::Idle {
            return Err(Error::InvalidInput(
                "a retrieval session issues exactly one search".to_string(),
            ));
        }
        self.phase = SessionPhase::Searching;

        debug!(
            target: "harvest::session",
            data_type = %query.data_type,
            database = %query.database,
            context = %query.context,
            where_clause = %query.where_clause(),
            "Issuing search"
        );

        let started = Instant::now();
        self.stats.requests += 1;
        let response = self.adapter.search(query);
        self.stats.elapsed += started.elapsed();

        let mut state = match response {
            Ok(response) => SessionState::from_response(response),
            Err(e) => {
                self.stats.failed_requests += 1;
                self.phase = SessionPhase::Error;
                warn!(target: "harvest::session", error = %e, "Search failed");
                return Err(e);
            }
        };

        if state.status == SearchStatus::Running {
            state = self.wait_for_completion(state);
        }

        self.phase = match state.status {
            SearchStatus::Ok => SessionPhase::Ready,
            SearchStatus::Running => SessionPhase::Running,
            SearchStatus::Error => SessionPhase::Error,
        };

        info!(
            target: "harvest::session",
            handle = %state.handle,
            total_count = state.total_count,
            retrievable = state.total_count.min(max_results),
            status = %state.status,
            "Search complete"
        );

        self.state = Some(state.clone());
        Ok(state)
    }

    fn wait_for_completion(&mut self, mut state: SessionState) -> SessionState {
        let interval = self.config.poll_interval();

        for attempt in 1..=self.config.poll_attempts {
            info!(
                target: "harvest::session",
                handle = %state.handle,
                attempt,
                interval_secs = interval.as_secs(),
                "Search still running, waiting"
            );

            let started = Instant::now();
            self.sleeper.sleep(interval);
            self.stats.requests += 1;
            self.stats.polls += 1;
            let polled = self.adapter.poll(&state.handle, &self.config.probe_field);
            self.stats.elapsed += started.elapsed();

            match polled {
                Ok(response) => {
                    if !response.handle.is_empty() {
                        state.handle = response.handle;
                    }
                    state.total_count = response.count;
                    state.status = response.status;
                    if state.status != SearchStatus::Running {
                        return state;
                    }
                }
                Err(e) => {
                    self.stats.failed_requests += 1;
                    warn!(
                        target: "harvest::session",
                        handle = %state.handle,
                        attempt,
                        error = %e,
                        "Poll failed, keeping last known state"
                    );
                }
            }
        }

        warn!(
            target: "harvest::session",
            handle = %state.handle,
            attempts = self.config.poll_attempts,
            total_count = state.total_count,
            "Poll budget exhausted, proceeding with last known count"
        );
        state
    }

    /// Fetch rows for entities `first..=last` of the result set.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` before a successful search
    /// - the adapter's error, unchanged
    pub fn fetch_range(
        &mut self,
        selection: &FieldSelection,
        first: u64,
        last: u64,
    ) -> Result<Vec<Row>> {
        let handle = match &self.state {
            Some(state) => state.handle.as_str(),
            None => {
                return Err(Error::InvalidInput(
                    "fetch_range called before search".to_string(),
                ))
            }
        };

        let started = Instant::now();
        self.stats.requests += 1;
        let fetched = self.adapter.fetch_page(handle, selection, first, last);
        self.stats.elapsed += started.elapsed();

        match fetched {
            Ok(rows) => {
                self.stats.rows_received += rows.len() as u64;
                debug!(
                    target: "harvest::session",
                    selection = %selection,
                    first,
                    last,
                    rows = rows.len(),
                    "Fetched page"
                );
                Ok(rows)
            }
            Err(e) => {
                self.stats.failed_requests += 1;
                Err(e)
            }
        }
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Result-set state, once searched
    pub fn state(&self) -> Option<&SessionState> {
        self.state.as_ref()
    }

    /// Request counters so far
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Log the request summary for this session
    pub fn log_summary(&self) {
        info!(
            target: "harvest::session",
            requests = self.stats.requests,
            failed_requests = self.stats.failed_requests,
            polls = self.stats.polls,
            rows_received = self.stats.rows_received,
            elapsed_ms = self.stats.elapsed.as_millis() as u64,
            "Session summary"
        );
    }
}
