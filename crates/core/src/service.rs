//! Types exchanged with the remote query service
//!
//! These are the only shapes the retrieval core sees of the service: a search
//! response (handle, count, status) and the field selection sent with each
//! page request. Documents, transport and parsing stay inside the adapter.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Computation status reported by the service for a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchStatus {
    /// Result set is complete
    Ok,
    /// Service is still computing the result set
    Running,
    /// Search failed remotely
    Error,
}

impl SearchStatus {
    /// Parse the service's status word.
    ///
    /// `"ok"` and `"running"` are recognised case-insensitively; anything else
    /// is an error status.
    pub fn parse(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "ok" => SearchStatus::Ok,
            "running" => SearchStatus::Running,
            _ => SearchStatus::Error,
        }
    }
}

impl fmt::Display for SearchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchStatus::Ok => write!(f, "ok"),
            SearchStatus::Running => write!(f, "running"),
            SearchStatus::Error => write!(f, "error"),
        }
    }
}

/// Response to a search or poll request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Result-set handle used to page through results
    pub handle: String,
    /// Total number of matched entities
    pub count: u64,
    /// Computation status
    pub status: SearchStatus,
}

/// Which field class to retrieve, and which window of its values.
///
/// Most classes hold many values per matched entity and are paged with a
/// `(first, last)` value window. Single-valued classes (one structure per
/// compound, say) are requested without a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSelection {
    /// Field class code, e.g. `MP` or `YY`
    pub code: String,
    /// 1-based inclusive window of values per entity
    pub range: Option<(u64, u64)>,
}

impl FieldSelection {
    /// Request values `first..=last` of `code`
    pub fn windowed(code: impl Into<String>, first: u64, last: u64) -> Self {
        Self {
            code: code.into(),
            range: Some((first, last)),
        }
    }

    /// Request the single value of a one-per-entity class
    pub fn whole(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            range: None,
        }
    }
}

impl fmt::Display for FieldSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.range {
            Some((first, last)) => write!(f, "{}({},{})", self.code, first, last),
            None => write!(f, "{}", self.code),
        }
    }
}
