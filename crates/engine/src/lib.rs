//! Retrieval engine for harvest
//!
//! This crate drives the remote service through the lower layers:
//! - Session: one search, the poll loop for running result sets, page fetches
//! - Engine: exhaustive and sampled traversal into spill-backed sequences
//! - Normalisation: structure and reaction payload fixes per page
//! - Enrichment: left-outer join of structure payloads onto a result
//! - Config: paging and polling constants from `harvest.toml`
//!
//! The engine is the only component that knows about:
//! - Paging strategy and cancellation points
//! - Which sequences a retrieval owns and when to close them

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod engine;
mod enrich;
pub mod normalize;
pub mod session;
pub mod testing;

pub use clock::{Sleeper, ThreadSleeper};
pub use config::{RetrievalConfig, CONFIG_FILE_NAME};
pub use engine::{Retrieval, RetrievalEngine, RetrievalMode, RetrievalRequest};
pub use normalize::{decompress, fix_payloads};
pub use session::{RetrievalSession, SessionPhase, SessionState, SessionStats};
