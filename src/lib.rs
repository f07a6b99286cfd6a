//! Harvest - paginated result-set retrieval with bounded memory
//!
//! Harvest pulls arbitrarily large result sets out of a remote query service
//! page by page and accumulates them in disk-spilled sequences, so memory use
//! stays flat no matter how many rows come back.
//!
//! # Quick Start
//!
//! ```ignore
//! use harvest::{NullContext, QueryDescriptor, RetrievalEngine, RetrievalRequest, StaticCatalog};
//!
//! let catalog = StaticCatalog::global();
//! let query = QueryDescriptor::for_data_type(catalog.by_name("MP").unwrap())
//!     .match_on("IDE.XRN", "1234");
//!
//! let engine = RetrievalEngine::new(my_adapter);
//! let result = engine.retrieve(&RetrievalRequest::new(query).limit(500), &NullContext)?;
//! for row in result.rows.iter()? {
//!     println!("{:?}", row?);
//! }
//! ```
//!
//! # Architecture
//!
//! - `harvest-core`: rows, queries, the catalog and collaborator traits
//! - `harvest-storage`: the append store and spill-backed sequences
//! - `harvest-engine`: sessions, paging, sampling and structure enrichment
//!
//! The remote service is reached only through a [`ServiceAdapter`] supplied
//! by the host.

pub use harvest_core::*;
pub use harvest_engine::{
    decompress, fix_payloads, Retrieval, RetrievalConfig, RetrievalEngine, RetrievalMode,
    RetrievalRequest, RetrievalSession, SessionPhase, SessionState, SessionStats, Sleeper,
    ThreadSleeper, CONFIG_FILE_NAME,
};
pub use harvest_storage::{AppendStore, SpillCursor, SpillSequence, StoreSnapshot};

/// Test doubles for the retrieval collaborators
pub mod testing {
    pub use harvest_engine::testing::*;
}
