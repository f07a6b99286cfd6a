//! Core types and traits for harvest
//!
//! This crate defines the foundational types shared by the storage and
//! retrieval layers:
//! - Error: Error taxonomy and `Result` alias
//! - Row: One retrieved record (field label -> optional value)
//! - QueryDescriptor: Immutable description of one remote query
//! - Catalog: Embedded data-type and field-label table
//! - Service types: SearchResponse, SearchStatus, FieldSelection
//! - Traits: ExecutionContext, ServiceAdapter, FieldCatalog

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod context;
pub mod error;
pub mod query;
pub mod row;
pub mod service;
pub mod traits;

pub use catalog::{DataType, StaticCatalog};
pub use context::{CancellationToken, NullContext};
pub use error::{Error, Result};
pub use query::QueryDescriptor;
pub use row::{column_names, Row};
pub use service::{FieldSelection, SearchResponse, SearchStatus};
pub use traits::{ExecutionContext, FieldCatalog, ServiceAdapter};
