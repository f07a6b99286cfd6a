//! Storage layer for harvest
//!
//! This crate implements bounded-memory accumulation of retrieved data:
//! - AppendStore: single backing file plus in-memory offset/length index
//! - SpillSequence: ordered collection of serialized elements over an AppendStore
//! - SpillCursor: one-pass iteration over a frozen index snapshot
//!
//! Each sequence owns its backing file exclusively. The file is created on
//! first write and deleted on close (or drop).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod append_store;
pub mod spill;

pub use append_store::{AppendStore, IndexEntry, StoreSnapshot};
pub use spill::{SpillCursor, SpillSequence};
