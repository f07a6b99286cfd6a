//! Collaborator traits
//!
//! The retrieval core talks to three things it does not own:
//!
//! - the host execution context (progress, messages, cancellation)
//! - the remote service, through an adapter that owns all wire concerns
//! - the static field/data-type catalog
//!
//! Each is a trait so hosts and tests can substitute their own.

use crate::catalog::DataType;
use crate::error::Result;
use crate::query::QueryDescriptor;
use crate::row::Row;
use crate::service::{FieldSelection, SearchResponse};

/// Host-provided execution context.
///
/// The engine calls [`check_cancelled`](Self::check_cancelled) at every page
/// and chunk boundary and propagates its error unchanged.
pub trait ExecutionContext {
    /// Report overall progress as a fraction in `0.0..=1.0`
    fn report_progress(&self, fraction: f64);

    /// Report a human-readable status line
    fn report_message(&self, message: &str);

    /// Fail with [`Error::Cancelled`](crate::Error::Cancelled) once the host
    /// has requested cancellation
    fn check_cancelled(&self) -> Result<()>;
}

/// Narrow call contract with the remote query service.
///
/// Implementations own document construction, transport and response
/// parsing. Any failure is reported as
/// [`Error::RemoteUnavailable`](crate::Error::RemoteUnavailable).
pub trait ServiceAdapter {
    /// Issue the initial search for a descriptor
    fn search(&self, query: &QueryDescriptor) -> Result<SearchResponse>;

    /// Re-check a result set that was still computing.
    ///
    /// This is the minimal probe query: one field (`probe_field`) of one
    /// entity from the existing result set.
    fn poll(&self, handle: &str, probe_field: &str) -> Result<SearchResponse>;

    /// Fetch rows for entities `first..=last` (1-based) of a result set
    fn fetch_page(
        &self,
        handle: &str,
        selection: &FieldSelection,
        first: u64,
        last: u64,
    ) -> Result<Vec<Row>>;
}

/// Static lookup over field labels and data-type codes.
pub trait FieldCatalog {
    /// Whether a field label carries a structure (molfile) payload
    fn is_structure_field(&self, label: &str) -> bool;

    /// Whether a field label carries a reaction payload
    fn is_reaction_field(&self, label: &str) -> bool;

    /// Database, context and associated fields for a data-type code
    fn metadata_for(&self, code: &str) -> Option<&DataType>;

    /// Row label for a field code, e.g. `IDE.XRN` to
    /// `Reaxys Registry Number (IDE.XRN)`
    fn label(&self, field_code: &str) -> String;

    /// Whether a field class has exactly one value per matched entity
    fn is_single_valued(&self, code: &str) -> bool;
}

impl<T: ServiceAdapter + ?Sized> ServiceAdapter for &T {
    fn search(&self, query: &QueryDescriptor) -> Result<SearchResponse> {
        (**self).search(query)
    }

    fn poll(&self, handle: &str, probe_field: &str) -> Result<SearchResponse> {
        (**self).poll(handle, probe_field)
    }

    fn fetch_page(
        &self,
        handle: &str,
        selection: &FieldSelection,
        first: u64,
        last: u64,
    ) -> Result<Vec<Row>> {
        (**self).fetch_page(handle, selection, first, last)
    }
}

impl<T: FieldCatalog + ?Sized> FieldCatalog for &T {
    fn is_structure_field(&self, label: &str) -> bool {
        (**self).is_structure_field(label)
    }

    fn is_reaction_field(&self, label: &str) -> bool {
        (**self).is_reaction_field(label)
    }

    fn metadata_for(&self, code: &str) -> Option<&DataType> {
        (**self).metadata_for(code)
    }

    fn label(&self, field_code: &str) -> String {
        (**self).label(field_code)
    }

    fn is_single_valued(&self, code: &str) -> bool {
        (**self).is_single_valued(code)
    }
}
