//! Query descriptors
//!
//! A [`QueryDescriptor`] captures one logical query: which data type to
//! retrieve, from which database/context, and the match criteria. It is
//! built by the caller and never modified once handed to a session.
//!
//! The descriptor also knows how to render the textual clauses the remote
//! service expects (`where_clause`, `order_by_clause`); turning those into
//! the service's document format is the adapter's job.

use crate::catalog::DataType;
use serde::{Deserialize, Serialize};

/// Default ordering for bioactivity (`DPI` context) searches
pub const BIOACTIVITY_ORDER: &str = "DAT.PAUREUS DESC";
/// Default ordering for citation searches
pub const CITATION_ORDER: &str = "CNR.CUPD DESC";

/// Immutable description of one remote query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    /// Field the match value applies to, e.g. `IDE.XRN`
    pub match_field: Option<String>,
    /// Value matched against `match_field`, or a free-text query on its own
    pub match_value: Option<String>,
    /// Additional clause ANDed onto the match, e.g. `MP.MP > 100`
    pub extra_clause: Option<String>,
    /// Retrieval code of the requested data type
    pub data_type: String,
    /// Caller-supplied ordering, `FIELD ASC|DESC`
    pub sort_clause: Option<String>,
    /// Database to search
    pub database: String,
    /// Search context within the database
    pub context: String,
}

impl QueryDescriptor {
    /// Start a descriptor for the given data type
    pub fn for_data_type(data_type: &DataType) -> Self {
        Self {
            match_field: None,
            match_value: None,
            extra_clause: None,
            data_type: data_type.code.clone(),
            sort_clause: None,
            database: data_type.database.clone(),
            context: data_type.context.clone(),
        }
    }

    /// Match `field` against `value`
    pub fn match_on(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_field = Some(field.into());
        self.match_value = Some(value.into());
        self
    }

    /// Use `value` as a free-text query with no match field
    pub fn match_text(mut self, value: impl Into<String>) -> Self {
        self.match_field = None;
        self.match_value = Some(value.into());
        self
    }

    /// AND an extra clause onto the match
    pub fn with_clause(mut self, clause: impl Into<String>) -> Self {
        self.extra_clause = Some(clause.into());
        self
    }

    /// Request an explicit ordering
    pub fn sorted_by(mut self, clause: impl Into<String>) -> Self {
        self.sort_clause = Some(clause.into());
        self
    }

    /// Render the search predicate.
    ///
    /// - `FIELD='value'` when both a match field and value are set
    /// - the bare value when only a value is set, unless the extra clause is
    ///   itself a structure or reaction query (those carry their own payload)
    /// - the extra clause is appended with ` AND `
    pub fn where_clause(&self) -> String {
        let field = non_empty(&self.match_field);
        let value = non_empty(&self.match_value);
        let extra = non_empty(&self.extra_clause);

        let mut clause = match (field, value) {
            (Some(field), Some(value)) => format!("{}='{}'", field, value),
            (_, value) => {
                let structural = extra.map(is_structural_query).unwrap_or(false);
                match value {
                    Some(value) if !structural => value.to_string(),
                    _ => String::new(),
                }
            }
        };

        if let Some(extra) = extra {
            if !clause.is_empty() {
                clause.push_str(" AND ");
            }
            clause.push_str(extra);
        }
        clause
    }

    /// Render the ordering clause, if any.
    ///
    /// A caller clause is honoured only when it ends in ` ASC` or ` DESC`;
    /// the service rejects anything else outright. Otherwise bioactivity and
    /// citation searches get their customary ordering, substance
    /// identification gets an explicitly empty one, and the rest none.
    pub fn order_by_clause(&self) -> Option<String> {
        if let Some(sort) = &self.sort_clause {
            let sort = sort.trim();
            if sort.ends_with(" DESC") || sort.ends_with(" ASC") {
                return Some(sort.to_string());
            }
        }
        if self.context == "DPI" {
            Some(BIOACTIVITY_ORDER.to_string())
        } else if self.data_type == "CIT" {
            Some(CITATION_ORDER.to_string())
        } else if self.data_type == "IDE" {
            Some(String::new())
        } else {
            None
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn is_structural_query(clause: &str) -> bool {
    let lower = clause.to_lowercase();
    lower.starts_with("struc") || lower.starts_with("reac")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;

    fn data_type(name: &str) -> &'static DataType {
        StaticCatalog::global().by_name(name).unwrap()
    }

    #[test]
    fn test_descriptor_inherits_data_type_location() {
        let q = QueryDescriptor::for_data_type(data_type("DAT"));
        assert_eq!(q.data_type, "DAT");
        assert_eq!(q.database, "RX");
        assert_eq!(q.context, "DPI");
    }

    #[test]
    fn test_where_clause_field_match_and_extra() {
        let q = QueryDescriptor::for_data_type(data_type("MP"))
            .match_on("IDE.XRN", "39192909")
            .with_clause("MP.MP > 100");
        assert_eq!(q.where_clause(), "IDE.XRN='39192909' AND MP.MP > 100");
    }

    #[test]
    fn test_where_clause_free_text() {
        let q = QueryDescriptor::for_data_type(data_type("IDE")).match_text("IDE.CN='benzene'");
        assert_eq!(q.where_clause(), "IDE.CN='benzene'");
    }

    #[test]
    fn test_where_clause_structure_query_drops_value() {
        let q = QueryDescriptor::for_data_type(data_type("IDE"))
            .match_text("c1ccccc1")
            .with_clause("structure('c1ccccc1','substructure')");
        assert_eq!(q.where_clause(), "structure('c1ccccc1','substructure')");
    }

    #[test]
    fn test_where_clause_extra_only() {
        let q = QueryDescriptor::for_data_type(data_type("YY")).with_clause("IDE.XRN=1;2;3");
        assert_eq!(q.where_clause(), "IDE.XRN=1;2;3");
    }

    #[test]
    fn test_order_by_defaults() {
        let bio = QueryDescriptor::for_data_type(data_type("DAT"));
        assert_eq!(bio.order_by_clause().as_deref(), Some(BIOACTIVITY_ORDER));

        let cit = QueryDescriptor::for_data_type(data_type("CIT"));
        assert_eq!(cit.order_by_clause().as_deref(), Some(CITATION_ORDER));

        let ide = QueryDescriptor::for_data_type(data_type("IDE"));
        assert_eq!(ide.order_by_clause().as_deref(), Some(""));

        let mp = QueryDescriptor::for_data_type(data_type("MP"));
        assert_eq!(mp.order_by_clause(), None);
    }

    #[test]
    fn test_order_by_caller_clause_requires_direction() {
        let good = QueryDescriptor::for_data_type(data_type("MP")).sorted_by("MP.MP DESC ");
        assert_eq!(good.order_by_clause().as_deref(), Some("MP.MP DESC"));

        let bad = QueryDescriptor::for_data_type(data_type("DAT")).sorted_by("MP.MP");
        assert_eq!(bad.order_by_clause().as_deref(), Some(BIOACTIVITY_ORDER));
    }
}
