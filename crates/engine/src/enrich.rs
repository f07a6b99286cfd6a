//! Structure enrichment
//!
//! Attaches structure payloads to an already retrieved result by a shared
//! identifier. A result is treated as reactions when any row carries a
//! reaction id, otherwise as compounds keyed by molecule registry number
//! (falling back to the compound registry number).
//!
//! Keys are looked up `structure_batch` at a time, each batch being an
//! ordinary exhaustive retrieval. The join is left-outer: rows without a
//! matching structure pass through unchanged and the row count never changes.

use crate::clock::Sleeper;
use crate::engine::RetrievalEngine;
use harvest_core::catalog::{
    DATA_TYPE_REACTION_STRUCTURE, DATA_TYPE_STRUCTURE, FIELD_MRN, FIELD_RXID, FIELD_XRN,
};
use harvest_core::{
    Error, ExecutionContext, FieldCatalog, QueryDescriptor, Result, Row, ServiceAdapter,
};
use harvest_storage::SpillSequence;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, warn};

/// Which identifier joins a result to its structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinKind {
    Reaction,
    Compound,
}

impl JoinKind {
    fn data_type(self) -> &'static str {
        match self {
            JoinKind::Reaction => DATA_TYPE_REACTION_STRUCTURE,
            JoinKind::Compound => DATA_TYPE_STRUCTURE,
        }
    }

    /// Field the lookup query matches keys against
    fn lookup_field(self) -> &'static str {
        match self {
            JoinKind::Reaction => FIELD_RXID,
            JoinKind::Compound => FIELD_XRN,
        }
    }
}

/// Field labels the join reads, resolved once per enrichment
struct JoinLabels {
    reaction: String,
    molecule: String,
    registry: String,
}

impl JoinLabels {
    fn new<C: FieldCatalog>(catalog: &C) -> Self {
        Self {
            reaction: catalog.label(FIELD_RXID),
            molecule: catalog.label(FIELD_MRN),
            registry: catalog.label(FIELD_XRN),
        }
    }

    /// Join key of a source row
    fn source_key<'r>(&self, kind: JoinKind, row: &'r Row) -> Option<&'r str> {
        match kind {
            JoinKind::Reaction => row.get(&self.reaction),
            JoinKind::Compound => row.get(&self.molecule).or_else(|| row.get(&self.registry)),
        }
    }

    /// Join key of a structure row
    fn structure_key<'r>(&self, kind: JoinKind, row: &'r Row) -> Option<&'r str> {
        match kind {
            JoinKind::Reaction => row.get(&self.reaction),
            JoinKind::Compound => row.get(&self.registry),
        }
    }
}

impl<A, C, S> RetrievalEngine<A, C, S>
where
    A: ServiceAdapter,
    C: FieldCatalog,
    S: Sleeper,
{
    /// Merge structure payloads into `rows`, consuming them.
    ///
    /// Returns a new sequence with the same rows in the same order. `rows`
    /// and every intermediate sequence are closed before this returns, on
    /// success and on error alike.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if the catalog lacks the structure data type
    /// - `Cancelled`, storage and read errors from the source or lookups
    ///
    /// A structure lookup the service fails is logged and its rows stay
    /// unmatched.
    pub fn add_structures(
        &self,
        mut rows: SpillSequence<Row>,
        ctx: &dyn ExecutionContext,
    ) -> Result<SpillSequence<Row>> {
        self.config.validate()?;
        ctx.report_message("getting list of structures to add");
        let labels = JoinLabels::new(&self.catalog);

        let kind = if rows
            .iter()?
            .any(|r| matches!(r, Ok(ref row) if row.get(&labels.reaction).is_some()))
        {
            JoinKind::Reaction
        } else {
            JoinKind::Compound
        };

        let keys = collect_keys(&rows, &labels, kind)?;
        if keys.is_empty() {
            debug!(target: "harvest::enrich", kind = ?kind, "No join keys, nothing to enrich");
            return Ok(rows);
        }

        let mut structures = self.lookup_structures(kind, &keys, ctx)?;

        ctx.report_message("joining structures to data");
        let mut index: FxHashMap<String, usize> = FxHashMap::default();
        for (position, row) in structures.iter()?.enumerate() {
            let row = row?;
            if let Some(key) = labels.structure_key(kind, &row) {
                index.insert(key.to_string(), position);
            }
        }

        let mut joined = self.new_sequence();
        let mut matched = 0usize;
        for row in rows.iter()? {
            let mut row = row?;
            let hit = labels
                .source_key(kind, &row)
                .and_then(|key| index.get(key).copied());
            if let Some(position) = hit {
                row.merge_from(&structures.get(position)?);
                matched += 1;
            }
            joined.add(&row)?;
        }

        info!(
            target: "harvest::enrich",
            kind = ?kind,
            keys = keys.len(),
            structures = structures.len(),
            rows = joined.len(),
            matched,
            "Structures joined"
        );
        ctx.report_message("completed joining structures to data");

        structures.close()?;
        rows.close()?;
        Ok(joined)
    }

    /// Fetch structure rows for `keys`, batch by batch, into one sequence.
    ///
    /// A batch whose lookup fails with a non-fatal error contributes no rows.
    fn lookup_structures(
        &self,
        kind: JoinKind,
        keys: &[String],
        ctx: &dyn ExecutionContext,
    ) -> Result<SpillSequence<Row>> {
        let data_type = self.catalog.metadata_for(kind.data_type()).ok_or_else(|| {
            Error::InvalidInput(format!(
                "catalog has no data type '{}' for structure lookup",
                kind.data_type()
            ))
        })?;

        let mut structures = self.new_sequence();
        for (batch_no, batch) in keys.chunks(self.config.structure_batch).enumerate() {
            ctx.check_cancelled()?;
            let query = QueryDescriptor::for_data_type(data_type)
                .with_clause(format!("{}={}", kind.lookup_field(), batch.join(";")));

            debug!(
                target: "harvest::enrich",
                batch = batch_no,
                keys = batch.len(),
                "Looking up structures"
            );
            let mut fetched = match self.fetch_all(&query, 1, u64::MAX, ctx) {
                Ok(retrieval) => retrieval.rows,
                Err(e) if !e.is_fatal() => {
                    warn!(
                        target: "harvest::enrich",
                        batch = batch_no,
                        keys = batch.len(),
                        error = %e,
                        "Structure lookup failed, leaving batch unmatched"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };
            for row in fetched.iter()? {
                structures.add(&row?)?;
            }
            fetched.close()?;
        }
        Ok(structures)
    }
}

/// Distinct join keys in first-seen order
fn collect_keys(
    rows: &SpillSequence<Row>,
    labels: &JoinLabels,
    kind: JoinKind,
) -> Result<Vec<String>> {
    let mut seen = FxHashSet::default();
    let mut keys = Vec::new();
    for row in rows.iter()? {
        let row = row?;
        if let Some(key) = labels.source_key(kind, &row) {
            if seen.insert(key.to_string()) {
                keys.push(key.to_string());
            }
        }
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::testing::{ManualSleeper, SyntheticService};
    use harvest_core::{NullContext, StaticCatalog};
    use tempfile::TempDir;

    fn compound(xrn: &str, mrn: Option<&str>) -> Row {
        let catalog = StaticCatalog::global();
        let mut row = Row::new();
        row.insert(catalog.label(FIELD_XRN), xrn);
        if let Some(mrn) = mrn {
            row.insert(catalog.label(FIELD_MRN), mrn);
        }
        row
    }

    #[test]
    fn test_keys_prefer_molecule_registry_number() {
        let dir = TempDir::new().unwrap();
        let labels = JoinLabels::new(&StaticCatalog::global());
        let mut rows: SpillSequence<Row> = SpillSequence::new(dir.path());
        rows.add(&compound("1", Some("9"))).unwrap();
        rows.add(&compound("2", None)).unwrap();
        rows.add(&compound("1", Some("9"))).unwrap();

        let keys = collect_keys(&rows, &labels, JoinKind::Compound).unwrap();
        assert_eq!(keys, vec!["9".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_keys_batched() {
        let dir = TempDir::new().unwrap();
        let service = SyntheticService::empty();
        let engine = RetrievalEngine::new(&service)
            .with_sleeper(ManualSleeper::new())
            .with_config(RetrievalConfig {
                structure_batch: 2,
                spill_dir: Some(dir.path().to_path_buf()),
                ..RetrievalConfig::default()
            });

        let mut rows: SpillSequence<Row> = SpillSequence::new(dir.path());
        rows.add_all((1..=5).map(|i| compound(&i.to_string(), None)))
            .unwrap();

        let joined = engine.add_structures(rows, &NullContext).unwrap();
        assert_eq!(joined.len(), 5);

        let clauses: Vec<String> = service
            .searches()
            .into_iter()
            .filter_map(|q| q.extra_clause)
            .collect();
        assert_eq!(clauses, vec!["IDE.XRN=1;2", "IDE.XRN=3;4", "IDE.XRN=5"]);
    }

    #[test]
    fn test_failed_lookup_batch_left_unmatched() {
        let dir = TempDir::new().unwrap();
        let catalog = StaticCatalog::global();
        let structure = |xrn: &str| {
            Row::from_iter([
                (catalog.label(FIELD_XRN), xrn.to_string()),
                ("Structure (YY.STR)".to_string(), format!("mol-{}", xrn)),
            ])
        };
        let service = SyntheticService::empty()
            .with_structure("1", structure("1"))
            .with_structure("2", structure("2"))
            .failing_search_calls([1]);
        let engine = RetrievalEngine::new(&service)
            .with_sleeper(ManualSleeper::new())
            .with_config(RetrievalConfig {
                structure_batch: 1,
                spill_dir: Some(dir.path().to_path_buf()),
                ..RetrievalConfig::default()
            });

        let mut rows: SpillSequence<Row> = SpillSequence::new(dir.path());
        rows.add_all([compound("1", None), compound("2", None)])
            .unwrap();

        let joined = engine
            .add_structures(rows, &NullContext)
            .unwrap()
            .to_vec()
            .unwrap();

        assert_eq!(service.searches().len(), 2);
        assert_eq!(joined[0], compound("1", None));
        assert_eq!(joined[1].get("Structure (YY.STR)"), Some("mol-2"));
    }

    #[test]
    fn test_rows_without_keys_returned_as_is() {
        let dir = TempDir::new().unwrap();
        let service = SyntheticService::empty();
        let engine = RetrievalEngine::new(&service)
            .with_sleeper(ManualSleeper::new())
            .with_config(RetrievalConfig {
                spill_dir: Some(dir.path().to_path_buf()),
                ..RetrievalConfig::default()
            });

        let mut rows: SpillSequence<Row> = SpillSequence::new(dir.path());
        rows.add(&Row::from_iter([("Title (CIT.TI)", "On benzene")]))
            .unwrap();

        let out = engine.add_structures(rows, &NullContext).unwrap();
        assert_eq!(out.len(), 1);
        assert!(service.searches().is_empty());
    }
}
