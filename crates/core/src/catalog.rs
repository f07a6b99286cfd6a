//! Static catalog of remote data types and field labels
//!
//! The remote service exposes a large, fixed enumeration of data types
//! (each with a retrieval code, a search context and a database) and of
//! field codes. The table lives in `data/catalog.json`, is embedded at compile
//! time and parsed once on first use.

use crate::traits::FieldCatalog;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Field code of the compound registry number
pub const FIELD_XRN: &str = "IDE.XRN";
/// Field code of the molecule registry number carried by bioactivity facts
pub const FIELD_MRN: &str = "DAT.MRN";
/// Field code of the reaction identifier
pub const FIELD_RXID: &str = "RX.ID";
/// Field code of the compound structure payload
pub const FIELD_STRUCTURE: &str = "YY.STR";
/// Field code of the reaction structure payload
pub const FIELD_REACTION_STRUCTURE: &str = "RY.STR";

/// Name of the compound-structure data type
pub const DATA_TYPE_STRUCTURE: &str = "YY";
/// Name of the reaction-structure data type
pub const DATA_TYPE_REACTION_STRUCTURE: &str = "RY";

static CATALOG_JSON: &str = include_str!("../data/catalog.json");

/// One remote data type: what to ask for, and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataType {
    /// Unique catalog name (e.g. `"MP"`, `"LN_SUPL"`)
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Retrieval code sent to the service (not unique across databases)
    pub code: String,
    /// Search context (`S` substances, `R` reactions, `C` citations, ...)
    pub context: String,
    /// Database the type lives in
    pub database: String,
    /// Codes of data types whose fields come back alongside this one
    #[serde(default)]
    pub associated: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct FieldEntry {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct CatalogTable {
    structure_tags: Vec<String>,
    reaction_tags: Vec<String>,
    single_valued: Vec<String>,
    fields: Vec<FieldEntry>,
    data_types: Vec<DataType>,
}

/// Read-only lookup over the embedded catalog.
#[derive(Debug)]
pub struct StaticCatalog {
    data_types: Vec<DataType>,
    by_name: HashMap<String, usize>,
    by_description: HashMap<String, usize>,
    field_labels: HashMap<String, String>,
    structure_tags: Vec<String>,
    reaction_tags: Vec<String>,
    single_valued: Vec<String>,
}

static GLOBAL: Lazy<StaticCatalog> = Lazy::new(|| {
    // The table is compiled in; a parse failure is a build defect.
    StaticCatalog::from_json(CATALOG_JSON).unwrap_or_else(|e| panic!("embedded catalog: {}", e))
});

impl StaticCatalog {
    /// The process-wide catalog, parsed on first access
    pub fn global() -> &'static StaticCatalog {
        &GLOBAL
    }

    /// Parse a catalog table
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let table: CatalogTable = serde_json::from_str(json)?;

        let mut by_name = HashMap::with_capacity(table.data_types.len());
        let mut by_description = HashMap::with_capacity(table.data_types.len());
        for (i, dt) in table.data_types.iter().enumerate() {
            by_name.insert(dt.name.clone(), i);
            by_description.insert(dt.description.to_lowercase(), i);
        }

        let field_labels = table
            .fields
            .into_iter()
            .map(|f| {
                let label = format!("{} ({})", f.description, f.code);
                (f.code, label)
            })
            .collect();

        Ok(Self {
            data_types: table.data_types,
            by_name,
            by_description,
            field_labels,
            structure_tags: table.structure_tags,
            reaction_tags: table.reaction_tags,
            single_valued: table.single_valued,
        })
    }

    /// Look up a data type by its unique catalog name
    pub fn by_name(&self, name: &str) -> Option<&DataType> {
        self.by_name.get(name).map(|&i| &self.data_types[i])
    }

    /// First data type carrying the given retrieval code
    pub fn by_code(&self, code: &str) -> Option<&DataType> {
        self.data_types.iter().find(|dt| dt.code == code)
    }

    /// Case-insensitive lookup by description
    pub fn by_description(&self, description: &str) -> Option<&DataType> {
        self.by_description
            .get(&description.to_lowercase())
            .map(|&i| &self.data_types[i])
    }

    /// All descriptions, in catalog order
    pub fn descriptions(&self) -> Vec<&str> {
        self.data_types
            .iter()
            .map(|dt| dt.description.as_str())
            .collect()
    }

    /// Number of data types in the catalog
    pub fn len(&self) -> usize {
        self.data_types.len()
    }

    /// True if the catalog holds no data types
    pub fn is_empty(&self) -> bool {
        self.data_types.is_empty()
    }
}

impl FieldCatalog for StaticCatalog {
    fn is_structure_field(&self, label: &str) -> bool {
        self.structure_tags.iter().any(|t| label.contains(t.as_str()))
    }

    fn is_reaction_field(&self, label: &str) -> bool {
        self.reaction_tags.iter().any(|t| label.contains(t.as_str()))
    }

    fn metadata_for(&self, code: &str) -> Option<&DataType> {
        self.by_name(code).or_else(|| self.by_code(code))
    }

    fn label(&self, field_code: &str) -> String {
        self.field_labels
            .get(field_code)
            .cloned()
            .unwrap_or_else(|| field_code.to_string())
    }

    fn is_single_valued(&self, code: &str) -> bool {
        self.single_valued.iter().any(|c| c == code)
    }
}
