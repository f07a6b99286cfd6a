//! Retrieval configuration via `harvest.toml`
//!
//! Every paging constant, the poll budget and the spill location live here so
//! hosts can tune them without rebuilding. A missing file means defaults; a
//! missing key means that key's default.

use harvest_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file name
pub const CONFIG_FILE_NAME: &str = "harvest.toml";

fn default_record_chunk() -> u64 {
    50
}

fn default_page_size() -> u64 {
    100
}

fn default_max_pages() -> u64 {
    10_000
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_poll_attempts() -> u32 {
    60
}

fn default_structure_batch() -> usize {
    256
}

fn default_max_decompressed_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_probe_field() -> String {
    "RX.ID".to_string()
}

/// Retrieval configuration loaded from `harvest.toml`.
///
/// # Example
///
/// ```toml
/// record_chunk = 50
/// page_size = 100
/// poll_interval_secs = 30
/// poll_attempts = 60
/// # spill_dir = "/var/tmp/harvest"
/// spill_reserve = 0
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Matched entities requested per outer chunk
    #[serde(default = "default_record_chunk")]
    pub record_chunk: u64,
    /// Values per entity requested per page
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    /// Fail-safe bound on pages per chunk
    #[serde(default = "default_max_pages")]
    pub max_pages: u64,
    /// Seconds between polls of a still-running search
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Polls before giving up and proceeding with the last known state
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,
    /// Field selected by the poll probe query
    #[serde(default = "default_probe_field")]
    pub probe_field: String,
    /// Join keys per structure-enrichment query
    #[serde(default = "default_structure_batch")]
    pub structure_batch: usize,
    /// Upper bound on an inflated reaction payload
    #[serde(default = "default_max_decompressed_bytes")]
    pub max_decompressed_bytes: usize,
    /// Directory for spill files; the system temp dir when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spill_dir: Option<PathBuf>,
    /// Bytes of free space spill writes must leave on the filesystem
    #[serde(default)]
    pub spill_reserve: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            record_chunk: default_record_chunk(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            poll_interval_secs: default_poll_interval_secs(),
            poll_attempts: default_poll_attempts(),
            probe_field: default_probe_field(),
            structure_batch: default_structure_batch(),
            max_decompressed_bytes: default_max_decompressed_bytes(),
            spill_dir: None,
            spill_reserve: 0,
        }
    }
}

impl RetrievalConfig {
    /// Poll interval as a `Duration`
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Directory new spill files go into
    pub fn spill_dir(&self) -> PathBuf {
        self.spill_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Reject zero sizes, which would stall the paging loops.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("record_chunk", self.record_chunk == 0),
            ("page_size", self.page_size == 0),
            ("max_pages", self.max_pages == 0),
            ("structure_batch", self.structure_batch == 0),
            ("max_decompressed_bytes", self.max_decompressed_bytes == 0),
        ];
        if let Some((key, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(Error::InvalidInput(format!(
                "'{}' in {} must be greater than zero",
                key, CONFIG_FILE_NAME
            )));
        }
        if self.probe_field.is_empty() {
            return Err(Error::InvalidInput(format!(
                "'probe_field' in {} must not be empty",
                CONFIG_FILE_NAME
            )));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Harvest retrieval configuration
#
# Paging: matched entities are fetched in chunks of `record_chunk`; for each
# chunk, values are fetched `page_size` at a time until a short page arrives
# or `max_pages` pages have been requested.
record_chunk = 50
page_size = 100
max_pages = 10000

# Searches the service is still computing are re-checked every
# `poll_interval_secs` seconds, at most `poll_attempts` times.
poll_interval_secs = 30
poll_attempts = 60
probe_field = "RX.ID"

# Structure enrichment looks up at most this many identifiers per query.
structure_batch = 256

# Largest accepted size of an inflated reaction payload, in bytes.
max_decompressed_bytes = 67108864

# Where spill files go (default: system temp directory).
# spill_dir = "/var/tmp/harvest"

# Free space, in bytes, that spill writes must leave untouched. A write that
# would eat into it fails with a storage-exhausted error.
spill_reserve = 0
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RetrievalConfig = toml::from_str(&content).map_err(|e| {
            Error::InvalidInput(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::InvalidInput(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
