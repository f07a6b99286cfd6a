//! Payload normalisation applied to every fetched row
//!
//! Two fixes, both keyed off field labels via the [`FieldCatalog`]:
//!
//! - Structure (molfile) values whose header line is empty get the row's
//!   registry number written into it.
//! - Reaction values arrive base64-encoded and deflated. They are inflated
//!   and, for RXN text whose second line is empty, the row's reaction id is
//!   written into that line.
//!
//! Anything that fails to decode is kept as received.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::ZlibDecoder;
use harvest_core::catalog::{FIELD_RXID, FIELD_XRN};
use harvest_core::{FieldCatalog, Row};
use std::io::Read;
use tracing::{debug, warn};

const RXN_HEADER: &str = "$RXN";

/// Normalise structure and reaction payloads in place.
///
/// `max_inflated` bounds the size of any inflated reaction payload.
pub fn fix_payloads<C: FieldCatalog + ?Sized>(rows: &mut [Row], catalog: &C, max_inflated: usize) {
    let registry_label = catalog.label(FIELD_XRN);
    let reaction_label = catalog.label(FIELD_RXID);

    for row in rows.iter_mut() {
        let registry_id = row.get(&registry_label).map(str::to_owned);
        let reaction_id = row.get(&reaction_label).map(str::to_owned);

        let labels: Vec<String> = row
            .fields()
            .filter(|f| catalog.is_structure_field(f) || catalog.is_reaction_field(f))
            .map(str::to_owned)
            .collect();

        for label in labels {
            let Some(value) = row.value_mut(&label) else {
                continue;
            };
            if catalog.is_structure_field(&label) {
                if let Some(id) = &registry_id {
                    stamp_molfile(value, id);
                }
            }
            if catalog.is_reaction_field(&label) {
                *value = decompress(value, max_inflated);
                if let Some(id) = &reaction_id {
                    stamp_rxn(value, id);
                }
            }
        }
    }
}

/// Write `id` into the empty header line of a molfile
fn stamp_molfile(molfile: &mut String, id: &str) {
    if molfile.starts_with('\n') {
        molfile.insert_str(0, id);
    }
}

/// Write `id` into the empty second line of RXN text
fn stamp_rxn(rxn: &mut String, id: &str) {
    if !rxn.starts_with(RXN_HEADER) {
        return;
    }
    if let Some(newline) = rxn.find('\n') {
        if rxn[newline + 1..].starts_with('\n') {
            rxn.insert_str(newline + 1, id);
        }
    }
}

/// Decode a base64, deflate-compressed payload to text.
///
/// Only zlib-wrapped streams are accepted: the header and Adler-32 trailer
/// keep plain text that happens to be valid base64 from being mistaken for a
/// deflate stream. Returns the input unchanged when it is not base64, does
/// not inflate, inflates past `max_inflated` bytes, or is not UTF-8.
pub fn decompress(payload: &str, max_inflated: usize) -> String {
    let compressed = match STANDARD.decode(payload.trim()) {
        Ok(bytes) if !bytes.is_empty() => bytes,
        _ => return payload.to_string(),
    };

    let inflated = inflate(ZlibDecoder::new(compressed.as_slice()), max_inflated);
    match inflated.map(String::from_utf8) {
        Some(Ok(text)) => text,
        Some(Err(_)) => {
            debug!(target: "harvest::normalize", "Inflated payload is not UTF-8, keeping original");
            payload.to_string()
        }
        None => payload.to_string(),
    }
}

fn inflate<R: Read>(decoder: R, max_inflated: usize) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    let limit = (max_inflated as u64).saturating_add(1);
    decoder.take(limit).read_to_end(&mut out).ok()?;
    if out.len() > max_inflated {
        warn!(
            target: "harvest::normalize",
            max_inflated,
            "Reaction payload inflates past the configured bound, keeping original"
        );
        return None;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use flate2::write::{DeflateEncoder, ZlibEncoder};
    use flate2::Compression;
    use harvest_core::StaticCatalog;
    use std::io::Write;

    const LIMIT: usize = 1 << 20;

    fn zlib_base64(text: &str) -> String {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        STANDARD.encode(encoder.finish().unwrap())
    }

    fn deflate_base64(text: &str) -> String {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        STANDARD.encode(encoder.finish().unwrap())
    }

    #[test]
    fn test_decompress_zlib() {
        let rxn = "$RXN\n\n  ISIS     090120111456\n\n  1  1\n";
        assert_eq!(decompress(&zlib_base64(rxn), LIMIT), rxn);
    }

    #[test]
    fn test_raw_deflate_not_accepted() {
        let rxn = "$RXN\n\n  reaction body\n";
        let encoded = deflate_base64(rxn);
        assert_eq!(decompress(&encoded, LIMIT), encoded);
    }

    #[test]
    fn test_base64_shaped_text_kept() {
        for value in ["AwAA", "AgxA", "AwAH", "ABCD", "1234", "Ethanol0"] {
            assert_eq!(decompress(value, LIMIT), value);
        }
    }

    #[test]
    fn test_plain_text_passes_through() {
        let plain = "$RXN\n\n  not compressed at all\n";
        assert_eq!(decompress(plain, LIMIT), plain);
        assert_eq!(decompress("", LIMIT), "");
    }

    #[test]
    fn test_oversized_payload_kept() {
        let big = "C".repeat(4096);
        let encoded = zlib_base64(&big);
        assert_eq!(decompress(&encoded, 1024), encoded);
        assert_eq!(decompress(&encoded, 4096), big);
    }

    #[test]
    fn test_molfile_gets_registry_number() {
        let catalog = StaticCatalog::global();
        let mut row = Row::new();
        row.insert(catalog.label(FIELD_XRN), "1234");
        row.insert("Structure (YY.STR)", "\n  Mrv0541\n\n  0  0\nM  END\n");

        let mut rows = vec![row];
        fix_payloads(&mut rows, catalog, LIMIT);

        assert_eq!(
            rows[0].get("Structure (YY.STR)").unwrap(),
            "1234\n  Mrv0541\n\n  0  0\nM  END\n"
        );
    }

    #[test]
    fn test_molfile_with_header_untouched() {
        let catalog = StaticCatalog::global();
        let mut row = Row::new();
        row.insert(catalog.label(FIELD_XRN), "1234");
        row.insert("Structure (YY.STR)", "benzene\n  Mrv0541\n");

        let mut rows = vec![row];
        fix_payloads(&mut rows, catalog, LIMIT);

        assert_eq!(
            rows[0].get("Structure (YY.STR)").unwrap(),
            "benzene\n  Mrv0541\n"
        );
    }

    #[test]
    fn test_reaction_inflated_and_stamped() {
        let catalog = StaticCatalog::global();
        let mut row = Row::new();
        row.insert(catalog.label(FIELD_RXID), "98765");
        row.insert(
            "Reaction Structure (RY.STR)",
            zlib_base64("$RXN\n\n  ISIS\n\n  1  1\n"),
        );

        let mut rows = vec![row];
        fix_payloads(&mut rows, catalog, LIMIT);

        assert_eq!(
            rows[0].get("Reaction Structure (RY.STR)").unwrap(),
            "$RXN\n98765\n  ISIS\n\n  1  1\n"
        );
    }

    #[test]
    fn test_reaction_without_id_only_inflated() {
        let catalog = StaticCatalog::global();
        let mut row = Row::new();
        row.insert("Reaction Structure (RY.STR)", zlib_base64("$RXN\n\nbody\n"));
        row.insert_absent("Reactant (RY.RCT)");

        let mut rows = vec![row];
        fix_payloads(&mut rows, catalog, LIMIT);

        assert_eq!(
            rows[0].get("Reaction Structure (RY.STR)").unwrap(),
            "$RXN\n\nbody\n"
        );
        assert!(rows[0].contains_field("Reactant (RY.RCT)"));
        assert_eq!(rows[0].get("Reactant (RY.RCT)"), None);
    }
}
