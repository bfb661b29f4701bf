//! MSR JSON augmentation schema (spec.md §6) and allowlist text emission
//! (spec.md §6, §9 — "implementers must reproduce the byte layout of the
//! reference output to remain compatible"; this crate fixes a simple
//! ascending-by-offset `offset,mask,comment` CSV-like layout and documents
//! the choice here since the reference format is driven by an external
//! kernel parser this crate does not have access to).

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Deserialize;

use crate::descriptor::{Aggregation, Behavior, Units};
use crate::error::{Error, Result};
use crate::topo::Domain;

use super::field::{FieldDef, Function};
use super::registers::RegisterDef;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AugmentationFile {
    msrs: BTreeMap<String, JsonRegister>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonRegister {
    offset: String,
    domain: String,
    fields: BTreeMap<String, JsonField>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonField {
    begin_bit: i64,
    end_bit: i64,
    function: Function,
    units: Units,
    scalar: f64,
    behavior: Behavior,
    writeable: bool,
    aggregation: Aggregation,
    #[serde(default)]
    description: Option<String>,
}

/// Parses an MSR JSON augmentation document per spec.md §6's schema.
/// Every violation enumerated there is reported as
/// [`Error::MalformedConfig`] naming the offending key.
pub fn parse_json_msrs(text: &str) -> Result<BTreeMap<String, RegisterDef>> {
    let file: AugmentationFile = serde_json::from_str(text).map_err(|e| to_malformed(&e, text))?;

    let mut out = BTreeMap::new();
    for (reg_name, reg) in file.msrs {
        let offset = parse_hex_offset(&reg_name, &reg.offset)?;
        let domain = Domain::from_name(&reg.domain).map_err(|_| Error::MalformedConfig {
            key: format!("msrs.{reg_name}.domain"),
            detail: format!("unknown domain name `{}`", reg.domain),
        })?;

        let mut fields = BTreeMap::new();
        for (field_name, field) in reg.fields {
            if field.end_bit < field.begin_bit {
                return Err(Error::MalformedConfig {
                    key: format!("msrs.{reg_name}.fields.{field_name}.end_bit"),
                    detail: "end_bit must be >= begin_bit".to_string(),
                });
            }
            if field.begin_bit < 0 || field.end_bit > 63 {
                return Err(Error::MalformedConfig {
                    key: format!("msrs.{reg_name}.fields.{field_name}.begin_bit"),
                    detail: "bit positions must fall within 0..=63".to_string(),
                });
            }
            fields.insert(
                field_name,
                FieldDef {
                    offset,
                    begin_bit: field.begin_bit as u8,
                    end_bit: field.end_bit as u8,
                    function: field.function,
                    scalar: field.scalar,
                    units: field.units,
                    behavior: field.behavior,
                    aggregation: field.aggregation,
                    writable: field.writeable,
                    description: field.description.unwrap_or_default(),
                },
            );
        }

        out.insert(reg_name, RegisterDef { offset, domain, fields });
    }
    Ok(out)
}

fn parse_hex_offset(reg_name: &str, raw: &str) -> Result<u64> {
    let trimmed = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")).unwrap_or(raw);
    u64::from_str_radix(trimmed, 16).map_err(|e| Error::MalformedConfig {
        key: format!("msrs.{reg_name}.offset"),
        detail: format!("not a hex string: {e}"),
    })
}

/// Best-effort extraction of the offending key from a `serde_json` error so
/// callers still see a `key` even for structural failures serde reports
/// before our own per-field checks run (missing required key, wrong type,
/// unknown key).
fn to_malformed(err: &serde_json::Error, _text: &str) -> Error {
    Error::MalformedConfig {
        key: format!("line {} column {}", err.line(), err.column()),
        detail: err.to_string(),
    }
}

/// Emits the deterministic `(offset, write_mask, comment)` allowlist table
/// described in spec.md §6, ordered by offset ascending.
pub fn render_allowlist(registers: &BTreeMap<String, RegisterDef>) -> String {
    let mut rows: Vec<(u64, u64, String)> = registers
        .iter()
        .map(|(name, reg)| {
            let mask = reg
                .fields
                .values()
                .filter(|f| f.writable)
                .fold(0u64, |acc, f| acc | f.mask());
            (reg.offset, mask, name.clone())
        })
        .collect();
    rows.sort_by_key(|(offset, _, _)| *offset);

    let mut out = String::new();
    for (offset, mask, name) in rows {
        let _ = writeln!(out, "0x{offset:x}\t0x{mask:016x}\t# {name}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "msrs": {
            "TEST_REG": {
                "offset": "0x200",
                "domain": "cpu",
                "fields": {
                    "FIELD_A": {
                        "begin_bit": 0,
                        "end_bit": 7,
                        "function": "scale",
                        "units": "watts",
                        "scalar": 1.0,
                        "behavior": "variable",
                        "writeable": true,
                        "aggregation": "sum"
                    }
                }
            }
        }
    }"#;

    #[test]
    fn parses_valid_document() {
        let parsed = parse_json_msrs(VALID).unwrap();
        let reg = &parsed["TEST_REG"];
        assert_eq!(reg.offset, 0x200);
        assert_eq!(reg.domain, Domain::Cpu);
        assert_eq!(reg.fields["FIELD_A"].writable, true);
    }

    #[test]
    fn rejects_unknown_top_level_key() {
        let bad = r#"{"msrs": {}, "extra": 1}"#;
        let err = parse_json_msrs(bad).unwrap_err();
        assert!(matches!(err, Error::MalformedConfig { .. }));
    }

    #[test]
    fn rejects_unknown_field_key() {
        let bad = VALID.replace("\"scalar\": 1.0,", "\"scalar\": 1.0, \"bogus\": 1,");
        let err = parse_json_msrs(&bad).unwrap_err();
        assert!(matches!(err, Error::MalformedConfig { .. }));
    }

    #[test]
    fn rejects_end_bit_before_begin_bit() {
        let bad = VALID.replace("\"end_bit\": 7,", "\"end_bit\": -1,");
        let err = parse_json_msrs(&bad);
        assert!(err.is_err());
    }

    #[test]
    fn allowlist_is_sorted_by_offset() {
        let regs = super::super::registers::builtin_registers();
        let text = render_allowlist(&regs);
        let offsets: Vec<u64> = text
            .lines()
            .map(|line| {
                let hex = line.split('\t').next().unwrap().trim_start_matches("0x");
                u64::from_str_radix(hex, 16).unwrap()
            })
            .collect();
        let mut sorted = offsets.clone();
        sorted.sort_unstable();
        assert_eq!(offsets, sorted);
    }
}
