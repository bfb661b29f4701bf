//! Built-in MSR register table.
//!
//! The reference implementation ships a large per-CPU-family register
//! database (`original_source/service/test/MSRIOGroupTest.cpp` exercises it
//! at 64KB of test code). This crate ships the small subset spec.md's
//! worked examples (§8) exercise directly, plus a couple of realistic
//! neighbors, and relies on the JSON augmentation path (`json.rs`) for
//! anything beyond it — the same two-tier design the original uses (a
//! compiled-in table plus `GEOPM_MSR_CONFIG_PATH` JSON overlays).

use std::collections::BTreeMap;

use crate::descriptor::{Aggregation, Behavior, Units};
use crate::topo::Domain;

use super::field::{FieldDef, Function};

#[derive(Clone, Debug)]
pub struct RegisterDef {
    pub offset: u64,
    pub domain: Domain,
    pub fields: BTreeMap<String, FieldDef>,
}

pub fn builtin_registers() -> BTreeMap<String, RegisterDef> {
    let mut table = BTreeMap::new();

    table.insert(
        "PERF_STATUS".to_string(),
        RegisterDef {
            offset: 0x198,
            domain: Domain::Cpu,
            fields: BTreeMap::from([(
                "FREQ".to_string(),
                FieldDef {
                    offset: 0x198,
                    begin_bit: 8,
                    end_bit: 15,
                    function: Function::Scale,
                    scalar: 1.0e8,
                    units: Units::Hertz,
                    behavior: Behavior::Variable,
                    aggregation: Aggregation::Average,
                    writable: false,
                    description: "current core frequency".to_string(),
                },
            )]),
        },
    );

    table.insert(
        "PERF_CTL".to_string(),
        RegisterDef {
            offset: 0x199,
            domain: Domain::Cpu,
            fields: BTreeMap::from([(
                "FREQ".to_string(),
                FieldDef {
                    offset: 0x199,
                    begin_bit: 8,
                    end_bit: 15,
                    function: Function::Scale,
                    scalar: 1.0e8,
                    units: Units::Hertz,
                    behavior: Behavior::Variable,
                    aggregation: Aggregation::Average,
                    writable: true,
                    description: "requested core frequency cap".to_string(),
                },
            )]),
        },
    );

    table.insert(
        "PKG_ENERGY_STATUS".to_string(),
        RegisterDef {
            offset: 0x611,
            domain: Domain::Package,
            fields: BTreeMap::from([(
                "ENERGY".to_string(),
                FieldDef {
                    offset: 0x611,
                    begin_bit: 0,
                    end_bit: 31,
                    function: Function::Scale,
                    scalar: 2f64.powi(-14), // RAPL energy unit, ~61.035 uJ
                    units: Units::Joules,
                    behavior: Behavior::Monotone,
                    aggregation: Aggregation::Sum,
                    writable: false,
                    description: "package energy consumption counter".to_string(),
                },
            )]),
        },
    );

    table.insert(
        "TEMPERATURE_TARGET".to_string(),
        RegisterDef {
            offset: 0x1A2,
            domain: Domain::Package,
            fields: BTreeMap::from([(
                "PROCHOT_MIN".to_string(),
                FieldDef {
                    offset: 0x1A2,
                    begin_bit: 16,
                    end_bit: 23,
                    function: Function::Identity,
                    scalar: 1.0,
                    units: Units::Celsius,
                    behavior: Behavior::Constant,
                    aggregation: Aggregation::ExpectSame,
                    writable: false,
                    description: "PROCHOT temperature offset from Tjmax".to_string(),
                },
            )]),
        },
    );

    table.insert(
        "THERM_STATUS".to_string(),
        RegisterDef {
            offset: 0x19C,
            domain: Domain::Cpu,
            fields: BTreeMap::from([(
                "DIGITAL_READOUT".to_string(),
                FieldDef {
                    offset: 0x19C,
                    begin_bit: 16,
                    end_bit: 22,
                    function: Function::Identity,
                    scalar: 1.0,
                    units: Units::Celsius,
                    behavior: Behavior::Variable,
                    aggregation: Aggregation::Average,
                    writable: false,
                    description: "degrees below Tjmax".to_string(),
                },
            )]),
        },
    );

    table.insert(
        "PLATFORM_INFO".to_string(),
        RegisterDef {
            offset: 0xCE,
            domain: Domain::Package,
            fields: BTreeMap::from([(
                "MAX_NONTURBO_RATIO".to_string(),
                FieldDef {
                    offset: 0xCE,
                    begin_bit: 8,
                    end_bit: 15,
                    function: Function::Scale,
                    scalar: 1.0e8,
                    units: Units::Hertz,
                    behavior: Behavior::Constant,
                    aggregation: Aggregation::ExpectSame,
                    writable: false,
                    description: "maximum non-turbo ratio".to_string(),
                },
            )]),
        },
    );

    table
}

/// Backend-owned aliases with no `PREFIX::` spelling (spec.md §6).
pub fn builtin_aliases() -> BTreeMap<&'static str, (&'static str, &'static str)> {
    BTreeMap::from([
        ("CPU_ENERGY", ("PKG_ENERGY_STATUS", "ENERGY")),
        ("CPU_FREQUENCY_STATUS", ("PERF_STATUS", "FREQ")),
        ("CPU_FREQUENCY_MAX_CONTROL", ("PERF_CTL", "FREQ")),
    ])
}
