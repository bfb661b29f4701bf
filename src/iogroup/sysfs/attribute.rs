//! One sysfs attribute: a file path template, a parse function turning its
//! text contents into an SI-unit value, and (for controls) a generate
//! function turning a value back into the text the kernel expects
//! (spec.md §4.3: "a Sysfs backend with parse/generate functions via
//! Batched I/O").

use crate::descriptor::{Aggregation, Behavior, Units};
use crate::error::{Error, Result};
use crate::topo::Domain;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parse {
    /// File holds a plain integer in the attribute's native unit.
    Integer,
    /// File holds microjoules, converted to joules.
    MicroToBase,
    /// File holds millidegrees Celsius, converted to whole degrees.
    MilliToBase,
    /// File holds kilohertz, converted to hertz.
    KiloToBase,
}

impl Parse {
    pub fn decode(&self, text: &str) -> Result<f64> {
        let raw: f64 = text.trim().parse().map_err(|_| {
            Error::Logic(format!("sysfs attribute text `{}` is not numeric", text.trim()))
        })?;
        Ok(match self {
            Parse::Integer => raw,
            Parse::MicroToBase => raw / 1.0e6,
            Parse::MilliToBase => raw / 1.0e3,
            Parse::KiloToBase => raw * 1.0e3,
        })
    }

    pub fn encode(&self, value: f64) -> String {
        let raw = match self {
            Parse::Integer => value,
            Parse::MicroToBase => value * 1.0e6,
            Parse::MilliToBase => value * 1.0e3,
            Parse::KiloToBase => value / 1.0e3,
        };
        format!("{}", raw.round() as i64)
    }
}

/// A signal/control exposed as one sysfs file per domain index, e.g.
/// `/sys/devices/system/cpu/cpu{idx}/cpufreq/scaling_cur_freq`.
#[derive(Clone)]
pub struct Attribute {
    pub name: &'static str,
    pub domain: Domain,
    pub path_template: &'static str,
    pub parse: Parse,
    pub units: Units,
    pub behavior: Behavior,
    pub aggregation: Aggregation,
    pub writable: bool,
    pub description: &'static str,
}

impl Attribute {
    /// Substitutes `{idx}` in the path template with the domain index.
    pub fn path(&self, idx: usize) -> String {
        self.path_template.replace("{idx}", &idx.to_string())
    }
}

pub fn builtin_attributes() -> Vec<Attribute> {
    vec![
        Attribute {
            name: "CPUFREQ_CUR",
            domain: Domain::Cpu,
            path_template: "/sys/devices/system/cpu/cpu{idx}/cpufreq/scaling_cur_freq",
            parse: Parse::KiloToBase,
            units: Units::Hertz,
            behavior: Behavior::Variable,
            aggregation: Aggregation::Average,
            writable: false,
            description: "current cpufreq-reported frequency",
        },
        Attribute {
            name: "CPUFREQ_MAX_CONTROL",
            domain: Domain::Cpu,
            path_template: "/sys/devices/system/cpu/cpu{idx}/cpufreq/scaling_max_freq",
            parse: Parse::KiloToBase,
            units: Units::Hertz,
            behavior: Behavior::Variable,
            aggregation: Aggregation::Average,
            writable: true,
            description: "cpufreq maximum frequency cap",
        },
        Attribute {
            name: "THERMAL_ZONE_TEMPERATURE",
            domain: Domain::Board,
            path_template: "/sys/class/thermal/thermal_zone{idx}/temp",
            parse: Parse::MilliToBase,
            units: Units::Celsius,
            behavior: Behavior::Variable,
            aggregation: Aggregation::Average,
            writable: false,
            description: "thermal zone temperature",
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kilo_to_base_round_trips() {
        let p = Parse::KiloToBase;
        assert_eq!(p.decode("2400000").unwrap(), 2.4e9);
        assert_eq!(p.encode(2.4e9), "2400000");
    }

    #[test]
    fn milli_to_base_converts_millidegrees() {
        let p = Parse::MilliToBase;
        assert_eq!(p.decode("45000").unwrap(), 45.0);
    }

    #[test]
    fn path_substitutes_index() {
        let attr = &builtin_attributes()[0];
        assert_eq!(attr.path(3), "/sys/devices/system/cpu/cpu3/cpufreq/scaling_cur_freq");
    }
}
