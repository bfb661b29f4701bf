//! The CPU-info backend (spec.md §4.3): constant signals read once from
//! `/proc/cpuinfo` and `/sys/devices/system/cpu/cpu0/cpufreq/*_freq` that
//! never need `read_batch` to refresh (spec.md §3's `Constant` behavior:
//! "a backend may answer every sample from a value cached at construction").

use std::collections::BTreeMap;
use std::path::Path;

use crate::descriptor::{Aggregation, Behavior, Format};
use crate::error::{Error, Result};
use crate::topo::Domain;

fn read_cpuinfo_mhz() -> Result<f64> {
    let text = std::fs::read_to_string("/proc/cpuinfo")?;
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("cpu MHz") {
            if let Some(value) = rest.rsplit(':').next() {
                return value
                    .trim()
                    .parse::<f64>()
                    .map(|mhz| mhz * 1.0e6)
                    .map_err(|_| Error::Logic("cpu MHz line is not numeric".into()));
            }
        }
    }
    Err(Error::Unsupported("no `cpu MHz` line in /proc/cpuinfo".to_string()))
}

fn read_cpuinfo_max_freq() -> Result<f64> {
    let text = std::fs::read_to_string("/sys/devices/system/cpu/cpu0/cpufreq/cpuinfo_max_freq")?;
    text.trim()
        .parse::<f64>()
        .map(|khz| khz * 1.0e3)
        .map_err(|_| Error::Logic("cpuinfo_max_freq is not numeric".into()))
}

pub struct CpuInfoIoGroup {
    values: BTreeMap<&'static str, f64>,
    signals: Vec<&'static str>,
}

impl CpuInfoIoGroup {
    pub fn probe() -> Result<Self> {
        let mut values = BTreeMap::new();
        if let Ok(mhz) = read_cpuinfo_mhz() {
            values.insert("CPUINFO_FREQ_CUR", mhz);
        }
        if let Ok(max) = read_cpuinfo_max_freq() {
            values.insert("CPUINFO_FREQ_MAX", max);
        }
        Ok(CpuInfoIoGroup { values, signals: Vec::new() })
    }

    /// Construct with pre-resolved values, for tests that cannot rely on
    /// `/proc/cpuinfo` existing in the sandboxed build environment.
    pub fn with_values(values: BTreeMap<&'static str, f64>) -> Self {
        CpuInfoIoGroup { values, signals: Vec::new() }
    }
}

impl crate::iogroup::IoGroup for CpuInfoIoGroup {
    fn name(&self) -> &'static str {
        "CPUINFO"
    }

    fn signal_names(&self) -> Vec<String> {
        self.values.keys().map(|n| n.to_string()).collect()
    }

    fn control_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn signal_domain_type(&self, name: &str) -> Result<Domain> {
        if self.values.contains_key(name) {
            Ok(Domain::Board)
        } else {
            Err(Error::UnknownName(name.to_string()))
        }
    }

    fn control_domain_type(&self, name: &str) -> Result<Domain> {
        Err(Error::UnknownName(name.to_string()))
    }

    fn push_signal(&mut self, name: &str, domain: Domain, idx: usize) -> Result<usize> {
        if !self.values.contains_key(name) {
            return Err(Error::UnknownName(name.to_string()));
        }
        if domain != Domain::Board {
            return Err(Error::DomainMismatch { name: name.to_string(), requested: domain, native: Domain::Board });
        }
        if idx != 0 {
            return Err(Error::DomainIndexOutOfRange { domain, idx, count: 1 });
        }
        let key = *self.values.keys().find(|k| **k == name).expect("checked above");
        if let Some(existing) = self.signals.iter().position(|s| *s == key) {
            return Ok(existing);
        }
        self.signals.push(key);
        Ok(self.signals.len() - 1)
    }

    fn push_control(&mut self, name: &str, _domain: Domain, _idx: usize) -> Result<usize> {
        Err(Error::NotWritable(name.to_string()))
    }

    fn read_batch(&mut self) -> Result<()> {
        Ok(())
    }

    fn sample(&self, handle: usize) -> Result<f64> {
        let name = self.signals.get(handle).ok_or_else(|| Error::Logic(format!("no signal handle {handle}")))?;
        Ok(self.values[name])
    }

    fn adjust(&mut self, handle: usize, _value: f64) -> Result<()> {
        Err(Error::Logic(format!("CPUINFO backend has no writable handle {handle}")))
    }

    fn write_batch(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_signal(&mut self, name: &str, domain: Domain, idx: usize) -> Result<f64> {
        if domain != Domain::Board || idx != 0 {
            return Err(Error::DomainMismatch { name: name.to_string(), requested: domain, native: Domain::Board });
        }
        self.values.get(name).copied().ok_or_else(|| Error::UnknownName(name.to_string()))
    }

    fn write_control(&mut self, name: &str, _domain: Domain, _idx: usize, _value: f64) -> Result<()> {
        Err(Error::NotWritable(name.to_string()))
    }

    fn save_control(&mut self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn restore_control(&mut self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn agg_function(&self, name: &str) -> Result<Aggregation> {
        self.values.contains_key(name).then_some(Aggregation::ExpectSame).ok_or_else(|| Error::UnknownName(name.to_string()))
    }

    fn format_function(&self, name: &str) -> Result<Format> {
        self.values.contains_key(name).then_some(Format::Double).ok_or_else(|| Error::UnknownName(name.to_string()))
    }

    fn signal_behavior(&self, name: &str) -> Result<Behavior> {
        self.values.contains_key(name).then_some(Behavior::Constant).ok_or_else(|| Error::UnknownName(name.to_string()))
    }

    fn signal_description(&self, name: &str) -> Result<String> {
        self.values.contains_key(name).then(|| format!("{name} (static from /proc/cpuinfo)")).ok_or_else(|| Error::UnknownName(name.to_string()))
    }

    fn control_description(&self, name: &str) -> Result<String> {
        Err(Error::UnknownName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iogroup::IoGroup;

    #[test]
    fn constant_signal_samples_without_read_batch() {
        let mut g = CpuInfoIoGroup::with_values(BTreeMap::from([("CPUINFO_FREQ_MAX", 3.6e9)]));
        let h = g.push_signal("CPUINFO_FREQ_MAX", Domain::Board, 0).unwrap();
        assert_eq!(g.sample(h).unwrap(), 3.6e9);
    }

    #[test]
    fn push_control_always_fails() {
        let mut g = CpuInfoIoGroup::with_values(BTreeMap::new());
        assert!(matches!(g.push_control("ANY", Domain::Board, 0), Err(Error::NotWritable(_))));
    }
}
