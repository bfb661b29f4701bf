//! The sysfs backend (spec.md §4.3): signals and controls backed by one
//! text file per domain index under `/sys`. Grounded on the same
//! parse/generate split the original implementation's `SysfsIOGroup`
//! plugins use (one function pair per attribute family), reduced here to a
//! handful of attributes that do not already have a dedicated MSR
//! equivalent.

pub mod attribute;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::descriptor::{Aggregation, Behavior, Format};
use crate::error::{Error, Result};
use crate::topo::{Domain, Topology};

use attribute::Attribute;

struct SignalSlot {
    attr_idx: usize,
    domain_idx: usize,
    last_value: Option<f64>,
}

struct ControlSlot {
    attr_idx: usize,
    domain_idx: usize,
    pending: Option<f64>,
}

pub struct SysfsIoGroup {
    topo: Topology,
    attrs: Vec<Attribute>,
    by_name: BTreeMap<&'static str, usize>,
    signals: Vec<SignalSlot>,
    controls: Vec<ControlSlot>,
    batch_started: bool,
}

impl SysfsIoGroup {
    pub fn new(topo: Topology) -> Self {
        let attrs = attribute::builtin_attributes();
        let by_name = attrs.iter().enumerate().map(|(i, a)| (a.name, i)).collect();
        SysfsIoGroup {
            topo,
            attrs,
            by_name,
            signals: Vec::new(),
            controls: Vec::new(),
            batch_started: false,
        }
    }

    fn attr_idx(&self, name: &str) -> Result<usize> {
        self.by_name.get(name).copied().ok_or_else(|| Error::UnknownName(name.to_string()))
    }

    fn read_attr(&self, attr_idx: usize, domain_idx: usize) -> Result<f64> {
        let attr = &self.attrs[attr_idx];
        let path = attr.path(domain_idx);
        let text = fs::read_to_string(&path)?;
        attr.parse.decode(&text)
    }

    fn write_attr(&self, attr_idx: usize, domain_idx: usize, value: f64) -> Result<()> {
        let attr = &self.attrs[attr_idx];
        let path = attr.path(domain_idx);
        fs::write(&path, attr.parse.encode(value))?;
        Ok(())
    }
}

impl crate::iogroup::IoGroup for SysfsIoGroup {
    fn name(&self) -> &'static str {
        "SYSFS"
    }

    fn signal_names(&self) -> Vec<String> {
        self.attrs.iter().map(|a| a.name.to_string()).collect()
    }

    fn control_names(&self) -> Vec<String> {
        self.attrs.iter().filter(|a| a.writable).map(|a| a.name.to_string()).collect()
    }

    fn signal_domain_type(&self, name: &str) -> Result<Domain> {
        Ok(self.attrs[self.attr_idx(name)?].domain)
    }

    fn control_domain_type(&self, name: &str) -> Result<Domain> {
        self.signal_domain_type(name)
    }

    fn push_signal(&mut self, name: &str, domain: Domain, idx: usize) -> Result<usize> {
        if self.batch_started {
            return Err(Error::PushAfterStart { kind: "signal", name: name.to_string() });
        }
        let attr_idx = self.attr_idx(name)?;
        let native = self.attrs[attr_idx].domain;
        if domain != native {
            return Err(Error::DomainMismatch { name: name.to_string(), requested: domain, native });
        }
        if idx >= self.topo.num_domain(domain) {
            return Err(Error::DomainIndexOutOfRange { domain, idx, count: self.topo.num_domain(domain) });
        }
        if let Some(existing) = self.signals.iter().position(|s| s.attr_idx == attr_idx && s.domain_idx == idx) {
            return Ok(existing);
        }
        self.signals.push(SignalSlot { attr_idx, domain_idx: idx, last_value: None });
        Ok(self.signals.len() - 1)
    }

    fn push_control(&mut self, name: &str, domain: Domain, idx: usize) -> Result<usize> {
        if self.batch_started {
            return Err(Error::PushAfterStart { kind: "control", name: name.to_string() });
        }
        let attr_idx = self.attr_idx(name)?;
        if !self.attrs[attr_idx].writable {
            return Err(Error::NotWritable(name.to_string()));
        }
        let native = self.attrs[attr_idx].domain;
        if domain != native {
            return Err(Error::DomainMismatch { name: name.to_string(), requested: domain, native });
        }
        if let Some(existing) = self.controls.iter().position(|c| c.attr_idx == attr_idx && c.domain_idx == idx) {
            return Ok(existing);
        }
        self.controls.push(ControlSlot { attr_idx, domain_idx: idx, pending: None });
        Ok(self.controls.len() - 1)
    }

    fn read_batch(&mut self) -> Result<()> {
        self.batch_started = true;
        for i in 0..self.signals.len() {
            let (attr_idx, domain_idx) = (self.signals[i].attr_idx, self.signals[i].domain_idx);
            let value = self.read_attr(attr_idx, domain_idx)?;
            self.signals[i].last_value = Some(value);
        }
        Ok(())
    }

    fn sample(&self, handle: usize) -> Result<f64> {
        let slot = self.signals.get(handle).ok_or_else(|| Error::Logic(format!("no signal handle {handle}")))?;
        slot.last_value.ok_or_else(|| Error::NotReady(self.attrs[slot.attr_idx].name.to_string()))
    }

    fn adjust(&mut self, handle: usize, value: f64) -> Result<()> {
        self.batch_started = true;
        let slot = self.controls.get_mut(handle).ok_or_else(|| Error::Logic(format!("no control handle {handle}")))?;
        slot.pending = Some(value);
        Ok(())
    }

    fn write_batch(&mut self) -> Result<()> {
        for i in 0..self.controls.len() {
            let (attr_idx, domain_idx, pending) =
                (self.controls[i].attr_idx, self.controls[i].domain_idx, self.controls[i].pending);
            let value = pending.ok_or_else(|| Error::UnsetControl(self.attrs[attr_idx].name.to_string()))?;
            self.write_attr(attr_idx, domain_idx, value)?;
        }
        Ok(())
    }

    fn read_signal(&mut self, name: &str, domain: Domain, idx: usize) -> Result<f64> {
        let attr_idx = self.attr_idx(name)?;
        if self.attrs[attr_idx].domain != domain {
            return Err(Error::DomainMismatch { name: name.to_string(), requested: domain, native: self.attrs[attr_idx].domain });
        }
        self.read_attr(attr_idx, idx)
    }

    fn write_control(&mut self, name: &str, domain: Domain, idx: usize, value: f64) -> Result<()> {
        let attr_idx = self.attr_idx(name)?;
        if !self.attrs[attr_idx].writable {
            return Err(Error::NotWritable(name.to_string()));
        }
        if self.attrs[attr_idx].domain != domain {
            return Err(Error::DomainMismatch { name: name.to_string(), requested: domain, native: self.attrs[attr_idx].domain });
        }
        self.write_attr(attr_idx, idx, value)
    }

    fn save_control(&mut self, path: &Path) -> Result<()> {
        let mut lines = Vec::new();
        for slot in &self.controls {
            let value = self.read_attr(slot.attr_idx, slot.domain_idx)?;
            lines.push(format!("{}\t{}\t{}", self.attrs[slot.attr_idx].name, slot.domain_idx, value));
        }
        fs::write(path, lines.join("\n"))?;
        Ok(())
    }

    fn restore_control(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        let text = fs::read_to_string(path)?;
        for line in text.lines().filter(|l| !l.is_empty()) {
            let mut parts = line.split('\t');
            let name = parts.next().ok_or_else(|| Error::Logic("malformed save line".into()))?;
            let domain_idx: usize = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::Logic("malformed save line".into()))?;
            let value: f64 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::Logic("malformed save line".into()))?;
            let attr_idx = self.attr_idx(name)?;
            self.write_attr(attr_idx, domain_idx, value)?;
        }
        Ok(())
    }

    fn agg_function(&self, name: &str) -> Result<Aggregation> {
        Ok(self.attrs[self.attr_idx(name)?].aggregation)
    }

    fn format_function(&self, _name: &str) -> Result<Format> {
        Ok(Format::Double)
    }

    fn signal_behavior(&self, name: &str) -> Result<Behavior> {
        Ok(self.attrs[self.attr_idx(name)?].behavior)
    }

    fn signal_description(&self, name: &str) -> Result<String> {
        Ok(self.attrs[self.attr_idx(name)?].description.to_string())
    }

    fn control_description(&self, name: &str) -> Result<String> {
        self.signal_description(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iogroup::IoGroup;

    fn fake_cpu_topo() -> Topology {
        Topology::from_raw(2, &[0, 0], &[0, 1])
    }

    #[test]
    fn push_signal_rejects_unknown_name() {
        let mut g = SysfsIoGroup::new(fake_cpu_topo());
        assert!(matches!(g.push_signal("NOPE", Domain::Cpu, 0), Err(Error::UnknownName(_))));
    }

    #[test]
    fn push_signal_is_idempotent() {
        let mut g = SysfsIoGroup::new(fake_cpu_topo());
        let h1 = g.push_signal("CPUFREQ_CUR", Domain::Cpu, 0).unwrap();
        let h2 = g.push_signal("CPUFREQ_CUR", Domain::Cpu, 0).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn push_control_on_read_only_attribute_fails() {
        let mut g = SysfsIoGroup::new(fake_cpu_topo());
        assert!(matches!(g.push_control("THERMAL_ZONE_TEMPERATURE", Domain::Board, 0), Err(Error::NotWritable(_))));
    }
}
