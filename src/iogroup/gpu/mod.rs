//! The GPU backend (spec.md §4.3): vendor topology discovery in a fixed
//! precedence order, an affinity solver mapping CPUs to GPUs, and a thin
//! `IoGroup` over whichever vendor source was selected.

pub mod affinity;
pub mod levelzero;
#[cfg(feature = "nvml")]
pub mod nvml;

use std::collections::BTreeSet;
use std::path::Path;

use crate::descriptor::{Aggregation, Behavior, Format};
use crate::error::{Error, Result};
use crate::topo::Domain;

/// Which vendor source a [`GpuIoGroup`] was built from, kept for
/// diagnostics and tests; selection precedence lives in [`select_vendor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Vendor {
    Nvml,
    LevelZero,
    SysfsAccel,
    SysfsDrm,
    None,
}

/// A vendor backend's resolved GPU inventory: how many GPUs and chips exist,
/// and which CPUs each GPU declares itself local to (input to the affinity
/// solver).
#[derive(Clone, Debug, Default)]
pub struct GpuTopology {
    pub num_gpu: usize,
    pub num_gpu_chip: usize,
    pub chip_of_gpu: Vec<usize>,
    pub cpu_affinity: Vec<Vec<usize>>,
}

/// Selects a GPU topology source by spec.md §4.3's precedence: NVML if it
/// reports at least one device, else LevelZero if sysman is enabled and the
/// hierarchy mode is composite, else `/sys/class/accel`, else
/// `/sys/class/drm`. NVML and LevelZero both reporting devices is treated
/// as a fatal misconfiguration rather than silently preferring one.
pub fn select_vendor(
    nvml_device_count: Option<usize>,
    levelzero_available: bool,
    accel_present: bool,
    drm_present: bool,
) -> Result<Vendor> {
    let nvml_present = nvml_device_count.unwrap_or(0) > 0;
    if nvml_present && levelzero_available {
        return Err(Error::Logic(
            "both NVML and Level Zero report GPU devices; exactly one vendor stack must be active".to_string(),
        ));
    }
    if nvml_present {
        return Ok(Vendor::Nvml);
    }
    if levelzero_available {
        return Ok(Vendor::LevelZero);
    }
    if accel_present {
        return Ok(Vendor::SysfsAccel);
    }
    if drm_present {
        return Ok(Vendor::SysfsDrm);
    }
    Ok(Vendor::None)
}

struct SignalSlot {
    name: String,
    domain: Domain,
    idx: usize,
    last_value: Option<f64>,
}

/// A thin GPU signal backend over a resolved [`GpuTopology`]. Real sample
/// values come from whichever vendor module resolved the topology; this
/// struct only owns the handle lifecycle and domain bookkeeping common to
/// every vendor, mirroring how [`super::cpuinfo::CpuInfoIoGroup`] separates
/// probing from bookkeeping.
pub struct GpuIoGroup {
    vendor: Vendor,
    topo: GpuTopology,
    reader: Box<dyn Fn(&str, Domain, usize) -> Result<f64> + Send>,
    signals: Vec<SignalSlot>,
}

impl GpuIoGroup {
    pub fn new(
        vendor: Vendor,
        topo: GpuTopology,
        reader: Box<dyn Fn(&str, Domain, usize) -> Result<f64> + Send>,
    ) -> Self {
        GpuIoGroup { vendor, topo, reader, signals: Vec::new() }
    }

    pub fn vendor(&self) -> Vendor {
        self.vendor
    }

    /// Resolved CPU affinity sets, one per GPU, or [`Error::AffinityStarvation`]
    /// if the solver cannot give every GPU at least one CPU.
    pub fn solve_affinity(&self, num_cpu: usize) -> Result<Vec<BTreeSet<usize>>> {
        affinity::solve_affinity(num_cpu, &self.topo.cpu_affinity)
    }

    fn is_known(&self, name: &str) -> bool {
        name == "GPU_UTILIZATION" || name == "GPU_POWER" || name == "GPU_CORE_FREQUENCY_STATUS"
    }
}

impl crate::iogroup::IoGroup for GpuIoGroup {
    fn name(&self) -> &'static str {
        "GPU"
    }

    fn signal_names(&self) -> Vec<String> {
        vec!["GPU_UTILIZATION".to_string(), "GPU_POWER".to_string(), "GPU_CORE_FREQUENCY_STATUS".to_string()]
    }

    fn control_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn signal_domain_type(&self, name: &str) -> Result<Domain> {
        self.is_known(name).then_some(Domain::Gpu).ok_or_else(|| Error::UnknownName(name.to_string()))
    }

    fn control_domain_type(&self, name: &str) -> Result<Domain> {
        Err(Error::UnknownName(name.to_string()))
    }

    fn push_signal(&mut self, name: &str, domain: Domain, idx: usize) -> Result<usize> {
        if !self.is_known(name) {
            return Err(Error::UnknownName(name.to_string()));
        }
        if domain != Domain::Gpu {
            return Err(Error::DomainMismatch { name: name.to_string(), requested: domain, native: Domain::Gpu });
        }
        if idx >= self.topo.num_gpu {
            return Err(Error::DomainIndexOutOfRange { domain, idx, count: self.topo.num_gpu });
        }
        if let Some(existing) = self.signals.iter().position(|s| s.name == name && s.idx == idx) {
            return Ok(existing);
        }
        self.signals.push(SignalSlot { name: name.to_string(), domain, idx, last_value: None });
        Ok(self.signals.len() - 1)
    }

    fn push_control(&mut self, name: &str, _domain: Domain, _idx: usize) -> Result<usize> {
        Err(Error::NotWritable(name.to_string()))
    }

    fn read_batch(&mut self) -> Result<()> {
        for slot in &mut self.signals {
            slot.last_value = Some((self.reader)(&slot.name, slot.domain, slot.idx)?);
        }
        Ok(())
    }

    fn sample(&self, handle: usize) -> Result<f64> {
        let slot = self.signals.get(handle).ok_or_else(|| Error::Logic(format!("no signal handle {handle}")))?;
        slot.last_value.ok_or_else(|| Error::NotReady(slot.name.clone()))
    }

    fn adjust(&mut self, handle: usize, _value: f64) -> Result<()> {
        Err(Error::Logic(format!("GPU backend has no writable handle {handle}")))
    }

    fn write_batch(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_signal(&mut self, name: &str, domain: Domain, idx: usize) -> Result<f64> {
        if !self.is_known(name) || domain != Domain::Gpu {
            return Err(Error::UnknownName(name.to_string()));
        }
        (self.reader)(name, domain, idx)
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
        self.is_known(name).then_some(Aggregation::Average).ok_or_else(|| Error::UnknownName(name.to_string()))
    }

    fn format_function(&self, name: &str) -> Result<Format> {
        self.is_known(name).then_some(Format::Double).ok_or_else(|| Error::UnknownName(name.to_string()))
    }

    fn signal_behavior(&self, name: &str) -> Result<Behavior> {
        self.is_known(name).then_some(Behavior::Variable).ok_or_else(|| Error::UnknownName(name.to_string()))
    }

    fn signal_description(&self, name: &str) -> Result<String> {
        self.is_known(name).then(|| format!("{name} ({:?} backend)", self.vendor)).ok_or_else(|| Error::UnknownName(name.to_string()))
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
    fn selects_nvml_when_devices_are_present() {
        assert_eq!(select_vendor(Some(4), false, true, true).unwrap(), Vendor::Nvml);
    }

    #[test]
    fn falls_back_to_levelzero_then_accel_then_drm() {
        assert_eq!(select_vendor(None, true, true, true).unwrap(), Vendor::LevelZero);
        assert_eq!(select_vendor(None, false, true, true).unwrap(), Vendor::SysfsAccel);
        assert_eq!(select_vendor(None, false, false, true).unwrap(), Vendor::SysfsDrm);
        assert_eq!(select_vendor(None, false, false, false).unwrap(), Vendor::None);
    }

    #[test]
    fn mixed_nvml_and_levelzero_is_fatal() {
        assert!(select_vendor(Some(1), true, false, false).is_err());
    }

    #[test]
    fn push_signal_then_sample_round_trips_through_reader() {
        let topo = GpuTopology { num_gpu: 2, num_gpu_chip: 2, chip_of_gpu: vec![0, 1], cpu_affinity: vec![vec![0], vec![1]] };
        let mut g = GpuIoGroup::new(Vendor::SysfsDrm, topo, Box::new(|_, _, idx| Ok(10.0 + idx as f64)));
        let h = g.push_signal("GPU_POWER", Domain::Gpu, 1).unwrap();
        g.read_batch().unwrap();
        assert_eq!(g.sample(h).unwrap(), 11.0);
    }
}
