//! The federation layer (spec.md §4.6): holds every registered backend in
//! precedence order, resolves federation-wide aliases and derived
//! composites, and splits a cross-domain push into the native-domain pushes
//! a backend actually understands, aggregating (for signals) or
//! broadcasting (for controls) across the result.
//!
//! Grounded on `original_source/libgeopmd/src/PlatformIOImp.cpp`: one
//! ordered list of IOGroups, a `push_signal`/`push_control` that tries each
//! IOGroup in turn and falls back to an aggregated multi-CPU push when the
//! requested domain is coarser than the IOGroup's native domain.

pub mod alias;
pub mod save;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::descriptor::{Aggregation, Behavior, Format};
use crate::derived;
use crate::error::{Error, Result};
use crate::handle::{ControlHandle, Handle};
use crate::iogroup::{
    cpuinfo::CpuInfoIoGroup,
    gpu::{self, GpuIoGroup},
    msr::MsrIoGroup,
    node_characterization::NodeCharacterizationIoGroup,
    service::{ServiceIoGroup, UnixSocketChannel},
    sysfs::SysfsIoGroup,
    time::TimeIoGroup,
    Backend, IoGroup, NullIoGroup,
};
use crate::topo::{Domain, Topology};

const CORE_TEMPERATURE: &str = "CPU_CORE_TEMPERATURE";
const PROCHOT_MIN: &str = "TEMPERATURE_TARGET:PROCHOT_MIN";
const DIGITAL_READOUT: &str = "THERM_STATUS:DIGITAL_READOUT";
const TIME_SIGNAL: &str = "TIME";
/// Suffix convention for pushing a time-derivative of an already-valid
/// signal, e.g. `"CPU_POWER::DERIVATIVE"` (spec.md §4.6: "derived signals
/// and aggregates chain through the same handle mechanism").
const DERIVATIVE_SUFFIX: &str = "::DERIVATIVE";
/// Suffix convention for pushing a running time-integral of an already-valid
/// signal, e.g. `"CPU_POWER::TIME_INTEGRAL"`.
const INTEGRAL_SUFFIX: &str = "::TIME_INTEGRAL";

enum PushedSignal {
    Backend { backend: usize, handle: usize },
    Broadcast { backend: usize, handles: Vec<usize>, aggregation: Aggregation },
    /// `CPU_CORE_TEMPERATURE`: indices back into `PlatformIo::signals` for
    /// the two signals it is a difference of.
    Difference { minuend: usize, subtrahend: usize },
    /// `<NAME>::DERIVATIVE`: `source` indexes back into `PlatformIo::signals`
    /// for the underlying signal; `state` accumulates its `(time, value)`
    /// history each `read_batch`.
    Derivative { source: usize, state: derived::Derivative },
    /// `<NAME>::TIME_INTEGRAL`: same shape as `Derivative` but accumulating a
    /// running trapezoidal-rule sum instead of a slope.
    Integral { source: usize, state: derived::TimeIntegral },
}

enum PushedControl {
    Backend { backend: usize, handle: usize },
    Broadcast { backend: usize, handles: Vec<usize> },
}

#[derive(Serialize, Deserialize)]
struct SnapshotEntry {
    name: String,
    domain: String,
    idx: usize,
    value: f64,
}

/// Federates every backend into one typed signal/control namespace
/// (spec.md §3/§4.6). See the crate-level docs for a usage example.
pub struct PlatformIo {
    topo: Topology,
    backends: Vec<Backend>,
    aliases: BTreeMap<&'static str, &'static str>,
    signals: Vec<PushedSignal>,
    controls: Vec<PushedControl>,
    control_meta: Vec<(String, Domain, usize)>,
    batch_started: bool,
}

impl PlatformIo {
    /// Probes the live topology and builds every backend in precedence
    /// order. A backend that fails to construct is demoted to a
    /// [`NullIoGroup`] and logged rather than failing the whole
    /// construction (spec.md §7); topology discovery itself is not
    /// tolerated this way, since every backend depends on it.
    pub fn new() -> Result<Self> {
        let topo = Topology::probe()?;
        Ok(Self::with_topology(topo))
    }

    pub fn with_topology(topo: Topology) -> Self {
        let backends = vec![
            Self::build_msr(&topo),
            Backend::Sysfs(SysfsIoGroup::new(topo.clone())),
            Self::build_service(),
            Self::build_cpuinfo(),
            Backend::Time(TimeIoGroup::new()),
            Self::build_node_characterization(),
            Self::build_gpu(),
        ];
        PlatformIo {
            topo,
            backends,
            aliases: alias::builtin_aliases(),
            signals: Vec::new(),
            controls: Vec::new(),
            control_meta: Vec::new(),
            batch_started: false,
        }
    }

    fn build_msr(topo: &Topology) -> Backend {
        match MsrIoGroup::new(topo.clone()) {
            Ok(g) => Backend::Msr(g),
            Err(e) => {
                tracing::warn!("MSR backend unavailable, demoting to null: {e}");
                Backend::Null(NullIoGroup::new("MSR"))
            }
        }
    }

    fn build_service() -> Backend {
        let path = crate::config_env::service_socket_path();
        match UnixSocketChannel::connect(&path) {
            Ok(channel) => Backend::Service(ServiceIoGroup::new(Box::new(channel))),
            Err(e) => {
                tracing::warn!("service backend unavailable, demoting to null: {e}");
                Backend::Null(NullIoGroup::new("SERVICE"))
            }
        }
    }

    fn build_cpuinfo() -> Backend {
        match CpuInfoIoGroup::probe() {
            Ok(g) => Backend::CpuInfo(g),
            Err(e) => {
                tracing::warn!("cpuinfo backend unavailable, demoting to null: {e}");
                Backend::Null(NullIoGroup::new("CPUINFO"))
            }
        }
    }

    fn build_node_characterization() -> Backend {
        let path = crate::config_env::node_characterization_path();
        match NodeCharacterizationIoGroup::load(&path) {
            Ok(g) => Backend::NodeCharacterization(g),
            Err(e) => {
                tracing::warn!("node characterization backend unavailable, demoting to null: {e}");
                Backend::Null(NullIoGroup::new("NODE_CHARACTERIZATION"))
            }
        }
    }

    /// Resolves a vendor per spec.md §4.3's precedence and builds whatever
    /// topology that vendor source can see. No vendor driver is reachable
    /// in most environments, which resolves to `Vendor::None` and an empty,
    /// harmless backend rather than an error.
    fn build_gpu() -> Backend {
        let drm_present = gpu::levelzero::is_present(Path::new("/sys/class/drm"));
        let accel_present = gpu::levelzero::is_present(Path::new("/sys/class/accel"));
        let levelzero_available = false;
        let nvml_device_count = Self::nvml_device_count();

        match gpu::select_vendor(nvml_device_count, levelzero_available, accel_present, drm_present) {
            Ok(vendor) => {
                let gpu_topo = match vendor {
                    gpu::Vendor::SysfsDrm => gpu::levelzero::probe_sysfs(Path::new("/sys/class/drm")).unwrap_or_default(),
                    gpu::Vendor::SysfsAccel => gpu::levelzero::probe_sysfs(Path::new("/sys/class/accel")).unwrap_or_default(),
                    gpu::Vendor::Nvml | gpu::Vendor::LevelZero | gpu::Vendor::None => Default::default(),
                };
                let reader: Box<dyn Fn(&str, Domain, usize) -> Result<f64> + Send> = Box::new(|name, _domain, _idx| {
                    Err(Error::Unsupported(format!("{name}: no telemetry source wired up for this GPU vendor")))
                });
                Backend::Gpu(GpuIoGroup::new(vendor, gpu_topo, reader))
            }
            Err(e) => {
                tracing::warn!("GPU vendor selection failed, demoting to null: {e}");
                Backend::Null(NullIoGroup::new("GPU"))
            }
        }
    }

    #[cfg(feature = "nvml")]
    fn nvml_device_count() -> Option<usize> {
        let nvml = nvml_wrapper::Nvml::init().ok()?;
        gpu::nvml::device_count(&nvml).ok()
    }

    #[cfg(not(feature = "nvml"))]
    fn nvml_device_count() -> Option<usize> {
        None
    }

    pub fn topology(&self) -> &Topology {
        &self.topo
    }

    fn resolve_alias(&self, name: &str) -> String {
        self.aliases.get(name).map(|s| s.to_string()).unwrap_or_else(|| name.to_string())
    }

    fn find_signal_backend(&self, name: &str) -> Option<usize> {
        self.backends.iter().position(|b| b.is_valid_signal(name))
    }

    fn find_control_backend(&self, name: &str) -> Option<usize> {
        self.backends.iter().position(|b| b.is_valid_control(name))
    }

    pub fn is_valid_signal(&self, name: &str) -> bool {
        if name == CORE_TEMPERATURE {
            return self.is_valid_signal(PROCHOT_MIN) && self.is_valid_signal(DIGITAL_READOUT);
        }
        if let Some(base) = name.strip_suffix(DERIVATIVE_SUFFIX).or_else(|| name.strip_suffix(INTEGRAL_SUFFIX)) {
            return self.is_valid_signal(base);
        }
        let resolved = self.resolve_alias(name);
        self.find_signal_backend(&resolved).is_some()
    }

    pub fn is_valid_control(&self, name: &str) -> bool {
        let resolved = self.resolve_alias(name);
        self.find_control_backend(&resolved).is_some()
    }

    pub fn signal_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.iter().flat_map(|b| b.signal_names()).collect();
        names.extend(self.aliases.keys().map(|a| a.to_string()));
        if self.is_valid_signal(CORE_TEMPERATURE) {
            names.push(CORE_TEMPERATURE.to_string());
        }
        names.sort();
        names.dedup();
        names
    }

    pub fn control_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.iter().flat_map(|b| b.control_names()).collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn signal_domain_type(&self, name: &str) -> Result<Domain> {
        if name == CORE_TEMPERATURE {
            return Ok(Domain::Cpu);
        }
        if let Some(base) = name.strip_suffix(DERIVATIVE_SUFFIX).or_else(|| name.strip_suffix(INTEGRAL_SUFFIX)) {
            return self.signal_domain_type(base);
        }
        let resolved = self.resolve_alias(name);
        let backend = self.find_signal_backend(&resolved).ok_or_else(|| Error::UnknownName(resolved.clone()))?;
        self.backends[backend].signal_domain_type(&resolved)
    }

    pub fn control_domain_type(&self, name: &str) -> Result<Domain> {
        let resolved = self.resolve_alias(name);
        let backend = self.find_control_backend(&resolved).ok_or_else(|| Error::UnknownName(resolved.clone()))?;
        self.backends[backend].control_domain_type(&resolved)
    }

    /// Pushes one backend-native signal, broadcasting to every native-domain
    /// index nested under `(domain, idx)` and wrapping the result in an
    /// aggregation if `domain` is coarser than the backend's native domain.
    fn push_raw_signal(&mut self, name: &str, domain: Domain, idx: usize) -> Result<usize> {
        let backend_idx = self.find_signal_backend(name).ok_or_else(|| Error::UnknownName(name.to_string()))?;
        let native = self.backends[backend_idx].signal_domain_type(name)?;

        let pushed = if native == domain {
            let handle = self.backends[backend_idx].push_signal(name, domain, idx)?;
            PushedSignal::Backend { backend: backend_idx, handle }
        } else if self.topo.is_nested_domain(native, domain) {
            let aggregation = self.backends[backend_idx].agg_function(name)?;
            let native_indices = self.topo.domain_nested(native, domain, idx)?;
            let mut handles = Vec::with_capacity(native_indices.len());
            for native_idx in native_indices {
                handles.push(self.backends[backend_idx].push_signal(name, native, native_idx)?);
            }
            PushedSignal::Broadcast { backend: backend_idx, handles, aggregation }
        } else {
            return Err(Error::DomainMismatch { name: name.to_string(), requested: domain, native });
        };
        self.signals.push(pushed);
        Ok(self.signals.len() - 1)
    }

    pub fn push_signal(&mut self, name: &str, domain: Domain, idx: usize) -> Result<Handle> {
        if self.batch_started {
            return Err(Error::PushAfterStart { kind: "signal", name: name.to_string() });
        }
        if name == CORE_TEMPERATURE {
            if domain != Domain::Cpu {
                return Err(Error::DomainMismatch { name: name.to_string(), requested: domain, native: Domain::Cpu });
            }
            let minuend = self.push_raw_signal(PROCHOT_MIN, domain, idx)?;
            let subtrahend = self.push_raw_signal(DIGITAL_READOUT, domain, idx)?;
            self.signals.push(PushedSignal::Difference { minuend, subtrahend });
            return Ok(Handle(self.signals.len() - 1));
        }
        if let Some(base) = name.strip_suffix(DERIVATIVE_SUFFIX) {
            let resolved = self.resolve_alias(base);
            let source = self.push_raw_signal(&resolved, domain, idx)?;
            self.signals.push(PushedSignal::Derivative { source, state: derived::Derivative::new() });
            return Ok(Handle(self.signals.len() - 1));
        }
        if let Some(base) = name.strip_suffix(INTEGRAL_SUFFIX) {
            let resolved = self.resolve_alias(base);
            let source = self.push_raw_signal(&resolved, domain, idx)?;
            self.signals.push(PushedSignal::Integral { source, state: derived::TimeIntegral::new() });
            return Ok(Handle(self.signals.len() - 1));
        }
        let resolved = self.resolve_alias(name);
        Ok(Handle(self.push_raw_signal(&resolved, domain, idx)?))
    }

    pub fn push_control(&mut self, name: &str, domain: Domain, idx: usize) -> Result<ControlHandle> {
        if self.batch_started {
            return Err(Error::PushAfterStart { kind: "control", name: name.to_string() });
        }
        let resolved = self.resolve_alias(name);
        let backend_idx = self.find_control_backend(&resolved).ok_or_else(|| Error::UnknownName(resolved.clone()))?;
        let native = self.backends[backend_idx].control_domain_type(&resolved)?;

        let pushed = if native == domain {
            let handle = self.backends[backend_idx].push_control(&resolved, domain, idx)?;
            PushedControl::Backend { backend: backend_idx, handle }
        } else if self.topo.is_nested_domain(native, domain) {
            let native_indices = self.topo.domain_nested(native, domain, idx)?;
            let mut handles = Vec::with_capacity(native_indices.len());
            for native_idx in native_indices {
                handles.push(self.backends[backend_idx].push_control(&resolved, native, native_idx)?);
            }
            PushedControl::Broadcast { backend: backend_idx, handles }
        } else {
            return Err(Error::DomainMismatch { name: resolved, requested: domain, native });
        };
        self.controls.push(pushed);
        self.control_meta.push((resolved, domain, idx));
        Ok(ControlHandle(self.controls.len() - 1))
    }

    pub fn read_batch(&mut self) -> Result<()> {
        self.batch_started = true;
        for backend in &mut self.backends {
            backend.read_batch()?;
        }
        // Feed every live derivative/integral its fresh (time, value) point
        // now that every backend has a current sample (spec.md §4.6:
        // "read_batch... updates the derivative history buffers of all
        // derived signals that depend on time").
        let time_aware: Vec<(usize, usize)> = self
            .signals
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match s {
                PushedSignal::Derivative { source, .. } => Some((i, *source)),
                PushedSignal::Integral { source, .. } => Some((i, *source)),
                _ => None,
            })
            .collect();
        if !time_aware.is_empty() {
            let now = self.current_time()?;
            for (i, source) in time_aware {
                let value = self.sample_idx(source)?;
                match &mut self.signals[i] {
                    PushedSignal::Derivative { state, .. } => state.push(now, value),
                    PushedSignal::Integral { state, .. } => state.push(now, value),
                    _ => unreachable!(),
                }
            }
        }
        Ok(())
    }

    /// Current monotonic time from the `TIME` backend, bypassing the batch
    /// state the way `save_control`/`restore_control` bypass it for a
    /// single-shot read.
    fn current_time(&mut self) -> Result<f64> {
        let backend_idx = self.find_signal_backend(TIME_SIGNAL).ok_or_else(|| Error::Capability(TIME_SIGNAL.to_string()))?;
        self.backends[backend_idx].read_signal(TIME_SIGNAL, Domain::Board, 0)
    }

    fn sample_idx(&self, idx: usize) -> Result<f64> {
        match &self.signals[idx] {
            PushedSignal::Backend { backend, handle } => self.backends[*backend].sample(*handle),
            PushedSignal::Broadcast { backend, handles, aggregation } => {
                let values = handles
                    .iter()
                    .map(|&h| self.backends[*backend].sample(h))
                    .collect::<Result<Vec<f64>>>()?;
                derived::aggregate("broadcast signal", &values, *aggregation)
            }
            PushedSignal::Difference { minuend, subtrahend } => {
                Ok(derived::difference(self.sample_idx(*minuend)?, self.sample_idx(*subtrahend)?))
            }
            PushedSignal::Derivative { state, .. } => state.value("derivative signal"),
            PushedSignal::Integral { state, .. } => Ok(state.value()),
        }
    }

    pub fn sample(&self, handle: Handle) -> Result<f64> {
        self.signals
            .get(handle.index())
            .ok_or_else(|| Error::Logic(format!("no signal handle {handle}")))?;
        self.sample_idx(handle.index())
    }

    pub fn adjust(&mut self, handle: ControlHandle, value: f64) -> Result<()> {
        self.batch_started = true;
        match self.controls.get(handle.index()).ok_or_else(|| Error::Logic(format!("no control handle {handle}")))? {
            PushedControl::Backend { backend, handle: h } => {
                let (backend, h) = (*backend, *h);
                self.backends[backend].adjust(h, value)
            }
            PushedControl::Broadcast { backend, handles } => {
                let (backend, handles) = (*backend, handles.clone());
                for h in handles {
                    self.backends[backend].adjust(h, value)?;
                }
                Ok(())
            }
        }
    }

    pub fn write_batch(&mut self) -> Result<()> {
        for backend in &mut self.backends {
            backend.write_batch()?;
        }
        Ok(())
    }

    pub fn read_signal(&mut self, name: &str, domain: Domain, idx: usize) -> Result<f64> {
        if name == CORE_TEMPERATURE {
            let prochot = self.read_signal(PROCHOT_MIN, domain, idx)?;
            let readout = self.read_signal(DIGITAL_READOUT, domain, idx)?;
            return Ok(derived::difference(prochot, readout));
        }
        let resolved = self.resolve_alias(name);
        let backend_idx = self.find_signal_backend(&resolved).ok_or_else(|| Error::UnknownName(resolved.clone()))?;
        let native = self.backends[backend_idx].signal_domain_type(&resolved)?;
        if native == domain {
            return self.backends[backend_idx].read_signal(&resolved, domain, idx);
        }
        if self.topo.is_nested_domain(native, domain) {
            let aggregation = self.backends[backend_idx].agg_function(&resolved)?;
            let native_indices = self.topo.domain_nested(native, domain, idx)?;
            let mut values = Vec::with_capacity(native_indices.len());
            for native_idx in native_indices {
                values.push(self.backends[backend_idx].read_signal(&resolved, native, native_idx)?);
            }
            return derived::aggregate(&resolved, &values, aggregation);
        }
        Err(Error::DomainMismatch { name: resolved, requested: domain, native })
    }

    pub fn write_control(&mut self, name: &str, domain: Domain, idx: usize, value: f64) -> Result<()> {
        let resolved = self.resolve_alias(name);
        let backend_idx = self.find_control_backend(&resolved).ok_or_else(|| Error::UnknownName(resolved.clone()))?;
        let native = self.backends[backend_idx].control_domain_type(&resolved)?;
        if native == domain {
            return self.backends[backend_idx].write_control(&resolved, domain, idx, value);
        }
        if self.topo.is_nested_domain(native, domain) {
            for native_idx in self.topo.domain_nested(native, domain, idx)? {
                self.backends[backend_idx].write_control(&resolved, native, native_idx, value)?;
            }
            return Ok(());
        }
        Err(Error::DomainMismatch { name: resolved, requested: domain, native })
    }

    /// Snapshots the live value of every currently pushed control to a JSON
    /// document at `path` (spec.md §6's snapshot file format).
    pub fn save_control(&mut self, path: &Path) -> Result<()> {
        let mut entries = Vec::with_capacity(self.control_meta.len());
        for (name, domain, idx) in self.control_meta.clone() {
            let value = self.read_signal(&name, domain, idx)?;
            entries.push(SnapshotEntry { name, domain: domain.name().to_string(), idx, value });
        }
        std::fs::write(path, serde_json::to_string_pretty(&entries)?)?;
        Ok(())
    }

    /// Restores every entry in a snapshot written by [`PlatformIo::
    /// save_control`]. A missing file is a no-op, the same tolerance every
    /// backend's own `restore_control` extends.
    pub fn restore_control(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        let text = std::fs::read_to_string(path)?;
        let entries: Vec<SnapshotEntry> = serde_json::from_str(&text)?;
        for entry in entries {
            let domain = Domain::from_name(&entry.domain)?;
            self.write_control(&entry.name, domain, entry.idx, entry.value)?;
        }
        Ok(())
    }

    pub fn agg_function(&self, name: &str) -> Result<Aggregation> {
        if name == CORE_TEMPERATURE {
            return Ok(Aggregation::Average);
        }
        let resolved = self.resolve_alias(name);
        let backend = self.find_signal_backend(&resolved).ok_or_else(|| Error::UnknownName(resolved.clone()))?;
        self.backends[backend].agg_function(&resolved)
    }

    pub fn format_function(&self, name: &str) -> Result<Format> {
        if name == CORE_TEMPERATURE {
            return Ok(Format::Double);
        }
        let resolved = self.resolve_alias(name);
        let backend = self.find_signal_backend(&resolved).ok_or_else(|| Error::UnknownName(resolved.clone()))?;
        self.backends[backend].format_function(&resolved)
    }

    pub fn signal_behavior(&self, name: &str) -> Result<Behavior> {
        if name == CORE_TEMPERATURE {
            return Ok(Behavior::Variable);
        }
        let resolved = self.resolve_alias(name);
        let backend = self.find_signal_backend(&resolved).ok_or_else(|| Error::UnknownName(resolved.clone()))?;
        self.backends[backend].signal_behavior(&resolved)
    }

    pub fn signal_description(&self, name: &str) -> Result<String> {
        if name == CORE_TEMPERATURE {
            return Ok(format!("{PROCHOT_MIN} minus {DIGITAL_READOUT}"));
        }
        let resolved = self.resolve_alias(name);
        let backend = self.find_signal_backend(&resolved).ok_or_else(|| Error::UnknownName(resolved.clone()))?;
        self.backends[backend].signal_description(&resolved)
    }

    pub fn control_description(&self, name: &str) -> Result<String> {
        let resolved = self.resolve_alias(name);
        let backend = self.find_control_backend(&resolved).ok_or_else(|| Error::UnknownName(resolved.clone()))?;
        self.backends[backend].control_description(&resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iogroup::msr::FakeMsrIo;

    /// 4 cpus: packages {0,1} x cores {0,1}, with the MSR backend swapped
    /// for a seeded [`FakeMsrIo`] double so tests don't need `/dev/cpu`.
    fn platform_with_msr(fake: FakeMsrIo) -> PlatformIo {
        let topo = Topology::from_raw(4, &[0, 0, 1, 1], &[0, 1, 0, 1]);
        let mut pio = PlatformIo::with_topology(topo.clone());
        let msr_idx = pio.backends.iter().position(|b| b.name() == "MSR").unwrap();
        pio.backends[msr_idx] = Backend::Msr(MsrIoGroup::with_io(topo, Box::new(fake)).unwrap());
        pio
    }

    #[test]
    fn push_signal_at_native_domain_round_trips() {
        let mut fake = FakeMsrIo::new();
        fake.set(0, 0x198, 0x0B00);
        let mut pio = platform_with_msr(fake);
        let h = pio.push_signal("PERF_STATUS:FREQ", Domain::Cpu, 0).unwrap();
        pio.read_batch().unwrap();
        assert_eq!(pio.sample(h).unwrap(), 1.1e9);
    }

    #[test]
    fn push_signal_broadcasts_package_scoped_field_down_to_every_cpu() {
        // CPU_ENERGY is natively Package-domain; pushing it at Board
        // aggregates across both packages.
        let mut fake = FakeMsrIo::new();
        fake.set(0, 0x611, 1_638_400); // package 0 -> 100.0 J
        fake.set(2, 0x611, 3_276_800); // package 1 -> 200.0 J
        let mut pio = platform_with_msr(fake);
        let h = pio.push_signal("CPU_ENERGY", Domain::Board, 0).unwrap();
        pio.read_batch().unwrap();
        assert_eq!(pio.sample(h).unwrap(), 300.0); // Sum aggregation
    }

    #[test]
    fn push_after_read_batch_fails() {
        let mut pio = platform_with_msr(FakeMsrIo::new());
        pio.push_signal("PERF_STATUS:FREQ", Domain::Cpu, 0).unwrap();
        pio.read_batch().unwrap();
        assert!(matches!(
            pio.push_signal("PERF_STATUS:FREQ", Domain::Cpu, 1),
            Err(Error::PushAfterStart { .. })
        ));
    }

    #[test]
    fn core_temperature_is_prochot_minus_digital_readout() {
        let mut fake = FakeMsrIo::new();
        // TEMPERATURE_TARGET:PROCHOT_MIN (package 0, bits 16..23) = 98
        fake.set(0, 0x1A2, 98u64 << 16);
        // THERM_STATUS:DIGITAL_READOUT (cpu 0, bits 16..22) = 66
        fake.set(0, 0x19C, 66u64 << 16);
        let mut pio = platform_with_msr(fake);
        let h = pio.push_signal("CPU_CORE_TEMPERATURE", Domain::Cpu, 0).unwrap();
        pio.read_batch().unwrap();
        assert_eq!(pio.sample(h).unwrap(), 32.0);
    }

    #[test]
    fn control_broadcast_to_package_writes_every_contained_cpu() {
        let mut pio = platform_with_msr(FakeMsrIo::new());
        let h = pio.push_control("PERF_CTL:FREQ", Domain::Package, 0).unwrap();
        pio.adjust(h, 2.0e9).unwrap();
        pio.write_batch().unwrap();
        // Both cpu 0 and cpu 1 (package 0) must have been written.
        assert_eq!(pio.read_signal("PERF_CTL:FREQ", Domain::Cpu, 0).unwrap(), 2.0e9);
        assert_eq!(pio.read_signal("PERF_CTL:FREQ", Domain::Cpu, 1).unwrap(), 2.0e9);
    }

    #[test]
    fn save_and_restore_round_trips_through_a_snapshot_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let mut fake = FakeMsrIo::new();
        fake.set(0, 0x199, 0x3200); // 50 * 1e8
        let mut pio = platform_with_msr(fake);
        pio.push_control("PERF_CTL:FREQ", Domain::Cpu, 0).unwrap();
        pio.save_control(&path).unwrap();

        pio.write_control("PERF_CTL:FREQ", Domain::Cpu, 0, 9.9e9).unwrap();
        assert_ne!(pio.read_signal("PERF_CTL:FREQ", Domain::Cpu, 0).unwrap(), 50.0 * 1.0e8);

        pio.restore_control(&path).unwrap();
        assert_eq!(pio.read_signal("PERF_CTL:FREQ", Domain::Cpu, 0).unwrap(), 50.0 * 1.0e8);
    }
}
