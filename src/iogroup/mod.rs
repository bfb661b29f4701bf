//! The IOGroup contract (spec.md §4.2) and the tagged-variant enum that
//! replaces the original's dynamically-dispatched plugin vtables, per the
//! redesign in spec.md §9: "replace runtime-typed plugin vtables with a
//! tagged-variant enum of backend kinds plus one shared interface; the
//! federation layer holds an ordered vector of variants."

pub mod cpuinfo;
pub mod gpu;
pub mod msr;
pub mod node_characterization;
pub mod service;
pub mod sysfs;
pub mod time;

use std::path::Path;

use crate::descriptor::{Aggregation, Behavior, Format};
use crate::error::{Error, Result};
use crate::topo::Domain;

/// One provider of signals and/or controls over a single hardware or OS
/// interface. Handles here are backend-local (dense per backend); the
/// federation layer (`platform_io`) wraps them into its own global,
/// signal/control-disjoint handle spaces.
pub trait IoGroup {
    /// Backend tag used as a fully-qualified-name prefix, e.g. `MSR`.
    fn name(&self) -> &'static str;

    fn signal_names(&self) -> Vec<String>;
    fn control_names(&self) -> Vec<String>;

    fn is_valid_signal(&self, name: &str) -> bool {
        self.signal_names().iter().any(|n| n == name)
    }
    fn is_valid_control(&self, name: &str) -> bool {
        self.control_names().iter().any(|n| n == name)
    }

    fn signal_domain_type(&self, name: &str) -> Result<Domain>;
    fn control_domain_type(&self, name: &str) -> Result<Domain>;

    fn push_signal(&mut self, name: &str, domain: Domain, idx: usize) -> Result<usize>;
    fn push_control(&mut self, name: &str, domain: Domain, idx: usize) -> Result<usize>;

    fn read_batch(&mut self) -> Result<()>;
    fn sample(&self, handle: usize) -> Result<f64>;

    fn adjust(&mut self, handle: usize, value: f64) -> Result<()>;
    fn write_batch(&mut self) -> Result<()>;

    /// Single-shot read, bypassing batch state.
    fn read_signal(&mut self, name: &str, domain: Domain, idx: usize) -> Result<f64>;
    /// Single-shot write, bypassing batch state.
    fn write_control(&mut self, name: &str, domain: Domain, idx: usize, value: f64) -> Result<()>;

    /// Persist the current raw value of every writable control this backend
    /// knows how to save. A backend with no writable controls is a no-op.
    fn save_control(&mut self, path: &Path) -> Result<()> {
        let _ = path;
        Ok(())
    }
    /// Restore controls saved by [`IoGroup::save_control`]. Unknown names
    /// are an error per spec.md §4.6; this default accepts an absent file as
    /// a no-op since most backends have nothing to restore.
    fn restore_control(&mut self, path: &Path) -> Result<()> {
        let _ = path;
        Ok(())
    }

    fn agg_function(&self, name: &str) -> Result<Aggregation>;
    fn format_function(&self, name: &str) -> Result<Format>;
    fn signal_behavior(&self, name: &str) -> Result<Behavior>;
    fn signal_description(&self, name: &str) -> Result<String>;
    fn control_description(&self, name: &str) -> Result<String>;
}

/// A backend that failed to construct is demoted to this rather than
/// failing the whole `PlatformIo` (spec.md §7: "a per-backend failure is
/// logged and the backend is demoted to a null backend without failing the
/// whole PlatformIO, except when required topology discovery fails").
pub struct NullIoGroup {
    tag: &'static str,
}

impl NullIoGroup {
    pub fn new(tag: &'static str) -> Self {
        NullIoGroup { tag }
    }
}

impl IoGroup for NullIoGroup {
    fn name(&self) -> &'static str {
        self.tag
    }
    fn signal_names(&self) -> Vec<String> {
        Vec::new()
    }
    fn control_names(&self) -> Vec<String> {
        Vec::new()
    }
    fn signal_domain_type(&self, name: &str) -> Result<Domain> {
        Err(Error::UnknownName(name.to_string()))
    }
    fn control_domain_type(&self, name: &str) -> Result<Domain> {
        Err(Error::UnknownName(name.to_string()))
    }
    fn push_signal(&mut self, name: &str, _domain: Domain, _idx: usize) -> Result<usize> {
        Err(Error::UnknownName(name.to_string()))
    }
    fn push_control(&mut self, name: &str, _domain: Domain, _idx: usize) -> Result<usize> {
        Err(Error::UnknownName(name.to_string()))
    }
    fn read_batch(&mut self) -> Result<()> {
        Ok(())
    }
    fn sample(&self, handle: usize) -> Result<f64> {
        Err(Error::Logic(format!("null backend {} has no handle {handle}", self.tag)))
    }
    fn adjust(&mut self, handle: usize, _value: f64) -> Result<()> {
        Err(Error::Logic(format!("null backend {} has no handle {handle}", self.tag)))
    }
    fn write_batch(&mut self) -> Result<()> {
        Ok(())
    }
    fn read_signal(&mut self, name: &str, _domain: Domain, _idx: usize) -> Result<f64> {
        Err(Error::UnknownName(name.to_string()))
    }
    fn write_control(&mut self, name: &str, _domain: Domain, _idx: usize, _value: f64) -> Result<()> {
        Err(Error::UnknownName(name.to_string()))
    }
    fn agg_function(&self, name: &str) -> Result<Aggregation> {
        Err(Error::UnknownName(name.to_string()))
    }
    fn format_function(&self, name: &str) -> Result<Format> {
        Err(Error::UnknownName(name.to_string()))
    }
    fn signal_behavior(&self, name: &str) -> Result<Behavior> {
        Err(Error::UnknownName(name.to_string()))
    }
    fn signal_description(&self, name: &str) -> Result<String> {
        Err(Error::UnknownName(name.to_string()))
    }
    fn control_description(&self, name: &str) -> Result<String> {
        Err(Error::UnknownName(name.to_string()))
    }
}

/// Tagged-variant enum of every concrete backend kind. The federation layer
/// holds an ordered `Vec<Backend>` (registration order = precedence order,
/// and the order `read_batch`/`write_batch` visit backends per spec.md §5).
pub enum Backend {
    Msr(msr::MsrIoGroup),
    Sysfs(sysfs::SysfsIoGroup),
    Service(service::ServiceIoGroup),
    CpuInfo(cpuinfo::CpuInfoIoGroup),
    Time(time::TimeIoGroup),
    NodeCharacterization(node_characterization::NodeCharacterizationIoGroup),
    Gpu(gpu::GpuIoGroup),
    Null(NullIoGroup),
}

/// Dispatches every `IoGroup` method to the active variant. Written as a
/// macro instead of repeating an eight-armed `match` per method, the same
/// way the teacher collapses repetitive per-flag bitfield assignment into
/// `macro_rules!` (`config::attr::from`'s `when!`/`then!`).
macro_rules! dispatch {
    ($self:ident . $method:ident ( $($arg:expr),* )) => {
        match $self {
            Backend::Msr(b) => b.$method($($arg),*),
            Backend::Sysfs(b) => b.$method($($arg),*),
            Backend::Service(b) => b.$method($($arg),*),
            Backend::CpuInfo(b) => b.$method($($arg),*),
            Backend::Time(b) => b.$method($($arg),*),
            Backend::NodeCharacterization(b) => b.$method($($arg),*),
            Backend::Gpu(b) => b.$method($($arg),*),
            Backend::Null(b) => b.$method($($arg),*),
        }
    };
}

impl IoGroup for Backend {
    fn name(&self) -> &'static str {
        dispatch!(self.name())
    }
    fn signal_names(&self) -> Vec<String> {
        dispatch!(self.signal_names())
    }
    fn control_names(&self) -> Vec<String> {
        dispatch!(self.control_names())
    }
    fn signal_domain_type(&self, name: &str) -> Result<Domain> {
        dispatch!(self.signal_domain_type(name))
    }
    fn control_domain_type(&self, name: &str) -> Result<Domain> {
        dispatch!(self.control_domain_type(name))
    }
    fn push_signal(&mut self, name: &str, domain: Domain, idx: usize) -> Result<usize> {
        dispatch!(self.push_signal(name, domain, idx))
    }
    fn push_control(&mut self, name: &str, domain: Domain, idx: usize) -> Result<usize> {
        dispatch!(self.push_control(name, domain, idx))
    }
    fn read_batch(&mut self) -> Result<()> {
        dispatch!(self.read_batch())
    }
    fn sample(&self, handle: usize) -> Result<f64> {
        dispatch!(self.sample(handle))
    }
    fn adjust(&mut self, handle: usize, value: f64) -> Result<()> {
        dispatch!(self.adjust(handle, value))
    }
    fn write_batch(&mut self) -> Result<()> {
        dispatch!(self.write_batch())
    }
    fn read_signal(&mut self, name: &str, domain: Domain, idx: usize) -> Result<f64> {
        dispatch!(self.read_signal(name, domain, idx))
    }
    fn write_control(&mut self, name: &str, domain: Domain, idx: usize, value: f64) -> Result<()> {
        dispatch!(self.write_control(name, domain, idx, value))
    }
    fn save_control(&mut self, path: &Path) -> Result<()> {
        dispatch!(self.save_control(path))
    }
    fn restore_control(&mut self, path: &Path) -> Result<()> {
        dispatch!(self.restore_control(path))
    }
    fn agg_function(&self, name: &str) -> Result<Aggregation> {
        dispatch!(self.agg_function(name))
    }
    fn format_function(&self, name: &str) -> Result<Format> {
        dispatch!(self.format_function(name))
    }
    fn signal_behavior(&self, name: &str) -> Result<Behavior> {
        dispatch!(self.signal_behavior(name))
    }
    fn signal_description(&self, name: &str) -> Result<String> {
        dispatch!(self.signal_description(name))
    }
    fn control_description(&self, name: &str) -> Result<String> {
        dispatch!(self.control_description(name))
    }
}
