//! Immutable lookup of domain counts and containment (spec.md §4.1).
//!
//! Grounded on `original_source/libgeopmd/test/MockPlatformTopo.hpp`: the
//! real `PlatformTopo` interface is a pure query surface over a containment
//! table built once at construction, which is exactly what [`Topology`]
//! below is.

mod probe;

use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Error, Result};

/// A hardware topology scope.
///
/// Kept as a tagged enum over a fixed set, the same shape the teacher uses
/// for `Hardware`/`Software` event kinds in `event::hw`/`event::sw`: a closed
/// list of variants rather than an open string tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Domain {
    Board,
    Package,
    Core,
    Cpu,
    Memory,
    Gpu,
    GpuChip,
    Nic,
}

impl Domain {
    pub const ALL: [Domain; 8] = [
        Domain::Board,
        Domain::Package,
        Domain::Core,
        Domain::Cpu,
        Domain::Memory,
        Domain::Gpu,
        Domain::GpuChip,
        Domain::Nic,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Domain::Board => "board",
            Domain::Package => "package",
            Domain::Core => "core",
            Domain::Cpu => "cpu",
            Domain::Memory => "memory",
            Domain::Gpu => "gpu",
            Domain::GpuChip => "gpu_chip",
            Domain::Nic => "nic",
        }
    }

    pub fn from_name(name: &str) -> Result<Domain> {
        Domain::ALL
            .into_iter()
            .find(|d| d.name() == name)
            .ok_or_else(|| Error::UnknownName(format!("domain name: {name}")))
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Containment table for one domain: for every index of this domain, the set
/// of CPU indices it contains. Finer-than-CPU domains have no entry (CPU is
/// the finest domain this crate models).
#[derive(Clone, Debug, Default)]
struct Containment {
    /// cpu index -> domain index
    cpu_to_idx: Vec<usize>,
    count: usize,
}

impl Containment {
    fn single_board(num_cpu: usize) -> Self {
        Containment {
            cpu_to_idx: vec![0; num_cpu],
            count: if num_cpu > 0 { 1 } else { 0 },
        }
    }

    fn empty() -> Self {
        Containment {
            cpu_to_idx: Vec::new(),
            count: 0,
        }
    }
}

/// Immutable topology: domain cardinalities and CPU containment.
///
/// Constructed once; never mutated afterward (spec.md §3: "Topology and
/// IOGroup registration happen once at PlatformIO construction; signal/
/// control metadata is frozen thereafter").
#[derive(Clone, Debug)]
pub struct Topology {
    num_cpu: usize,
    package: Containment,
    core: Containment,
    memory: Containment,
    gpu: Containment,
    gpu_chip: Containment,
    nic: Containment,
}

impl Topology {
    /// Probes `/proc/cpuinfo` and `/sys/devices/system/cpu` for package and
    /// core containment. GPU and NIC domains default to empty (count 0);
    /// callers that need GPU topology inject it via [`Topology::with_gpu`]
    /// after a vendor backend has resolved it (spec.md §4.3's selection
    /// order lives one layer up, in `iogroup::gpu`).
    pub fn probe() -> Result<Topology> {
        let raw = probe::probe_cpu_topology()?;
        Ok(Topology::from_raw(raw.num_cpu, &raw.package_of_cpu, &raw.core_of_cpu))
    }

    /// Build a topology from explicit per-CPU package/core assignments.
    /// `package_of_cpu[i]` and `core_of_cpu[i]` need not be dense; they are
    /// compacted into dense `[0, num_domain(d))` indices here, preserving
    /// first-seen order.
    pub fn from_raw(num_cpu: usize, package_of_cpu: &[usize], core_of_cpu: &[usize]) -> Topology {
        let package = Topology::compact(num_cpu, package_of_cpu);
        // Core indices must be unique per (package, core) pair: two packages
        // each with a "core 0" are different cores.
        let core_key: Vec<(usize, usize)> = (0..num_cpu)
            .map(|cpu| (package_of_cpu[cpu], core_of_cpu[cpu]))
            .collect();
        let core = Topology::compact_keyed(num_cpu, &core_key);
        let memory = package.clone();

        Topology {
            num_cpu,
            package,
            core,
            memory,
            gpu: Containment::empty(),
            gpu_chip: Containment::empty(),
            nic: Containment::empty(),
        }
    }

    /// Returns a copy of this topology with GPU/GPU-chip containment filled
    /// in from a resolved vendor GPU topology (`cpu_of_gpu[i]` is the set of
    /// CPUs affine to GPU `i`; `chip_of_gpu` maps each GPU-chip index to its
    /// owning GPU index).
    pub fn with_gpu(mut self, cpu_of_gpu: &[BTreeSet<usize>], chip_of_gpu: &[usize]) -> Topology {
        let mut cpu_to_idx = vec![usize::MAX; self.num_cpu];
        for (gpu_idx, cpus) in cpu_of_gpu.iter().enumerate() {
            for &cpu in cpus {
                if cpu < cpu_to_idx.len() {
                    cpu_to_idx[cpu] = gpu_idx;
                }
            }
        }
        self.gpu = Containment {
            cpu_to_idx,
            count: cpu_of_gpu.len(),
        };
        self.gpu_chip = Containment {
            cpu_to_idx: Vec::new(),
            count: chip_of_gpu.len(),
        };
        self
    }

    fn compact(num_cpu: usize, raw: &[usize]) -> Containment {
        Topology::compact_keyed(num_cpu, raw)
    }

    fn compact_keyed<K: Eq + std::hash::Hash + Clone>(num_cpu: usize, raw: &[K]) -> Containment {
        let mut seen = std::collections::HashMap::new();
        let mut cpu_to_idx = Vec::with_capacity(num_cpu);
        for key in raw.iter().take(num_cpu) {
            let next_idx = seen.len();
            let idx = *seen.entry(key.clone()).or_insert(next_idx);
            cpu_to_idx.push(idx);
        }
        Containment {
            count: seen.len(),
            cpu_to_idx,
        }
    }

    pub fn num_cpu(&self) -> usize {
        self.num_cpu
    }

    fn containment(&self, domain: Domain) -> Option<&Containment> {
        match domain {
            Domain::Board => None,
            Domain::Package => Some(&self.package),
            Domain::Core => Some(&self.core),
            Domain::Cpu => None,
            Domain::Memory => Some(&self.memory),
            Domain::Gpu => Some(&self.gpu),
            Domain::GpuChip => Some(&self.gpu_chip),
            Domain::Nic => Some(&self.nic),
        }
    }

    /// Non-negative cardinality of `domain`.
    pub fn num_domain(&self, domain: Domain) -> usize {
        match domain {
            Domain::Board => 1,
            Domain::Cpu => self.num_cpu,
            _ => self
                .containment(domain)
                .map(|c| c.count)
                .unwrap_or_default(),
        }
    }

    /// Maps `cpu` to the index of the `domain`-domain it belongs to.
    /// `domain` must not be finer than `Cpu`.
    pub fn domain_idx(&self, domain: Domain, cpu: usize) -> Result<usize> {
        if cpu >= self.num_cpu {
            return Err(Error::DomainIndexOutOfRange {
                domain: Domain::Cpu,
                idx: cpu,
                count: self.num_cpu,
            });
        }
        match domain {
            Domain::Board => Ok(0),
            Domain::Cpu => Ok(cpu),
            _ => {
                let containment = self.containment(domain).ok_or_else(|| Error::Logic(
                    format!("{domain} has no CPU containment table"),
                ))?;
                containment
                    .cpu_to_idx
                    .get(cpu)
                    .copied()
                    .filter(|&idx| idx != usize::MAX)
                    .ok_or_else(|| Error::DomainMismatch {
                        name: "cpu".into(),
                        requested: domain,
                        native: Domain::Cpu,
                    })
            }
        }
    }

    /// True if every index of `outer` fully contains a disjoint set of
    /// `inner` indices (board contains everything; cpu is contained in
    /// everything; package contains core and cpu; etc).
    pub fn is_nested_domain(&self, inner: Domain, outer: Domain) -> bool {
        if inner == outer {
            return true;
        }
        if outer == Domain::Board {
            return true;
        }
        if inner == Domain::Cpu && outer != Domain::Cpu {
            return self.containment(outer).is_some();
        }
        match (inner, outer) {
            (Domain::Core, Domain::Package) => true,
            (Domain::GpuChip, Domain::Gpu) => true,
            _ => false,
        }
    }

    /// All `inner`-domain indices contained within `outer[outer_idx]`.
    pub fn domain_nested(
        &self,
        inner: Domain,
        outer: Domain,
        outer_idx: usize,
    ) -> Result<BTreeSet<usize>> {
        if !self.is_nested_domain(inner, outer) {
            return Err(Error::Logic(format!("{inner} is not nested in {outer}")));
        }
        if inner == outer {
            return Ok(BTreeSet::from([outer_idx]));
        }
        if outer == Domain::Board {
            return Ok((0..self.num_domain(inner)).collect());
        }
        // General case: every cpu whose outer-domain index is outer_idx
        // contributes its inner-domain index.
        let mut result = BTreeSet::new();
        for cpu in 0..self.num_cpu {
            if self.domain_idx(outer, cpu)? == outer_idx {
                result.insert(self.domain_idx(inner, cpu)?);
            }
        }
        Ok(result)
    }

    pub fn domain_type_to_name(domain: Domain) -> &'static str {
        domain.name()
    }

    pub fn domain_name_to_type(name: &str) -> Result<Domain> {
        Domain::from_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_package_topo() -> Topology {
        // 4 cpus: cpu 0,1 on package 0 core 0/1; cpu 2,3 on package 1 core 0/1
        Topology::from_raw(4, &[0, 0, 1, 1], &[0, 1, 0, 1])
    }

    #[test]
    fn num_domain_dense() {
        let topo = two_package_topo();
        assert_eq!(topo.num_domain(Domain::Board), 1);
        assert_eq!(topo.num_domain(Domain::Package), 2);
        assert_eq!(topo.num_domain(Domain::Core), 4);
        assert_eq!(topo.num_domain(Domain::Cpu), 4);
        assert_eq!(topo.num_domain(Domain::Gpu), 0);
    }

    #[test]
    fn domain_idx_maps_cpu_to_package() {
        let topo = two_package_topo();
        assert_eq!(topo.domain_idx(Domain::Package, 0).unwrap(), 0);
        assert_eq!(topo.domain_idx(Domain::Package, 3).unwrap(), 1);
        assert_eq!(topo.domain_idx(Domain::Board, 2).unwrap(), 0);
    }

    #[test]
    fn domain_idx_out_of_range() {
        let topo = two_package_topo();
        assert!(matches!(
            topo.domain_idx(Domain::Package, 99),
            Err(Error::DomainIndexOutOfRange { .. })
        ));
    }

    #[test]
    fn domain_nested_partitions_cpus_by_package() {
        let topo = two_package_topo();
        let nested = topo.domain_nested(Domain::Cpu, Domain::Package, 1).unwrap();
        assert_eq!(nested, BTreeSet::from([2, 3]));
    }

    #[test]
    fn board_contains_every_inner_domain_index() {
        let topo = two_package_topo();
        let nested = topo.domain_nested(Domain::Package, Domain::Board, 0).unwrap();
        assert_eq!(nested, BTreeSet::from([0, 1]));
    }

    #[test]
    fn name_round_trips() {
        for d in Domain::ALL {
            assert_eq!(Domain::from_name(d.name()).unwrap(), d);
        }
    }
}
