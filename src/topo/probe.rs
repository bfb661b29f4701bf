//! Construction-time `/sys` probing for CPU package/core containment.
//!
//! Grounded on `original_source`'s `PlatformTopo` (see
//! `libgeopmd/test/MockPlatformTopo.hpp` for the interface it implements):
//! the real implementation reads `/sys/devices/system/cpu/cpu*/topology/
//! {physical_package_id,core_id}`. Failure of a probe that yields a
//! non-zero, required domain is fatal at construction per spec.md §4.1; we
//! surface that as [`crate::error::Error::Io`].

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

pub struct RawTopology {
    pub num_cpu: usize,
    pub package_of_cpu: Vec<usize>,
    pub core_of_cpu: Vec<usize>,
}

const CPU_SYSFS_ROOT: &str = "/sys/devices/system/cpu";

pub fn probe_cpu_topology() -> Result<RawTopology> {
    probe_cpu_topology_at(Path::new(CPU_SYSFS_ROOT))
}

/// Separated from [`probe_cpu_topology`] so tests can point at a
/// `tempfile`-built fake sysfs tree instead of the real `/sys`.
pub(super) fn probe_cpu_topology_at(root: &Path) -> Result<RawTopology> {
    let mut cpu_ids: Vec<usize> = fs::read_dir(root)
        .map_err(Error::Io)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            let digits = name.strip_prefix("cpu")?;
            if digits.chars().all(|c| c.is_ascii_digit()) && !digits.is_empty() {
                digits.parse::<usize>().ok()
            } else {
                None
            }
        })
        .collect();
    cpu_ids.sort_unstable();

    let num_cpu = cpu_ids.len();
    let mut package_of_cpu = vec![0usize; num_cpu];
    let mut core_of_cpu = vec![0usize; num_cpu];

    for (dense_idx, &cpu) in cpu_ids.iter().enumerate() {
        let topo_dir = root.join(format!("cpu{cpu}/topology"));
        package_of_cpu[dense_idx] = read_usize(&topo_dir.join("physical_package_id"))?;
        core_of_cpu[dense_idx] = read_usize(&topo_dir.join("core_id"))?;
    }

    Ok(RawTopology {
        num_cpu,
        package_of_cpu,
        core_of_cpu,
    })
}

fn read_usize(path: &Path) -> Result<usize> {
    let text = fs::read_to_string(path).map_err(Error::Io)?;
    text.trim()
        .parse::<usize>()
        .map_err(|e| Error::Logic(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn probes_package_and_core_from_fake_sysfs() {
        let dir = tempfile::tempdir().unwrap();
        for (cpu, pkg, core) in [(0, 0, 0), (1, 0, 1), (2, 1, 0), (3, 1, 1)] {
            let topo_dir = dir.path().join(format!("cpu{cpu}/topology"));
            fs::create_dir_all(&topo_dir).unwrap();
            fs::write(topo_dir.join("physical_package_id"), pkg.to_string()).unwrap();
            fs::write(topo_dir.join("core_id"), core.to_string()).unwrap();
        }
        let raw = probe_cpu_topology_at(dir.path()).unwrap();
        assert_eq!(raw.num_cpu, 4);
        assert_eq!(raw.package_of_cpu, vec![0, 0, 1, 1]);
        assert_eq!(raw.core_of_cpu, vec![0, 1, 0, 1]);
    }
}
