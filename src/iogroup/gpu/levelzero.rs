//! Level Zero and bare-sysfs GPU topology probing.
//!
//! There is no published `level-zero` Rust crate in wide use (none of the
//! reference crates this tree was built from depend on one), so the Level
//! Zero precedence tier here is implemented the same way the sysfs tiers
//! are: by reading `/sys/class/accel` and `/sys/class/drm` device nodes.
//! This is a deliberate substitution, not an attempt to bind the real
//! `ze_api.h` surface; a real Level Zero integration would replace this
//! module's probing with FFI calls and keep the same [`probe_sysfs`]
//! return shape.

use std::path::Path;

use crate::error::Result;
use super::GpuTopology;

/// Counts immediate subdirectories of `root` (one per GPU device node), the
/// same shape `/sys/class/accel/accel{N}` and `/sys/class/drm/card{N}` use.
pub fn probe_sysfs(root: &Path) -> Result<GpuTopology> {
    let mut num_gpu = 0;
    if let Ok(entries) = std::fs::read_dir(root) {
        for entry in entries.flatten() {
            if entry.path().is_dir() || entry.path().is_symlink() {
                num_gpu += 1;
            }
        }
    }
    Ok(GpuTopology {
        num_gpu,
        num_gpu_chip: num_gpu,
        chip_of_gpu: (0..num_gpu).collect(),
        cpu_affinity: vec![Vec::new(); num_gpu],
    })
}

pub fn is_present(root: &Path) -> bool {
    std::fs::read_dir(root).map(|mut e| e.next().is_some()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_device_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("card0")).unwrap();
        std::fs::create_dir(dir.path().join("card1")).unwrap();
        let topo = probe_sysfs(dir.path()).unwrap();
        assert_eq!(topo.num_gpu, 2);
    }

    #[test]
    fn empty_directory_is_not_present() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_present(dir.path()));
    }
}
