//! NVML-backed GPU topology and sampling, feature-gated on `nvml` since it
//! links against the vendor driver's shared library and is unusable on a
//! machine without an NVIDIA GPU present.

use nvml_wrapper::Nvml;

use crate::error::{Error, Result};

use super::GpuTopology;

pub fn device_count(nvml: &Nvml) -> Result<usize> {
    nvml.device_count()
        .map(|n| n as usize)
        .map_err(|e| Error::Capability(format!("NVML device_count failed: {e}")))
}

/// Resolves GPU count and CPU affinity (via NVML's own affinity query) into
/// a [`GpuTopology`]. CPU affinity queries that fail per-device leave that
/// GPU with an empty candidate set, which the solver either fills from
/// leftover CPUs or reports as starved.
pub fn probe(nvml: &Nvml) -> Result<GpuTopology> {
    let num_gpu = device_count(nvml)?;
    let mut cpu_affinity = Vec::with_capacity(num_gpu);
    for i in 0..num_gpu {
        let device = nvml
            .device_by_index(i as u32)
            .map_err(|e| Error::Capability(format!("NVML device_by_index({i}) failed: {e}")))?;
        let cpus = device
            .cpu_affinity(64)
            .map(|set| {
                set.into_iter()
                    .enumerate()
                    .filter(|(_, bit)| *bit != 0)
                    .map(|(idx, _)| idx)
                    .collect()
            })
            .unwrap_or_default();
        cpu_affinity.push(cpus);
    }
    Ok(GpuTopology {
        num_gpu,
        num_gpu_chip: num_gpu,
        chip_of_gpu: (0..num_gpu).collect(),
        cpu_affinity,
    })
}
