//! CPU-to-GPU affinity solver (spec.md §4.3, §8: the HPE-6500-like 8
//! GPUs x 56 CPUs configuration and the "greedbuster" starvation case).
//!
//! Two-pass greedy, per spec.md §4.3: pass one hands every GPU, in index
//! order, up to `floor(num_cpu / num_gpu)` CPUs out of its own candidate
//! mask (lowest index first); a CPU handed to one GPU is removed from
//! every other GPU's candidate mask too, since two GPUs can declare the
//! same CPU local (shared sockets, shared NUMA nodes). Pass two hands out
//! whatever is left, one CPU at a time, to whichever GPU still lists it
//! as a candidate and currently holds the fewest CPUs, falling back to
//! the smallest GPU overall for a CPU nobody declared local to anyone. A
//! GPU that ends up with no CPUs at all starves: its whole candidate set
//! was claimed out from under it before its own turn.

use std::collections::BTreeSet;

use crate::error::{Error, Result};

/// Partitions `num_cpu` CPUs across `candidates.len()` GPUs. `candidates[g]`
/// is the CPU indices declared local to GPU `g` (e.g. same NUMA node/socket).
/// Returns one [`BTreeSet`] of CPU indices per GPU, in GPU order.
pub fn solve_affinity(num_cpu: usize, candidates: &[Vec<usize>]) -> Result<Vec<BTreeSet<usize>>> {
    let num_gpu = candidates.len();
    if num_gpu == 0 {
        return Ok(Vec::new());
    }

    let mut remaining: Vec<BTreeSet<usize>> = candidates
        .iter()
        .map(|cpus| cpus.iter().copied().filter(|&cpu| cpu < num_cpu).collect())
        .collect();
    let mut assigned: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); num_gpu];
    let mut claimed = vec![false; num_cpu];

    // Pass 1: each GPU claims up to its even share of the whole system,
    // taken from its own remaining candidates.
    let quota = num_cpu / num_gpu;
    for gpu in 0..num_gpu {
        let take: Vec<usize> = remaining[gpu].iter().copied().take(quota).collect();
        for cpu in take {
            claimed[cpu] = true;
            assigned[gpu].insert(cpu);
            for set in remaining.iter_mut() {
                set.remove(&cpu);
            }
        }
    }

    // Pass 2: distribute whatever's left. Prefer a GPU that still lists the
    // CPU as a candidate, smallest current assignment first; a CPU with no
    // remaining candidate goes to the smallest GPU overall.
    for cpu in 0..num_cpu {
        if claimed[cpu] {
            continue;
        }
        let target = (0..num_gpu)
            .filter(|&g| remaining[g].contains(&cpu))
            .min_by_key(|&g| assigned[g].len())
            .or_else(|| (0..num_gpu).min_by_key(|&g| assigned[g].len()))
            .ok_or_else(|| Error::Logic("affinity solver invoked with zero GPUs".to_string()))?;
        assigned[target].insert(cpu);
        claimed[cpu] = true;
        for set in remaining.iter_mut() {
            set.remove(&cpu);
        }
    }

    if assigned.iter().any(|set| set.is_empty()) {
        return Err(Error::AffinityStarvation);
    }
    Ok(assigned)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// HPE-6500-like (spec.md §8): 8 GPUs, 56 CPUs total. GPUs 0-3 all
    /// declare the first 28 CPUs local, GPUs 4-7 all declare the last 28
    /// local. Each group of 4 splits its shared 28 CPUs into a contiguous
    /// 7-CPU slice per GPU.
    #[test]
    fn hpe_6500_like_yields_contiguous_slices() {
        const NUM_GPU: usize = 8;
        const NUM_CPU: usize = 56;
        let first_half: Vec<usize> = (0..28).collect();
        let second_half: Vec<usize> = (28..56).collect();
        let candidates: Vec<Vec<usize>> = (0..NUM_GPU)
            .map(|g| if g < 4 { first_half.clone() } else { second_half.clone() })
            .collect();

        let assigned = solve_affinity(NUM_CPU, &candidates).unwrap();
        assert_eq!(assigned.len(), NUM_GPU);
        for (g, set) in assigned.iter().enumerate() {
            assert_eq!(set.len(), 7, "gpu {g} slice size");
            let lo = *set.iter().next().unwrap();
            let hi = *set.iter().next_back().unwrap();
            assert_eq!(hi - lo + 1, 7, "gpu {g} slice is contiguous");
        }
        let mut all: BTreeSet<usize> = BTreeSet::new();
        for set in &assigned {
            all.extend(set);
        }
        assert_eq!(all.len(), NUM_CPU);
    }

    /// greedbuster (spec.md §8): the last GPU's 10-CPU mask is fully
    /// contained in an earlier GPU's mask, which is the whole system. The
    /// earlier GPU's even share consumes the shared CPUs before the later
    /// GPU's turn, leaving it nothing.
    #[test]
    fn greedbuster_starves_a_subset_gpu() {
        let candidates = vec![(0..20).collect::<Vec<usize>>(), (0..10).collect::<Vec<usize>>()];
        let result = solve_affinity(20, &candidates);
        assert!(matches!(result, Err(Error::AffinityStarvation)));
    }

    #[test]
    fn leftover_cpus_balance_to_the_smallest_gpu() {
        let candidates = vec![vec![0], vec![1]];
        let assigned = solve_affinity(4, &candidates).unwrap();
        assert_eq!(assigned[0].len() + assigned[1].len(), 4);
        assert!(assigned[0].len().abs_diff(assigned[1].len()) <= 1);
    }

    #[test]
    fn disjoint_masks_partition_evenly() {
        const NUM_GPU: usize = 4;
        const CPUS_PER_GPU: usize = 14;
        let num_cpu = NUM_GPU * CPUS_PER_GPU;
        let candidates: Vec<Vec<usize>> = (0..NUM_GPU)
            .map(|g| ((g * CPUS_PER_GPU)..((g + 1) * CPUS_PER_GPU)).collect())
            .collect();

        let assigned = solve_affinity(num_cpu, &candidates).unwrap();
        for set in &assigned {
            assert_eq!(set.len(), CPUS_PER_GPU);
        }
    }
}
