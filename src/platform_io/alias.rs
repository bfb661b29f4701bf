//! Federation-layer-wide alias namespace (spec.md §4.6), distinct from a
//! backend's own internal aliases (e.g. [`crate::iogroup::msr::registers::
//! builtin_aliases`]): these names resolve to a canonical `push_signal`/
//! `push_control` name that some backend, possibly several domains away,
//! actually owns.

use std::collections::BTreeMap;

/// `CPU_CORE_TEMPERATURE` is handled as its own derived composition in
/// [`super::PlatformIo`] rather than through this table, since it has no
/// single canonical backend name to resolve to.
pub fn builtin_aliases() -> BTreeMap<&'static str, &'static str> {
    BTreeMap::from([
        ("FREQUENCY", "CPU_FREQUENCY_STATUS"),
        ("ENERGY_PACKAGE", "CPU_ENERGY"),
        ("POWER_GPU", "GPU_POWER"),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_alias_target_is_non_empty() {
        for (alias, target) in builtin_aliases() {
            assert!(!alias.is_empty());
            assert!(!target.is_empty());
        }
    }
}
