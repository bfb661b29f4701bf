//! Centralizes the environment-variable lookups named in spec.md §6, the
//! same way the teacher centralizes raw OS calls in one `ffi` module instead
//! of scattering `libc::` calls throughout the tree.

use std::env;
use std::path::PathBuf;

/// Directories holding extra MSR JSON augmentation files.
pub const MSR_CONFIG_PATH: &str = "GEOPM_MSR_CONFIG_PATH";
/// Legacy alias for [`MSR_CONFIG_PATH`].
pub const PLUGIN_PATH: &str = "GEOPM_PLUGIN_PATH";
/// Set (to any value) to force the pread/pwrite batched-I/O fallback even on
/// a kernel that supports io_uring.
pub const DISABLE_URING: &str = "GEOPM_DISABLE_URING";
/// Unix domain socket the service/proxy backend connects to.
pub const SERVICE_SOCKET: &str = "GEOPM_SERVICE_SOCKET";
/// Path to the node characterization JSON side file.
pub const NODE_CHARACTERIZATION_PATH: &str = "GEOPM_NODE_CHARACTERIZATION_PATH";

pub fn msr_config_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    for var in [MSR_CONFIG_PATH, PLUGIN_PATH] {
        if let Ok(value) = env::var(var) {
            dirs.extend(env::split_paths(&value).map(PathBuf::from));
        }
    }
    dirs
}

pub fn uring_disabled() -> bool {
    env::var_os(DISABLE_URING).is_some()
}

pub fn service_socket_path() -> PathBuf {
    env::var_os(SERVICE_SOCKET)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/run/geopm-service.sock"))
}

pub fn node_characterization_path() -> PathBuf {
    env::var_os(NODE_CHARACTERIZATION_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc/geopm/node_characterization.json"))
}
