//! Federates hardware telemetry and control backends into one typed
//! signal/control namespace.
//!
//! ## Example
//!
//! Read package energy through the MSR backend and push a derived ratio of
//! two signals.
//!
//! ```rust,no_run
//! use geopm_platformio::platform_io::PlatformIo;
//! use geopm_platformio::topo::Domain;
//!
//! let mut pio = PlatformIo::new().unwrap();
//! let energy = pio.push_signal("CPU_ENERGY", Domain::Package, 0).unwrap();
//! pio.read_batch().unwrap();
//! let joules = pio.sample(energy).unwrap();
//! println!("{joules} J");
//! ```
//!
//! ## Scope
//!
//! This crate implements the node-level PlatformIO core only: topology
//! enumeration, IOGroup backends, batched I/O, derived signals, the
//! federation layer, and the StatsCollector. Decider/agent policy plugins,
//! application-profiling shims, report formatting, and daemon transport are
//! external collaborators that consume this crate's API.

pub mod batch;
pub mod capi;
mod config_env;
pub mod derived;
pub mod descriptor;
pub mod error;
pub mod handle;
pub mod iogroup;
pub mod platform_io;
pub mod stats;
pub mod topo;

pub use error::{Error, Result};
pub use handle::Handle;
