//! The time backend (spec.md §4.3): a single monotonic-clock signal every
//! other backend's derived `Derivative`/`TimeIntegral` signals are built on
//! top of (spec.md §4.5). Grounded the same way the original's `TimeIOGroup`
//! wraps `geopm_time_since_start` in a one-signal IOGroup.

use std::path::Path;
use std::time::Instant;

use crate::descriptor::{Aggregation, Behavior, Format};
use crate::error::{Error, Result};
use crate::topo::Domain;

const TIME_SIGNAL: &str = "TIME";

pub struct TimeIoGroup {
    start: Instant,
    pushed: bool,
    last_sample: Option<f64>,
}

impl TimeIoGroup {
    pub fn new() -> Self {
        TimeIoGroup { start: Instant::now(), pushed: false, last_sample: None }
    }
}

impl Default for TimeIoGroup {
    fn default() -> Self {
        TimeIoGroup::new()
    }
}

impl crate::iogroup::IoGroup for TimeIoGroup {
    fn name(&self) -> &'static str {
        "TIME"
    }

    fn signal_names(&self) -> Vec<String> {
        vec![TIME_SIGNAL.to_string()]
    }

    fn control_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn signal_domain_type(&self, name: &str) -> Result<Domain> {
        if name == TIME_SIGNAL {
            Ok(Domain::Board)
        } else {
            Err(Error::UnknownName(name.to_string()))
        }
    }

    fn control_domain_type(&self, name: &str) -> Result<Domain> {
        Err(Error::UnknownName(name.to_string()))
    }

    fn push_signal(&mut self, name: &str, domain: Domain, idx: usize) -> Result<usize> {
        if name != TIME_SIGNAL {
            return Err(Error::UnknownName(name.to_string()));
        }
        if domain != Domain::Board || idx != 0 {
            return Err(Error::DomainMismatch { name: name.to_string(), requested: domain, native: Domain::Board });
        }
        self.pushed = true;
        Ok(0)
    }

    fn push_control(&mut self, name: &str, _domain: Domain, _idx: usize) -> Result<usize> {
        Err(Error::NotWritable(name.to_string()))
    }

    fn read_batch(&mut self) -> Result<()> {
        self.last_sample = Some(self.start.elapsed().as_secs_f64());
        Ok(())
    }

    fn sample(&self, handle: usize) -> Result<f64> {
        if handle != 0 || !self.pushed {
            return Err(Error::Logic(format!("no signal handle {handle}")));
        }
        self.last_sample.ok_or_else(|| Error::NotReady(TIME_SIGNAL.to_string()))
    }

    fn adjust(&mut self, handle: usize, _value: f64) -> Result<()> {
        Err(Error::Logic(format!("TIME backend has no writable handle {handle}")))
    }

    fn write_batch(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_signal(&mut self, name: &str, domain: Domain, idx: usize) -> Result<f64> {
        if name != TIME_SIGNAL || domain != Domain::Board || idx != 0 {
            return Err(Error::UnknownName(name.to_string()));
        }
        Ok(self.start.elapsed().as_secs_f64())
    }

    fn write_control(&mut self, name: &str, _domain: Domain, _idx: usize, _value: f64) -> Result<()> {
        Err(Error::NotWritable(name.to_string()))
    }

    fn save_control(&mut self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn restore_control(&mut self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn agg_function(&self, name: &str) -> Result<Aggregation> {
        (name == TIME_SIGNAL).then_some(Aggregation::ExpectSame).ok_or_else(|| Error::UnknownName(name.to_string()))
    }

    fn format_function(&self, name: &str) -> Result<Format> {
        (name == TIME_SIGNAL).then_some(Format::Double).ok_or_else(|| Error::UnknownName(name.to_string()))
    }

    fn signal_behavior(&self, name: &str) -> Result<Behavior> {
        (name == TIME_SIGNAL).then_some(Behavior::Monotone).ok_or_else(|| Error::UnknownName(name.to_string()))
    }

    fn signal_description(&self, name: &str) -> Result<String> {
        (name == TIME_SIGNAL).then(|| "seconds since PlatformIO construction".to_string()).ok_or_else(|| Error::UnknownName(name.to_string()))
    }

    fn control_description(&self, name: &str) -> Result<String> {
        Err(Error::UnknownName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iogroup::IoGroup;

    #[test]
    fn time_is_monotone_across_two_reads() {
        let mut g = TimeIoGroup::new();
        let h = g.push_signal("TIME", Domain::Board, 0).unwrap();
        g.read_batch().unwrap();
        let first = g.sample(h).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        g.read_batch().unwrap();
        let second = g.sample(h).unwrap();
        assert!(second >= first);
    }

    #[test]
    fn sample_before_push_fails() {
        let g = TimeIoGroup::new();
        assert!(g.sample(0).is_err());
    }
}
