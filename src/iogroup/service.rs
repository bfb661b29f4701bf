//! The service/proxy backend (spec.md §4.3): forwards every call to a
//! privileged peer process over a local IPC channel. The peer's own wire
//! protocol is out of scope (spec.md §1 excludes "daemon RPC transport"
//! details); this backend only needs a channel shaped like one, so it
//! speaks a minimal newline-delimited request/response protocol over a Unix
//! domain socket rather than reproducing the real geopmd protocol.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use crate::descriptor::{Aggregation, Behavior, Format};
use crate::error::{Error, Result};
use crate::topo::Domain;

/// Abstraction over the IPC channel so tests can swap in an in-process pipe
/// instead of a real socket to a running privileged peer.
pub trait ServiceChannel {
    fn request(&mut self, line: &str) -> Result<String>;
}

pub struct UnixSocketChannel {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
}

impl UnixSocketChannel {
    pub fn connect(path: &Path) -> Result<Self> {
        let writer = UnixStream::connect(path).map_err(|e| {
            Error::Capability(format!("cannot connect to geopm service socket {}: {e}", path.display()))
        })?;
        let reader = BufReader::new(writer.try_clone()?);
        Ok(UnixSocketChannel { reader, writer })
    }
}

impl ServiceChannel for UnixSocketChannel {
    fn request(&mut self, line: &str) -> Result<String> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        let mut response = String::new();
        self.reader.read_line(&mut response)?;
        Ok(response.trim_end().to_string())
    }
}

struct SignalSlot {
    name: String,
    domain: Domain,
    idx: usize,
    last_value: Option<f64>,
}

struct ControlSlot {
    name: String,
    domain: Domain,
    idx: usize,
    pending: Option<f64>,
}

/// Signals/controls this backend is willing to proxy. The real service
/// daemon advertises a much larger, platform-dependent catalog; this crate
/// proxies only the subset the federation layer actually needs when the
/// privileged path is in play (battery/fan-style signals a non-root user
/// cannot reach directly).
pub struct ServiceIoGroup {
    channel: Box<dyn ServiceChannel + Send>,
    catalog: Vec<(&'static str, Domain, bool)>,
    signals: Vec<SignalSlot>,
    controls: Vec<ControlSlot>,
    batch_started: bool,
}

impl ServiceIoGroup {
    pub fn new(channel: Box<dyn ServiceChannel + Send>) -> Self {
        ServiceIoGroup {
            channel,
            catalog: vec![
                ("BATTERY_CHARGE_CONTROL_LIMIT", Domain::Board, true),
                ("FAN_SPEED", Domain::Board, false),
            ],
            signals: Vec::new(),
            controls: Vec::new(),
            batch_started: false,
        }
    }

    fn lookup(&self, name: &str) -> Result<(Domain, bool)> {
        self.catalog
            .iter()
            .find(|(n, _, _)| *n == name)
            .map(|(_, d, w)| (*d, *w))
            .ok_or_else(|| Error::UnknownName(name.to_string()))
    }
}

impl crate::iogroup::IoGroup for ServiceIoGroup {
    fn name(&self) -> &'static str {
        "SERVICE"
    }

    fn signal_names(&self) -> Vec<String> {
        self.catalog.iter().map(|(n, _, _)| n.to_string()).collect()
    }

    fn control_names(&self) -> Vec<String> {
        self.catalog.iter().filter(|(_, _, w)| *w).map(|(n, _, _)| n.to_string()).collect()
    }

    fn signal_domain_type(&self, name: &str) -> Result<Domain> {
        Ok(self.lookup(name)?.0)
    }

    fn control_domain_type(&self, name: &str) -> Result<Domain> {
        self.signal_domain_type(name)
    }

    fn push_signal(&mut self, name: &str, domain: Domain, idx: usize) -> Result<usize> {
        if self.batch_started {
            return Err(Error::PushAfterStart { kind: "signal", name: name.to_string() });
        }
        let (native, _) = self.lookup(name)?;
        if domain != native {
            return Err(Error::DomainMismatch { name: name.to_string(), requested: domain, native });
        }
        if let Some(existing) = self.signals.iter().position(|s| s.name == name && s.domain == domain && s.idx == idx) {
            return Ok(existing);
        }
        self.signals.push(SignalSlot { name: name.to_string(), domain, idx, last_value: None });
        Ok(self.signals.len() - 1)
    }

    fn push_control(&mut self, name: &str, domain: Domain, idx: usize) -> Result<usize> {
        if self.batch_started {
            return Err(Error::PushAfterStart { kind: "control", name: name.to_string() });
        }
        let (native, writable) = self.lookup(name)?;
        if !writable {
            return Err(Error::NotWritable(name.to_string()));
        }
        if domain != native {
            return Err(Error::DomainMismatch { name: name.to_string(), requested: domain, native });
        }
        if let Some(existing) = self.controls.iter().position(|c| c.name == name && c.domain == domain && c.idx == idx) {
            return Ok(existing);
        }
        self.controls.push(ControlSlot { name: name.to_string(), domain, idx, pending: None });
        Ok(self.controls.len() - 1)
    }

    fn read_batch(&mut self) -> Result<()> {
        self.batch_started = true;
        for i in 0..self.signals.len() {
            let (name, idx) = (self.signals[i].name.clone(), self.signals[i].idx);
            let response = self.channel.request(&format!("READ {name} {idx}"))?;
            let value: f64 = response
                .parse()
                .map_err(|_| Error::Logic(format!("service returned non-numeric response: {response}")))?;
            self.signals[i].last_value = Some(value);
        }
        Ok(())
    }

    fn sample(&self, handle: usize) -> Result<f64> {
        let slot = self.signals.get(handle).ok_or_else(|| Error::Logic(format!("no signal handle {handle}")))?;
        slot.last_value.ok_or_else(|| Error::NotReady(slot.name.clone()))
    }

    fn adjust(&mut self, handle: usize, value: f64) -> Result<()> {
        self.batch_started = true;
        let slot = self.controls.get_mut(handle).ok_or_else(|| Error::Logic(format!("no control handle {handle}")))?;
        slot.pending = Some(value);
        Ok(())
    }

    fn write_batch(&mut self) -> Result<()> {
        for i in 0..self.controls.len() {
            let (name, idx, pending) = (self.controls[i].name.clone(), self.controls[i].idx, self.controls[i].pending);
            let value = pending.ok_or_else(|| Error::UnsetControl(name.clone()))?;
            self.channel.request(&format!("WRITE {name} {idx} {value}"))?;
        }
        Ok(())
    }

    fn read_signal(&mut self, name: &str, domain: Domain, idx: usize) -> Result<f64> {
        let (native, _) = self.lookup(name)?;
        if domain != native {
            return Err(Error::DomainMismatch { name: name.to_string(), requested: domain, native });
        }
        let response = self.channel.request(&format!("READ {name} {idx}"))?;
        response.parse().map_err(|_| Error::Logic(format!("service returned non-numeric response: {response}")))
    }

    fn write_control(&mut self, name: &str, domain: Domain, idx: usize, value: f64) -> Result<()> {
        let (native, writable) = self.lookup(name)?;
        if !writable {
            return Err(Error::NotWritable(name.to_string()));
        }
        if domain != native {
            return Err(Error::DomainMismatch { name: name.to_string(), requested: domain, native });
        }
        self.channel.request(&format!("WRITE {name} {idx} {value}")).map(|_| ())
    }

    fn agg_function(&self, name: &str) -> Result<Aggregation> {
        self.lookup(name)?;
        Ok(Aggregation::Average)
    }

    fn format_function(&self, name: &str) -> Result<Format> {
        self.lookup(name)?;
        Ok(Format::Double)
    }

    fn signal_behavior(&self, name: &str) -> Result<Behavior> {
        self.lookup(name)?;
        Ok(Behavior::Variable)
    }

    fn signal_description(&self, name: &str) -> Result<String> {
        self.lookup(name)?;
        Ok(format!("{name} (proxied via service daemon)"))
    }

    fn control_description(&self, name: &str) -> Result<String> {
        self.signal_description(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iogroup::IoGroup;
    use std::collections::VecDeque;

    struct FakeChannel {
        responses: VecDeque<String>,
    }

    impl ServiceChannel for FakeChannel {
        fn request(&mut self, _line: &str) -> Result<String> {
            Ok(self.responses.pop_front().unwrap_or_default())
        }
    }

    #[test]
    fn reads_a_value_through_the_channel() {
        let channel = FakeChannel { responses: VecDeque::from(["42.5".to_string()]) };
        let mut g = ServiceIoGroup::new(Box::new(channel));
        let h = g.push_signal("FAN_SPEED", Domain::Board, 0).unwrap();
        g.read_batch().unwrap();
        assert_eq!(g.sample(h).unwrap(), 42.5);
    }

    #[test]
    fn push_control_on_read_only_signal_fails() {
        let channel = FakeChannel { responses: VecDeque::new() };
        let mut g = ServiceIoGroup::new(Box::new(channel));
        assert!(matches!(g.push_control("FAN_SPEED", Domain::Board, 0), Err(Error::NotWritable(_))));
    }
}
