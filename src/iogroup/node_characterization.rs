//! The node-characterization backend (spec.md §4.3): static per-node facts
//! (hostname, a pinned sticker-frequency value) read once from a small JSON
//! side file rather than probed, matching the original's `NodeCharacteriz
//! ationIOGroup` which reads a one-shot calibration file placed by the
//! system administrator.

use std::collections::BTreeMap;
use std::path::Path;

use crate::descriptor::{Aggregation, Behavior, Format};
use crate::error::{Error, Result};
use crate::topo::Domain;

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct CharacterizationFile {
    #[serde(default)]
    signals: BTreeMap<String, f64>,
}

pub struct NodeCharacterizationIoGroup {
    values: BTreeMap<String, f64>,
    signals: Vec<String>,
}

impl NodeCharacterizationIoGroup {
    /// An empty backend with no characterization file present — a common
    /// case the federation layer must tolerate without failing (spec.md
    /// §7: per-backend construction failure demotes to a null backend).
    pub fn empty() -> Self {
        NodeCharacterizationIoGroup { values: BTreeMap::new(), signals: Vec::new() }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::empty());
        }
        let text = std::fs::read_to_string(path)?;
        let file: CharacterizationFile = serde_json::from_str(&text)?;
        Ok(NodeCharacterizationIoGroup { values: file.signals, signals: Vec::new() })
    }
}

impl crate::iogroup::IoGroup for NodeCharacterizationIoGroup {
    fn name(&self) -> &'static str {
        "NODE_CHARACTERIZATION"
    }

    fn signal_names(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    fn control_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn signal_domain_type(&self, name: &str) -> Result<Domain> {
        self.values.contains_key(name).then_some(Domain::Board).ok_or_else(|| Error::UnknownName(name.to_string()))
    }

    fn control_domain_type(&self, name: &str) -> Result<Domain> {
        Err(Error::UnknownName(name.to_string()))
    }

    fn push_signal(&mut self, name: &str, domain: Domain, idx: usize) -> Result<usize> {
        if !self.values.contains_key(name) {
            return Err(Error::UnknownName(name.to_string()));
        }
        if domain != Domain::Board || idx != 0 {
            return Err(Error::DomainMismatch { name: name.to_string(), requested: domain, native: Domain::Board });
        }
        if let Some(existing) = self.signals.iter().position(|s| s == name) {
            return Ok(existing);
        }
        self.signals.push(name.to_string());
        Ok(self.signals.len() - 1)
    }

    fn push_control(&mut self, name: &str, _domain: Domain, _idx: usize) -> Result<usize> {
        Err(Error::NotWritable(name.to_string()))
    }

    fn read_batch(&mut self) -> Result<()> {
        Ok(())
    }

    fn sample(&self, handle: usize) -> Result<f64> {
        let name = self.signals.get(handle).ok_or_else(|| Error::Logic(format!("no signal handle {handle}")))?;
        Ok(self.values[name])
    }

    fn adjust(&mut self, handle: usize, _value: f64) -> Result<()> {
        Err(Error::Logic(format!("NODE_CHARACTERIZATION backend has no writable handle {handle}")))
    }

    fn write_batch(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_signal(&mut self, name: &str, domain: Domain, idx: usize) -> Result<f64> {
        if domain != Domain::Board || idx != 0 {
            return Err(Error::DomainMismatch { name: name.to_string(), requested: domain, native: Domain::Board });
        }
        self.values.get(name).copied().ok_or_else(|| Error::UnknownName(name.to_string()))
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
        self.values.contains_key(name).then_some(Aggregation::ExpectSame).ok_or_else(|| Error::UnknownName(name.to_string()))
    }

    fn format_function(&self, name: &str) -> Result<Format> {
        self.values.contains_key(name).then_some(Format::Double).ok_or_else(|| Error::UnknownName(name.to_string()))
    }

    fn signal_behavior(&self, name: &str) -> Result<Behavior> {
        self.values.contains_key(name).then_some(Behavior::Constant).ok_or_else(|| Error::UnknownName(name.to_string()))
    }

    fn signal_description(&self, name: &str) -> Result<String> {
        self.values.contains_key(name).then(|| format!("{name} (node characterization file)")).ok_or_else(|| Error::UnknownName(name.to_string()))
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
    fn missing_file_yields_empty_backend() {
        let g = NodeCharacterizationIoGroup::load(Path::new("/nonexistent/path.json")).unwrap();
        assert!(g.signal_names().is_empty());
    }

    #[test]
    fn loads_and_samples_a_signal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("characterization.json");
        std::fs::write(&path, r#"{"signals": {"STICKER_FREQUENCY": 2.1e9}}"#).unwrap();
        let mut g = NodeCharacterizationIoGroup::load(&path).unwrap();
        let h = g.push_signal("STICKER_FREQUENCY", Domain::Board, 0).unwrap();
        assert_eq!(g.sample(h).unwrap(), 2.1e9);
    }
}
