//! StatsCollector (spec.md §4.7): streaming per-metric statistics plus two
//! export shapes, a YAML report and a fixed-layout C-compatible struct
//! array for the FFI boundary.
//!
//! Grounded directly on `original_source/libgeopmd/src/StatsCollector.cpp`:
//! single-pass moment accumulation (`m_1`..`m_4`), `mean = m_1 / count`,
//! `std = sqrt((m_2 - m_1^2/count) / (count - 1))`, and `skew`/`kurt`/
//! `lse_linear_0`/`lse_linear_1` throwing `GEOPM_ERROR_NOT_IMPLEMENTED`
//! (mapped here to [`Error::Unsupported`], per `SPEC_FULL.md` §11).

use crate::error::{is_valid_value, Error, Result};
use crate::platform_io::PlatformIo;
use crate::topo::Domain;

/// Maximum metric name length the C struct export will accept, matching
/// the reference's fixed `NAME_MAX`-sized field.
pub const NAME_MAX: usize = 64;
const RECORD_LEN: usize = NAME_MAX + 7 * 8;

/// One metric's running statistics (spec.md §3: "count/first/last/min/max/
/// m1-m4 moments").
#[derive(Clone, Debug)]
pub struct RuntimeStats {
    count: u64,
    first: f64,
    last: f64,
    min: f64,
    max: f64,
    m1: f64,
    m2: f64,
    m3: f64,
    m4: f64,
}

impl RuntimeStats {
    pub fn new() -> Self {
        RuntimeStats {
            count: 0,
            first: f64::NAN,
            last: f64::NAN,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            m1: 0.0,
            m2: 0.0,
            m3: 0.0,
            m4: 0.0,
        }
    }

    /// Invalid samples (`NaN` or the platform's `INVALID_VALUE` sentinel)
    /// are skipped rather than counted, the same way the reference
    /// implementation drops a sample it cannot trust.
    pub fn update(&mut self, value: f64) {
        if !is_valid_value(value) {
            return;
        }
        if self.count == 0 {
            self.first = value;
        }
        self.count += 1;
        self.last = value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.m1 += value;
        self.m2 += value * value;
        self.m3 += value.powi(3);
        self.m4 += value.powi(4);
    }

    pub fn count(&self) -> u64 {
        self.count
    }
    pub fn first(&self) -> f64 {
        self.first
    }
    pub fn last(&self) -> f64 {
        self.last
    }
    pub fn min(&self) -> f64 {
        self.min
    }
    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn mean(&self) -> f64 {
        self.m1 / self.count as f64
    }

    pub fn std(&self) -> f64 {
        let n = self.count as f64;
        ((self.m2 - self.m1 * self.m1 / n) / (n - 1.0)).sqrt()
    }

    pub fn skew(&self) -> Result<f64> {
        Err(Error::Unsupported("RuntimeStats::skew".to_string()))
    }

    pub fn kurt(&self) -> Result<f64> {
        Err(Error::Unsupported("RuntimeStats::kurt".to_string()))
    }

    pub fn lse_linear_0(&self) -> Result<f64> {
        Err(Error::Unsupported("RuntimeStats::lse_linear_0".to_string()))
    }

    pub fn lse_linear_1(&self) -> Result<f64> {
        Err(Error::Unsupported("RuntimeStats::lse_linear_1".to_string()))
    }

    pub fn reset(&mut self) {
        *self = RuntimeStats::new();
    }
}

impl Default for RuntimeStats {
    fn default() -> Self {
        RuntimeStats::new()
    }
}

/// One requested metric: the signal/domain/idx triple `StatsCollector::new`
/// pushes against its injected [`PlatformIo`] (spec.md §4.7).
pub struct StatsRequest {
    pub name: String,
    pub domain: Domain,
    pub idx: usize,
}

impl StatsRequest {
    pub fn new(name: impl Into<String>, domain: Domain, idx: usize) -> Self {
        StatsRequest { name: name.into(), domain, idx }
    }

    /// Display label per spec.md §4.7: the bare name at `(Board, 0)`,
    /// otherwise `"<name>-<domain_name>-<idx>"`.
    fn label(&self) -> String {
        if self.domain == Domain::Board && self.idx == 0 {
            self.name.clone()
        } else {
            format!("{}-{}-{}", self.name, self.domain.name(), self.idx)
        }
    }
}

/// Owns the requested metric list and their running [`RuntimeStats`], and
/// drives its own push+sample against an injected [`PlatformIo`] rather than
/// being fed externally (spec.md §2/§4.7: "StatsCollector sits on top and
/// uses only push+sample").
pub struct StatsCollector {
    hostname: String,
    labels: Vec<String>,
    handles: Vec<crate::handle::Handle>,
    stats: Vec<RuntimeStats>,
    /// Wall-clock time of the first `update()` call, per spec.md §4.7:
    /// "captures the current wall-clock time on first call as `time_begin`".
    /// `None` until that first call, and cleared back to `None` by `reset()`.
    time_begin: Option<f64>,
    last_update_time: Option<f64>,
    sample_count: u64,
    period_stats: RuntimeStats,
}

impl StatsCollector {
    /// Pushes every request as a signal against `platform_io` and records
    /// each metric's display label (spec.md §4.7).
    pub fn new(hostname: String, requests: &[StatsRequest], platform_io: &mut PlatformIo) -> Result<Self> {
        let mut labels = Vec::with_capacity(requests.len());
        let mut handles = Vec::with_capacity(requests.len());
        for req in requests {
            let handle = platform_io.push_signal(&req.name, req.domain, req.idx)?;
            labels.push(req.label());
            handles.push(handle);
        }
        let stats = requests.iter().map(|_| RuntimeStats::new()).collect();
        Ok(StatsCollector {
            hostname,
            labels,
            handles,
            stats,
            time_begin: None,
            last_update_time: None,
            sample_count: 0,
            period_stats: RuntimeStats::new(),
        })
    }

    fn check_index(&self, idx: usize) -> Result<()> {
        if idx >= self.labels.len() {
            Err(Error::Logic(format!("StatsCollector metric index {idx} out of range (0..{})", self.labels.len())))
        } else {
            Ok(())
        }
    }

    /// Reads `TIME`, `read_batch`es, and samples every pushed metric
    /// (spec.md §4.7). Invalid samples are skipped rather than counted.
    pub fn update(&mut self, platform_io: &mut PlatformIo) -> Result<()> {
        let now = platform_io.read_signal("TIME", Domain::Board, 0)?;
        if self.time_begin.is_none() {
            self.time_begin = Some(now);
        }
        if let Some(last) = self.last_update_time {
            self.period_stats.update(now - last);
        }
        self.last_update_time = Some(now);
        self.sample_count += 1;

        platform_io.read_batch()?;
        for (idx, &handle) in self.handles.iter().enumerate() {
            let value = platform_io.sample(handle)?;
            self.stats[idx].update(value);
        }
        Ok(())
    }

    pub fn stats(&self, idx: usize) -> Result<&RuntimeStats> {
        self.check_index(idx)?;
        Ok(&self.stats[idx])
    }

    /// Zeroes moments and clears `time_begin` (spec.md §4.7, verbatim:
    /// "`reset()` zeroes moments and clears `time_begin`"), so the next
    /// `update()` recaptures a fresh `time_begin`.
    pub fn reset(&mut self) {
        for s in &mut self.stats {
            s.reset();
        }
        self.time_begin = None;
        self.last_update_time = None;
        self.sample_count = 0;
        self.period_stats.reset();
    }

    /// YAML report with the exact key order spec.md §4.7 mandates:
    /// `hosts.<hostname>.{sample-time-first,sample-time-total,sample-count,
    /// sample-period-mean,sample-period-std,metrics.<name>.{count,first,
    /// last,min,max,mean,std}}`.
    pub fn report_yaml(&self, time_end: f64) -> String {
        let time_first = self.time_begin.unwrap_or(f64::NAN);
        let time_total = self.time_begin.map(|begin| time_end - begin).unwrap_or(f64::NAN);
        let mut out = String::new();
        out.push_str("hosts:\n");
        out.push_str(&format!("  {}:\n", self.hostname));
        out.push_str(&format!("    sample-time-first: {time_first}\n"));
        out.push_str(&format!("    sample-time-total: {time_total}\n"));
        out.push_str(&format!("    sample-count: {}\n", self.sample_count));
        if self.period_stats.count() > 0 {
            out.push_str(&format!("    sample-period-mean: {}\n", self.period_stats.mean()));
        } else {
            out.push_str("    sample-period-mean: .nan\n");
        }
        if self.period_stats.count() >= 2 {
            out.push_str(&format!("    sample-period-std: {:.6}\n", self.period_stats.std()));
        } else {
            out.push_str("    sample-period-std: .nan\n");
        }
        out.push_str("    metrics:\n");
        for (name, stat) in self.labels.iter().zip(&self.stats) {
            out.push_str(&format!("      {name}:\n"));
            out.push_str(&format!("        count: {}\n", stat.count()));
            if stat.count() == 0 {
                continue;
            }
            out.push_str(&format!("        first: {}\n", stat.first()));
            out.push_str(&format!("        last: {}\n", stat.last()));
            out.push_str(&format!("        min: {}\n", stat.min()));
            out.push_str(&format!("        max: {}\n", stat.max()));
            out.push_str(&format!("        mean: {}\n", stat.mean()));
            if stat.count() >= 2 {
                out.push_str(&format!("        std: {:.6}\n", stat.std()));
            }
        }
        out
    }

    /// Fixed-layout C struct array export. Each record is `NAME_MAX` bytes
    /// of null-padded name followed by seven little-endian `f64` fields
    /// (count, first, last, min, max, mean, std). A name that does not fit
    /// is rejected rather than truncated (spec.md §7: never silently
    /// truncate on export); a buffer too small for every requested metric
    /// is rejected up front rather than partially filled.
    pub fn report_struct(&self, buf: &mut [u8]) -> Result<usize> {
        let needed = RECORD_LEN * self.labels.len();
        if buf.len() < needed {
            return Err(Error::BufferTooSmall { needed });
        }
        for (i, (name, stat)) in self.labels.iter().zip(&self.stats).enumerate() {
            if name.len() + 1 > NAME_MAX {
                return Err(Error::NameTooLong { field: "metric name", len: name.len(), max: NAME_MAX - 1 });
            }
            let record = &mut buf[i * RECORD_LEN..(i + 1) * RECORD_LEN];
            record[..NAME_MAX].fill(0);
            record[..name.len()].copy_from_slice(name.as_bytes());

            let fields = [
                stat.count() as f64,
                stat.first(),
                stat.last(),
                stat.min(),
                stat.max(),
                if stat.count() > 0 { stat.mean() } else { f64::NAN },
                if stat.count() >= 2 { stat.std() } else { f64::NAN },
            ];
            for (j, field) in fields.iter().enumerate() {
                let start = NAME_MAX + j * 8;
                record[start..start + 8].copy_from_slice(&field.to_le_bytes());
            }
        }
        Ok(needed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topo::Topology;

    fn platform() -> PlatformIo {
        PlatformIo::with_topology(Topology::from_raw(1, &[0], &[0]))
    }

    #[test]
    fn worked_example_count_mean_std() {
        // spec worked example: {0.0, 1.0} -> count: 2, mean: 0.5, std: 0.707107
        let mut stat = RuntimeStats::new();
        stat.update(0.0);
        stat.update(1.0);
        assert_eq!(stat.count(), 2);
        assert_eq!(stat.mean(), 0.5);
        assert!((stat.std() - std::f64::consts::SQRT_2 / 2.0).abs() < 1e-6);
    }

    #[test]
    fn collector_samples_its_own_pushed_metric() {
        let mut pio = platform();
        let requests = [StatsRequest::new("TIME", Domain::Board, 0)];
        let mut collector = StatsCollector::new("node01".to_string(), &requests, &mut pio).unwrap();
        collector.update(&mut pio).unwrap();
        collector.update(&mut pio).unwrap();
        let stat = collector.stats(0).unwrap();
        assert_eq!(stat.count(), 2);
    }

    #[test]
    fn label_uses_bare_name_at_board_zero_and_qualified_name_otherwise() {
        assert_eq!(StatsRequest::new("ENERGY", Domain::Board, 0).label(), "ENERGY");
        assert_eq!(StatsRequest::new("ENERGY", Domain::Package, 0).label(), "ENERGY-package-0");
    }

    #[test]
    fn report_yaml_has_expected_top_level_keys_in_order() {
        let mut pio = platform();
        let requests = [StatsRequest::new("TIME", Domain::Board, 0)];
        let mut collector = StatsCollector::new("node01".to_string(), &requests, &mut pio).unwrap();
        collector.update(&mut pio).unwrap();
        collector.update(&mut pio).unwrap();
        let yaml = collector.report_yaml(10.0);
        let first_pos = yaml.find("sample-time-first:").unwrap();
        let total_pos = yaml.find("sample-time-total:").unwrap();
        let count_pos = yaml.find("sample-count:").unwrap();
        let mean_pos = yaml.find("sample-period-mean:").unwrap();
        let std_pos = yaml.find("sample-period-std:").unwrap();
        let metrics_pos = yaml.find("metrics:").unwrap();
        assert!(first_pos < total_pos && total_pos < count_pos && count_pos < mean_pos && mean_pos < std_pos && std_pos < metrics_pos);
    }

    #[test]
    fn time_begin_is_lazy_and_cleared_by_reset() {
        let mut pio = platform();
        let requests = [StatsRequest::new("TIME", Domain::Board, 0)];
        let mut collector = StatsCollector::new("node01".to_string(), &requests, &mut pio).unwrap();
        assert!(collector.time_begin.is_none());
        collector.update(&mut pio).unwrap();
        assert!(collector.time_begin.is_some());
        collector.reset();
        assert!(collector.time_begin.is_none());
    }

    #[test]
    fn report_struct_rejects_a_name_that_does_not_fit() {
        // Built directly rather than via `StatsCollector::new`: a label this
        // long can't come from a real pushed signal name, but `report_struct`
        // must still reject it rather than silently truncate.
        let collector = StatsCollector {
            hostname: "node01".to_string(),
            labels: vec!["X".repeat(NAME_MAX)],
            handles: vec![],
            stats: vec![RuntimeStats::new()],
            time_begin: None,
            last_update_time: None,
            sample_count: 0,
            period_stats: RuntimeStats::new(),
        };
        let mut buf = vec![0u8; 4096];
        assert!(matches!(collector.report_struct(&mut buf), Err(Error::NameTooLong { .. })));
    }

    #[test]
    fn report_struct_rejects_a_buffer_that_is_too_small() {
        let mut pio = platform();
        let requests = [StatsRequest::new("TIME", Domain::Board, 0)];
        let collector = StatsCollector::new("node01".to_string(), &requests, &mut pio).unwrap();
        let mut buf = vec![0u8; 8];
        assert!(matches!(collector.report_struct(&mut buf), Err(Error::BufferTooSmall { .. })));
    }

    #[test]
    fn skew_and_kurt_are_unsupported() {
        let stat = RuntimeStats::new();
        assert!(matches!(stat.skew(), Err(Error::Unsupported(_))));
        assert!(matches!(stat.kurt(), Err(Error::Unsupported(_))));
    }

    #[test]
    fn reset_clears_accumulated_statistics() {
        let mut pio = platform();
        let requests = [StatsRequest::new("TIME", Domain::Board, 0)];
        let mut collector = StatsCollector::new("node01".to_string(), &requests, &mut pio).unwrap();
        collector.update(&mut pio).unwrap();
        collector.reset();
        assert_eq!(collector.stats(0).unwrap().count(), 0);
    }
}
