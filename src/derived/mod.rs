//! Composable signals built from one or more already-pushed raw signals
//! (spec.md §4.5). These are pure value transforms the federation layer
//! (`platform_io`) drives with sample values it has already collected from
//! backends; none of them touch hardware directly.

pub mod circular_buffer;

use crate::descriptor::Aggregation;
use crate::error::{Error, Result};

use circular_buffer::CircularBuffer;

/// `numerator / denominator`. Per spec.md §8: divides by zero yields `NaN`
/// rather than an error, the same way a plain floating point division
/// would; a consumer comparing for freshness should use `is_nan`, not
/// pattern-match an `Err`.
pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    numerator / denominator
}

/// `minuend - subtrahend`, used e.g. to derive `CPU_CORE_TEMPERATURE` from
/// `TEMPERATURE_TARGET:PROCHOT_MIN - THERM_STATUS:DIGITAL_READOUT`
/// (spec.md §8's worked temperature example).
pub fn difference(minuend: f64, subtrahend: f64) -> f64 {
    minuend - subtrahend
}

/// Least-squares derivative over a trailing window of samples.
pub struct Derivative {
    window: CircularBuffer,
}

impl Derivative {
    pub fn new() -> Self {
        Derivative { window: CircularBuffer::new(CircularBuffer::DEFAULT_WINDOW) }
    }

    pub fn with_window(capacity: usize) -> Self {
        Derivative { window: CircularBuffer::new(capacity) }
    }

    pub fn push(&mut self, time: f64, value: f64) {
        self.window.push(time, value);
    }

    /// `NotReady` until at least two points with distinct timestamps have
    /// been pushed (spec.md §4.2: `NotReady` covers "a derivative needs
    /// more points").
    pub fn value(&self, name: &str) -> Result<f64> {
        self.window
            .least_squares_slope()
            .ok_or_else(|| Error::NotReady(name.to_string()))
    }
}

impl Default for Derivative {
    fn default() -> Self {
        Derivative::new()
    }
}

/// Running trapezoidal-rule integral of a signal over time (spec.md §4.5:
/// "Time integral via trapezoidal rule").
pub struct TimeIntegral {
    accumulated: f64,
    last: Option<(f64, f64)>,
}

impl TimeIntegral {
    pub fn new() -> Self {
        TimeIntegral { accumulated: 0.0, last: None }
    }

    pub fn push(&mut self, time: f64, value: f64) {
        if let Some((last_time, last_value)) = self.last {
            self.accumulated += (value + last_value) / 2.0 * (time - last_time);
        }
        self.last = Some((time, value));
    }

    pub fn value(&self) -> f64 {
        self.accumulated
    }
}

impl Default for TimeIntegral {
    fn default() -> Self {
        TimeIntegral::new()
    }
}

/// Combines per-domain-index values into one coarser-domain value per
/// spec.md §4.5/§4.6's aggregation policy. `ExpectSame` degrades to `NaN` on
/// disagreement rather than failing the whole sample (spec.md §4.5, verbatim:
/// "expect_same returns the common value or NaN if disagreement").
pub fn aggregate(name: &str, values: &[f64], kind: Aggregation) -> Result<f64> {
    if values.is_empty() {
        return Err(Error::Logic(format!("{name}: aggregation over zero values")));
    }
    Ok(match kind {
        Aggregation::Sum => values.iter().sum(),
        Aggregation::Average => values.iter().sum::<f64>() / values.len() as f64,
        Aggregation::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
        Aggregation::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        Aggregation::Median => median(values),
        Aggregation::Stddev => stddev(values),
        Aggregation::SelectFirst => values[0],
        Aggregation::ExpectSame => {
            let first = values[0];
            if values.iter().any(|v| v != &first) {
                f64::NAN
            } else {
                first
            }
        }
        Aggregation::LogicalAnd => {
            if values.iter().all(|&v| v != 0.0) {
                1.0
            } else {
                0.0
            }
        }
        Aggregation::LogicalOr => {
            if values.iter().any(|&v| v != 0.0) {
                1.0
            } else {
                0.0
            }
        }
        Aggregation::RegionHash | Aggregation::RegionHint => mode(values),
    })
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Most frequent raw value, ties broken by first occurrence: the natural
/// aggregation for categorical codes like a region hash/hint, where
/// arithmetic mean/median would produce a meaningless in-between code.
fn mode(values: &[f64]) -> f64 {
    let mut best = values[0];
    let mut best_count = 0usize;
    for &candidate in values {
        let count = values.iter().filter(|&&v| v == candidate).count();
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_div_by_zero_is_nan() {
        assert!(ratio(1.0, 0.0).is_nan());
    }

    #[test]
    fn difference_is_simple_subtraction() {
        // spec worked example: PROCHOT_MIN 98 minus DIGITAL_READOUT 66 = 32
        assert_eq!(difference(98.0, 66.0), 32.0);
    }

    #[test]
    fn derivative_is_not_ready_with_one_point() {
        let mut d = Derivative::new();
        d.push(0.0, 1.0);
        assert!(matches!(d.value("x"), Err(Error::NotReady(_))));
    }

    #[test]
    fn time_integral_of_a_constant_rate_over_one_second() {
        let mut integral = TimeIntegral::new();
        integral.push(0.0, 10.0);
        integral.push(1.0, 10.0);
        assert_eq!(integral.value(), 10.0);
    }

    #[test]
    fn aggregate_statistics_match_worked_example() {
        // spec worked example: {0.0, 1.0} -> mean 0.5, std sqrt(2)/2
        let values = [0.0, 1.0];
        assert_eq!(aggregate("x", &values, Aggregation::Average).unwrap(), 0.5);
        let std = aggregate("x", &values, Aggregation::Stddev).unwrap();
        assert!((std - std::f64::consts::SQRT_2 / 2.0).abs() < 1e-9);
    }

    #[test]
    fn expect_same_is_nan_on_disagreement() {
        assert!(aggregate("x", &[1.0, 2.0], Aggregation::ExpectSame).unwrap().is_nan());
        assert_eq!(aggregate("x", &[3.0, 3.0], Aggregation::ExpectSame).unwrap(), 3.0);
    }

    #[test]
    fn derivative_pushed_through_platform_io_handle() {
        use crate::platform_io::PlatformIo;
        use crate::topo::{Domain, Topology};

        let mut pio = PlatformIo::with_topology(Topology::from_raw(1, &[0], &[0]));
        let h = pio.push_signal("TIME::DERIVATIVE", Domain::Board, 0).unwrap();
        pio.read_batch().unwrap();
        assert!(matches!(pio.sample(h), Err(Error::NotReady(_))));
        std::thread::sleep(std::time::Duration::from_millis(5));
        pio.read_batch().unwrap();
        let slope = pio.sample(h).unwrap();
        assert!(slope.is_finite());
    }
}
