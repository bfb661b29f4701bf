//! Bit-field decode/encode functions for model-specific registers
//! (spec.md §4.3, §6). Grounded on `original_source/service/test/
//! MSRFieldControlTest.cpp`, which exercises the same seven decode
//! functions named in spec.md §4.3 against a `begin_bit..=end_bit` field.

use crate::descriptor::{Aggregation, Behavior, Units};
use crate::error::{Error, Result};

/// One of the seven decode functions named in spec.md §4.3.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Function {
    /// `scale(s * x)`
    Scale,
    /// `log_half(2^-x)`
    LogHalf,
    /// `seven_bit_float(mantissa+exponent)`
    SevenBitFloat,
    /// Overflow-aware difference from the previous decode of this field.
    Overflow,
    /// Non-zero raw maps to `1.0`, zero maps to `0.0`.
    Logical,
    /// Raw integer code, cast without scaling (categorical/label signals).
    Select,
    /// Raw integer scaled by `scalar` with no other transform.
    Identity,
}

/// A bit-field view over one MSR: offset, inclusive bit range, decode
/// function, SI scalar, and (for controls) a write mask and encode inverse.
#[derive(Clone, Debug)]
pub struct FieldDef {
    pub offset: u64,
    pub begin_bit: u8,
    pub end_bit: u8,
    pub function: Function,
    pub scalar: f64,
    pub units: Units,
    pub behavior: Behavior,
    pub aggregation: Aggregation,
    pub writable: bool,
    pub description: String,
}

impl FieldDef {
    pub fn width(&self) -> u8 {
        self.end_bit - self.begin_bit + 1
    }

    pub fn mask(&self) -> u64 {
        field_mask(self.begin_bit, self.end_bit)
    }

    /// Extracts this field's raw bits from a full register value.
    pub fn extract(&self, register: u64) -> u64 {
        (register & self.mask()) >> self.begin_bit
    }

    /// Decodes this field's raw bits into an SI-unit value. `prev_raw` is
    /// the field's previous raw reading, used only by [`Function::Overflow`].
    pub fn decode(&self, raw_field: u64, prev_raw: Option<u64>) -> f64 {
        match self.function {
            Function::Scale => raw_field as f64 * self.scalar,
            Function::LogHalf => self.scalar * 2f64.powi(-(raw_field as i32)),
            Function::SevenBitFloat => decode_seven_bit_float(raw_field, self.scalar),
            Function::Overflow => {
                let width = self.width();
                let span = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
                let prev = prev_raw.unwrap_or(raw_field);
                (raw_field.wrapping_sub(prev) & span) as f64 * self.scalar
            }
            Function::Logical => {
                if raw_field != 0 {
                    1.0
                } else {
                    0.0
                }
            }
            Function::Select => raw_field as f64,
            Function::Identity => raw_field as f64 * self.scalar,
        }
    }

    /// Encodes an SI-unit value back into this field's raw bit pattern.
    /// Fails with [`Error::Unsupported`] for `Overflow`/`Logical`/`Select`,
    /// which have no well-defined single-value inverse for writing.
    pub fn encode(&self, value: f64) -> Result<u64> {
        let raw_field = match self.function {
            Function::Scale | Function::Identity => (value / self.scalar).round() as i64,
            Function::LogHalf => {
                if value <= 0.0 {
                    return Err(Error::Logic(
                        "input value <= 0 for log_half function".into(),
                    ));
                }
                (-(value / self.scalar).log2()).round() as i64
            }
            Function::SevenBitFloat => {
                if value <= 0.0 {
                    return Err(Error::Logic(
                        "input value <= 0 for seven_bit_float function".into(),
                    ));
                }
                return encode_seven_bit_float(value, self.scalar);
            }
            Function::Overflow | Function::Logical | Function::Select => {
                return Err(Error::Unsupported(format!(
                    "{:?} fields are not directly writable",
                    self.function
                )))
            }
        };
        if raw_field < 0 || raw_field as u64 > field_max(self.width()) {
            return Err(Error::Logic(format!(
                "encoded value {raw_field} does not fit in a {}-bit field",
                self.width()
            )));
        }
        Ok(raw_field as u64)
    }
}

fn field_mask(begin_bit: u8, end_bit: u8) -> u64 {
    let width = end_bit - begin_bit + 1;
    let span = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
    span << begin_bit
}

fn field_max(width: u8) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// 7-bit float: high 3 bits are a mantissa in `[0, 8)`, low 4 bits an
/// exponent in `[0, 16)`; `value = scalar * (1 + mantissa/4) * 2^exponent`.
fn decode_seven_bit_float(raw: u64, scalar: f64) -> f64 {
    let exponent = (raw & 0xF) as i32;
    let mantissa = ((raw >> 4) & 0x7) as f64;
    scalar * (1.0 + mantissa / 4.0) * 2f64.powi(exponent)
}

fn encode_seven_bit_float(value: f64, scalar: f64) -> Result<u64> {
    let target = value / scalar;
    let mut best = (0u64, f64::INFINITY);
    for exponent in 0..16i32 {
        for mantissa in 0..8u64 {
            let candidate = (1.0 + mantissa as f64 / 4.0) * 2f64.powi(exponent);
            let diff = (candidate - target).abs();
            if diff < best.1 {
                best = (((mantissa << 4) | exponent as u64), diff);
            }
        }
    }
    Ok(best.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(function: Function, scalar: f64, begin_bit: u8, end_bit: u8) -> FieldDef {
        FieldDef {
            offset: 0xABC,
            begin_bit,
            end_bit,
            function,
            scalar,
            units: Units::None,
            behavior: Behavior::Variable,
            aggregation: Aggregation::Sum,
            writable: true,
            description: String::new(),
        }
    }

    #[test]
    fn scale_decode_and_encode_round_trip() {
        let f = field(Function::Scale, 1.5, 16, 23);
        // encode(150.0) -> raw 100 (0x64) in bits 16..23 -> register 0x640000
        assert_eq!(f.encode(150.0).unwrap(), 0x64);
        let register = f.encode(150.0).unwrap() << f.begin_bit;
        assert_eq!(register, 0x640000);
        assert_eq!(f.decode(f.extract(register), None), 150.0);
    }

    #[test]
    fn log_half_decode_and_encode_round_trip() {
        let f = field(Function::LogHalf, 1.0, 16, 23);
        assert_eq!(f.encode(0.25).unwrap(), 2);
        assert_eq!(f.decode(2, None), 0.25);
    }

    #[test]
    fn seven_bit_float_round_trips_and_rejects_non_positive() {
        let f = field(Function::SevenBitFloat, 1.0, 0, 6);
        let raw = f.encode(12.0).unwrap();
        let decoded = f.decode(raw, None);
        assert!((decoded - 12.0).abs() < 1e-9);
        assert!(f.encode(0.0).is_err());
    }

    #[test]
    fn overflow_wraps_around_field_width() {
        let f = field(Function::Overflow, 1.0, 0, 7); // 8-bit counter
        // counter went from 250 to 4: wrapped by (256 - 250) + 4 = 10
        assert_eq!(f.decode(4, Some(250)), 10.0);
    }

    #[test]
    fn logical_is_boolean() {
        let f = field(Function::Logical, 1.0, 0, 0);
        assert_eq!(f.decode(0, None), 0.0);
        assert_eq!(f.decode(1, None), 1.0);
    }

    #[test]
    fn write_mask_preservation() {
        let f = field(Function::Scale, 1.5, 16, 23);
        let old_register: u64 = 0xFFFF_FFFF;
        let encoded = f.encode(150.0).unwrap();
        let new_register = (old_register & !f.mask()) | ((encoded << f.begin_bit) & f.mask());
        assert_eq!(new_register & f.mask(), 0x640000);
        assert_eq!(new_register & !f.mask(), old_register & !f.mask());
    }
}
