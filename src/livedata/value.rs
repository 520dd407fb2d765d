//! LiveData values
//!
//! On the wire every value is a signed 32.32 fixed-point number: the upper 32 bits
//! hold the integer part (two's complement, floored for negatives), the lower 32 bits
//! the fraction. Only values in the `i32` range with a magnitude of at least 2^-32
//! (or exactly zero) are representable.

use super::{LiveDataValueType, SignalKind};
use crate::{DeviceError, Result};

const FIXED_POINT_ONE: f64 = 4_294_967_296.0; // 2^32
const FIXED_POINT_EPSILON: f64 = 1.0 / FIXED_POINT_ONE;

/// Scale a raw 32.32 value to `f64`.
pub fn fixed_point_to_f64(raw: i64) -> f64 {
    raw as f64 * FIXED_POINT_EPSILON
}

/// Convert an `f64` to raw 32.32, rejecting values that would overflow or round to zero.
pub fn f64_to_fixed_point(value: f64) -> Result<i64> {
    if value == 0.0 {
        return Ok(0);
    }
    if !value.is_finite() {
        return Err(DeviceError::configuration(format!("{} is not a finite LiveData value", value)));
    }

    let int_max = i32::MAX as f64 + (1.0 - f64::EPSILON);
    let int_min = i32::MIN as f64;
    if value > int_max || value < int_min {
        return Err(DeviceError::configuration(format!(
            "LiveData value {} overflows 32.32 fixed point",
            value
        )));
    }
    if value.abs() < FIXED_POINT_EPSILON {
        return Err(DeviceError::configuration(format!(
            "LiveData value {} is below 32.32 fixed-point precision",
            value
        )));
    }

    let int_part = value.floor();
    let frac = ((value - int_part) * FIXED_POINT_ONE + 0.5).floor();
    // A fraction that rounds up to 1.0 carries into the integer part.
    (int_part as i64)
        .checked_mul(1i64 << 32)
        .and_then(|whole| whole.checked_add(frac as i64))
        .ok_or_else(|| {
            let reason = format!("LiveData value {} overflows 32.32 fixed point", value);
            DeviceError::configuration(reason)
        })
}

/// A single value as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LiveDataValue {
    /// Raw 32.32 fixed-point
    pub raw: i64,
}

impl LiveDataValue {
    pub fn from_raw(raw: i64) -> Self {
        Self { raw }
    }

    pub fn from_f64(value: f64) -> Result<Self> {
        f64_to_fixed_point(value).map(Self::from_raw)
    }

    pub fn to_f64(self) -> f64 {
        fixed_point_to_f64(self.raw)
    }

    /// Interpret the raw value as the given signal.
    ///
    /// Returns `None` when the raw bits are not a valid encoding for that signal
    /// (a boolean that is neither 0 nor 1, an integer with a fractional part).
    pub fn typed(self, value_type: LiveDataValueType) -> Option<SignalValue> {
        let int_part = self.raw >> 32;
        let has_fraction = self.raw & 0xFFFF_FFFF != 0;
        match value_type.kind() {
            SignalKind::Double => Some(SignalValue::Double(self.to_f64())),
            SignalKind::Integer if !has_fraction => Some(SignalValue::Integer(int_part)),
            SignalKind::Boolean if !has_fraction && (int_part == 0 || int_part == 1) => {
                Some(SignalValue::Boolean(int_part == 1))
            }
            _ => None,
        }
    }
}

/// Typed view of a LiveData value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalValue {
    Double(f64),
    Integer(i64),
    Boolean(bool),
}

impl SignalValue {
    /// Lossless conversion to `f64`.
    ///
    /// Integers beyond 2^53 have no exact `f64` representation and yield `None`.
    pub fn to_f64(self) -> Option<f64> {
        const EXACT: i64 = 1 << 53;
        match self {
            SignalValue::Double(v) => Some(v),
            SignalValue::Integer(v) if (-EXACT..=EXACT).contains(&v) => Some(v as f64),
            SignalValue::Integer(_) => None,
            SignalValue::Boolean(v) => Some(if v { 1.0 } else { 0.0 }),
        }
    }

    /// Build the typed value for a signal from an `f64`.
    pub fn from_f64(value_type: LiveDataValueType, value: f64) -> Option<Self> {
        match value_type.kind() {
            SignalKind::Double => Some(SignalValue::Double(value)),
            SignalKind::Integer if value.fract() == 0.0 && value.is_finite() => {
                Some(SignalValue::Integer(value as i64))
            }
            SignalKind::Boolean if value == 0.0 || value == 1.0 => {
                Some(SignalValue::Boolean(value == 1.0))
            }
            _ => None,
        }
    }

    pub fn to_wire(self) -> Result<LiveDataValue> {
        match self {
            SignalValue::Double(v) => LiveDataValue::from_f64(v),
            SignalValue::Integer(v) => {
                let int = i32::try_from(v).map_err(|_| {
                    DeviceError::configuration(format!("LiveData integer {} overflows 32 bits", v))
                })?;
                Ok(LiveDataValue::from_raw((int as i64) << 32))
            }
            SignalValue::Boolean(v) => Ok(LiveDataValue::from_raw((v as i64) << 32)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_is_representable() {
        assert_eq!(f64_to_fixed_point(0.0).unwrap(), 0);
        assert_eq!(f64_to_fixed_point(-0.0).unwrap(), 0);
    }

    #[test]
    fn known_values() {
        assert_eq!(f64_to_fixed_point(1.0).unwrap(), 1 << 32);
        assert_eq!(f64_to_fixed_point(0.5).unwrap(), 1 << 31);
        assert_eq!(f64_to_fixed_point(-1.5).unwrap(), -(3i64 << 31));
        assert_eq!(fixed_point_to_f64(-(3i64 << 31)), -1.5);
    }

    #[test]
    fn overflow_and_precision_fail() {
        assert!(f64_to_fixed_point(2_147_483_648.0).is_err());
        assert!(f64_to_fixed_point(-2_147_483_649.0).is_err());
        assert!(f64_to_fixed_point(1e-12).is_err());
        assert!(f64_to_fixed_point(-1e-12).is_err());
        assert!(f64_to_fixed_point(f64::NAN).is_err());
    }

    #[test]
    fn typed_rejects_malformed_booleans() {
        let half = LiveDataValue::from_f64(0.5).unwrap();
        assert_eq!(half.typed(LiveDataValueType::GpsValid), None);
        assert_eq!(half.typed(LiveDataValueType::GpsTime), None);
        let two = LiveDataValue::from_raw(2 << 32);
        assert_eq!(two.typed(LiveDataValueType::DaqEnable), None);
        let one = LiveDataValue::from_raw(1 << 32);
        assert_eq!(one.typed(LiveDataValueType::DaqEnable), Some(SignalValue::Boolean(true)));
    }

    #[test]
    fn signal_value_wire_round_trip() {
        let v = SignalValue::Integer(1_700_000_000);
        let wire = v.to_wire().unwrap();
        assert_eq!(wire.typed(LiveDataValueType::GpsTime), Some(v));
        assert!(SignalValue::Integer(1 << 40).to_wire().is_err());
        assert_eq!(SignalValue::Integer(1 << 60).to_f64(), None);
        assert_eq!(SignalValue::Boolean(true).to_f64(), Some(1.0));
    }

    proptest! {
        #[test]
        fn fixed_point_error_is_bounded(value in -2_147_483_647.0f64..2_147_483_647.0) {
            prop_assume!(value == 0.0 || value.abs() >= FIXED_POINT_EPSILON);
            let raw = f64_to_fixed_point(value).unwrap();
            let back = fixed_point_to_f64(raw);
            // Half an LSB of rounding plus f64 precision at this magnitude.
            let tolerance = FIXED_POINT_EPSILON + value.abs() * f64::EPSILON * 4.0;
            prop_assert!((back - value).abs() <= tolerance, "{} -> {} -> {}", value, raw, back);
        }

        #[test]
        fn integers_convert_exactly(value in i32::MIN..=i32::MAX) {
            let wire = SignalValue::Integer(value as i64).to_wire().unwrap();
            prop_assert_eq!(wire.to_f64(), value as f64);
        }

        #[test]
        fn raw_values_scale_linearly(raw in any::<i64>()) {
            let scaled = fixed_point_to_f64(raw);
            let expected = raw as f64 / FIXED_POINT_ONE;
            prop_assert!((scaled - expected).abs() <= scaled.abs() * f64::EPSILON);
        }
    }
}
