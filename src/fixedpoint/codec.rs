//! Stateless value ⇄ integer conversion for one fixed-point configuration.
//!
//! Encoding multiplies by the scaling factor, rounds half-to-even, then
//! saturates to `±max_magnitude`. The per-client step never wraps; wraparound
//! only happens later, in the aggregator's accumulator.

use super::FixedPointConfig;
use crate::error::SecAggError;

/// Immutable fixed-point converter built from a validated [`FixedPointConfig`].
///
/// # Example
///
/// ```rust
/// use secagg_fl::fixedpoint::{FixedPointCodec, FixedPointConfig};
///
/// let codec = FixedPointCodec::new(FixedPointConfig::new(1, 100.0).unwrap()).unwrap();
/// assert_eq!(codec.encode(0.2), 20);
/// assert_eq!(codec.encode(2.123), 127); // saturated
/// assert_eq!(codec.decode(20), 0.2);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FixedPointCodec {
    config: FixedPointConfig,
    max_magnitude: i64,
}

impl FixedPointCodec {
    /// Build a codec, rejecting configurations with `Q <= 1` or a bad scale.
    pub fn new(config: FixedPointConfig) -> Result<Self, SecAggError> {
        config.validate()?;
        Ok(Self {
            config,
            max_magnitude: config.max_magnitude(),
        })
    }

    /// The configuration this codec was built from.
    pub fn config(&self) -> &FixedPointConfig {
        &self.config
    }

    /// Scaling factor applied before rounding.
    pub fn scaling_factor(&self) -> f64 {
        self.config.scaling_factor
    }

    /// Largest encodable magnitude.
    pub fn max_magnitude(&self) -> i64 {
        self.max_magnitude
    }

    /// Accumulator modulus `Q`.
    pub fn modulus(&self) -> i128 {
        self.config.modulus()
    }

    /// Encode a value, saturating out-of-range results.
    pub fn encode(&self, value: f64) -> i64 {
        self.encode_with_clip(value).0
    }

    /// Encode a value and report whether it had to be clipped.
    ///
    /// NaN encodes to 0 and counts as clipped. Infinities saturate.
    pub fn encode_with_clip(&self, value: f64) -> (i64, bool) {
        let scaled = (value * self.config.scaling_factor).round_ties_even();
        if scaled.is_nan() {
            return (0, true);
        }

        // f64 -> i128 saturates and is exact over the whole i64 range.
        let rounded = scaled as i128;
        let max = self.max_magnitude as i128;
        if rounded > max {
            (self.max_magnitude, true)
        } else if rounded < -max {
            (-self.max_magnitude, true)
        } else {
            (rounded as i64, false)
        }
    }

    /// Decode an integer back to a real value.
    pub fn decode(&self, value: i64) -> f64 {
        value as f64 / self.config.scaling_factor
    }
}
