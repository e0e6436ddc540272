//! Fixed-point quantization for simulated secure aggregation.
//!
//! - [`FixedPointConfig`] - validated width/scale pair
//! - [`codec`] - value ⇄ integer conversion ([`FixedPointCodec`])

pub mod codec;

pub use codec::FixedPointCodec;

use serde::{Deserialize, Serialize};

use crate::error::SecAggError;

/// Widest supported integer representation, in bytes.
pub const MAX_WIDTH_BYTES: u32 = 8;

/// Width and scale of a fixed-point integer representation.
///
/// A value `v` is represented as `round(v * scaling_factor)`, saturated to
/// `[-max_magnitude, max_magnitude]` where `max_magnitude = 2^(8*num_bytes - 1) - 1`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FixedPointConfig {
    /// Byte width of the integer representation (1..=8).
    pub num_bytes: u32,
    /// Multiplier applied before rounding (must be finite and positive).
    pub scaling_factor: f64,
}

impl FixedPointConfig {
    /// Create a validated configuration.
    pub fn new(num_bytes: u32, scaling_factor: f64) -> Result<Self, SecAggError> {
        let config = Self {
            num_bytes,
            scaling_factor,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration yields a usable modulus and scale.
    pub fn validate(&self) -> Result<(), SecAggError> {
        if self.num_bytes == 0 {
            return Err(SecAggError::Config(
                "num_bytes = 0 yields modulus Q <= 1".to_string(),
            ));
        }
        if self.num_bytes > MAX_WIDTH_BYTES {
            return Err(SecAggError::Config(format!(
                "num_bytes = {} exceeds the maximum width of {} bytes",
                self.num_bytes, MAX_WIDTH_BYTES
            )));
        }
        if !self.scaling_factor.is_finite() || self.scaling_factor <= 0.0 {
            return Err(SecAggError::Config(format!(
                "scaling_factor must be finite and positive, got {}",
                self.scaling_factor
            )));
        }
        Ok(())
    }

    /// Total bits of the integer representation.
    pub fn bit_width(&self) -> u32 {
        8 * self.num_bytes
    }

    /// Bits available for the magnitude (one bit is reserved for sign).
    pub fn magnitude_bits(&self) -> u32 {
        self.bit_width().saturating_sub(1)
    }

    /// Accumulator modulus `Q = 2^magnitude_bits`.
    pub fn modulus(&self) -> i128 {
        1i128 << self.magnitude_bits()
    }

    /// Largest encodable magnitude, `Q - 1`.
    pub fn max_magnitude(&self) -> i64 {
        (self.modulus() - 1) as i64
    }
}
