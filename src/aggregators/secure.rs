//! Quantized modular accumulation with overflow accounting.
//!
//! Each trainable parameter gets a [`ParameterSlot`] holding an integer
//! accumulator of the parameter's shape. Client contributions are weighted,
//! quantized by the slot's [`FixedPointCodec`] (saturating), and then added
//! with wraparound at the modulus `Q`.
//!
//! # Wraparound convention
//!
//! Every element stores a residue in `(-Q, Q)` and a signed wrap index, so
//! that its running sum is `S = wrap_index * Q + residue`, with the residue
//! sharing the sign of `S`. After each addition the pair is re-derived from
//! `S` by truncated division. The slot's overflow count changes by
//! `|wrap_index'| - |wrap_index|`.
//!
//! Unlike a floored modulus, which keeps every accumulator in `[0, Q)`,
//! negative sums keep their sign here, so decoding yields a signed
//! aggregate (e.g. `-249` decodes to `-2.49`, not `(Q - 249) / scale`).
//!
//! The state after a round is a function of the sum of addends alone, so
//! accumulators and overflow counts do not depend on the order of
//! [`SecureAggregator::update`] calls. For non-negative sums this reduces to
//! `residue = S mod Q` and `overflows = floor(S / Q)`.

use std::collections::BTreeMap;

use ndarray::{ArrayD, ArrayViewD, IxDyn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::SecAggError;
use crate::fixedpoint::{FixedPointCodec, FixedPointConfig};
use crate::model::ParameterSpec;

/// Accumulation state for one named parameter.
#[derive(Clone, Debug)]
pub struct ParameterSlot {
    name: String,
    codec: FixedPointCodec,
    accumulator: ArrayD<i64>,
    wrap_index: ArrayD<i64>,
    overflow_count: i64,
    convert_overflow_count: u64,
}

impl ParameterSlot {
    fn new(spec: &ParameterSpec, codec: FixedPointCodec) -> Self {
        Self {
            name: spec.name.clone(),
            codec,
            accumulator: ArrayD::zeros(IxDyn(&spec.shape)),
            wrap_index: ArrayD::zeros(IxDyn(&spec.shape)),
            overflow_count: 0,
            convert_overflow_count: 0,
        }
    }

    /// Parameter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter shape.
    pub fn shape(&self) -> &[usize] {
        self.accumulator.shape()
    }

    /// Codec used to quantize contributions to this parameter.
    pub fn codec(&self) -> &FixedPointCodec {
        &self.codec
    }

    /// Per-element residues in `(-Q, Q)`.
    pub fn accumulator(&self) -> &ArrayD<i64> {
        &self.accumulator
    }

    /// Aggregate overflow count across all elements.
    pub fn overflow_count(&self) -> i64 {
        self.overflow_count
    }

    /// Number of element contributions clipped at quantization time.
    pub fn convert_overflow_count(&self) -> u64 {
        self.convert_overflow_count
    }

    fn reset_accumulator(&mut self) {
        self.accumulator.fill(0);
        self.wrap_index.fill(0);
    }
}

/// Add `addend` into one element and return the change in its overflow count.
fn wrapping_combine(residue: &mut i64, wrap_index: &mut i64, addend: i64, modulus: i128) -> i64 {
    let total = *wrap_index as i128 * modulus + *residue as i128 + addend as i128;
    let new_wrap = total / modulus;
    let delta = new_wrap.abs() - (*wrap_index as i128).abs();
    *residue = (total % modulus) as i64;
    *wrap_index = new_wrap as i64;
    delta as i64
}

/// Conversion and aggregation overflow rates for a reporting window.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverflowStats {
    /// Percentage of quantized contributions that saturated.
    pub convert_overflow_pct: f64,
    /// Aggregate overflows as a percentage of contributed elements.
    pub aggregate_overflow_pct: f64,
}

/// Fixed-point secure aggregator over a fixed set of named parameters.
///
/// # Example
///
/// ```rust
/// use secagg_fl::aggregators::SecureAggregator;
/// use secagg_fl::fixedpoint::FixedPointConfig;
/// use secagg_fl::model::ParameterSpec;
/// use ndarray::{ArrayD, IxDyn};
///
/// let specs = vec![ParameterSpec { name: "w".to_string(), shape: vec![3] }];
/// let mut agg = SecureAggregator::build(&specs, FixedPointConfig::new(1, 10.0).unwrap()).unwrap();
///
/// let update = ArrayD::from_elem(IxDyn(&[3]), 2.8);
/// for _ in 0..10 {
///     agg.update("w", update.view(), 1.0).unwrap();
/// }
///
/// // 10 * 28 = 280 = 2 * 128 + 24
/// assert_eq!(agg.accumulator("w").unwrap()[[0]], 24);
/// assert_eq!(agg.get_aggregate_overflow(true), 6);
/// assert_eq!(agg.get_aggregate_overflow(false), 0);
/// ```
#[derive(Clone, Debug)]
pub struct SecureAggregator {
    slots: Vec<ParameterSlot>,
    index: BTreeMap<String, usize>,
}

impl SecureAggregator {
    /// Create one zeroed slot per parameter, all sharing `config`.
    pub fn build(
        parameters: &[ParameterSpec],
        config: FixedPointConfig,
    ) -> Result<Self, SecAggError> {
        Self::build_with_overrides(parameters, config, &BTreeMap::new())
    }

    /// Create one zeroed slot per parameter, using `overrides[name]` instead
    /// of `config` where present.
    pub fn build_with_overrides(
        parameters: &[ParameterSpec],
        config: FixedPointConfig,
        overrides: &BTreeMap<String, FixedPointConfig>,
    ) -> Result<Self, SecAggError> {
        let default_codec = FixedPointCodec::new(config)?;

        let mut slots = Vec::with_capacity(parameters.len());
        let mut index = BTreeMap::new();
        for spec in parameters {
            let codec = match overrides.get(&spec.name) {
                Some(c) => FixedPointCodec::new(*c)?,
                None => default_codec,
            };
            if index.insert(spec.name.clone(), slots.len()).is_some() {
                return Err(SecAggError::SchemaMismatch {
                    name: spec.name.clone(),
                    reason: "duplicate parameter".to_string(),
                });
            }
            slots.push(ParameterSlot::new(spec, codec));
        }

        if let Some(name) = overrides.keys().find(|n| !index.contains_key(*n)) {
            return Err(SecAggError::unknown_parameter(name));
        }

        Ok(Self { slots, index })
    }

    fn slot_position(&self, name: &str) -> Result<usize, SecAggError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| SecAggError::unknown_parameter(name))
    }

    /// Check that `name` is known and has the given shape.
    pub fn check_schema(&self, name: &str, shape: &[usize]) -> Result<(), SecAggError> {
        let slot = &self.slots[self.slot_position(name)?];
        if slot.shape() != shape {
            return Err(SecAggError::shape_mismatch(name, slot.shape(), shape));
        }
        Ok(())
    }

    /// Quantize `values * weight` and add it into the named accumulator.
    ///
    /// The weight is applied before rounding. Returns the change in the
    /// slot's overflow count caused by this call.
    pub fn update(
        &mut self,
        name: &str,
        values: ArrayViewD<'_, f64>,
        weight: f64,
    ) -> Result<i64, SecAggError> {
        self.check_schema(name, values.shape())?;
        let pos = self.slot_position(name)?;
        let slot = &mut self.slots[pos];

        let codec = slot.codec;
        let modulus = codec.modulus();
        let addends: Vec<(i64, bool)> = values
            .iter()
            .map(|&v| codec.encode_with_clip(v * weight))
            .collect();

        let residues = slot
            .accumulator
            .as_slice_mut()
            .ok_or_else(|| SecAggError::ShapeError("accumulator is not contiguous".to_string()))?;
        let wraps = slot
            .wrap_index
            .as_slice_mut()
            .ok_or_else(|| SecAggError::ShapeError("wrap index is not contiguous".to_string()))?;

        let (delta, clipped) = residues
            .par_iter_mut()
            .zip(wraps.par_iter_mut())
            .zip(addends.par_iter())
            .map(|((residue, wrap), &(addend, was_clipped))| {
                let delta = wrapping_combine(residue, wrap, addend, modulus);
                (delta, u64::from(was_clipped))
            })
            .reduce(|| (0, 0), |a, b| (a.0 + b.0, a.1 + b.1));

        slot.overflow_count += delta;
        slot.convert_overflow_count += clipped;

        if delta != 0 || clipped != 0 {
            debug!(
                parameter = name,
                overflow_delta = delta,
                clipped,
                "fixed-point overflow during update"
            );
        }
        Ok(delta)
    }

    /// Decode the named accumulator back to real values.
    pub fn decode(&self, name: &str) -> Result<ArrayD<f64>, SecAggError> {
        let slot = &self.slots[self.slot_position(name)?];
        let codec = slot.codec;
        Ok(slot.accumulator.mapv(|v| codec.decode(v)))
    }

    /// Total overflow count across all slots.
    pub fn aggregate_overflow(&self) -> i64 {
        self.slots.iter().map(|s| s.overflow_count).sum()
    }

    /// Total overflow count across all slots, zeroing the counters if `reset`.
    pub fn get_aggregate_overflow(&mut self, reset: bool) -> i64 {
        let total = self.aggregate_overflow();
        if reset {
            for slot in &mut self.slots {
                slot.overflow_count = 0;
            }
        }
        total
    }

    /// Total clipped contributions across all slots, zeroing the counters if `reset`.
    pub fn get_convert_overflow(&mut self, reset: bool) -> u64 {
        let total = self.slots.iter().map(|s| s.convert_overflow_count).sum();
        if reset {
            for slot in &mut self.slots {
                slot.convert_overflow_count = 0;
            }
        }
        total
    }

    /// Report both overflow rates relative to `users_per_round` contributions
    /// per element, then reset both counters.
    pub fn calc_avg_overflow_percentage(
        &mut self,
        users_per_round: usize,
    ) -> Result<OverflowStats, SecAggError> {
        if users_per_round == 0 {
            return Err(SecAggError::InvalidArgument(
                "users_per_round must be positive".to_string(),
            ));
        }
        let contributions = self.num_elements() as f64 * users_per_round as f64;
        let convert = self.get_convert_overflow(true) as f64;
        let aggregate = self.get_aggregate_overflow(true) as f64;

        let stats = if contributions == 0.0 {
            OverflowStats {
                convert_overflow_pct: 0.0,
                aggregate_overflow_pct: 0.0,
            }
        } else {
            OverflowStats {
                convert_overflow_pct: convert * 100.0 / contributions,
                aggregate_overflow_pct: aggregate * 100.0 / contributions,
            }
        };

        info!(
            convert_overflow_pct = stats.convert_overflow_pct,
            aggregate_overflow_pct = stats.aggregate_overflow_pct,
            "secure aggregation overflow report"
        );
        Ok(stats)
    }

    /// Zero every accumulator. Overflow counters are left untouched.
    pub fn reset_accumulators(&mut self) {
        for slot in &mut self.slots {
            slot.reset_accumulator();
        }
    }

    /// Slot for a parameter, if known.
    pub fn slot(&self, name: &str) -> Option<&ParameterSlot> {
        self.index.get(name).map(|&i| &self.slots[i])
    }

    /// All slots in construction order.
    pub fn slots(&self) -> &[ParameterSlot] {
        &self.slots
    }

    /// Codec used for a parameter, if known.
    pub fn converter(&self, name: &str) -> Option<&FixedPointCodec> {
        self.slot(name).map(|s| &s.codec)
    }

    /// Raw residues of a parameter, if known.
    pub fn accumulator(&self, name: &str) -> Option<&ArrayD<i64>> {
        self.slot(name).map(|s| &s.accumulator)
    }

    /// Parameter names in construction order.
    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|s| s.name.as_str())
    }

    /// Number of parameter slots.
    pub fn num_parameters(&self) -> usize {
        self.slots.len()
    }

    /// Total scalar elements across all slots.
    pub fn num_elements(&self) -> usize {
        self.slots.iter().map(|s| s.accumulator.len()).sum()
    }
}
