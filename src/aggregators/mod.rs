//! Aggregation of quantized client updates.
//!
//! | Type | Client weight | Divisor at `step` |
//! |------|---------------|-------------------|
//! | [`AggregationType::WeightedAverage`] | folded in before quantization | sum of weights |
//! | [`AggregationType::Average`] | ignored (1.0) | number of clients |
//! | [`AggregationType::WeightedSum`] | folded in before quantization | 1 |
//! | [`AggregationType::Sum`] | ignored (1.0) | 1 |

pub mod secure;

pub use secure::{OverflowStats, ParameterSlot, SecureAggregator};

use serde::{Deserialize, Serialize};

/// How client updates are combined into the global step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationType {
    /// Weighted mean of client updates (default)
    #[default]
    WeightedAverage,
    /// Unweighted mean of client updates
    Average,
    /// Weighted sum of client updates
    WeightedSum,
    /// Unweighted sum of client updates
    Sum,
}

impl AggregationType {
    /// Whether the client weight scales the update before quantization.
    pub fn is_weighted(self) -> bool {
        matches!(self, Self::WeightedAverage | Self::WeightedSum)
    }

    /// Whether the aggregate is divided by the accumulated weight.
    pub fn is_average(self) -> bool {
        matches!(self, Self::WeightedAverage | Self::Average)
    }

    /// Weight actually applied to a client's update.
    pub fn effective_weight(self, weight: f64) -> f64 {
        if self.is_weighted() {
            weight
        } else {
            1.0
        }
    }

    /// Stable name, as used in config files and audit entries.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WeightedAverage => "weighted_average",
            Self::Average => "average",
            Self::WeightedSum => "weighted_sum",
            Self::Sum => "sum",
        }
    }
}
