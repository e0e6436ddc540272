//! Server configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::aggregators::AggregationType;
use crate::error::SecAggError;
use crate::fixedpoint::FixedPointConfig;

fn default_server_lr() -> f64 {
    1.0
}

/// Configuration for a [`SecAggServer`](super::SecAggServer).
///
/// Deserializes from e.g.
///
/// ```json
/// {
///   "fixedpoint": { "num_bytes": 2, "scaling_factor": 100.0 },
///   "parameter_fixedpoint": { "fc2.bias": { "num_bytes": 4, "scaling_factor": 1000.0 } },
///   "aggregation_type": "weighted_average",
///   "server_lr": 1.0
/// }
/// ```
///
/// Only `fixedpoint` is required.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SecAggServerConfig {
    /// Fixed-point representation shared by all parameters.
    pub fixedpoint: FixedPointConfig,
    /// Per-parameter replacements for `fixedpoint`.
    #[serde(default)]
    pub parameter_fixedpoint: BTreeMap<String, FixedPointConfig>,
    /// How client updates are combined.
    #[serde(default)]
    pub aggregation_type: AggregationType,
    /// Scale applied to the aggregate when it is subtracted from the global model.
    #[serde(default = "default_server_lr")]
    pub server_lr: f64,
}

impl SecAggServerConfig {
    /// Weighted-average configuration with a unit server learning rate.
    pub fn new(fixedpoint: FixedPointConfig) -> Self {
        Self {
            fixedpoint,
            parameter_fixedpoint: BTreeMap::new(),
            aggregation_type: AggregationType::default(),
            server_lr: default_server_lr(),
        }
    }

    /// Use a different aggregation type.
    pub fn with_aggregation_type(mut self, aggregation_type: AggregationType) -> Self {
        self.aggregation_type = aggregation_type;
        self
    }

    /// Use a different server learning rate.
    pub fn with_server_lr(mut self, server_lr: f64) -> Self {
        self.server_lr = server_lr;
        self
    }

    /// Give one parameter its own fixed-point representation.
    pub fn with_parameter_fixedpoint(
        mut self,
        name: impl Into<String>,
        fixedpoint: FixedPointConfig,
    ) -> Self {
        self.parameter_fixedpoint.insert(name.into(), fixedpoint);
        self
    }

    /// Validate every fixed-point config and the learning rate.
    pub fn validate(&self) -> Result<(), SecAggError> {
        self.fixedpoint.validate()?;
        for config in self.parameter_fixedpoint.values() {
            config.validate()?;
        }
        if !self.server_lr.is_finite() || self.server_lr <= 0.0 {
            return Err(SecAggError::Config(format!(
                "server_lr must be finite and positive, got {}",
                self.server_lr
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_json() {
        let config: SecAggServerConfig =
            serde_json::from_str(r#"{"fixedpoint": {"num_bytes": 2, "scaling_factor": 100.0}}"#)
                .unwrap();
        assert_eq!(config.aggregation_type, AggregationType::WeightedAverage);
        assert_eq!(config.server_lr, 1.0);
        assert!(config.parameter_fixedpoint.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_json() {
        let config: SecAggServerConfig = serde_json::from_str(
            r#"{
                "fixedpoint": {"num_bytes": 1, "scaling_factor": 10.0},
                "parameter_fixedpoint": {"fc2.bias": {"num_bytes": 4, "scaling_factor": 1000.0}},
                "aggregation_type": "sum",
                "server_lr": 0.5
            }"#,
        )
        .unwrap();
        assert_eq!(config.aggregation_type, AggregationType::Sum);
        assert_eq!(config.parameter_fixedpoint["fc2.bias"].num_bytes, 4);
        assert_eq!(config.server_lr, 0.5);
    }

    #[test]
    fn test_validate_rejects_bad_override() {
        let config = SecAggServerConfig::new(FixedPointConfig::new(2, 10.0).unwrap())
            .with_parameter_fixedpoint(
                "w",
                FixedPointConfig {
                    num_bytes: 0,
                    scaling_factor: 10.0,
                },
            );
        assert!(matches!(config.validate(), Err(SecAggError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_lr() {
        let base = SecAggServerConfig::new(FixedPointConfig::new(2, 10.0).unwrap());
        assert!(base.clone().with_server_lr(0.0).validate().is_err());
        assert!(base.with_server_lr(f64::NAN).validate().is_err());
    }
}
