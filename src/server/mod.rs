//! Synchronous secure-aggregation server.
//!
//! [`SecAggServer`] sequences one round at a time:
//!
//! ```text
//! Idle --init_round--> Active --receive_update_from_client*--> Active --step--> Idle
//! ```
//!
//! Calling [`SecAggServer::init_round`] while a round is active discards the
//! partial accumulation and starts over.

pub mod config;

pub use config::SecAggServerConfig;

use ndarray::ArrayD;
use tracing::{debug, info, trace};

use crate::aggregators::SecureAggregator;
use crate::audit::{AuditLog, RoundAuditEntry};
use crate::error::SecAggError;
use crate::model::{ParameterSpec, ParameterStore};

/// Round lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundState {
    /// No round in progress
    Idle,
    /// Collecting client updates
    Active,
}

/// Server that folds fixed-point client updates into a global model.
///
/// # Example
///
/// ```rust
/// use secagg_fl::fixedpoint::FixedPointConfig;
/// use secagg_fl::model::{NamedParameters, ParameterStore};
/// use secagg_fl::server::{SecAggServer, SecAggServerConfig};
///
/// let mut global = NamedParameters::new();
/// global.insert_filled("w", &[2], 1.0).unwrap();
///
/// let config = SecAggServerConfig::new(FixedPointConfig::new(2, 100.0).unwrap());
/// let mut server = SecAggServer::new(config, global).unwrap();
///
/// let mut delta = NamedParameters::new();
/// delta.insert_filled("w", &[2], 0.25).unwrap();
///
/// server.init_round();
/// server.receive_update_from_client(&delta, 1.0).unwrap();
/// server.receive_update_from_client(&delta, 3.0).unwrap();
/// server.step().unwrap();
///
/// assert_eq!(server.global_model().parameter("w").unwrap()[[0]], 0.75);
/// ```
pub struct SecAggServer<M: ParameterStore> {
    config: SecAggServerConfig,
    global_model: M,
    secure_aggregator: SecureAggregator,
    state: RoundState,
    round_weight_sum: f64,
    round_clients: usize,
    round: usize,
    audit: AuditLog,
}

impl<M: ParameterStore> SecAggServer<M> {
    /// Build a server around `global_model`, creating one aggregation slot
    /// per trainable parameter.
    pub fn new(config: SecAggServerConfig, global_model: M) -> Result<Self, SecAggError> {
        config.validate()?;
        let parameters = global_model.trainable_parameters();
        let secure_aggregator = SecureAggregator::build_with_overrides(
            &parameters,
            config.fixedpoint,
            &config.parameter_fixedpoint,
        )?;

        debug!(
            parameters = secure_aggregator.num_parameters(),
            elements = parameters.iter().map(ParameterSpec::numel).sum::<usize>(),
            num_bytes = config.fixedpoint.num_bytes,
            scaling_factor = config.fixedpoint.scaling_factor,
            "secure aggregation server created"
        );

        Ok(Self {
            config,
            global_model,
            secure_aggregator,
            state: RoundState::Idle,
            round_weight_sum: 0.0,
            round_clients: 0,
            round: 0,
            audit: AuditLog::new(),
        })
    }

    fn require_active(&self, operation: &'static str) -> Result<(), SecAggError> {
        match self.state {
            RoundState::Active => Ok(()),
            RoundState::Idle => Err(SecAggError::IllegalState { operation }),
        }
    }

    /// Start a round: zero accumulators and the weight sum.
    pub fn init_round(&mut self) {
        if self.state == RoundState::Active {
            debug!(
                round = self.round,
                clients = self.round_clients,
                "discarding partial round"
            );
        }
        self.secure_aggregator.reset_accumulators();
        self.round_weight_sum = 0.0;
        self.round_clients = 0;
        self.state = RoundState::Active;
        debug!(round = self.round, "round started");
    }

    /// Quantize and accumulate one client's update.
    ///
    /// Every trainable tensor in `update` must match a known parameter by
    /// name and shape. Nothing is accumulated unless the whole update checks
    /// out.
    pub fn receive_update_from_client<U>(
        &mut self,
        update: &U,
        weight: f64,
    ) -> Result<(), SecAggError>
    where
        U: ParameterStore + ?Sized,
    {
        self.require_active("receive_update_from_client")?;
        if !weight.is_finite() || weight <= 0.0 {
            return Err(SecAggError::InvalidArgument(format!(
                "client weight must be finite and positive, got {}",
                weight
            )));
        }

        let specs = update.trainable_parameters();
        let mut views = Vec::with_capacity(specs.len());
        for spec in &specs {
            let view = update
                .parameter(&spec.name)
                .ok_or_else(|| SecAggError::unknown_parameter(&spec.name))?;
            self.secure_aggregator.check_schema(&spec.name, view.shape())?;
            views.push((spec.name.as_str(), view));
        }

        let effective_weight = self.config.aggregation_type.effective_weight(weight);
        for (name, view) in views {
            self.secure_aggregator.update(name, view, effective_weight)?;
        }
        self.round_weight_sum += effective_weight;
        self.round_clients += 1;

        trace!(
            round = self.round,
            weight = effective_weight,
            weight_sum = self.round_weight_sum,
            "client update accumulated"
        );
        Ok(())
    }

    /// Finalize the round: subtract the decoded aggregate from every global
    /// parameter and return to [`RoundState::Idle`].
    ///
    /// Overflow counters are not reset. If any check fails, no global
    /// parameter is modified.
    pub fn step(&mut self) -> Result<(), SecAggError> {
        self.require_active("step")?;
        if self.round_weight_sum <= 0.0 {
            return Err(SecAggError::Precondition(
                "step requires a positive accumulated client weight".to_string(),
            ));
        }

        let divisor = if self.config.aggregation_type.is_average() {
            self.round_weight_sum
        } else {
            1.0
        };

        let mut aggregates: Vec<(String, ArrayD<f64>)> =
            Vec::with_capacity(self.secure_aggregator.num_parameters());
        for name in self.secure_aggregator.parameter_names() {
            let aggregate = self.secure_aggregator.decode(name)? / divisor;
            let global = self
                .global_model
                .parameter(name)
                .ok_or_else(|| SecAggError::unknown_parameter(name))?;
            if global.shape() != aggregate.shape() {
                return Err(SecAggError::shape_mismatch(
                    name,
                    aggregate.shape(),
                    global.shape(),
                ));
            }
            aggregates.push((name.to_string(), aggregate));
        }

        let lr = self.config.server_lr;
        for (name, aggregate) in &aggregates {
            let mut global = self
                .global_model
                .parameter_mut(name)
                .ok_or_else(|| SecAggError::unknown_parameter(name))?;
            global.zip_mut_with(aggregate, |g, &a| *g -= lr * a);
        }

        let entry = RoundAuditEntry {
            round: self.round,
            n_clients: self.round_clients,
            weight_sum: self.round_weight_sum,
            aggregation_type: self.config.aggregation_type,
            aggregate_overflow: self.secure_aggregator.aggregate_overflow(),
            convert_overflow: self
                .secure_aggregator
                .slots()
                .iter()
                .map(|s| s.convert_overflow_count())
                .sum(),
        };
        info!(
            round = entry.round,
            clients = entry.n_clients,
            weight_sum = entry.weight_sum,
            aggregate_overflow = entry.aggregate_overflow,
            "round finalized"
        );
        self.audit.push(entry);

        self.state = RoundState::Idle;
        self.round += 1;
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RoundState {
        self.state
    }

    /// Sum of effective client weights in the current round.
    pub fn round_weight_sum(&self) -> f64 {
        self.round_weight_sum
    }

    /// Number of client updates accepted in the current round.
    pub fn num_clients_in_round(&self) -> usize {
        self.round_clients
    }

    /// Number of rounds finalized so far.
    pub fn rounds_completed(&self) -> usize {
        self.round
    }

    /// Server configuration.
    pub fn config(&self) -> &SecAggServerConfig {
        &self.config
    }

    /// The secure aggregator (accumulators and overflow counters).
    pub fn secure_aggregator(&self) -> &SecureAggregator {
        &self.secure_aggregator
    }

    /// Mutable access to the secure aggregator, e.g. for
    /// [`SecureAggregator::get_aggregate_overflow`] with `reset = true`.
    pub fn secure_aggregator_mut(&mut self) -> &mut SecureAggregator {
        &mut self.secure_aggregator
    }

    /// The global model.
    pub fn global_model(&self) -> &M {
        &self.global_model
    }

    /// Mutable access to the global model, only between rounds.
    pub fn global_model_mut(&mut self) -> Result<&mut M, SecAggError> {
        match self.state {
            RoundState::Idle => Ok(&mut self.global_model),
            RoundState::Active => Err(SecAggError::IllegalState {
                operation: "global_model_mut",
            }),
        }
    }

    /// Per-round audit entries.
    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Consume the server and return the global model.
    pub fn into_global_model(self) -> M {
        self.global_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregators::AggregationType;
    use crate::fixedpoint::FixedPointConfig;
    use crate::model::NamedParameters;

    fn model(value: f64) -> NamedParameters {
        let mut params = NamedParameters::new();
        params.insert_filled("w", &[2, 2], value).unwrap();
        params.insert_filled("b", &[2], value).unwrap();
        params
    }

    fn server(value: f64, aggregation_type: AggregationType) -> SecAggServer<NamedParameters> {
        let config = SecAggServerConfig::new(FixedPointConfig::new(4, 100.0).unwrap())
            .with_aggregation_type(aggregation_type);
        SecAggServer::new(config, model(value)).unwrap()
    }

    fn value_of(server: &SecAggServer<NamedParameters>, name: &str) -> f64 {
        server.global_model().parameter(name).unwrap().iter().copied().next().unwrap()
    }

    #[test]
    fn test_lifecycle_states() {
        let mut s = server(0.0, AggregationType::WeightedAverage);
        assert_eq!(s.state(), RoundState::Idle);
        s.init_round();
        assert_eq!(s.state(), RoundState::Active);
        s.receive_update_from_client(&model(1.0), 1.0).unwrap();
        s.step().unwrap();
        assert_eq!(s.state(), RoundState::Idle);
        assert_eq!(s.rounds_completed(), 1);
    }

    #[test]
    fn test_receive_before_init_is_illegal() {
        let mut s = server(0.0, AggregationType::WeightedAverage);
        let err = s.receive_update_from_client(&model(1.0), 1.0).unwrap_err();
        assert_eq!(
            err,
            SecAggError::IllegalState {
                operation: "receive_update_from_client"
            }
        );
    }

    #[test]
    fn test_step_twice_is_illegal() {
        let mut s = server(0.0, AggregationType::WeightedAverage);
        s.init_round();
        s.receive_update_from_client(&model(1.0), 1.0).unwrap();
        s.step().unwrap();
        assert!(matches!(s.step(), Err(SecAggError::IllegalState { .. })));
    }

    #[test]
    fn test_invalid_weight() {
        let mut s = server(0.0, AggregationType::WeightedAverage);
        s.init_round();
        for w in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                s.receive_update_from_client(&model(1.0), w),
                Err(SecAggError::InvalidArgument(_))
            ));
        }
        assert_eq!(s.num_clients_in_round(), 0);
    }

    #[test]
    fn test_schema_mismatch_is_atomic() {
        let mut s = server(0.0, AggregationType::WeightedAverage);
        s.init_round();

        let mut bad = NamedParameters::new();
        bad.insert_filled("w", &[2, 2], 1.0).unwrap();
        bad.insert_filled("extra", &[1], 1.0).unwrap();
        assert!(matches!(
            s.receive_update_from_client(&bad, 1.0),
            Err(SecAggError::SchemaMismatch { .. })
        ));
        assert!(s
            .secure_aggregator()
            .accumulator("w")
            .unwrap()
            .iter()
            .all(|&v| v == 0));
        assert_eq!(s.round_weight_sum(), 0.0);
    }

    #[test]
    fn test_frozen_update_entries_ignored() {
        let mut s = server(0.0, AggregationType::WeightedAverage);
        s.init_round();
        let mut update = model(1.0);
        update.insert_frozen_filled("running_mean", &[3], 9.0).unwrap();
        s.receive_update_from_client(&update, 1.0).unwrap();
        s.step().unwrap();
        assert_eq!(value_of(&s, "w"), -1.0);
    }

    #[test]
    fn test_average_ignores_weight() {
        let mut s = server(0.0, AggregationType::Average);
        s.init_round();
        s.receive_update_from_client(&model(1.0), 1.0).unwrap();
        s.receive_update_from_client(&model(3.0), 100.0).unwrap();
        assert_eq!(s.round_weight_sum(), 2.0);
        s.step().unwrap();
        assert_eq!(value_of(&s, "w"), -2.0);
    }

    #[test]
    fn test_weighted_sum() {
        let mut s = server(10.0, AggregationType::WeightedSum);
        s.init_round();
        s.receive_update_from_client(&model(1.0), 2.0).unwrap();
        s.receive_update_from_client(&model(0.5), 4.0).unwrap();
        s.step().unwrap();
        assert_eq!(value_of(&s, "b"), 6.0);
    }

    #[test]
    fn test_sum() {
        let mut s = server(10.0, AggregationType::Sum);
        s.init_round();
        s.receive_update_from_client(&model(1.0), 2.0).unwrap();
        s.receive_update_from_client(&model(0.5), 4.0).unwrap();
        s.step().unwrap();
        assert_eq!(value_of(&s, "b"), 8.5);
    }

    #[test]
    fn test_server_lr_scales_step() {
        let config = SecAggServerConfig::new(FixedPointConfig::new(4, 100.0).unwrap())
            .with_server_lr(0.5);
        let mut s = SecAggServer::new(config, model(1.0)).unwrap();
        s.init_round();
        s.receive_update_from_client(&model(1.0), 1.0).unwrap();
        s.step().unwrap();
        assert_eq!(value_of(&s, "w"), 0.5);
    }

    #[test]
    fn test_global_model_mut_only_when_idle() {
        let mut s = server(0.0, AggregationType::WeightedAverage);
        assert!(s.global_model_mut().is_ok());
        s.init_round();
        assert!(matches!(
            s.global_model_mut(),
            Err(SecAggError::IllegalState { .. })
        ));
    }

    #[test]
    fn test_audit_entry_recorded() {
        let mut s = server(0.0, AggregationType::WeightedAverage);
        s.init_round();
        s.receive_update_from_client(&model(1.0), 2.0).unwrap();
        s.receive_update_from_client(&model(1.0), 3.0).unwrap();
        s.step().unwrap();

        let entry = s.audit_log().last().unwrap();
        assert_eq!(entry.round, 0);
        assert_eq!(entry.n_clients, 2);
        assert_eq!(entry.weight_sum, 5.0);
        assert_eq!(entry.aggregate_overflow, 0);
    }

    #[test]
    fn test_new_rejects_bad_config() {
        let config = SecAggServerConfig::new(FixedPointConfig::new(2, 10.0).unwrap())
            .with_parameter_fixedpoint("missing", FixedPointConfig::new(2, 10.0).unwrap());
        assert!(matches!(
            SecAggServer::new(config, model(0.0)),
            Err(SecAggError::SchemaMismatch { .. })
        ));
    }
}
