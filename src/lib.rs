//! # secagg-fl: Fixed-Point Secure Aggregation for Federated Learning
//!
//! Reproduces the bounded-integer arithmetic that a secret-sharing secure
//! aggregation protocol imposes on a federated-learning server, without the
//! cryptography. Each client update is quantized into a fixed-width integer,
//! summed with modular wraparound, and decoded only once per round.
//!
//! ## Components
//!
//! - [`FixedPointCodec`] - Saturating value ⇄ integer conversion
//! - [`SecureAggregator`] - Per-parameter modular accumulators with overflow accounting
//! - [`SecAggServer`] - Round state machine applying the aggregate to a global model
//!
//! ## Example
//!
//! ```rust
//! use secagg_fl::{FixedPointConfig, NamedParameters, SecAggServer, SecAggServerConfig};
//!
//! let mut global = NamedParameters::new();
//! global.insert_filled("fc.weight", &[5, 2], 6.0).unwrap();
//!
//! let config = SecAggServerConfig::new(FixedPointConfig::new(1, 10.0).unwrap());
//! let mut server = SecAggServer::new(config, global).unwrap();
//!
//! let mut client = NamedParameters::new();
//! client.insert_filled("fc.weight", &[5, 2], 2.8).unwrap();
//!
//! server.init_round();
//! for _ in 0..10 {
//!     server.receive_update_from_client(&client, 1.0).unwrap();
//! }
//! // 10 * 28 = 280 wraps twice at Q = 128 for each of the 10 elements
//! assert_eq!(server.secure_aggregator_mut().get_aggregate_overflow(false), 20);
//! server.step().unwrap();
//! ```

#![deny(missing_docs)]

pub mod aggregators;
pub mod audit;
pub mod error;
pub mod fixedpoint;
pub mod model;
pub mod server;

// Re-exports
pub use aggregators::{AggregationType, OverflowStats, ParameterSlot, SecureAggregator};
pub use audit::{AuditLog, RoundAuditEntry};
pub use error::SecAggError;
pub use fixedpoint::{FixedPointCodec, FixedPointConfig};
pub use model::{NamedParameters, ParameterSpec, ParameterStore};
pub use server::{RoundState, SecAggServer, SecAggServerConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
