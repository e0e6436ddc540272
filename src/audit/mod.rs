//! Round audit log for post-hoc analysis.
//!
//! Records one entry per finalized round so that overflow behaviour can be
//! inspected after a training run.

use serde::{Deserialize, Serialize};

use crate::aggregators::AggregationType;

/// Metadata for a single finalized round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundAuditEntry {
    /// Round number (0-indexed).
    pub round: usize,
    /// Number of client updates received.
    pub n_clients: usize,
    /// Sum of effective client weights.
    pub weight_sum: f64,
    /// Aggregation type used.
    pub aggregation_type: AggregationType,
    /// Aggregate overflow total at finalization (not reset by the round).
    pub aggregate_overflow: i64,
    /// Clipped-contribution total at finalization.
    pub convert_overflow: u64,
}

/// Append-only audit log of finalized rounds.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuditLog {
    entries: Vec<RoundAuditEntry>,
}

impl AuditLog {
    /// Create a new, empty audit log.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append an entry to the log.
    pub fn push(&mut self, entry: RoundAuditEntry) {
        self.entries.push(entry);
    }

    /// Get all entries.
    pub fn entries(&self) -> &[RoundAuditEntry] {
        &self.entries
    }

    /// Most recent entry.
    pub fn last(&self) -> Option<&RoundAuditEntry> {
        self.entries.last()
    }

    /// Number of recorded rounds.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(round: usize) -> RoundAuditEntry {
        RoundAuditEntry {
            round,
            n_clients: 10,
            weight_sum: 10.0,
            aggregation_type: AggregationType::WeightedAverage,
            aggregate_overflow: 42,
            convert_overflow: 0,
        }
    }

    #[test]
    fn test_audit_log_push_and_len() {
        let mut log = AuditLog::new();
        assert!(log.is_empty());

        log.push(entry(0));

        assert_eq!(log.len(), 1);
        assert!(!log.is_empty());
        assert_eq!(log.entries()[0].round, 0);
        assert_eq!(log.last().unwrap().n_clients, 10);
    }

    #[test]
    fn test_audit_log_serde() {
        let mut log = AuditLog::new();
        for i in 0..3 {
            log.push(entry(i));
        }
        let json = serde_json::to_string(&log).unwrap();
        let restored: AuditLog = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.len(), 3);
        assert_eq!(restored.entries()[2], entry(2));
    }
}
