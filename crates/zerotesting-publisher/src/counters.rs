//! Aggregate outcome counters for one injection.

use serde::{Deserialize, Serialize};

/// Outcome of one dispatched message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    /// HTTP 200.
    Delivered { latency_ms: f64 },
    /// Any other HTTP status.
    Rejected { status: u16, latency_ms: f64 },
    /// Resolution or transport failure.
    Unreachable,
}

/// `{success, failure, total}` plus a split of failures.
///
/// `success + failure == total` and `failure == rejected + unreachable` hold
/// after every [`TrafficCounters::record`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficCounters {
    pub success: u64,
    pub failure: u64,
    pub total: u64,
    pub rejected: u64,
    pub unreachable: u64,
}

impl TrafficCounters {
    pub fn record(&mut self, outcome: &Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Delivered { .. } => self.success += 1,
            Outcome::Rejected { .. } => {
                self.failure += 1;
                self.rejected += 1;
            }
            Outcome::Unreachable => {
                self.failure += 1;
                self.unreachable += 1;
            }
        }
    }

    /// `success / total`, 0 before anything was recorded.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.success as f64 / self.total as f64
        }
    }

    /// Success rate as a percentage with two decimals, e.g. `50.00%`.
    pub fn success_rate_display(&self) -> String {
        format!("{:.2}%", self.success_rate() * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_stay_consistent() {
        let mut c = TrafficCounters::default();
        c.record(&Outcome::Delivered { latency_ms: 3.0 });
        c.record(&Outcome::Rejected {
            status: 500,
            latency_ms: 1.0,
        });
        c.record(&Outcome::Unreachable);

        assert_eq!(c.success + c.failure, c.total);
        assert_eq!(c.rejected + c.unreachable, c.failure);
        assert_eq!(c.total, 3);
        assert_eq!(c.success_rate_display(), "33.33%");
    }

    #[test]
    fn test_empty_rate_is_zero() {
        assert_eq!(TrafficCounters::default().success_rate_display(), "0.00%");
    }
}
