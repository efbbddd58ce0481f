//! Agent counters and smoothed averages

use serde::Serialize;

/// Weight of the newest sample in the moving averages
pub const SMOOTHING: f64 = 0.1;

#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentMetrics {
    pub total_events_processed: u64,
    pub total_decisions_made: u64,
    pub total_commands_executed: u64,
    pub successful_responses: u64,
    pub failed_responses: u64,
    pub false_positives: u64,
    pub false_negatives: u64,
    pub average_response_time_secs: f64,
    pub average_confidence: f64,
    pub uptime_hours: f64,
    /// Derived from the counters, filled in by [`AgentMetrics::snapshot`]
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
}

fn smooth(old: f64, sample: f64) -> f64 {
    SMOOTHING * sample + (1.0 - SMOOTHING) * old
}

impl AgentMetrics {
    /// Count a processed event; the first sample seeds the average
    pub fn record_event(&mut self, response_secs: f64) {
        self.average_response_time_secs = if self.total_events_processed == 0 {
            response_secs
        } else {
            smooth(self.average_response_time_secs, response_secs)
        };
        self.total_events_processed += 1;
    }

    pub fn record_decision(&mut self, confidence: f64) {
        self.average_confidence = if self.total_decisions_made == 0 {
            confidence
        } else {
            smooth(self.average_confidence, confidence)
        };
        self.total_decisions_made += 1;
    }

    /// Copy with the derived ratios filled in
    pub fn snapshot(&self) -> Self {
        Self {
            accuracy: self.accuracy(),
            precision: self.precision(),
            recall: self.recall(),
            ..self.clone()
        }
    }

    pub fn accuracy(&self) -> f64 {
        ratio(
            self.successful_responses,
            self.successful_responses + self.false_positives + self.false_negatives,
        )
    }

    pub fn precision(&self) -> f64 {
        ratio(self.successful_responses, self.successful_responses + self.false_positives)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.successful_responses, self.successful_responses + self.false_negatives)
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_seeds_average() {
        let mut m = AgentMetrics::default();
        m.record_event(2.0);
        assert_eq!(m.average_response_time_secs, 2.0);
        m.record_event(12.0);
        assert!((m.average_response_time_secs - 3.0).abs() < 1e-9);
        assert_eq!(m.total_events_processed, 2);

        m.record_decision(0.8);
        m.record_decision(0.9);
        assert!((m.average_confidence - 0.81).abs() < 1e-9);
    }

    #[test]
    fn test_ratios_zero_guarded() {
        let mut m = AgentMetrics::default();
        assert_eq!(m.accuracy(), 0.0);
        assert_eq!(m.precision(), 0.0);
        assert_eq!(m.recall(), 0.0);

        m.successful_responses = 6;
        m.false_positives = 2;
        m.false_negatives = 2;
        assert!((m.accuracy() - 0.6).abs() < 1e-9);
        assert!((m.precision() - 0.75).abs() < 1e-9);
        assert!((m.recall() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_carries_ratios() {
        let m = AgentMetrics {
            successful_responses: 3,
            false_positives: 1,
            ..Default::default()
        };
        let snap = m.snapshot();
        assert!((snap.accuracy - 0.75).abs() < 1e-9);
        assert!((snap.precision - 0.75).abs() < 1e-9);
        assert!((snap.recall - 1.0).abs() < 1e-9);
        assert_eq!(snap.successful_responses, 3);

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["precision"], 0.75);
    }
}
