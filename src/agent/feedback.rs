//! Operator feedback on past decisions

use crate::history::RingBuffer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const FEEDBACK_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Feedback {
    pub correct: bool,
    pub false_positive: bool,
    pub false_negative: bool,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackOutcome {
    Success,
    FalsePositive,
    FalseNegative,
    /// Recorded but counted nowhere
    Neutral,
}

impl Feedback {
    /// `correct` wins over the error flags
    pub fn outcome(&self) -> FeedbackOutcome {
        if self.correct {
            FeedbackOutcome::Success
        } else if self.false_positive {
            FeedbackOutcome::FalsePositive
        } else if self.false_negative {
            FeedbackOutcome::FalseNegative
        } else {
            FeedbackOutcome::Neutral
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackEntry {
    pub decision_id: String,
    pub feedback: Feedback,
    pub timestamp: DateTime<Utc>,
}

pub struct FeedbackLog {
    entries: RingBuffer<FeedbackEntry>,
}

impl Default for FeedbackLog {
    fn default() -> Self {
        Self::new(FEEDBACK_CAPACITY)
    }
}

impl FeedbackLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RingBuffer::new(capacity),
        }
    }

    pub fn record(&mut self, decision_id: &str, feedback: Feedback) -> FeedbackOutcome {
        let outcome = feedback.outcome();
        self.entries.push(FeedbackEntry {
            decision_id: decision_id.to_string(),
            feedback,
            timestamp: Utc::now(),
        });
        outcome
    }

    pub fn recent(&self, limit: usize) -> Vec<FeedbackEntry> {
        self.entries.recent(limit)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
