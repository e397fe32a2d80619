use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::schemas::progress::selected_index;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultStatus {
    #[serde(alias = "in_progress", alias = "inProgress")]
    InProgress,
    Failed,
    Passed,
}

impl ResultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in-progress",
            Self::Failed => "failed",
            Self::Passed => "passed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptAnswer {
    pub question_id: String,
    #[serde(rename = "selectedOptionIndex", default, with = "selected_index")]
    pub selected: Option<usize>,
    #[serde(default)]
    pub is_correct: bool,
}

/// A recorded, immutable try at the exam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub score: f64,
    pub passed: bool,
    #[serde(with = "time::serde::rfc3339", alias = "date")]
    pub completed_at: OffsetDateTime,
    #[serde(default)]
    pub answers: Vec<AttemptAnswer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    pub score: f64,
    #[serde(alias = "totalScore")]
    pub total_points: f64,
    pub passed: bool,
    pub status: ResultStatus,
    #[serde(default)]
    pub attempts: Vec<Attempt>,
}

impl SubmissionResult {
    /// "Try again" is offered for every outcome except a pass.
    pub fn allows_retry(&self) -> bool {
        self.status != ResultStatus::Passed
    }

    pub fn percentage(&self) -> f64 {
        if self.total_points <= 0.0 {
            return 0.0;
        }
        (self.score / self.total_points * 100.0).clamp(0.0, 100.0)
    }

    pub fn latest_attempt(&self) -> Option<&Attempt> {
        self.attempts.iter().max_by_key(|attempt| attempt.completed_at)
    }
}
