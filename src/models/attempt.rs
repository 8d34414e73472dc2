use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Attempt {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub student_id: Uuid,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub score: Option<Decimal>,
    pub percentage: Option<Decimal>,
    pub is_passed: Option<bool>,
    pub time_taken_seconds: Option<i32>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Attempt {
    pub fn lifecycle(&self) -> Option<AttemptStatus> {
        self.status.parse().ok()
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == AttemptStatus::InProgress.as_str()
    }
}

/// in_progress -> {completed, timed_out, abandoned} -> graded.
/// `graded` is reachable only from completed/timed_out after the last
/// manual answer receives a grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    InProgress,
    Completed,
    TimedOut,
    Abandoned,
    Graded,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Completed => "completed",
            AttemptStatus::TimedOut => "timed_out",
            AttemptStatus::Abandoned => "abandoned",
            AttemptStatus::Graded => "graded",
        }
    }

    /// Whether manual grading may still patch this attempt's answers.
    pub fn accepts_grading(&self) -> bool {
        matches!(self, AttemptStatus::Completed | AttemptStatus::TimedOut)
    }
}

impl std::str::FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(AttemptStatus::InProgress),
            "completed" => Ok(AttemptStatus::Completed),
            "timed_out" => Ok(AttemptStatus::TimedOut),
            "abandoned" => Ok(AttemptStatus::Abandoned),
            "graded" => Ok(AttemptStatus::Graded),
            other => Err(format!("unknown attempt status: {}", other)),
        }
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
