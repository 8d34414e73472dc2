use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize)]
pub struct AvailableQuizSummary {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub duration_minutes: i32,
    pub total_marks: Decimal,
    pub pass_percentage: Decimal,
    pub max_attempts: i32,
    pub attempts_used: i64,
    pub available_from: Option<DateTime<Utc>>,
    pub available_until: Option<DateTime<Utc>>,
}

/// Lifecycle snapshot returned by every attempt operation. Scores are
/// withheld (None) until the quiz allows showing them.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptSnapshot {
    pub id: Uuid,
    pub status: String,
    pub score: Option<Decimal>,
    pub percentage: Option<Decimal>,
    pub is_passed: Option<bool>,
    pub time_remaining_seconds: i64,
}

/// Question as shown to an attempting student. Never carries is_correct or
/// the explanation; leaking either to a live attempt is a contract violation.
#[derive(Debug, Clone, Serialize)]
pub struct StudentQuestion {
    pub id: Uuid,
    pub question_text: String,
    pub question_type: String,
    pub marks: Decimal,
    pub position: usize,
    pub options: Vec<StudentOption>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentOption {
    pub id: Uuid,
    pub option_text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptView {
    pub attempt: AttemptSnapshot,
    pub quiz_title: String,
    pub instructions: Option<String>,
    pub questions: Vec<StudentQuestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SaveAnswerRequest {
    pub question_id: Uuid,
    pub selected_option_id: Option<Uuid>,
    pub answer_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmitAttemptRequest {
    #[validate(nested)]
    pub answers: Vec<SaveAnswerRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitAttemptResponse {
    #[serde(flatten)]
    pub snapshot: AttemptSnapshot,
    pub pending_manual_grading: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultAnswer {
    pub question_id: Uuid,
    pub question_text: String,
    pub question_type: String,
    pub marks: Decimal,
    pub selected_option_id: Option<Uuid>,
    pub answer_text: Option<String>,
    pub is_correct: Option<bool>,
    pub marks_obtained: Decimal,
    /// Present only when the quiz shows correct answers after completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_option_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptResultResponse {
    #[serde(flatten)]
    pub snapshot: AttemptSnapshot,
    pub answers: Vec<ResultAnswer>,
}
