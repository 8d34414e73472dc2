use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One answer per (attempt, question); resubmission within the same attempt
/// upserts. `is_correct` stays NULL for text questions until a teacher grades
/// them.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Answer {
    pub id: Uuid,
    pub attempt_id: Uuid,
    pub question_id: Uuid,
    pub selected_option_id: Option<Uuid>,
    pub answer_text: Option<String>,
    pub is_correct: Option<bool>,
    pub marks_obtained: Decimal,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}
