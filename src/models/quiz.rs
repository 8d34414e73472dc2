use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Quiz {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub instructions: Option<String>,
    pub duration_minutes: i32,
    pub total_marks: Decimal,
    pub pass_percentage: Decimal,
    pub max_attempts: i32,
    pub shuffle_questions: bool,
    pub shuffle_answers: bool,
    pub show_correct_answers: bool,
    pub show_score_immediately: bool,
    pub available_from: Option<DateTime<Utc>>,
    pub available_until: Option<DateTime<Utc>>,
    pub is_published: bool,
    pub is_active: bool,
    pub group_id: Option<Uuid>,
    pub created_by: Uuid,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Quiz {
    /// Availability window check consulted fresh on every attempt start.
    /// Both bounds are inclusive; a missing bound leaves that side open.
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        if !self.is_published || !self.is_active {
            return false;
        }
        if let Some(from) = self.available_from {
            if now < from {
                return false;
            }
        }
        if let Some(until) = self.available_until {
            if now > until {
                return false;
            }
        }
        true
    }

    pub fn duration_seconds(&self) -> i64 {
        self.duration_minutes as i64 * 60
    }
}
