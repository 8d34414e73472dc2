use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Question {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub question_text: String,
    pub question_type: String,
    pub marks: Decimal,
    pub order_index: i32,
    pub explanation: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Question {
    pub fn kind(&self) -> Option<QuestionType> {
        self.question_type.parse().ok()
    }

    pub fn is_auto_gradable(&self) -> bool {
        matches!(
            self.kind(),
            Some(QuestionType::MultipleChoice) | Some(QuestionType::TrueFalse)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QuestionOption {
    pub id: Uuid,
    pub question_id: Uuid,
    pub option_text: String,
    pub is_correct: bool,
    pub order_index: i32,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionType {
    MultipleChoice,
    TrueFalse,
    ShortAnswer,
    Essay,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::MultipleChoice => "multiple_choice",
            QuestionType::TrueFalse => "true_false",
            QuestionType::ShortAnswer => "short_answer",
            QuestionType::Essay => "essay",
        }
    }

    pub fn is_auto_gradable(&self) -> bool {
        matches!(self, QuestionType::MultipleChoice | QuestionType::TrueFalse)
    }
}

impl std::str::FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "multiple_choice" => Ok(QuestionType::MultipleChoice),
            "true_false" => Ok(QuestionType::TrueFalse),
            "short_answer" => Ok(QuestionType::ShortAnswer),
            "essay" => Ok(QuestionType::Essay),
            other => Err(format!("unknown question type: {}", other)),
        }
    }
}

impl std::fmt::Display for QuestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
