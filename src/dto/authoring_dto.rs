use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::answer::Answer;
use crate::models::attempt::Attempt;
use crate::models::question::{Question, QuestionOption};
use crate::models::quiz::Quiz;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateQuizPayload {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    pub description: Option<String>,
    pub instructions: Option<String>,
    #[validate(range(min = 1, max = 600))]
    pub duration_minutes: i32,
    #[validate(range(min = 0.0, max = 100.0))]
    pub pass_percentage: Option<f64>,
    #[validate(range(min = 1))]
    pub max_attempts: Option<i32>,
    pub shuffle_questions: Option<bool>,
    pub shuffle_answers: Option<bool>,
    pub show_correct_answers: Option<bool>,
    pub show_score_immediately: Option<bool>,
    pub available_from: Option<DateTime<Utc>>,
    pub available_until: Option<DateTime<Utc>>,
    pub group_id: Option<Uuid>,
}

/// Absent fields keep their current value; the nullable fields
/// (availability bounds, group) clear back to NULL on an explicit null.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateQuizPayload {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    pub description: Option<String>,
    pub instructions: Option<String>,
    #[validate(range(min = 1, max = 600))]
    pub duration_minutes: Option<i32>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub pass_percentage: Option<f64>,
    #[validate(range(min = 1))]
    pub max_attempts: Option<i32>,
    pub shuffle_questions: Option<bool>,
    pub shuffle_answers: Option<bool>,
    pub show_correct_answers: Option<bool>,
    pub show_score_immediately: Option<bool>,
    #[serde(default, deserialize_with = "nullable_field")]
    pub available_from: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "nullable_field")]
    pub available_until: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "nullable_field")]
    pub group_id: Option<Option<Uuid>>,
}

/// Distinguishes an absent field (outer None) from an explicit null
/// (Some(None)).
fn nullable_field<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: serde::Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListQuizzesQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub is_published: Option<bool>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaginatedQuizzes {
    #[serde(rename = "items")]
    pub quizzes: Vec<Quiz>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateQuestionPayload {
    #[validate(length(min = 1))]
    pub question_text: String,
    /// multiple_choice | true_false | short_answer | essay
    pub question_type: String,
    #[validate(range(min = 0.01))]
    pub marks: f64,
    pub explanation: Option<String>,
    #[validate(nested)]
    pub options: Option<Vec<CreateOptionPayload>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateQuestionPayload {
    #[validate(length(min = 1))]
    pub question_text: Option<String>,
    #[validate(range(min = 0.01))]
    pub marks: Option<f64>,
    pub explanation: Option<String>,
    /// Replaces the full option set when present.
    #[validate(nested)]
    pub options: Option<Vec<CreateOptionPayload>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOptionPayload {
    #[validate(length(min = 1))]
    pub option_text: String,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReorderQuestionsPayload {
    pub ordered_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionWithOptions {
    #[serde(flatten)]
    pub question: Question,
    pub options: Vec<QuestionOption>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuizDetailResponse {
    #[serde(flatten)]
    pub quiz: Quiz,
    pub questions: Vec<QuestionWithOptions>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GradeAnswerPayload {
    #[validate(range(min = 0.0))]
    pub marks_obtained: f64,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingAnswer {
    #[serde(flatten)]
    pub answer: Answer,
    pub student_id: Uuid,
    pub question_text: String,
    pub question_type: String,
    pub question_marks: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListAttemptsQuery {
    pub status: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PaginatedAttempts {
    #[serde(rename = "items")]
    pub attempts: Vec<Attempt>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}
