use crate::dto::authoring_dto::{GradeAnswerPayload, PendingAnswer};
use crate::error::{Error, Result};
use crate::models::answer::Answer;
use crate::models::attempt::{Attempt, AttemptStatus};
use crate::models::question::Question;
use crate::models::quiz::Quiz;
use crate::services::scoring;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Clone)]
pub struct GradingService {
    pool: PgPool,
}

#[derive(Debug, FromRow)]
struct PendingRow {
    #[sqlx(flatten)]
    answer: Answer,
    student_id: Uuid,
    question_text: String,
    question_type: String,
    question_marks: Decimal,
}

impl GradingService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Manual-grading queue for one quiz: ungraded short_answer/essay answers
    /// on settled attempts.
    pub async fn pending_grading(&self, quiz_id: Uuid) -> Result<Vec<PendingAnswer>> {
        let rows = sqlx::query_as::<_, PendingRow>(
            r#"
            SELECT ans.*, a.student_id, q.question_text, q.question_type,
                   q.marks AS question_marks
            FROM answers ans
            JOIN attempts a ON ans.attempt_id = a.id
            JOIN questions q ON ans.question_id = q.id
            WHERE a.quiz_id = $1
              AND q.question_type IN ('short_answer', 'essay')
              AND ans.is_correct IS NULL
              AND a.status IN ('completed', 'timed_out')
            ORDER BY a.started_at, q.order_index
            "#,
        )
        .bind(quiz_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| PendingAnswer {
                answer: row.answer,
                student_id: row.student_id,
                question_text: row.question_text,
                question_type: row.question_type,
                question_marks: row.question_marks,
            })
            .collect())
    }

    pub async fn get_answer(&self, answer_id: Uuid) -> Result<Answer> {
        let answer = sqlx::query_as::<_, Answer>(r#"SELECT * FROM answers WHERE id = $1"#)
            .bind(answer_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(answer)
    }

    /// Records a manual grade and re-aggregates the owning attempt. When the
    /// last pending manual answer is graded the attempt settles as graded.
    pub async fn grade_answer(
        &self,
        answer: &Answer,
        payload: GradeAnswerPayload,
    ) -> Result<(Attempt, Answer)> {
        let question =
            sqlx::query_as::<_, Question>(r#"SELECT * FROM questions WHERE id = $1"#)
                .bind(answer.question_id)
                .fetch_one(&self.pool)
                .await?;
        if question.is_auto_gradable() {
            return Err(Error::InvalidState(
                "Auto-graded answers are immutable after submission".to_string(),
            ));
        }

        let marks = Decimal::from_f64(payload.marks_obtained)
            .ok_or_else(|| Error::Validation("Invalid marks value".to_string()))?;
        if marks < Decimal::ZERO || marks > question.marks {
            return Err(Error::Validation(format!(
                "Marks must be between 0 and {}",
                question.marks
            )));
        }

        let mut tx = self.pool.begin().await?;
        let attempt = sqlx::query_as::<_, Attempt>(
            r#"SELECT * FROM attempts WHERE id = $1 FOR UPDATE"#,
        )
        .bind(answer.attempt_id)
        .fetch_one(&mut *tx)
        .await?;
        let accepts = attempt
            .lifecycle()
            .map(|s| s.accepts_grading())
            .unwrap_or(false);
        if !accepts {
            return Err(Error::InvalidState(format!(
                "Attempt is {} and cannot be graded",
                attempt.status
            )));
        }

        let graded = sqlx::query_as::<_, Answer>(
            r#"
            UPDATE answers
            SET is_correct = $1, marks_obtained = $2, updated_at = NOW()
            WHERE id = $3
            RETURNING *
            "#,
        )
        .bind(payload.is_correct)
        .bind(marks)
        .bind(answer.id)
        .fetch_one(&mut *tx)
        .await?;

        let quiz = sqlx::query_as::<_, Quiz>(r#"SELECT * FROM quizzes WHERE id = $1"#)
            .bind(attempt.quiz_id)
            .fetch_one(&mut *tx)
            .await?;
        let score_sum: Decimal = sqlx::query_scalar(
            r#"SELECT COALESCE(SUM(marks_obtained), 0) FROM answers WHERE attempt_id = $1"#,
        )
        .bind(attempt.id)
        .fetch_one(&mut *tx)
        .await?;
        let aggregate = scoring::aggregate(score_sum, quiz.total_marks, quiz.pass_percentage);

        let still_pending: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM answers ans
            JOIN questions q ON ans.question_id = q.id
            WHERE ans.attempt_id = $1
              AND q.question_type IN ('short_answer', 'essay')
              AND ans.is_correct IS NULL
            "#,
        )
        .bind(attempt.id)
        .fetch_one(&mut *tx)
        .await?;
        let status = if still_pending == 0 {
            AttemptStatus::Graded.as_str()
        } else {
            attempt.status.as_str()
        };

        let updated = sqlx::query_as::<_, Attempt>(
            r#"
            UPDATE attempts
            SET status = $1, score = $2, percentage = $3, is_passed = $4, updated_at = NOW()
            WHERE id = $5
            RETURNING *
            "#,
        )
        .bind(status)
        .bind(aggregate.score)
        .bind(aggregate.percentage)
        .bind(aggregate.is_passed)
        .bind(attempt.id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!(
            answer_id = %graded.id,
            attempt_id = %updated.id,
            status = %updated.status,
            "answer graded"
        );
        Ok((updated, graded))
    }
}
