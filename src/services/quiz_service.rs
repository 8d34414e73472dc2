use crate::dto::authoring_dto::{
    CreateQuizPayload, ListQuizzesQuery, PaginatedQuizzes, UpdateQuizPayload,
};
use crate::error::{Error, Result};
use crate::models::quiz::Quiz;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Clone)]
pub struct QuizService {
    pool: PgPool,
    /// Injected from config; applied when a quiz omits its pass threshold.
    default_pass_percentage: Decimal,
}

impl QuizService {
    pub fn new(pool: PgPool, default_pass_percentage: Decimal) -> Self {
        Self {
            pool,
            default_pass_percentage,
        }
    }

    pub async fn create_quiz(&self, payload: CreateQuizPayload, created_by: Uuid) -> Result<Quiz> {
        let pass_percentage = match payload.pass_percentage {
            Some(p) => Decimal::from_f64(p)
                .ok_or_else(|| Error::Validation("Invalid pass percentage".to_string()))?,
            None => self.default_pass_percentage,
        };

        if let (Some(from), Some(until)) = (payload.available_from, payload.available_until) {
            if until < from {
                return Err(Error::Validation(
                    "available_until precedes available_from".to_string(),
                ));
            }
        }

        let quiz = sqlx::query_as::<_, Quiz>(
            r#"
            INSERT INTO quizzes (
                title, description, instructions, duration_minutes, pass_percentage,
                max_attempts, shuffle_questions, shuffle_answers, show_correct_answers,
                show_score_immediately, available_from, available_until, group_id, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING *
            "#,
        )
        .bind(&payload.title)
        .bind(&payload.description)
        .bind(&payload.instructions)
        .bind(payload.duration_minutes)
        .bind(pass_percentage)
        .bind(payload.max_attempts.unwrap_or(1))
        .bind(payload.shuffle_questions.unwrap_or(false))
        .bind(payload.shuffle_answers.unwrap_or(false))
        .bind(payload.show_correct_answers.unwrap_or(false))
        .bind(payload.show_score_immediately.unwrap_or(true))
        .bind(payload.available_from)
        .bind(payload.available_until)
        .bind(payload.group_id)
        .bind(created_by)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(quiz_id = %quiz.id, "quiz created");
        Ok(quiz)
    }

    pub async fn get_quiz(&self, quiz_id: Uuid) -> Result<Quiz> {
        let quiz = sqlx::query_as::<_, Quiz>(r#"SELECT * FROM quizzes WHERE id = $1"#)
            .bind(quiz_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(quiz)
    }

    pub async fn list_quizzes(
        &self,
        created_by: Uuid,
        query: ListQuizzesQuery,
    ) -> Result<PaginatedQuizzes> {
        let page = query.page.unwrap_or(1).max(1);
        let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1) * per_page;
        let search = query.search.map(|s| format!("%{}%", s));

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM quizzes
            WHERE created_by = $1 AND is_active
              AND ($2::bool IS NULL OR is_published = $2)
              AND ($3::text IS NULL OR (title ILIKE $3 OR description ILIKE $3))
            "#,
        )
        .bind(created_by)
        .bind(query.is_published)
        .bind(search.clone())
        .fetch_one(&self.pool)
        .await?;

        let quizzes = sqlx::query_as::<_, Quiz>(
            r#"
            SELECT * FROM quizzes
            WHERE created_by = $1 AND is_active
              AND ($2::bool IS NULL OR is_published = $2)
              AND ($3::text IS NULL OR (title ILIKE $3 OR description ILIKE $3))
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(created_by)
        .bind(query.is_published)
        .bind(search)
        .bind(per_page)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total_pages = if per_page > 0 {
            ((total as f64) / (per_page as f64)).ceil() as i64
        } else {
            1
        };

        Ok(PaginatedQuizzes {
            quizzes,
            total,
            page,
            per_page,
            total_pages,
        })
    }

    /// Quiz metadata is mutable only while unpublished; publish state is
    /// changed exclusively through publish/unpublish.
    pub async fn update_quiz(&self, quiz_id: Uuid, payload: UpdateQuizPayload) -> Result<Quiz> {
        let current = self.get_quiz(quiz_id).await?;
        if current.is_published {
            return Err(Error::InvalidState(
                "Quiz is published; unpublish before editing".to_string(),
            ));
        }

        let pass_percentage = match payload.pass_percentage {
            Some(p) => Some(
                Decimal::from_f64(p)
                    .ok_or_else(|| Error::Validation("Invalid pass percentage".to_string()))?,
            ),
            None => None,
        };

        let quiz = sqlx::query_as::<_, Quiz>(
            r#"
            UPDATE quizzes
            SET title = COALESCE($1, title),
                description = COALESCE($2, description),
                instructions = COALESCE($3, instructions),
                duration_minutes = COALESCE($4, duration_minutes),
                pass_percentage = COALESCE($5, pass_percentage),
                max_attempts = COALESCE($6, max_attempts),
                shuffle_questions = COALESCE($7, shuffle_questions),
                shuffle_answers = COALESCE($8, shuffle_answers),
                show_correct_answers = COALESCE($9, show_correct_answers),
                show_score_immediately = COALESCE($10, show_score_immediately),
                available_from = CASE WHEN $11 THEN $12 ELSE available_from END,
                available_until = CASE WHEN $13 THEN $14 ELSE available_until END,
                group_id = CASE WHEN $15 THEN $16 ELSE group_id END,
                updated_at = NOW()
            WHERE id = $17
            RETURNING *
            "#,
        )
        .bind(&payload.title)
        .bind(&payload.description)
        .bind(&payload.instructions)
        .bind(payload.duration_minutes)
        .bind(pass_percentage)
        .bind(payload.max_attempts)
        .bind(payload.shuffle_questions)
        .bind(payload.shuffle_answers)
        .bind(payload.show_correct_answers)
        .bind(payload.show_score_immediately)
        .bind(payload.available_from.is_some())
        .bind(payload.available_from.flatten())
        .bind(payload.available_until.is_some())
        .bind(payload.available_until.flatten())
        .bind(payload.group_id.is_some())
        .bind(payload.group_id.flatten())
        .bind(quiz_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(quiz)
    }

    /// Soft-retires a quiz that attempts reference (audit trail); hard
    /// deletes only when no attempt was ever made.
    pub async fn retire_quiz(&self, quiz_id: Uuid) -> Result<bool> {
        let attempt_count: i64 =
            sqlx::query_scalar(r#"SELECT COUNT(*) FROM attempts WHERE quiz_id = $1"#)
                .bind(quiz_id)
                .fetch_one(&self.pool)
                .await?;

        if attempt_count > 0 {
            sqlx::query(
                r#"UPDATE quizzes SET is_active = FALSE, is_published = FALSE, updated_at = NOW() WHERE id = $1"#,
            )
            .bind(quiz_id)
            .execute(&self.pool)
            .await?;
            tracing::info!(quiz_id = %quiz_id, "quiz retired (attempts preserved)");
            Ok(false)
        } else {
            let result = sqlx::query(r#"DELETE FROM quizzes WHERE id = $1"#)
                .bind(quiz_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        }
    }

    pub async fn publish(&self, quiz_id: Uuid) -> Result<Quiz> {
        let current = self.get_quiz(quiz_id).await?;
        if !current.is_active {
            return Err(Error::InvalidState(
                "Quiz has been retired and cannot be published".to_string(),
            ));
        }

        let question_count: i64 =
            sqlx::query_scalar(r#"SELECT COUNT(*) FROM questions WHERE quiz_id = $1"#)
                .bind(quiz_id)
                .fetch_one(&self.pool)
                .await?;
        if question_count == 0 {
            return Err(Error::Validation(
                "Quiz cannot be published with no questions".to_string(),
            ));
        }

        // every choice question must carry exactly one correct option
        let invalid: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT q.id FROM questions q
            WHERE q.quiz_id = $1
              AND q.question_type IN ('multiple_choice', 'true_false')
              AND (SELECT COUNT(*) FROM options o WHERE o.question_id = q.id AND o.is_correct) <> 1
            "#,
        )
        .bind(quiz_id)
        .fetch_all(&self.pool)
        .await?;
        if !invalid.is_empty() {
            return Err(Error::Validation(format!(
                "{} choice question(s) lack exactly one correct option",
                invalid.len()
            )));
        }

        let quiz = sqlx::query_as::<_, Quiz>(
            r#"UPDATE quizzes SET is_published = TRUE, updated_at = NOW() WHERE id = $1 RETURNING *"#,
        )
        .bind(quiz_id)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(quiz_id = %quiz_id, "quiz published");
        Ok(quiz)
    }

    /// Always permitted; in-progress attempts survive and may still be
    /// submitted and graded.
    pub async fn unpublish(&self, quiz_id: Uuid) -> Result<Quiz> {
        let quiz = sqlx::query_as::<_, Quiz>(
            r#"UPDATE quizzes SET is_published = FALSE, updated_at = NOW() WHERE id = $1 RETURNING *"#,
        )
        .bind(quiz_id)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(quiz_id = %quiz_id, "quiz unpublished");
        Ok(quiz)
    }

    /// Quizzes the calling student can currently start, with their used
    /// attempt count.
    pub async fn available_for_student(
        &self,
        student_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<AvailableQuizRow>> {
        let rows = sqlx::query_as::<_, AvailableQuizRow>(
            r#"
            SELECT qz.*,
                   (SELECT COUNT(*) FROM attempts a
                     WHERE a.quiz_id = qz.id AND a.student_id = $1) AS attempts_used
            FROM quizzes qz
            WHERE qz.is_published AND qz.is_active
              AND (qz.available_from IS NULL OR qz.available_from <= $2)
              AND (qz.available_until IS NULL OR qz.available_until >= $2)
              AND (qz.group_id IS NULL OR EXISTS (
                    SELECT 1 FROM group_members gm
                    WHERE gm.group_id = qz.group_id AND gm.student_id = $1))
            ORDER BY qz.created_at DESC
            "#,
        )
        .bind(student_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AvailableQuizRow {
    #[sqlx(flatten)]
    pub quiz: Quiz,
    pub attempts_used: i64,
}

/// Membership check consumed from the enrollment collaborator; quizzes with
/// no group are unrestricted.
pub async fn is_enrolled(pool: &PgPool, group_id: Uuid, student_id: Uuid) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM group_members WHERE group_id = $1 AND student_id = $2"#,
    )
    .bind(group_id)
    .bind(student_id)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// Authoring and grading operations are restricted to the quiz owner;
/// admins administer every quiz.
pub fn ensure_owner(quiz: &Quiz, user_id: Uuid, role: &str) -> Result<()> {
    if role.eq_ignore_ascii_case("admin") || quiz.created_by == user_id {
        Ok(())
    } else {
        Err(Error::Forbidden(
            "You do not administer this quiz".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_check_accepts_owner_and_admin() {
        let owner = Uuid::new_v4();
        let quiz = Quiz {
            id: Uuid::new_v4(),
            title: "t".into(),
            description: None,
            instructions: None,
            duration_minutes: 10,
            total_marks: Decimal::ZERO,
            pass_percentage: Decimal::new(60, 0),
            max_attempts: 1,
            shuffle_questions: false,
            shuffle_answers: false,
            show_correct_answers: false,
            show_score_immediately: true,
            available_from: None,
            available_until: None,
            is_published: false,
            is_active: true,
            group_id: None,
            created_by: owner,
            created_at: None,
            updated_at: None,
        };
        assert!(ensure_owner(&quiz, owner, "teacher").is_ok());
        assert!(ensure_owner(&quiz, Uuid::new_v4(), "admin").is_ok());
        assert!(ensure_owner(&quiz, Uuid::new_v4(), "teacher").is_err());
    }
}
