use crate::dto::authoring_dto::{ListAttemptsQuery, PaginatedAttempts};
use crate::dto::student_dto::{
    AttemptSnapshot, SaveAnswerRequest, StudentOption, StudentQuestion,
};
use crate::error::{Error, Result};
use crate::models::attempt::{Attempt, AttemptStatus};
use crate::models::question::{Question, QuestionOption};
use crate::models::quiz::Quiz;
use crate::services::scoring;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Bounded retry for the guarded start path; safe because the advisory lock
/// and unique index make a retried start idempotent.
const START_ATTEMPT_RETRIES: u32 = 3;

#[derive(Clone)]
pub struct AttemptService {
    pool: PgPool,
}

impl AttemptService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the student's attempt under a per-(quiz, student) advisory
    /// lock so two concurrent starts cannot both pass the duplicate and
    /// max_attempts checks. The partial unique index on in_progress attempts
    /// backstops the lock; its violation surfaces as Conflict.
    pub async fn start_attempt(&self, quiz_id: Uuid, student_id: Uuid) -> Result<Attempt> {
        let quiz = self.fetch_quiz(quiz_id).await?;
        if let Some(group_id) = quiz.group_id {
            if !crate::services::quiz_service::is_enrolled(&self.pool, group_id, student_id).await?
            {
                // existence of group-scoped quizzes is not leaked
                return Err(Error::NotFound("Quiz not found".to_string()));
            }
        }

        let mut last_err: Option<Error> = None;
        for retry in 0..START_ATTEMPT_RETRIES {
            if retry > 0 {
                tracing::warn!(quiz_id = %quiz_id, student_id = %student_id, retry, "retrying attempt start");
            }
            match self.try_start(&quiz, student_id).await {
                Ok(attempt) => {
                    tracing::info!(attempt_id = %attempt.id, quiz_id = %quiz_id, "attempt started");
                    return Ok(attempt);
                }
                Err(Error::Database(e)) if is_unique_violation(&e) => {
                    return Err(Error::Conflict(
                        "An attempt for this quiz is already in progress".to_string(),
                    ));
                }
                Err(Error::Database(e)) if is_transient(&e) => {
                    last_err = Some(Error::Database(e));
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Internal("attempt start retries exhausted".into())))
    }

    async fn try_start(&self, quiz: &Quiz, student_id: Uuid) -> Result<Attempt> {
        // availability is consulted fresh on every start, never cached
        let now = Utc::now();
        if !quiz.is_available(now) {
            return Err(Error::Unavailable(
                "Quiz is not currently open for attempts".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(r#"SELECT pg_advisory_xact_lock($1)"#)
            .bind(pair_lock_key(quiz.id, student_id))
            .execute(&mut *tx)
            .await?;

        let in_progress: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM attempts
            WHERE quiz_id = $1 AND student_id = $2 AND status = 'in_progress'
            "#,
        )
        .bind(quiz.id)
        .bind(student_id)
        .fetch_one(&mut *tx)
        .await?;
        if in_progress > 0 {
            return Err(Error::Conflict(
                "An attempt for this quiz is already in progress".to_string(),
            ));
        }

        let used: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM attempts WHERE quiz_id = $1 AND student_id = $2"#,
        )
        .bind(quiz.id)
        .bind(student_id)
        .fetch_one(&mut *tx)
        .await?;
        if used >= quiz.max_attempts as i64 {
            return Err(Error::AttemptLimitExceeded(format!(
                "All {} attempts for this quiz have been used",
                quiz.max_attempts
            )));
        }

        let attempt = sqlx::query_as::<_, Attempt>(
            r#"
            INSERT INTO attempts (quiz_id, student_id, status, started_at)
            VALUES ($1, $2, 'in_progress', $3)
            RETURNING *
            "#,
        )
        .bind(quiz.id)
        .bind(student_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(attempt)
    }

    /// Fetches the student's attempt, lazily finalizing it as timed_out when
    /// its clock has already run out.
    pub async fn get_attempt(&self, attempt_id: Uuid, student_id: Uuid) -> Result<(Attempt, Quiz)> {
        let attempt = sqlx::query_as::<_, Attempt>(r#"SELECT * FROM attempts WHERE id = $1"#)
            .bind(attempt_id)
            .fetch_one(&self.pool)
            .await?;
        if attempt.student_id != student_id {
            return Err(Error::NotFound("Attempt not found".to_string()));
        }
        let quiz = self.fetch_quiz(attempt.quiz_id).await?;

        if attempt.is_in_progress() && is_overdue(&attempt, &quiz, Utc::now()) {
            let attempt = self.expire_one(attempt.id).await?;
            return Ok((attempt, quiz));
        }
        Ok((attempt, quiz))
    }

    /// Questions as presented to the attempting student: deterministic
    /// per-attempt permutation when shuffling is on, is_correct withheld.
    pub async fn attempt_questions(
        &self,
        attempt: &Attempt,
        quiz: &Quiz,
    ) -> Result<Vec<StudentQuestion>> {
        let questions = sqlx::query_as::<_, Question>(
            r#"SELECT * FROM questions WHERE quiz_id = $1 ORDER BY order_index"#,
        )
        .bind(quiz.id)
        .fetch_all(&self.pool)
        .await?;
        let options = sqlx::query_as::<_, QuestionOption>(
            r#"
            SELECT o.* FROM options o
            JOIN questions q ON o.question_id = q.id
            WHERE q.quiz_id = $1
            ORDER BY o.order_index
            "#,
        )
        .bind(quiz.id)
        .fetch_all(&self.pool)
        .await?;

        let question_order: Vec<usize> = if quiz.shuffle_questions {
            scoring::presentation_order(attempt.id, quiz.id, questions.len())
        } else {
            (0..questions.len()).collect()
        };

        let mut out = Vec::with_capacity(questions.len());
        for (position, &idx) in question_order.iter().enumerate() {
            let question = &questions[idx];
            let mut opts: Vec<StudentOption> = options
                .iter()
                .filter(|o| o.question_id == question.id)
                .map(|o| StudentOption {
                    id: o.id,
                    option_text: o.option_text.clone(),
                })
                .collect();
            if quiz.shuffle_answers && !opts.is_empty() {
                let order = scoring::option_order(attempt.id, question.id, opts.len());
                opts = order.into_iter().map(|i| opts[i].clone()).collect();
            }
            out.push(StudentQuestion {
                id: question.id,
                question_text: question.question_text.clone(),
                question_type: question.question_type.clone(),
                marks: question.marks,
                position: position + 1,
                options: opts,
            });
        }
        Ok(out)
    }

    /// Upserts a single answer mid-attempt without grading it, so the sweep
    /// has persisted answers to finalize with.
    pub async fn save_answer(
        &self,
        attempt_id: Uuid,
        student_id: Uuid,
        req: SaveAnswerRequest,
    ) -> Result<()> {
        let (attempt, quiz) = self.get_attempt(attempt_id, student_id).await?;
        if !attempt.is_in_progress() {
            return Err(Error::InvalidState(format!(
                "Attempt is {}, answers can no longer be saved",
                attempt.status
            )));
        }

        let mut tx = self.pool.begin().await?;
        self.upsert_answer(&mut tx, &attempt, &quiz, &req).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Submission: upserts the payload's answers, auto-grades choice
    /// questions, aggregates, and settles the attempt as completed or
    /// timed_out depending on the wall clock. A submit that arrives after
    /// the clock ran out still lands its answers; the attempt just settles
    /// as timed_out, so this path must not go through the lazy expiry in
    /// get_attempt.
    pub async fn submit_attempt(
        &self,
        attempt_id: Uuid,
        student_id: Uuid,
        answers: Vec<SaveAnswerRequest>,
    ) -> Result<(Attempt, bool)> {
        let owner_check = self.get_attempt_any(attempt_id).await?;
        if owner_check.student_id != student_id {
            return Err(Error::NotFound("Attempt not found".to_string()));
        }
        let quiz = self.fetch_quiz(owner_check.quiz_id).await?;

        let mut tx = self.pool.begin().await?;
        let attempt = lock_attempt(&mut tx, attempt_id).await?;
        if !attempt.is_in_progress() {
            return Err(Error::InvalidState(format!(
                "Attempt is already {}",
                attempt.status
            )));
        }

        for req in &answers {
            self.upsert_answer(&mut tx, &attempt, &quiz, req).await?;
        }

        let now = Utc::now();
        let elapsed = (now - attempt.started_at).num_seconds();
        let timed_out = elapsed > quiz.duration_seconds();
        let (updated, pending) =
            finalize_attempt(&mut tx, &attempt, &quiz, now, timed_out).await?;
        tx.commit().await?;

        tracing::info!(
            attempt_id = %updated.id,
            status = %updated.status,
            score = ?updated.score,
            "attempt submitted"
        );
        Ok((updated, pending))
    }

    /// Maintenance sweep: settles every in_progress attempt whose clock ran
    /// out as timed_out, grading whatever answers were persisted. Also
    /// invoked lazily from get_attempt.
    pub async fn expire_overdue_attempts(&self) -> Result<u64> {
        let now = Utc::now();
        let overdue: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT a.id FROM attempts a
            JOIN quizzes qz ON a.quiz_id = qz.id
            WHERE a.status = 'in_progress'
              AND a.started_at + make_interval(mins => qz.duration_minutes) < $1
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut expired = 0u64;
        for attempt_id in overdue {
            match self.expire_one(attempt_id).await {
                Ok(_) => expired += 1,
                // raced with a concurrent submit; the attempt settled anyway
                Err(Error::InvalidState(_)) => {}
                Err(e) => {
                    tracing::error!(attempt_id = %attempt_id, error = ?e, "failed to expire attempt");
                }
            }
        }
        if expired > 0 {
            tracing::info!(expired, "overdue attempts timed out");
        }
        Ok(expired)
    }

    async fn expire_one(&self, attempt_id: Uuid) -> Result<Attempt> {
        let mut tx = self.pool.begin().await?;
        let attempt = lock_attempt(&mut tx, attempt_id).await?;
        if !attempt.is_in_progress() {
            return Err(Error::InvalidState(format!(
                "Attempt is already {}",
                attempt.status
            )));
        }
        let quiz = sqlx::query_as::<_, Quiz>(r#"SELECT * FROM quizzes WHERE id = $1"#)
            .bind(attempt.quiz_id)
            .fetch_one(&mut *tx)
            .await?;
        let (updated, _) = finalize_attempt(&mut tx, &attempt, &quiz, Utc::now(), true).await?;
        tx.commit().await?;
        Ok(updated)
    }

    /// Administrative void of a stuck attempt. Keeps the row for audit and
    /// still consumes an attempt slot.
    pub async fn abandon_attempt(&self, attempt_id: Uuid) -> Result<Attempt> {
        let mut tx = self.pool.begin().await?;
        let attempt = lock_attempt(&mut tx, attempt_id).await?;
        if !attempt.is_in_progress() {
            return Err(Error::InvalidState(format!(
                "Only in_progress attempts can be abandoned, this one is {}",
                attempt.status
            )));
        }
        let updated = sqlx::query_as::<_, Attempt>(
            r#"
            UPDATE attempts
            SET status = 'abandoned', completed_at = $1, updated_at = $1
            WHERE id = $2
            RETURNING *
            "#,
        )
        .bind(Utc::now())
        .bind(attempt_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::warn!(attempt_id = %attempt_id, "attempt abandoned by teacher");
        Ok(updated)
    }

    pub async fn get_attempt_any(&self, attempt_id: Uuid) -> Result<Attempt> {
        let attempt = sqlx::query_as::<_, Attempt>(r#"SELECT * FROM attempts WHERE id = $1"#)
            .bind(attempt_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(attempt)
    }

    pub async fn list_attempts(
        &self,
        quiz_id: Uuid,
        query: ListAttemptsQuery,
    ) -> Result<PaginatedAttempts> {
        let page = query.page.unwrap_or(1).max(1);
        let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1) * per_page;

        let attempts = sqlx::query_as::<_, Attempt>(
            r#"
            SELECT * FROM attempts
            WHERE quiz_id = $1
              AND ($2::text IS NULL OR status = $2)
            ORDER BY started_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(quiz_id)
        .bind(query.status.clone())
        .bind(per_page)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM attempts
            WHERE quiz_id = $1 AND ($2::text IS NULL OR status = $2)
            "#,
        )
        .bind(quiz_id)
        .bind(query.status)
        .fetch_one(&self.pool)
        .await?;

        Ok(PaginatedAttempts {
            attempts,
            total,
            page,
            per_page,
        })
    }

    /// Per-question rows for the result view, in authored order. The caller
    /// decides whether correct options and explanations may be revealed.
    pub async fn attempt_result_rows(&self, attempt_id: Uuid) -> Result<Vec<ResultRow>> {
        let rows = sqlx::query_as::<_, ResultRow>(
            r#"
            SELECT ans.question_id, q.question_text, q.question_type, q.marks,
                   ans.selected_option_id, ans.answer_text, ans.is_correct,
                   ans.marks_obtained, q.explanation,
                   (SELECT o.id FROM options o
                     WHERE o.question_id = q.id AND o.is_correct
                     ORDER BY o.order_index LIMIT 1) AS correct_option_id
            FROM answers ans
            JOIN questions q ON ans.question_id = q.id
            WHERE ans.attempt_id = $1
            ORDER BY q.order_index
            "#,
        )
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn fetch_quiz(&self, quiz_id: Uuid) -> Result<Quiz> {
        let quiz = sqlx::query_as::<_, Quiz>(r#"SELECT * FROM quizzes WHERE id = $1"#)
            .bind(quiz_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(quiz)
    }

    async fn upsert_answer(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        attempt: &Attempt,
        quiz: &Quiz,
        req: &SaveAnswerRequest,
    ) -> Result<()> {
        let question = sqlx::query_as::<_, Question>(r#"SELECT * FROM questions WHERE id = $1"#)
            .bind(req.question_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| Error::NotFound("Question not found".to_string()))?;
        if question.quiz_id != quiz.id {
            return Err(Error::Validation(
                "Question does not belong to this quiz".to_string(),
            ));
        }

        if let Some(option_id) = req.selected_option_id {
            let belongs: i64 = sqlx::query_scalar(
                r#"SELECT COUNT(*) FROM options WHERE id = $1 AND question_id = $2"#,
            )
            .bind(option_id)
            .bind(question.id)
            .fetch_one(&mut **tx)
            .await?;
            if belongs == 0 {
                return Err(Error::Validation(
                    "Selected option does not belong to this question".to_string(),
                ));
            }
        }

        sqlx::query(
            r#"
            INSERT INTO answers (attempt_id, question_id, selected_option_id, answer_text)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (attempt_id, question_id)
            DO UPDATE SET selected_option_id = EXCLUDED.selected_option_id,
                          answer_text = EXCLUDED.answer_text,
                          is_correct = NULL,
                          marks_obtained = 0,
                          updated_at = NOW()
            "#,
        )
        .bind(attempt.id)
        .bind(question.id)
        .bind(req.selected_option_id)
        .bind(&req.answer_text)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Serializable snapshot for the UI layer.
    pub fn snapshot(
        attempt: &Attempt,
        quiz: &Quiz,
        now: DateTime<Utc>,
        reveal_score: bool,
    ) -> AttemptSnapshot {
        let time_remaining = if attempt.is_in_progress() {
            (quiz.duration_seconds() - (now - attempt.started_at).num_seconds()).max(0)
        } else {
            0
        };
        AttemptSnapshot {
            id: attempt.id,
            status: attempt.status.clone(),
            score: if reveal_score { attempt.score } else { None },
            percentage: if reveal_score { attempt.percentage } else { None },
            is_passed: if reveal_score { attempt.is_passed } else { None },
            time_remaining_seconds: time_remaining,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ResultRow {
    pub question_id: Uuid,
    pub question_text: String,
    pub question_type: String,
    pub marks: Decimal,
    pub selected_option_id: Option<Uuid>,
    pub answer_text: Option<String>,
    pub is_correct: Option<bool>,
    pub marks_obtained: Decimal,
    pub explanation: Option<String>,
    pub correct_option_id: Option<Uuid>,
}

#[derive(Debug, FromRow)]
struct GradingRow {
    id: Uuid,
    question_type: String,
    marks: Decimal,
    option_correct: Option<bool>,
}

/// Grades persisted answers, aggregates, and settles the attempt. Runs with
/// the attempt row locked; callers hold the transaction.
async fn finalize_attempt(
    tx: &mut Transaction<'_, Postgres>,
    attempt: &Attempt,
    quiz: &Quiz,
    now: DateTime<Utc>,
    timed_out: bool,
) -> Result<(Attempt, bool)> {
    let rows = sqlx::query_as::<_, GradingRow>(
        r#"
        SELECT ans.id, q.question_type, q.marks, o.is_correct AS option_correct
        FROM answers ans
        JOIN questions q ON ans.question_id = q.id
        LEFT JOIN options o ON ans.selected_option_id = o.id
        WHERE ans.attempt_id = $1
        "#,
    )
    .bind(attempt.id)
    .fetch_all(&mut **tx)
    .await?;

    let mut score_sum = Decimal::ZERO;
    let mut pending_manual = false;
    for row in &rows {
        let auto = matches!(row.question_type.as_str(), "multiple_choice" | "true_false");
        if auto {
            let (is_correct, marks) = scoring::grade_choice(row.marks, row.option_correct);
            sqlx::query(
                r#"UPDATE answers SET is_correct = $1, marks_obtained = $2, updated_at = NOW() WHERE id = $3"#,
            )
            .bind(is_correct)
            .bind(marks)
            .bind(row.id)
            .execute(&mut **tx)
            .await?;
            score_sum += marks;
        } else {
            pending_manual = true;
        }
    }

    let aggregate = scoring::aggregate(score_sum, quiz.total_marks, quiz.pass_percentage);
    let elapsed = (now - attempt.started_at).num_seconds();
    let status = if timed_out {
        AttemptStatus::TimedOut
    } else {
        AttemptStatus::Completed
    };

    let updated = sqlx::query_as::<_, Attempt>(
        r#"
        UPDATE attempts
        SET status = $1, completed_at = $2, time_taken_seconds = $3,
            score = $4, percentage = $5, is_passed = $6, updated_at = $2
        WHERE id = $7
        RETURNING *
        "#,
    )
    .bind(status.as_str())
    .bind(now)
    .bind(i32::try_from(elapsed).unwrap_or(i32::MAX))
    .bind(aggregate.score)
    .bind(aggregate.percentage)
    .bind(aggregate.is_passed)
    .bind(attempt.id)
    .fetch_one(&mut **tx)
    .await?;

    Ok((updated, pending_manual))
}

async fn lock_attempt(tx: &mut Transaction<'_, Postgres>, attempt_id: Uuid) -> Result<Attempt> {
    let attempt =
        sqlx::query_as::<_, Attempt>(r#"SELECT * FROM attempts WHERE id = $1 FOR UPDATE"#)
            .bind(attempt_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| Error::NotFound("Attempt not found".to_string()))?;
    Ok(attempt)
}

fn is_overdue(attempt: &Attempt, quiz: &Quiz, now: DateTime<Utc>) -> bool {
    (now - attempt.started_at).num_seconds() > quiz.duration_seconds()
}

/// Advisory-lock key for one (quiz, student) pair.
fn pair_lock_key(quiz_id: Uuid, student_id: Uuid) -> i64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    quiz_id.hash(&mut hasher);
    student_id.hash(&mut hasher);
    hasher.finish() as i64
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

/// Serialization failures, deadlocks, and lock timeouts are retried for
/// start_attempt only.
fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            matches!(db.code().as_deref(), Some("40001") | Some("40P01") | Some("55P03"))
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        _ => false,
    }
}
