use crate::dto::authoring_dto::{
    CreateQuestionPayload, QuestionWithOptions, ReorderQuestionsPayload, UpdateQuestionPayload,
};
use crate::error::{Error, Result};
use crate::models::question::{Question, QuestionOption, QuestionType};
use crate::models::quiz::Quiz;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

#[derive(Clone)]
pub struct QuestionService {
    pool: PgPool,
}

impl QuestionService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list_questions(&self, quiz_id: Uuid) -> Result<Vec<QuestionWithOptions>> {
        let questions = sqlx::query_as::<_, Question>(
            r#"SELECT * FROM questions WHERE quiz_id = $1 ORDER BY order_index"#,
        )
        .bind(quiz_id)
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
        .bind(quiz_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(questions
            .into_iter()
            .map(|question| {
                let opts = options
                    .iter()
                    .filter(|o| o.question_id == question.id)
                    .cloned()
                    .collect();
                QuestionWithOptions {
                    question,
                    options: opts,
                }
            })
            .collect())
    }

    pub async fn add_question(
        &self,
        quiz: &Quiz,
        payload: CreateQuestionPayload,
    ) -> Result<Question> {
        ensure_unpublished(quiz)?;
        let kind: QuestionType = payload
            .question_type
            .parse()
            .map_err(Error::Validation)?;
        let marks = parse_marks(payload.marks)?;
        validate_options(kind, payload.options.as_deref())?;

        let mut tx = self.pool.begin().await?;

        let next_index: i64 =
            sqlx::query_scalar(r#"SELECT COUNT(*) FROM questions WHERE quiz_id = $1"#)
                .bind(quiz.id)
                .fetch_one(&mut *tx)
                .await?;

        let question = sqlx::query_as::<_, Question>(
            r#"
            INSERT INTO questions (quiz_id, question_text, question_type, marks, order_index, explanation)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(quiz.id)
        .bind(&payload.question_text)
        .bind(kind.as_str())
        .bind(marks)
        .bind(next_index as i32 + 1)
        .bind(&payload.explanation)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(options) = &payload.options {
            insert_options(&mut tx, question.id, options).await?;
        }

        recompute_total_marks(&mut tx, quiz.id).await?;
        tx.commit().await?;

        tracing::info!(quiz_id = %quiz.id, question_id = %question.id, "question added");
        Ok(question)
    }

    pub async fn get_question(&self, question_id: Uuid) -> Result<Question> {
        let question = sqlx::query_as::<_, Question>(r#"SELECT * FROM questions WHERE id = $1"#)
            .bind(question_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(question)
    }

    pub async fn update_question(
        &self,
        quiz: &Quiz,
        question: &Question,
        payload: UpdateQuestionPayload,
    ) -> Result<Question> {
        ensure_unpublished(quiz)?;
        let kind = question
            .kind()
            .ok_or_else(|| Error::Internal("corrupt question type".to_string()))?;
        if let Some(options) = payload.options.as_deref() {
            validate_options(kind, Some(options))?;
        }
        let marks = match payload.marks {
            Some(m) => Some(parse_marks(m)?),
            None => None,
        };

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query_as::<_, Question>(
            r#"
            UPDATE questions
            SET question_text = COALESCE($1, question_text),
                marks = COALESCE($2, marks),
                explanation = COALESCE($3, explanation),
                updated_at = NOW()
            WHERE id = $4
            RETURNING *
            "#,
        )
        .bind(&payload.question_text)
        .bind(marks)
        .bind(&payload.explanation)
        .bind(question.id)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(options) = &payload.options {
            sqlx::query(r#"DELETE FROM options WHERE question_id = $1"#)
                .bind(question.id)
                .execute(&mut *tx)
                .await?;
            insert_options(&mut tx, question.id, options).await?;
        }

        recompute_total_marks(&mut tx, quiz.id).await?;
        tx.commit().await?;

        Ok(updated)
    }

    /// Cascades options and answers, then renumbers the survivors densely.
    /// Refused once any graded answer references the question.
    pub async fn delete_question(&self, quiz: &Quiz, question: &Question) -> Result<()> {
        ensure_unpublished(quiz)?;

        let mut tx = self.pool.begin().await?;

        // lock the question and its answers so a concurrent grade cannot
        // slip in between the check and the cascade
        sqlx::query(r#"SELECT 1 FROM questions WHERE id = $1 FOR UPDATE"#)
            .bind(question.id)
            .execute(&mut *tx)
            .await?;
        let graded_refs: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FILTER (WHERE is_correct IS NOT NULL OR marks_obtained <> 0)
            FROM (SELECT is_correct, marks_obtained FROM answers WHERE question_id = $1 FOR UPDATE) a
            "#,
        )
        .bind(question.id)
        .fetch_one(&mut *tx)
        .await?;
        if graded_refs > 0 {
            return Err(Error::Conflict(
                "Question has graded answers and cannot be deleted".to_string(),
            ));
        }

        sqlx::query(r#"DELETE FROM questions WHERE id = $1"#)
            .bind(question.id)
            .execute(&mut *tx)
            .await?;

        // close the gap left by the deleted question
        sqlx::query(
            r#"
            UPDATE questions
            SET order_index = order_index - 1, updated_at = NOW()
            WHERE quiz_id = $1 AND order_index > $2
            "#,
        )
        .bind(quiz.id)
        .bind(question.order_index)
        .execute(&mut *tx)
        .await?;

        recompute_total_marks(&mut tx, quiz.id).await?;
        tx.commit().await?;

        tracing::info!(quiz_id = %quiz.id, question_id = %question.id, "question deleted");
        Ok(())
    }

    /// ordered_ids must be a permutation of the quiz's current question ids;
    /// positions in the list become 1-based order_index values.
    pub async fn reorder_questions(
        &self,
        quiz: &Quiz,
        payload: ReorderQuestionsPayload,
    ) -> Result<Vec<QuestionWithOptions>> {
        ensure_unpublished(quiz)?;

        let current: Vec<Uuid> =
            sqlx::query_scalar(r#"SELECT id FROM questions WHERE quiz_id = $1"#)
                .bind(quiz.id)
                .fetch_all(&self.pool)
                .await?;
        validate_reorder(&current, &payload.ordered_ids)?;

        let mut tx = self.pool.begin().await?;
        for (position, question_id) in payload.ordered_ids.iter().enumerate() {
            sqlx::query(
                r#"UPDATE questions SET order_index = $1, updated_at = NOW() WHERE id = $2"#,
            )
            .bind(position as i32 + 1)
            .bind(question_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        self.list_questions(quiz.id).await
    }
}

fn ensure_unpublished(quiz: &Quiz) -> Result<()> {
    if quiz.is_published {
        return Err(Error::InvalidState(
            "Quiz is published; unpublish before changing questions".to_string(),
        ));
    }
    if !quiz.is_active {
        return Err(Error::InvalidState("Quiz has been retired".to_string()));
    }
    Ok(())
}

fn parse_marks(marks: f64) -> Result<Decimal> {
    let marks = Decimal::from_f64(marks)
        .ok_or_else(|| Error::Validation("Invalid marks value".to_string()))?;
    if marks <= Decimal::ZERO {
        return Err(Error::Validation("Marks must be positive".to_string()));
    }
    Ok(marks)
}

fn validate_options(
    kind: QuestionType,
    options: Option<&[crate::dto::authoring_dto::CreateOptionPayload]>,
) -> Result<()> {
    let count = options.map(|o| o.len()).unwrap_or(0);
    if kind.is_auto_gradable() {
        if count < 2 {
            return Err(Error::Validation(format!(
                "{} questions need at least two options",
                kind
            )));
        }
        if kind == QuestionType::TrueFalse && count != 2 {
            return Err(Error::Validation(
                "true_false questions take exactly two options".to_string(),
            ));
        }
    } else if count > 0 {
        return Err(Error::Validation(format!(
            "{} questions do not take options",
            kind
        )));
    }
    Ok(())
}

/// Permutation check for reorder: same length, same id set, no duplicates.
fn validate_reorder(current: &[Uuid], ordered: &[Uuid]) -> Result<()> {
    if current.len() != ordered.len() {
        return Err(Error::Validation(format!(
            "Reorder list has {} ids, quiz has {} questions",
            ordered.len(),
            current.len()
        )));
    }
    let mut seen = std::collections::HashSet::with_capacity(ordered.len());
    for id in ordered {
        if !seen.insert(*id) {
            return Err(Error::Validation(format!("Duplicate question id {}", id)));
        }
        if !current.contains(id) {
            return Err(Error::Validation(format!(
                "Question {} does not belong to this quiz",
                id
            )));
        }
    }
    Ok(())
}

async fn insert_options(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    question_id: Uuid,
    options: &[crate::dto::authoring_dto::CreateOptionPayload],
) -> Result<()> {
    for (index, option) in options.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO options (question_id, option_text, is_correct, order_index)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(question_id)
        .bind(&option.option_text)
        .bind(option.is_correct)
        .bind(index as i32 + 1)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// total_marks is derived; every question mutation recomputes it.
pub async fn recompute_total_marks(conn: &mut PgConnection, quiz_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE quizzes
        SET total_marks = COALESCE((SELECT SUM(marks) FROM questions WHERE quiz_id = $1), 0),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(quiz_id)
    .execute(conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reorder_accepts_a_permutation() {
        let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let mut reversed = ids.clone();
        reversed.reverse();
        assert!(validate_reorder(&ids, &reversed).is_ok());
        // identity is also a permutation; applying it twice is a no-op
        assert!(validate_reorder(&ids, &ids).is_ok());
    }

    #[test]
    fn reorder_rejects_wrong_length() {
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        assert!(matches!(
            validate_reorder(&ids, &ids[..2]),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn reorder_rejects_duplicates_and_foreign_ids() {
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let dup = vec![ids[0], ids[0], ids[1]];
        assert!(matches!(
            validate_reorder(&ids, &dup),
            Err(Error::Validation(_))
        ));
        let foreign = vec![ids[0], ids[1], Uuid::new_v4()];
        assert!(matches!(
            validate_reorder(&ids, &foreign),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn choice_questions_need_options_text_questions_refuse_them() {
        use crate::dto::authoring_dto::CreateOptionPayload;
        let two = vec![
            CreateOptionPayload {
                option_text: "True".into(),
                is_correct: true,
            },
            CreateOptionPayload {
                option_text: "False".into(),
                is_correct: false,
            },
        ];
        assert!(validate_options(QuestionType::TrueFalse, Some(&two)).is_ok());
        assert!(validate_options(QuestionType::MultipleChoice, Some(&two)).is_ok());
        assert!(validate_options(QuestionType::MultipleChoice, None).is_err());
        assert!(validate_options(QuestionType::TrueFalse, Some(&two[..1])).is_err());
        assert!(validate_options(QuestionType::Essay, Some(&two)).is_err());
        assert!(validate_options(QuestionType::ShortAnswer, None).is_ok());
    }

    #[test]
    fn marks_must_be_positive() {
        assert!(parse_marks(5.0).is_ok());
        assert!(parse_marks(0.0).is_err());
        assert!(parse_marks(-1.0).is_err());
    }
}
