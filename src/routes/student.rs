use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use uuid::Uuid;
use validator::Validate;

use crate::dto::student_dto::{
    AttemptResultResponse, AttemptView, AvailableQuizSummary, ResultAnswer, SaveAnswerRequest,
    SubmitAttemptRequest, SubmitAttemptResponse,
};
use crate::error::Error;
use crate::middleware::auth::Claims;
use crate::services::attempt_service::AttemptService;
use crate::AppState;

#[axum::debug_handler]
pub async fn available_quizzes(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> crate::error::Result<Response> {
    let rows = state
        .quiz_service
        .available_for_student(claims.user_id()?, Utc::now())
        .await?;
    let summaries: Vec<AvailableQuizSummary> = rows
        .into_iter()
        .map(|row| AvailableQuizSummary {
            id: row.quiz.id,
            title: row.quiz.title,
            description: row.quiz.description,
            duration_minutes: row.quiz.duration_minutes,
            total_marks: row.quiz.total_marks,
            pass_percentage: row.quiz.pass_percentage,
            max_attempts: row.quiz.max_attempts,
            attempts_used: row.attempts_used,
            available_from: row.quiz.available_from,
            available_until: row.quiz.available_until,
        })
        .collect();
    Ok(Json(summaries).into_response())
}

#[utoipa::path(
    post,
    path = "/api/student/quizzes/{id}/attempts",
    params(("id" = Uuid, Path, description = "Quiz ID")),
    responses(
        (status = 201, description = "Attempt started"),
        (status = 403, description = "Quiz unavailable or attempt limit reached"),
        (status = 409, description = "An attempt is already in progress"),
    ),
)]
pub async fn start_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let student_id = claims.user_id()?;
    let attempt = state
        .attempt_service
        .start_attempt(quiz_id, student_id)
        .await?;
    let view = attempt_view(&state, attempt.id, student_id).await?;
    Ok((StatusCode::CREATED, Json(view)).into_response())
}

#[axum::debug_handler]
pub async fn get_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let view = attempt_view(&state, attempt_id, claims.user_id()?).await?;
    Ok(Json(view).into_response())
}

#[axum::debug_handler]
pub async fn save_answer(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<Uuid>,
    Json(payload): Json<SaveAnswerRequest>,
) -> crate::error::Result<Response> {
    payload.validate()?;
    state
        .attempt_service
        .save_answer(attempt_id, claims.user_id()?, payload)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[utoipa::path(
    post,
    path = "/api/student/attempts/{id}/submit",
    params(("id" = Uuid, Path, description = "Attempt ID")),
    responses(
        (status = 200, description = "Attempt settled as completed or timed_out"),
        (status = 409, description = "Attempt already left in_progress"),
    ),
)]
pub async fn submit_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<Uuid>,
    Json(payload): Json<SubmitAttemptRequest>,
) -> crate::error::Result<Response> {
    payload.validate()?;
    let student_id = claims.user_id()?;
    let (attempt, pending) = state
        .attempt_service
        .submit_attempt(attempt_id, student_id, payload.answers)
        .await?;
    let quiz = state.quiz_service.get_quiz(attempt.quiz_id).await?;
    let reveal = quiz.show_score_immediately && !pending;
    let snapshot = AttemptService::snapshot(&attempt, &quiz, Utc::now(), reveal);
    Ok(Json(SubmitAttemptResponse {
        snapshot,
        pending_manual_grading: pending,
    })
    .into_response())
}

#[axum::debug_handler]
pub async fn attempt_result(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let student_id = claims.user_id()?;
    let (attempt, quiz) = state.attempt_service.get_attempt(attempt_id, student_id).await?;
    if attempt.is_in_progress() {
        return Err(Error::InvalidState(
            "Results are not available while the attempt is in progress".to_string(),
        ));
    }

    let reveal_correct = quiz.show_correct_answers;
    let rows = state.attempt_service.attempt_result_rows(attempt_id).await?;
    // with show_score_immediately off, scores stay hidden while any manual
    // answer is still ungraded
    let pending_manual = rows.iter().any(|row| {
        matches!(row.question_type.as_str(), "short_answer" | "essay") && row.is_correct.is_none()
    });
    let reveal_score = quiz.show_score_immediately || !pending_manual;
    let answers: Vec<ResultAnswer> = rows
        .into_iter()
        .map(|row| ResultAnswer {
            question_id: row.question_id,
            question_text: row.question_text,
            question_type: row.question_type,
            marks: row.marks,
            selected_option_id: row.selected_option_id,
            answer_text: row.answer_text,
            is_correct: row.is_correct,
            marks_obtained: row.marks_obtained,
            correct_option_id: if reveal_correct { row.correct_option_id } else { None },
            explanation: if reveal_correct { row.explanation } else { None },
        })
        .collect();

    let snapshot = AttemptService::snapshot(&attempt, &quiz, Utc::now(), reveal_score);
    Ok(Json(AttemptResultResponse { snapshot, answers }).into_response())
}

async fn attempt_view(
    state: &AppState,
    attempt_id: Uuid,
    student_id: Uuid,
) -> crate::error::Result<AttemptView> {
    let (attempt, quiz) = state.attempt_service.get_attempt(attempt_id, student_id).await?;
    let questions = state.attempt_service.attempt_questions(&attempt, &quiz).await?;
    let reveal = !attempt.is_in_progress() && quiz.show_score_immediately;
    let snapshot = AttemptService::snapshot(&attempt, &quiz, Utc::now(), reveal);
    Ok(AttemptView {
        attempt: snapshot,
        quiz_title: quiz.title,
        instructions: quiz.instructions,
        questions,
    })
}
