use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::dto::authoring_dto::{
    CreateQuestionPayload, CreateQuizPayload, GradeAnswerPayload, ListAttemptsQuery,
    ListQuizzesQuery, QuizDetailResponse, ReorderQuestionsPayload, UpdateQuestionPayload,
    UpdateQuizPayload,
};
use crate::middleware::auth::Claims;
use crate::models::quiz::Quiz;
use crate::services::quiz_service::ensure_owner;
use crate::AppState;

#[axum::debug_handler]
pub async fn create_quiz(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateQuizPayload>,
) -> crate::error::Result<Response> {
    payload.validate()?;
    let quiz = state
        .quiz_service
        .create_quiz(payload, claims.user_id()?)
        .await?;
    Ok((StatusCode::CREATED, Json(quiz)).into_response())
}

#[axum::debug_handler]
pub async fn list_quizzes(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ListQuizzesQuery>,
) -> crate::error::Result<Response> {
    let page = state
        .quiz_service
        .list_quizzes(claims.user_id()?, query)
        .await?;
    Ok(Json(page).into_response())
}

#[axum::debug_handler]
pub async fn get_quiz(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let quiz = owned_quiz(&state, &claims, quiz_id).await?;
    let questions = state.question_service.list_questions(quiz.id).await?;
    Ok(Json(QuizDetailResponse { quiz, questions }).into_response())
}

#[axum::debug_handler]
pub async fn update_quiz(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<Uuid>,
    Json(payload): Json<UpdateQuizPayload>,
) -> crate::error::Result<Response> {
    payload.validate()?;
    owned_quiz(&state, &claims, quiz_id).await?;
    let quiz = state.quiz_service.update_quiz(quiz_id, payload).await?;
    Ok(Json(quiz).into_response())
}

#[axum::debug_handler]
pub async fn retire_quiz(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    owned_quiz(&state, &claims, quiz_id).await?;
    let deleted = state.quiz_service.retire_quiz(quiz_id).await?;
    Ok(Json(json!({ "deleted": deleted, "retired": !deleted })).into_response())
}

#[utoipa::path(
    post,
    path = "/api/authoring/quizzes/{id}/publish",
    params(("id" = Uuid, Path, description = "Quiz ID")),
    responses(
        (status = 200, description = "Quiz published"),
        (status = 400, description = "No questions, or a choice question lacks exactly one correct option"),
    ),
)]
pub async fn publish_quiz(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    owned_quiz(&state, &claims, quiz_id).await?;
    let quiz = state.quiz_service.publish(quiz_id).await?;
    Ok(Json(quiz).into_response())
}

#[axum::debug_handler]
pub async fn unpublish_quiz(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    owned_quiz(&state, &claims, quiz_id).await?;
    let quiz = state.quiz_service.unpublish(quiz_id).await?;
    Ok(Json(quiz).into_response())
}

#[axum::debug_handler]
pub async fn add_question(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<Uuid>,
    Json(payload): Json<CreateQuestionPayload>,
) -> crate::error::Result<Response> {
    payload.validate()?;
    let quiz = owned_quiz(&state, &claims, quiz_id).await?;
    let question = state.question_service.add_question(&quiz, payload).await?;
    Ok((StatusCode::CREATED, Json(question)).into_response())
}

#[axum::debug_handler]
pub async fn update_question(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(question_id): Path<Uuid>,
    Json(payload): Json<UpdateQuestionPayload>,
) -> crate::error::Result<Response> {
    payload.validate()?;
    let question = state.question_service.get_question(question_id).await?;
    let quiz = owned_quiz(&state, &claims, question.quiz_id).await?;
    let updated = state
        .question_service
        .update_question(&quiz, &question, payload)
        .await?;
    Ok(Json(updated).into_response())
}

#[axum::debug_handler]
pub async fn delete_question(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(question_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let question = state.question_service.get_question(question_id).await?;
    let quiz = owned_quiz(&state, &claims, question.quiz_id).await?;
    state
        .question_service
        .delete_question(&quiz, &question)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[axum::debug_handler]
pub async fn reorder_questions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<Uuid>,
    Json(payload): Json<ReorderQuestionsPayload>,
) -> crate::error::Result<Response> {
    let quiz = owned_quiz(&state, &claims, quiz_id).await?;
    let questions = state
        .question_service
        .reorder_questions(&quiz, payload)
        .await?;
    Ok(Json(questions).into_response())
}

#[axum::debug_handler]
pub async fn pending_grading(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    owned_quiz(&state, &claims, quiz_id).await?;
    let pending = state.grading_service.pending_grading(quiz_id).await?;
    Ok(Json(pending).into_response())
}

#[utoipa::path(
    post,
    path = "/api/authoring/answers/{id}/grade",
    params(("id" = Uuid, Path, description = "Answer ID")),
    responses(
        (status = 200, description = "Grade recorded, attempt re-aggregated"),
        (status = 409, description = "Answer is auto-graded or attempt not gradable"),
    ),
)]
pub async fn grade_answer(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(answer_id): Path<Uuid>,
    Json(payload): Json<GradeAnswerPayload>,
) -> crate::error::Result<Response> {
    payload.validate()?;
    let answer = state.grading_service.get_answer(answer_id).await?;
    let attempt = state
        .attempt_service
        .get_attempt_any(answer.attempt_id)
        .await?;
    owned_quiz(&state, &claims, attempt.quiz_id).await?;

    let (attempt, graded) = state.grading_service.grade_answer(&answer, payload).await?;
    Ok(Json(json!({ "attempt": attempt, "answer": graded })).into_response())
}

#[axum::debug_handler]
pub async fn list_attempts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<Uuid>,
    Query(query): Query<ListAttemptsQuery>,
) -> crate::error::Result<Response> {
    owned_quiz(&state, &claims, quiz_id).await?;
    let page = state.attempt_service.list_attempts(quiz_id, query).await?;
    Ok(Json(page).into_response())
}

#[axum::debug_handler]
pub async fn abandon_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let attempt = state.attempt_service.get_attempt_any(attempt_id).await?;
    owned_quiz(&state, &claims, attempt.quiz_id).await?;
    let attempt = state.attempt_service.abandon_attempt(attempt_id).await?;
    Ok(Json(attempt).into_response())
}

async fn owned_quiz(state: &AppState, claims: &Claims, quiz_id: Uuid) -> crate::error::Result<Quiz> {
    let quiz = state.quiz_service.get_quiz(quiz_id).await?;
    ensure_owner(&quiz, claims.user_id()?, &claims.role())?;
    Ok(quiz)
}
