use std::env;
use std::sync::Once;

use rust_decimal::Decimal;
use uuid::Uuid;

use assessment_backend::dto::authoring_dto::{
    CreateOptionPayload, CreateQuestionPayload, CreateQuizPayload, GradeAnswerPayload,
    ListAttemptsQuery, ReorderQuestionsPayload, UpdateQuizPayload,
};
use assessment_backend::dto::student_dto::SaveAnswerRequest;
use assessment_backend::error::Error;
use assessment_backend::AppState;

static INIT: Once = Once::new();

async fn setup() -> sqlx::PgPool {
    INIT.call_once(|| {
        dotenvy::dotenv().ok();
        env::set_var("SERVER_ADDRESS", "127.0.0.1:0");
        env::set_var("JWT_SECRET", "test_secret_key");
        env::set_var("AUTHORING_RPS", "100");
        env::set_var("STUDENT_RPS", "100");
        assessment_backend::config::init_config().expect("init config");
    });
    let pool = assessment_backend::database::pool::create_pool()
        .await
        .expect("pool");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");
    pool
}

fn base_quiz(title: &str) -> CreateQuizPayload {
    CreateQuizPayload {
        title: title.to_string(),
        description: Some("desc".to_string()),
        instructions: None,
        duration_minutes: 20,
        pass_percentage: None,
        max_attempts: None,
        shuffle_questions: None,
        shuffle_answers: None,
        show_correct_answers: None,
        show_score_immediately: None,
        available_from: None,
        available_until: None,
        group_id: None,
    }
}

fn true_false(text: &str, marks: f64, answer: bool) -> CreateQuestionPayload {
    CreateQuestionPayload {
        question_text: text.to_string(),
        question_type: "true_false".to_string(),
        marks,
        explanation: None,
        options: Some(vec![
            CreateOptionPayload {
                option_text: "True".to_string(),
                is_correct: answer,
            },
            CreateOptionPayload {
                option_text: "False".to_string(),
                is_correct: !answer,
            },
        ]),
    }
}

fn essay(text: &str, marks: f64) -> CreateQuestionPayload {
    CreateQuestionPayload {
        question_text: text.to_string(),
        question_type: "essay".to_string(),
        marks,
        explanation: None,
        options: None,
    }
}

#[tokio::test]
#[ignore]
async fn quiz_defaults_and_publish_guard() {
    let pool = setup().await;
    let state = AppState::new(pool);
    let teacher = Uuid::new_v4();

    let quiz = state
        .quiz_service
        .create_quiz(base_quiz("Defaults"), teacher)
        .await
        .expect("create");
    assert_eq!(quiz.pass_percentage, Decimal::from(60));
    assert_eq!(quiz.max_attempts, 1);
    assert!(!quiz.is_published);
    assert_eq!(quiz.total_marks, Decimal::ZERO);

    // Empty quizzes cannot go live.
    let err = state.quiz_service.publish(quiz.id).await.expect_err("no questions");
    assert!(matches!(err, Error::Validation(_)));

    state
        .question_service
        .add_question(&quiz, true_false("Water boils at 100C", 2.0, true))
        .await
        .expect("add question");
    let quiz = state.quiz_service.publish(quiz.id).await.expect("publish");
    assert!(quiz.is_published);
    assert_eq!(quiz.total_marks, Decimal::from(2));

    // Published metadata is frozen until unpublish.
    let err = state
        .quiz_service
        .update_quiz(
            quiz.id,
            UpdateQuizPayload {
                title: Some("renamed".to_string()),
                description: None,
                instructions: None,
                duration_minutes: None,
                pass_percentage: None,
                max_attempts: None,
                shuffle_questions: None,
                shuffle_answers: None,
                show_correct_answers: None,
                show_score_immediately: None,
                available_from: None,
                available_until: None,
                group_id: None,
            },
        )
        .await
        .expect_err("published quizzes are immutable");
    assert!(matches!(err, Error::InvalidState(_)));
}

#[tokio::test]
#[ignore]
async fn question_mutations_track_total_marks_and_order() {
    let pool = setup().await;
    let state = AppState::new(pool);
    let teacher = Uuid::new_v4();

    let quiz = state
        .quiz_service
        .create_quiz(base_quiz("Ordering"), teacher)
        .await
        .expect("create");
    let q1 = state
        .question_service
        .add_question(&quiz, true_false("first", 2.0, true))
        .await
        .expect("q1");
    let q2 = state
        .question_service
        .add_question(&quiz, essay("second", 3.0))
        .await
        .expect("q2");
    assert_eq!(q1.order_index, 1);
    assert_eq!(q2.order_index, 2);

    let quiz = state.quiz_service.get_quiz(quiz.id).await.expect("reload");
    assert_eq!(quiz.total_marks, Decimal::from(5));

    let reordered = state
        .question_service
        .reorder_questions(
            &quiz,
            ReorderQuestionsPayload {
                ordered_ids: vec![q2.id, q1.id],
            },
        )
        .await
        .expect("reorder");
    assert_eq!(reordered[0].question.id, q2.id);
    assert_eq!(reordered[0].question.order_index, 1);

    // A partial id list is not a permutation.
    let err = state
        .question_service
        .reorder_questions(
            &quiz,
            ReorderQuestionsPayload {
                ordered_ids: vec![q1.id],
            },
        )
        .await
        .expect_err("must list every question");
    assert!(matches!(err, Error::Validation(_)));

    let q1 = state.question_service.get_question(q1.id).await.expect("q1");
    state
        .question_service
        .delete_question(&quiz, &q1)
        .await
        .expect("delete");
    let quiz = state.quiz_service.get_quiz(quiz.id).await.expect("reload");
    assert_eq!(quiz.total_marks, Decimal::from(3));
    let remaining = state
        .question_service
        .list_questions(quiz.id)
        .await
        .expect("list");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].question.order_index, 1);
}

#[tokio::test]
#[ignore]
async fn manual_grading_settles_attempt_as_graded() {
    let pool = setup().await;
    let state = AppState::new(pool);
    let teacher = Uuid::new_v4();
    let student = Uuid::new_v4();

    let quiz = state
        .quiz_service
        .create_quiz(base_quiz("Mixed"), teacher)
        .await
        .expect("create");
    state
        .question_service
        .add_question(&quiz, true_false("auto part", 4.0, true))
        .await
        .expect("tf");
    state
        .question_service
        .add_question(&quiz, essay("manual part", 6.0))
        .await
        .expect("essay");
    let quiz = state.quiz_service.publish(quiz.id).await.expect("publish");

    let questions = state
        .question_service
        .list_questions(quiz.id)
        .await
        .expect("questions");
    let tf = &questions[0];
    let es = &questions[1];
    let true_option = tf
        .options
        .iter()
        .find(|o| o.option_text == "True")
        .expect("true option");

    let attempt = state
        .attempt_service
        .start_attempt(quiz.id, student)
        .await
        .expect("start");
    let (settled, pending) = state
        .attempt_service
        .submit_attempt(
            attempt.id,
            student,
            vec![
                SaveAnswerRequest {
                    question_id: tf.question.id,
                    selected_option_id: Some(true_option.id),
                    answer_text: None,
                },
                SaveAnswerRequest {
                    question_id: es.question.id,
                    selected_option_id: None,
                    answer_text: Some("Because of thermodynamics.".to_string()),
                },
            ],
        )
        .await
        .expect("submit");
    assert!(pending, "essay answers await a teacher");
    assert_eq!(settled.status, "completed");
    // Auto-graded portion only until the essay is marked.
    assert_eq!(settled.score, Some(Decimal::from(4)));

    let pending_answers = state
        .grading_service
        .pending_grading(quiz.id)
        .await
        .expect("pending list");
    assert_eq!(pending_answers.len(), 1);
    assert_eq!(pending_answers[0].answer.question_id, es.question.id);

    // Marks above the question ceiling are refused.
    let err = state
        .grading_service
        .grade_answer(
            &pending_answers[0].answer,
            GradeAnswerPayload {
                marks_obtained: 7.5,
                is_correct: true,
            },
        )
        .await
        .expect_err("over ceiling");
    assert!(matches!(err, Error::Validation(_)));

    let (graded_attempt, graded_answer) = state
        .grading_service
        .grade_answer(
            &pending_answers[0].answer,
            GradeAnswerPayload {
                marks_obtained: 5.0,
                is_correct: true,
            },
        )
        .await
        .expect("grade");
    assert_eq!(graded_answer.marks_obtained, Decimal::from(5));
    assert_eq!(graded_attempt.status, "graded");
    assert_eq!(graded_attempt.score, Some(Decimal::from(9)));
    assert_eq!(graded_attempt.percentage, Some(Decimal::new(9000, 2)));
    assert_eq!(graded_attempt.is_passed, Some(true));

    let listed = state
        .attempt_service
        .list_attempts(
            quiz.id,
            ListAttemptsQuery {
                status: Some("graded".to_string()),
                page: None,
                per_page: None,
            },
        )
        .await
        .expect("list attempts");
    assert_eq!(listed.total, 1);
}

#[tokio::test]
#[ignore]
async fn abandoned_attempt_still_counts_toward_ceiling() {
    let pool = setup().await;
    let state = AppState::new(pool);
    let teacher = Uuid::new_v4();
    let student = Uuid::new_v4();

    let mut payload = base_quiz("Voidable");
    payload.max_attempts = Some(1);
    let quiz = state
        .quiz_service
        .create_quiz(payload, teacher)
        .await
        .expect("create");
    state
        .question_service
        .add_question(&quiz, true_false("q", 1.0, true))
        .await
        .expect("q");
    let quiz = state.quiz_service.publish(quiz.id).await.expect("publish");

    let attempt = state
        .attempt_service
        .start_attempt(quiz.id, student)
        .await
        .expect("start");
    let voided = state
        .attempt_service
        .abandon_attempt(attempt.id)
        .await
        .expect("abandon");
    assert_eq!(voided.status, "abandoned");

    let err = state
        .attempt_service
        .start_attempt(quiz.id, student)
        .await
        .expect_err("abandoned attempts still consume the slot");
    assert!(matches!(err, Error::AttemptLimitExceeded(_)));
}

#[tokio::test]
#[ignore]
async fn group_scoping_hides_quiz_from_outsiders() {
    let pool = setup().await;
    let state = AppState::new(pool.clone());
    let teacher = Uuid::new_v4();
    let member = Uuid::new_v4();
    let outsider = Uuid::new_v4();

    let group_id: Uuid =
        sqlx::query_scalar("INSERT INTO groups (name) VALUES ($1) RETURNING id")
            .bind("Cohort A")
            .fetch_one(&pool)
            .await
            .expect("group");
    sqlx::query("INSERT INTO group_members (group_id, student_id) VALUES ($1, $2)")
        .bind(group_id)
        .bind(member)
        .execute(&pool)
        .await
        .expect("membership");

    let mut payload = base_quiz("Scoped");
    payload.group_id = Some(group_id);
    let quiz = state
        .quiz_service
        .create_quiz(payload, teacher)
        .await
        .expect("create");
    state
        .question_service
        .add_question(&quiz, true_false("q", 1.0, true))
        .await
        .expect("q");
    let quiz = state.quiz_service.publish(quiz.id).await.expect("publish");

    state
        .attempt_service
        .start_attempt(quiz.id, member)
        .await
        .expect("member may start");

    let err = state
        .attempt_service
        .start_attempt(quiz.id, outsider)
        .await
        .expect_err("outsider sees nothing");
    assert!(matches!(err, Error::NotFound(_)));

    let visible = state
        .quiz_service
        .available_for_student(outsider, chrono::Utc::now())
        .await
        .expect("catalogue");
    assert!(visible.iter().all(|row| row.quiz.id != quiz.id));
}

#[tokio::test]
#[ignore]
async fn delete_question_refused_once_answers_are_graded() {
    let pool = setup().await;
    let state = AppState::new(pool);
    let teacher = Uuid::new_v4();
    let student = Uuid::new_v4();

    let quiz = state
        .quiz_service
        .create_quiz(base_quiz("Sticky"), teacher)
        .await
        .expect("create");
    state
        .question_service
        .add_question(&quiz, true_false("q", 2.0, true))
        .await
        .expect("q");
    let quiz = state.quiz_service.publish(quiz.id).await.expect("publish");

    let questions = state
        .question_service
        .list_questions(quiz.id)
        .await
        .expect("questions");
    let tf = &questions[0];
    let true_option = tf
        .options
        .iter()
        .find(|o| o.option_text == "True")
        .expect("true option");

    let attempt = state
        .attempt_service
        .start_attempt(quiz.id, student)
        .await
        .expect("start");
    state
        .attempt_service
        .submit_attempt(
            attempt.id,
            student,
            vec![SaveAnswerRequest {
                question_id: tf.question.id,
                selected_option_id: Some(true_option.id),
                answer_text: None,
            }],
        )
        .await
        .expect("submit grades the answer");

    let quiz = state.quiz_service.unpublish(quiz.id).await.expect("unpublish");
    let question = state
        .question_service
        .get_question(tf.question.id)
        .await
        .expect("reload question");
    let err = state
        .question_service
        .delete_question(&quiz, &question)
        .await
        .expect_err("graded answers pin the question");
    assert!(matches!(err, Error::Conflict(_)));

    // The question and its graded answer both survive.
    let answers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM answers WHERE question_id = $1")
        .bind(question.id)
        .fetch_one(&state.pool)
        .await
        .expect("count");
    assert_eq!(answers, 1);
}

#[tokio::test]
#[ignore]
async fn update_clears_nullable_fields_on_explicit_null() {
    let pool = setup().await;
    let state = AppState::new(pool.clone());
    let teacher = Uuid::new_v4();

    let group_id: Uuid =
        sqlx::query_scalar("INSERT INTO groups (name) VALUES ($1) RETURNING id")
            .bind("Cohort B")
            .fetch_one(&pool)
            .await
            .expect("group");

    let mut payload = base_quiz("Windowed");
    payload.available_from = Some(chrono::Utc::now());
    payload.available_until = Some(chrono::Utc::now() + chrono::Duration::days(7));
    payload.group_id = Some(group_id);
    let quiz = state
        .quiz_service
        .create_quiz(payload, teacher)
        .await
        .expect("create");
    assert!(quiz.available_until.is_some());
    assert_eq!(quiz.group_id, Some(group_id));

    let update = UpdateQuizPayload {
        title: None,
        description: None,
        instructions: None,
        duration_minutes: None,
        pass_percentage: None,
        max_attempts: None,
        shuffle_questions: None,
        shuffle_answers: None,
        show_correct_answers: None,
        show_score_immediately: None,
        available_from: None,
        available_until: Some(None),
        group_id: Some(None),
    };
    let quiz = state
        .quiz_service
        .update_quiz(quiz.id, update)
        .await
        .expect("update");
    assert!(quiz.available_from.is_some(), "absent field keeps its value");
    assert!(quiz.available_until.is_none(), "explicit null clears the bound");
    assert!(quiz.group_id.is_none(), "explicit null clears the group");
}

#[tokio::test]
#[ignore]
async fn retired_quiz_cannot_be_republished() {
    let pool = setup().await;
    let state = AppState::new(pool);
    let teacher = Uuid::new_v4();
    let student = Uuid::new_v4();

    let quiz = state
        .quiz_service
        .create_quiz(base_quiz("Ephemeral"), teacher)
        .await
        .expect("create");
    state
        .question_service
        .add_question(&quiz, true_false("q", 1.0, true))
        .await
        .expect("q");
    let quiz = state.quiz_service.publish(quiz.id).await.expect("publish");
    state
        .attempt_service
        .start_attempt(quiz.id, student)
        .await
        .expect("attempt pins the quiz");

    let deleted = state.quiz_service.retire_quiz(quiz.id).await.expect("retire");
    assert!(!deleted, "quizzes with attempts soft-retire");

    let err = state
        .quiz_service
        .publish(quiz.id)
        .await
        .expect_err("retired quizzes stay down");
    assert!(matches!(err, Error::InvalidState(_)));
}
