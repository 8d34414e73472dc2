use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use sqlx::PgPool;

pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use services::attempt_service::AttemptService;
use services::grading_service::GradingService;
use services::question_service::QuestionService;
use services::quiz_service::QuizService;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub quiz_service: QuizService,
    pub question_service: QuestionService,
    pub attempt_service: AttemptService,
    pub grading_service: GradingService,
}

impl AppState {
    pub fn new(pool: PgPool) -> Self {
        let config = config::get_config();
        let default_pass = Decimal::from_f64(config.default_pass_percentage)
            .unwrap_or_else(|| Decimal::from(60));
        Self {
            quiz_service: QuizService::new(pool.clone(), default_pass),
            question_service: QuestionService::new(pool.clone()),
            attempt_service: AttemptService::new(pool.clone()),
            grading_service: GradingService::new(pool.clone()),
            pool,
        }
    }
}
