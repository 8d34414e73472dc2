use assessment_backend::{
    config::{get_config, init_config},
    database::pool::create_pool,
    middleware::auth::{require_student, require_teacher},
    middleware::rate_limit::{rps_middleware, SurfaceLimiter},
    routes, AppState,
};
use axum::{
    routing::{get, patch, post},
    Router,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    init_config()?;
    let config = get_config();

    let pool = create_pool().await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let app_state = AppState::new(pool);

    {
        let state = app_state.clone();
        let interval = Duration::from_secs(config.sweep_interval_secs);
        tokio::spawn(async move {
            loop {
                match state.attempt_service.expire_overdue_attempts().await {
                    Ok(0) => {}
                    Ok(n) => info!(expired = n, "Timed out overdue attempts"),
                    Err(e) => tracing::error!(error = ?e, "Attempt expiry sweep error"),
                }
                tokio::time::sleep(interval).await;
            }
        });
    }

    let base_routes = Router::new().route("/health", get(routes::health::health_check));

    let authoring_api = Router::new()
        .route(
            "/api/authoring/quizzes",
            get(routes::authoring::list_quizzes).post(routes::authoring::create_quiz),
        )
        .route(
            "/api/authoring/quizzes/:id",
            get(routes::authoring::get_quiz)
                .patch(routes::authoring::update_quiz)
                .delete(routes::authoring::retire_quiz),
        )
        .route(
            "/api/authoring/quizzes/:id/publish",
            post(routes::authoring::publish_quiz),
        )
        .route(
            "/api/authoring/quizzes/:id/unpublish",
            post(routes::authoring::unpublish_quiz),
        )
        .route(
            "/api/authoring/quizzes/:id/questions",
            post(routes::authoring::add_question),
        )
        .route(
            "/api/authoring/quizzes/:id/questions/reorder",
            post(routes::authoring::reorder_questions),
        )
        .route(
            "/api/authoring/questions/:id",
            patch(routes::authoring::update_question).delete(routes::authoring::delete_question),
        )
        .route(
            "/api/authoring/quizzes/:id/pending-grading",
            get(routes::authoring::pending_grading),
        )
        .route(
            "/api/authoring/answers/:id/grade",
            post(routes::authoring::grade_answer),
        )
        .route(
            "/api/authoring/quizzes/:id/attempts",
            get(routes::authoring::list_attempts),
        )
        .route(
            "/api/authoring/attempts/:id/abandon",
            post(routes::authoring::abandon_attempt),
        )
        .layer(axum::middleware::from_fn(require_teacher))
        .layer(axum::middleware::from_fn_with_state(
            SurfaceLimiter::new(config.authoring_rps),
            rps_middleware,
        ));

    let student_api = Router::new()
        .route(
            "/api/student/quizzes",
            get(routes::student::available_quizzes),
        )
        .route(
            "/api/student/quizzes/:id/attempts",
            post(routes::student::start_attempt),
        )
        .route(
            "/api/student/attempts/:id",
            get(routes::student::get_attempt),
        )
        .route(
            "/api/student/attempts/:id/answers",
            patch(routes::student::save_answer),
        )
        .route(
            "/api/student/attempts/:id/submit",
            post(routes::student::submit_attempt),
        )
        .route(
            "/api/student/attempts/:id/result",
            get(routes::student::attempt_result),
        )
        .layer(axum::middleware::from_fn(require_student))
        .layer(axum::middleware::from_fn_with_state(
            SurfaceLimiter::new(config.student_rps),
            rps_middleware,
        ));

    let app = base_routes
        .merge(authoring_api)
        .merge(student_api)
        .with_state(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
