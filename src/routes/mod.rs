pub mod health;
pub mod staff;
pub mod student;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::middleware::auth::{require_staff, require_student};
use crate::middleware::rate_limit::{per_user_middleware, rps_middleware, RateLimiter, UserRateLimiter};
use crate::AppState;

pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();

    let integrity_events = Router::new()
        .route(
            "/api/student/submissions/:id/events",
            post(student::report_event),
        )
        .layer(from_fn_with_state(
            UserRateLimiter::new(config.event_rps_per_user),
            per_user_middleware,
        ));

    let student_api = Router::new()
        .route(
            "/api/student/exams/:exam_id/instructions",
            get(student::get_instructions),
        )
        .route("/api/student/exams/:exam_id/start", post(student::start_exam))
        .route(
            "/api/student/exams/:exam_id/attempts",
            get(student::list_attempts),
        )
        .route(
            "/api/student/exams/:exam_id/result",
            get(student::get_exam_result),
        )
        .route("/api/student/submissions/:id/draft", put(student::save_draft))
        .route(
            "/api/student/submissions/:id/submit",
            post(student::submit_exam),
        )
        .route(
            "/api/student/submissions/:id/result",
            get(student::get_submission_result),
        )
        .merge(integrity_events)
        .layer(from_fn_with_state(state.clone(), require_student))
        .layer(from_fn_with_state(
            RateLimiter::new(config.public_rps),
            rps_middleware,
        ));

    let staff_api = Router::new()
        .route("/api/staff/submissions/:id", get(staff::get_submission))
        .route(
            "/api/staff/submissions/:id/grade-answer",
            post(staff::grade_answer),
        )
        .route("/api/staff/submissions/:id/regrade", post(staff::regrade))
        .route(
            "/api/staff/submissions/:id/clear-flag",
            post(staff::clear_flag),
        )
        .route(
            "/api/staff/submissions/:id/remarks",
            post(staff::set_remarks),
        )
        .route(
            "/api/staff/exams/:exam_id/review-queue",
            get(staff::review_queue),
        )
        .layer(from_fn_with_state(state.clone(), require_staff))
        .layer(from_fn_with_state(
            RateLimiter::new(config.staff_rps),
            rps_middleware,
        ));

    Router::new()
        .route("/health", get(health::health))
        .merge(student_api)
        .merge(staff_api)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
