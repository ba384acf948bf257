pub mod routes;

use crate::config::DEFAULT_MAX_BODY_BYTES;
use crate::state::AttendanceService;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the API router with the default body limit
pub fn router(state: AttendanceService) -> Router {
    router_with_body_limit(state, DEFAULT_MAX_BODY_BYTES)
}

/// Build the API router accepting request bodies up to `max_body_bytes`
pub fn router_with_body_limit(state: AttendanceService, max_body_bytes: usize) -> Router {
    Router::new()
        // Health and metrics endpoints
        .route("/healthz", get(routes::healthz))
        .route("/readyz", get(routes::readyz))
        .route("/metrics", get(routes::metrics))
        // Attendance endpoints
        .route("/api/attendance", get(routes::list_attendance))
        .route("/api/mark-attendance", post(routes::mark_attendance))
        .route("/api/register-student", post(routes::register_student))
        .route("/api/students", get(routes::list_students))
        .route("/api/dashboard-stats", get(routes::dashboard_stats))
        .route(
            "/api/settings",
            get(routes::get_settings).post(routes::update_settings),
        )
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
