use crate::error::ApiError;
use crate::state::{validate_registration, AttendanceService};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use common::attendance::{
    ApiResponse, AttendanceEvent, DashboardStats, MarkAttendanceRequest, RecognitionSettings,
    RegisterStudentRequest, StudentDirectory, UpdateSettingsRequest,
};
use serde_json::json;

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Unwrap a JSON body, reporting extractor rejections in the API envelope
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => {
            tracing::warn!("Rejected request body: {}", rejection.body_text());
            Err(ApiError::new(rejection.status(), rejection.body_text()))
        }
    }
}

/// All attendance events, newest first
pub async fn list_attendance(State(state): State<AttendanceService>) -> ApiResult<Vec<AttendanceEvent>> {
    Ok(Json(ApiResponse::data(state.list_attendance().await)))
}

/// Recognise faces in a webcam frame and record attendance
pub async fn mark_attendance(
    State(state): State<AttendanceService>,
    payload: Result<Json<MarkAttendanceRequest>, JsonRejection>,
) -> ApiResult<Vec<AttendanceEvent>> {
    let request = body(payload)?;
    if request.image.trim().is_empty() {
        return Err(ApiError::bad_request("No image provided"));
    }

    let events = state.mark_attendance(&request.image).await;
    Ok(Json(ApiResponse::with_message(events, "Attendance processed")))
}

/// Register a student from one or more face images
pub async fn register_student(
    State(state): State<AttendanceService>,
    payload: Result<Json<RegisterStudentRequest>, JsonRejection>,
) -> ApiResult<()> {
    let request = body(payload)?;
    if request.student_id.trim().is_empty()
        || request.name.trim().is_empty()
        || request.images.is_empty()
    {
        return Err(ApiError::bad_request("Missing required registration data"));
    }
    validate_registration(&request.student_id, &request.name, request.images.len())
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    if state
        .register_student(&request.student_id, &request.name, &request.images)
        .await?
    {
        Ok(Json(ApiResponse::message("Student registered successfully")))
    } else {
        Err(ApiError::internal("Failed to register student"))
    }
}

/// Student directory keyed by id
pub async fn list_students(State(state): State<AttendanceService>) -> ApiResult<StudentDirectory> {
    Ok(Json(ApiResponse::data(state.students().await)))
}

pub async fn dashboard_stats(State(state): State<AttendanceService>) -> ApiResult<DashboardStats> {
    Ok(Json(ApiResponse::data(state.dashboard_stats().await)))
}

pub async fn get_settings(State(state): State<AttendanceService>) -> ApiResult<RecognitionSettings> {
    Ok(Json(ApiResponse::data(state.settings().await)))
}

/// Partially update the recognition settings
pub async fn update_settings(
    State(state): State<AttendanceService>,
    payload: Result<Json<UpdateSettingsRequest>, JsonRejection>,
) -> ApiResult<RecognitionSettings> {
    let request = body(payload)?;
    let settings = state
        .update_settings(&request)
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(Json(ApiResponse::with_message(settings, "Settings updated")))
}

/// Health check endpoint
pub async fn healthz(State(state): State<AttendanceService>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "attendance-service",
            "node_id": state.node_id(),
        })),
    )
}

/// Readiness check endpoint
pub async fn readyz(State(state): State<AttendanceService>) -> impl IntoResponse {
    let locator = state.locator_id();
    if state.is_ready().await {
        (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "locator": locator
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not ready",
                "locator": locator
            })),
        )
    }
}

/// Metrics endpoint (Prometheus format)
pub async fn metrics() -> impl IntoResponse {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = telemetry::metrics::REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response();
    }

    match String::from_utf8(buffer) {
        Ok(s) => s.into_response(),
        Err(e) => {
            tracing::error!("Failed to convert metrics to UTF-8: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to convert metrics",
            )
                .into_response()
        }
    }
}
