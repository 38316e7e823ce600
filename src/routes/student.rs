use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    Extension,
};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::dto::student_dto::{
    AttemptsResponse, DraftSavedResponse, EventRecordedResponse, InstructionsResponse,
    ReportEventRequest, SaveDraftRequest, StartExamRequest, StartExamResponse,
    StudentResultResponse, SubmitExamRequest, SubmitExamResponse,
};
use crate::error::{Error, Result};
use crate::middleware::auth::AuthContext;
use crate::models::submission::SessionMetadata;
use crate::services::submission_service::InstructionsOutcome;
use crate::AppState;

fn session_from_headers(headers: &HeaderMap, fingerprint: String) -> SessionMetadata {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    SessionMetadata {
        browser_fingerprint: fingerprint,
        ip_address: header("x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string())),
        user_agent: header("user-agent"),
    }
}

#[utoipa::path(
    get,
    path = "/api/student/exams/{exam_id}/instructions",
    params(("exam_id" = Uuid, Path, description = "Exam ID")),
    responses(
        (status = 200, description = "Exam instructions", body = InstructionsResponse),
        (status = 403, description = "Not enrolled, unpublished, or outside the exam window"),
        (status = 404, description = "Exam not found")
    )
)]
#[axum::debug_handler]
pub async fn get_instructions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(exam_id): Path<Uuid>,
) -> Result<Response> {
    match state.submission_service.instructions(exam_id, &auth).await? {
        InstructionsOutcome::Available(body) => Ok(Json::<InstructionsResponse>(body).into_response()),
        InstructionsOutcome::Unavailable { error, exam } => {
            let mut body = json!({
                "error": error.code(),
                "message": error.to_string(),
                "exam": exam,
            });
            if let Error::NotStarted { minutes_until_start } = &error {
                body["minutes_until_start"] = json!(minutes_until_start);
            }
            Ok((error.status(), Json(body)).into_response())
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/student/exams/{exam_id}/start",
    params(("exam_id" = Uuid, Path, description = "Exam ID")),
    request_body = StartExamRequest,
    responses(
        (status = 201, description = "New attempt started", body = StartExamResponse),
        (status = 200, description = "Open attempt resumed", body = StartExamResponse),
        (status = 403, description = "Not allowed to start now"),
        (status = 409, description = "Concurrent session or attempt limit reached")
    )
)]
#[axum::debug_handler]
pub async fn start_exam(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(exam_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<StartExamRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let session = session_from_headers(&headers, payload.fingerprint);
    let started: StartExamResponse = state
        .submission_service
        .start(exam_id, &auth, session)
        .await?;
    let status = if started.is_resume {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(started)))
}

#[utoipa::path(
    get,
    path = "/api/student/exams/{exam_id}/attempts",
    params(("exam_id" = Uuid, Path, description = "Exam ID")),
    responses(
        (status = 200, description = "The caller's attempts", body = AttemptsResponse),
        (status = 404, description = "Exam not found")
    )
)]
#[axum::debug_handler]
pub async fn list_attempts(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(exam_id): Path<Uuid>,
) -> Result<Json<AttemptsResponse>> {
    let attempts = state.submission_service.my_attempts(exam_id, &auth).await?;
    Ok(Json(attempts))
}

#[utoipa::path(
    get,
    path = "/api/student/exams/{exam_id}/result",
    params(("exam_id" = Uuid, Path, description = "Exam ID")),
    responses(
        (status = 200, description = "Latest result, possibly withheld", body = StudentResultResponse),
        (status = 404, description = "No attempts")
    )
)]
#[axum::debug_handler]
pub async fn get_exam_result(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(exam_id): Path<Uuid>,
) -> Result<Json<StudentResultResponse>> {
    let result = state
        .submission_service
        .result_for_exam(exam_id, &auth)
        .await?;
    Ok(Json(result))
}

#[utoipa::path(
    put,
    path = "/api/student/submissions/{id}/draft",
    params(("id" = Uuid, Path, description = "Submission ID")),
    request_body = SaveDraftRequest,
    responses(
        (status = 200, description = "Draft saved", body = DraftSavedResponse),
        (status = 400, description = "Unknown question"),
        (status = 409, description = "Already submitted")
    )
)]
#[axum::debug_handler]
pub async fn save_draft(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SaveDraftRequest>,
) -> Result<Json<DraftSavedResponse>> {
    payload.validate()?;
    let saved = state
        .submission_service
        .save_draft(id, &auth, payload.answers)
        .await?;
    Ok(Json(saved))
}

#[utoipa::path(
    post,
    path = "/api/student/submissions/{id}/submit",
    params(("id" = Uuid, Path, description = "Submission ID")),
    request_body = SubmitExamRequest,
    responses(
        (status = 200, description = "Submitted", body = SubmitExamResponse),
        (status = 404, description = "Submission not found"),
        (status = 409, description = "Already submitted or rejected as late")
    )
)]
#[axum::debug_handler]
pub async fn submit_exam(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SubmitExamRequest>,
) -> Result<Json<SubmitExamResponse>> {
    payload.validate()?;
    let submitted = state
        .submission_service
        .submit(id, &auth, payload.answers)
        .await?;
    Ok(Json(submitted))
}

#[utoipa::path(
    post,
    path = "/api/student/submissions/{id}/events",
    params(("id" = Uuid, Path, description = "Submission ID")),
    request_body = ReportEventRequest,
    responses(
        (status = 201, description = "Event recorded", body = EventRecordedResponse),
        (status = 409, description = "Concurrent session or already submitted"),
        (status = 429, description = "Too many events")
    )
)]
#[axum::debug_handler]
pub async fn report_event(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReportEventRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let recorded: EventRecordedResponse = state
        .submission_service
        .report_event(
            id,
            &auth,
            payload.event_type,
            payload.metadata,
            payload.fingerprint,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(recorded)))
}

#[utoipa::path(
    get,
    path = "/api/student/submissions/{id}/result",
    params(("id" = Uuid, Path, description = "Submission ID")),
    responses(
        (status = 200, description = "Result, possibly withheld", body = StudentResultResponse),
        (status = 404, description = "Submission not found")
    )
)]
#[axum::debug_handler]
pub async fn get_submission_result(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<StudentResultResponse>> {
    let result = state
        .submission_service
        .result_for_submission(id, &auth)
        .await?;
    Ok(Json(result))
}
