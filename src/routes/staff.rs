use axum::{
    extract::{Path, State},
    response::Json,
    Extension,
};
use uuid::Uuid;
use validator::Validate;

use crate::dto::staff_dto::{
    AdminResultResponse, ClearFlagRequest, GradeAnswerRequest, RemarksRequest,
    ReviewQueueResponse,
};
use crate::error::Result;
use crate::middleware::auth::AuthContext;
use crate::AppState;

#[utoipa::path(
    get,
    path = "/api/staff/submissions/{id}",
    params(("id" = Uuid, Path, description = "Submission ID")),
    responses(
        (status = 200, description = "Full submission detail with answer key", body = AdminResultResponse),
        (status = 404, description = "Submission not found")
    )
)]
#[axum::debug_handler]
pub async fn get_submission(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AdminResultResponse>> {
    Ok(Json(state.staff_service.admin_result(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/staff/submissions/{id}/grade-answer",
    params(("id" = Uuid, Path, description = "Submission ID")),
    request_body = GradeAnswerRequest,
    responses(
        (status = 200, description = "Answer graded", body = AdminResultResponse),
        (status = 400, description = "Marks out of range or not a descriptive answer"),
        (status = 404, description = "Submission or question not found")
    )
)]
#[axum::debug_handler]
pub async fn grade_answer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<GradeAnswerRequest>,
) -> Result<Json<AdminResultResponse>> {
    payload.validate()?;
    Ok(Json(state.staff_service.grade_answer(id, &auth, payload).await?))
}

#[utoipa::path(
    post,
    path = "/api/staff/submissions/{id}/regrade",
    params(("id" = Uuid, Path, description = "Submission ID")),
    responses(
        (status = 200, description = "Submission regraded", body = AdminResultResponse),
        (status = 400, description = "Attempt is still open")
    )
)]
#[axum::debug_handler]
pub async fn regrade(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<AdminResultResponse>> {
    Ok(Json(state.staff_service.regrade(id, &auth).await?))
}

#[utoipa::path(
    post,
    path = "/api/staff/submissions/{id}/clear-flag",
    params(("id" = Uuid, Path, description = "Submission ID")),
    request_body = ClearFlagRequest,
    responses(
        (status = 200, description = "Flag cleared", body = AdminResultResponse),
        (status = 404, description = "Submission not found")
    )
)]
#[axum::debug_handler]
pub async fn clear_flag(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ClearFlagRequest>,
) -> Result<Json<AdminResultResponse>> {
    payload.validate()?;
    Ok(Json(
        state
            .staff_service
            .clear_flag(id, &auth, payload.review_notes)
            .await?,
    ))
}

#[utoipa::path(
    post,
    path = "/api/staff/submissions/{id}/remarks",
    params(("id" = Uuid, Path, description = "Submission ID")),
    request_body = RemarksRequest,
    responses(
        (status = 200, description = "Remarks saved", body = AdminResultResponse),
        (status = 400, description = "Attempt is still open")
    )
)]
#[axum::debug_handler]
pub async fn set_remarks(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RemarksRequest>,
) -> Result<Json<AdminResultResponse>> {
    payload.validate()?;
    Ok(Json(
        state
            .staff_service
            .set_remarks(id, &auth, payload.remarks)
            .await?,
    ))
}

#[utoipa::path(
    get,
    path = "/api/staff/exams/{exam_id}/review-queue",
    params(("exam_id" = Uuid, Path, description = "Exam ID")),
    responses(
        (status = 200, description = "Attempts awaiting staff attention", body = ReviewQueueResponse),
        (status = 404, description = "Exam not found")
    )
)]
#[axum::debug_handler]
pub async fn review_queue(
    State(state): State<AppState>,
    Path(exam_id): Path<Uuid>,
) -> Result<Json<ReviewQueueResponse>> {
    Ok(Json(state.staff_service.review_queue(exam_id).await?))
}
