// src/handlers/exams.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;

use crate::{
    error::AppError,
    models::exam::{DeleteExamQuery, ExamFilter, ScheduleExamRequest},
    services::scheduler::ExamScheduler,
    store::RemoteStore,
};

/// Schedules an exam and freezes its question selection.
/// Admin only.
pub async fn create_exam(
    State(remote): State<Arc<dyn RemoteStore>>,
    Json(payload): Json<ScheduleExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    let response = ExamScheduler::new(&*remote).create(payload).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Lists scheduled exams with their derived status.
/// Admin only.
pub async fn list_exams(
    State(remote): State<Arc<dyn RemoteStore>>,
    Query(filter): Query<ExamFilter>,
) -> Result<impl IntoResponse, AppError> {
    let exams = ExamScheduler::new(&*remote).list(&filter, Utc::now()).await?;
    Ok(Json(exams))
}

/// Reschedules an exam. Questions are selected again from the current pool.
/// Admin only.
pub async fn update_exam(
    State(remote): State<Arc<dyn RemoteStore>>,
    Path(id): Path<i64>,
    Json(payload): Json<ScheduleExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    let response = ExamScheduler::new(&*remote).update(id, payload).await?;
    Ok(Json(response))
}

/// Deletes an exam. Requires `?confirm=true`.
/// Admin only.
pub async fn delete_exam(
    State(remote): State<Arc<dyn RemoteStore>>,
    Path(id): Path<i64>,
    Query(query): Query<DeleteExamQuery>,
) -> Result<impl IntoResponse, AppError> {
    ExamScheduler::new(&*remote).delete(id, query.confirm).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Audit records of everyone who sat an exam.
/// Teachers and admins.
pub async fn list_entries(
    State(remote): State<Arc<dyn RemoteStore>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if remote.get_exam(id).await?.is_none() {
        return Err(AppError::NotFound("Exam not found".to_string()));
    }
    let entries = remote.list_exam_entries(id).await?;
    Ok(Json(entries))
}
