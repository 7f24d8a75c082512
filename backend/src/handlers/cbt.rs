// src/handlers/cbt.rs

//! Student-facing exam endpoints.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use serde::Deserialize;

use crate::{
    config::Config,
    error::AppError,
    models::{attempt::AttemptStatusResponse, exam::ExamFilter, grade::GradeQuery},
    services::{
        listing,
        runner::{Navigation, SessionManager},
    },
    store::{LocalStore, RemoteStore},
    utils::jwt::Claims,
};

#[derive(Debug, Default, Deserialize)]
pub struct StudentExamQuery {
    pub term: Option<String>,
    pub session: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub question_id: i64,
    pub answer: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub confirmed: bool,
}

/// Exams for the student's class.
pub async fn list_exams(
    State(remote): State<Arc<dyn RemoteStore>>,
    State(local): State<Arc<dyn LocalStore>>,
    State(config): State<Config>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<StudentExamQuery>,
) -> Result<impl IntoResponse, AppError> {
    let student = claims.student()?;
    let filter = ExamFilter {
        class_name: Some(student.class_name),
        term: query.term,
        session: query.session,
        ..Default::default()
    };

    let exams = listing::student_exams(
        &*remote,
        &*local,
        student.id,
        &filter,
        Utc::now(),
        Duration::seconds(config.just_completed_grace_secs),
    )
    .await?;
    Ok(Json(exams))
}

pub async fn attempt_status(
    State(remote): State<Arc<dyn RemoteStore>>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let taken = remote.attempt_taken(exam_id, claims.user_id()?).await?;
    Ok(Json(AttemptStatusResponse { taken }))
}

/// Checks eligibility and enters the exam.
pub async fn start_exam(
    State(sessions): State<SessionManager>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let view = sessions.start(exam_id, claims.student()?, Utc::now()).await?;
    Ok(Json(view))
}

/// Current state of an exam in progress, e.g. after a page reload.
pub async fn get_session(
    State(sessions): State<SessionManager>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let view = sessions.resume(exam_id, claims.student()?, Utc::now()).await?;
    Ok(Json(view))
}

pub async fn save_answer(
    State(sessions): State<SessionManager>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
    Json(payload): Json<AnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    let view = sessions
        .answer(exam_id, claims.user_id()?, payload.question_id, payload.answer)
        .await?;
    Ok(Json(view))
}

pub async fn navigate(
    State(sessions): State<SessionManager>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
    Json(nav): Json<Navigation>,
) -> Result<impl IntoResponse, AppError> {
    let view = sessions.navigate(exam_id, claims.user_id()?, nav).await?;
    Ok(Json(view))
}

/// Without `confirmed: true` this returns the attempted/total summary to confirm.
pub async fn submit_exam(
    State(sessions): State<SessionManager>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
    Json(payload): Json<SubmitRequest>,
) -> Result<impl IntoResponse, AppError> {
    let response = sessions
        .submit(exam_id, claims.user_id()?, payload.confirmed, Utc::now())
        .await?;
    Ok(Json(response))
}

/// The student's grade report for one term and session.
pub async fn get_grades(
    State(remote): State<Arc<dyn RemoteStore>>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<GradeQuery>,
) -> Result<impl IntoResponse, AppError> {
    let student = claims.student()?;
    let report = remote
        .get_grade_record(student.id, &student.class_name, &query.term, &query.session)
        .await?
        .ok_or(AppError::NotFound("No grade record for this term".to_string()))?;
    Ok(Json(report))
}
