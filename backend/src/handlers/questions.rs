// src/handlers/questions.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use validator::Validate;

use crate::{
    error::AppError,
    models::question::{
        ApproveSubjectRequest, NewQuestion, QuestionFilter, QuestionStatus, RejectQuestionRequest,
        SubmitQuestionRequest, SubmitQuestionsRequest,
    },
    store::RemoteStore,
    utils::{html::clean_html, jwt::Claims},
};

/// Validates one submitted question and sanitizes its text.
fn prepare(payload: SubmitQuestionRequest, submitted_by: i64) -> Result<NewQuestion, AppError> {
    payload.validate()?;
    payload.check_shape()?;

    let content = clean_html(&payload.content);
    if content.trim().is_empty() {
        return Err(AppError::BadRequest("Question content is empty after sanitization".to_string()));
    }
    Ok(payload.into_new_question(content, Some(submitted_by)))
}

/// Submits a batch of questions for approval.
/// Teachers and admins.
pub async fn submit_questions(
    State(remote): State<Arc<dyn RemoteStore>>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<SubmitQuestionsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    if payload.questions.is_empty() {
        return Err(AppError::BadRequest("No questions submitted".to_string()));
    }

    let questions = payload
        .questions
        .into_iter()
        .map(|q| prepare(q, user_id))
        .collect::<Result<Vec<_>, _>>()?;

    let stored = remote.submit_questions(questions).await.map_err(|e| {
        tracing::error!("Failed to submit questions: {}", e);
        e
    })?;

    tracing::info!(user_id, count = stored.len(), "Questions submitted for approval");
    Ok((StatusCode::CREATED, Json(stored)))
}

/// Lists questions, optionally by status, class and subject.
/// Teachers and admins.
pub async fn list_questions(
    State(remote): State<Arc<dyn RemoteStore>>,
    Query(filter): Query<QuestionFilter>,
) -> Result<impl IntoResponse, AppError> {
    let questions = remote.list_questions(&filter).await?;
    Ok(Json(questions))
}

/// Edits a rejected question and sends it back for review.
/// Only the author (or an admin) may resubmit.
pub async fn resubmit_question(
    State(remote): State<Arc<dyn RemoteStore>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<SubmitQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let existing = remote
        .get_question(id)
        .await?
        .ok_or(AppError::NotFound("Question not found".to_string()))?;

    if !claims.is_admin() && existing.submitted_by != Some(user_id) {
        return Err(AppError::Forbidden("You can only resubmit your own questions".to_string()));
    }
    if existing.status != QuestionStatus::Rejected {
        return Err(AppError::Conflict("Only rejected questions can be resubmitted".to_string()));
    }

    let question = remote.resubmit_question(id, prepare(payload, user_id)?).await?;
    tracing::info!(question_id = id, user_id, "Question resubmitted");
    Ok(Json(question))
}

/// Approves a question.
/// Admin only.
pub async fn approve_question(
    State(remote): State<Arc<dyn RemoteStore>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let question = remote.set_question_status(id, QuestionStatus::Approved, None).await?;
    tracing::info!(question_id = id, "Question approved");
    Ok(Json(question))
}

/// Rejects a question with a comment for its author.
/// Admin only.
pub async fn reject_question(
    State(remote): State<Arc<dyn RemoteStore>>,
    Path(id): Path<i64>,
    Json(payload): Json<RejectQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let question = remote
        .set_question_status(id, QuestionStatus::Rejected, Some(payload.comment))
        .await?;
    tracing::info!(question_id = id, "Question rejected");
    Ok(Json(question))
}

/// Approves every pending question of one subject.
/// Admin only.
pub async fn approve_subject(
    State(remote): State<Arc<dyn RemoteStore>>,
    Json(payload): Json<ApproveSubjectRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let approved = remote.approve_subject(&payload.subject).await?;
    tracing::info!(subject = %payload.subject, approved, "Subject questions approved");
    Ok(Json(json!({ "subject": payload.subject, "approved": approved })))
}
