// src/services/scheduler.rs

use chrono::{DateTime, Utc};
use validator::Validate;

use crate::{
    error::AppError,
    models::exam::{ExamFilter, ExamView, ScheduleExamRequest, ScheduleResponse},
    services::selector::{Selection, SelectionCriteria, select_questions},
    store::RemoteStore,
};

/// Admin-side exam scheduling. Create freezes the selected question ids;
/// update selects again from the current pool.
pub struct ExamScheduler<'a> {
    remote: &'a dyn RemoteStore,
}

impl<'a> ExamScheduler<'a> {
    pub fn new(remote: &'a dyn RemoteStore) -> Self {
        Self { remote }
    }

    async fn select_for(&self, req: &ScheduleExamRequest) -> Result<(Selection, Option<String>), AppError> {
        let pool = self
            .remote
            .list_approved_questions(&req.subject, &req.class_name, &req.term)
            .await?;

        let criteria = SelectionCriteria {
            subject: &req.subject,
            class_name: &req.class_name,
            term: &req.term,
            session: &req.session,
        };
        let requested = usize::try_from(req.num_questions).unwrap_or(0);
        let selection = select_questions(&pool, requested, &criteria);

        if selection.is_empty() {
            return Err(AppError::BadRequest(
                "No questions found for the selected subject, class and term".to_string(),
            ));
        }

        let warning = (selection.shortfall() > 0).then(|| {
            tracing::warn!(
                subject = %req.subject,
                class_name = %req.class_name,
                term = %req.term,
                requested,
                selected = selection.questions.len(),
                "Question pool ran short"
            );
            format!(
                "Only {} of {} requested questions were available",
                selection.questions.len(),
                requested
            )
        });

        Ok((selection, warning))
    }

    pub async fn create(&self, req: ScheduleExamRequest) -> Result<ScheduleResponse, AppError> {
        req.validate()?;
        let scheduled_date = req.scheduled_at()?;
        let (selection, warning) = self.select_for(&req).await?;

        let exam = self
            .remote
            .create_exam(req.into_new_exam(scheduled_date, selection.question_ids()))
            .await?;

        tracing::info!(
            exam_id = exam.id,
            subject = %exam.subject,
            class_name = %exam.class_name,
            from_current = selection.from_current,
            from_previous = selection.from_previous,
            "Exam scheduled"
        );
        Ok(ScheduleResponse { exam, warning })
    }

    pub async fn update(&self, exam_id: i64, req: ScheduleExamRequest) -> Result<ScheduleResponse, AppError> {
        req.validate()?;
        let scheduled_date = req.scheduled_at()?;
        if self.remote.get_exam(exam_id).await?.is_none() {
            return Err(AppError::NotFound("Exam not found".to_string()));
        }
        let (selection, warning) = self.select_for(&req).await?;

        let exam = self
            .remote
            .update_exam(exam_id, req.into_new_exam(scheduled_date, selection.question_ids()))
            .await?;

        tracing::info!(exam_id, questions = exam.question_ids.len(), "Exam updated");
        Ok(ScheduleResponse { exam, warning })
    }

    /// Irreversible; refused unless the operator confirmed.
    pub async fn delete(&self, exam_id: i64, confirmed: bool) -> Result<(), AppError> {
        if !confirmed {
            return Err(AppError::BadRequest(
                "Deleting an exam is irreversible; pass confirm=true".to_string(),
            ));
        }
        self.remote.delete_exam(exam_id).await?;
        tracing::info!(exam_id, "Exam deleted");
        Ok(())
    }

    pub async fn list(&self, filter: &ExamFilter, now: DateTime<Utc>) -> Result<Vec<ExamView>, AppError> {
        let exams = self.remote.list_exams(filter).await?;
        Ok(exams.into_iter().map(|e| ExamView::at(e, now)).collect())
    }
}
