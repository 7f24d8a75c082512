// src/store/remote.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::AppError,
    models::{
        attempt::{AttemptOutcome, ExamAttempt},
        exam::{ExamFilter, NewExam, ScheduledExam},
        exam_record::ExamEntry,
        grade::GradeReport,
        question::{NewQuestion, Question, QuestionFilter, QuestionStatus},
    },
};

/// The request/response collaborator behind the exam engine.
///
/// Implementations must make `mark_attempt_complete` a one-shot transition:
/// a second call for the same pair returns `AppError::Conflict`.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    // Question bank

    async fn submit_questions(&self, questions: Vec<NewQuestion>) -> Result<Vec<Question>, AppError>;

    async fn list_questions(&self, filter: &QuestionFilter) -> Result<Vec<Question>, AppError>;

    async fn get_question(&self, id: i64) -> Result<Option<Question>, AppError>;

    async fn set_question_status(
        &self,
        id: i64,
        status: QuestionStatus,
        comment: Option<String>,
    ) -> Result<Question, AppError>;

    /// Replaces a question's fields and puts it back to `pending`.
    async fn resubmit_question(&self, id: i64, question: NewQuestion) -> Result<Question, AppError>;

    /// Approves every pending question of `subject`. Returns how many changed.
    async fn approve_subject(&self, subject: &str) -> Result<u64, AppError>;

    /// Approved questions for (subject, class, term), ordered by id.
    async fn list_approved_questions(
        &self,
        subject: &str,
        class_name: &str,
        term: &str,
    ) -> Result<Vec<Question>, AppError>;

    // Exams

    async fn create_exam(&self, exam: NewExam) -> Result<ScheduledExam, AppError>;

    async fn update_exam(&self, id: i64, exam: NewExam) -> Result<ScheduledExam, AppError>;

    async fn delete_exam(&self, id: i64) -> Result<(), AppError>;

    async fn get_exam(&self, id: i64) -> Result<Option<ScheduledExam>, AppError>;

    async fn list_exams(&self, filter: &ExamFilter) -> Result<Vec<ScheduledExam>, AppError>;

    /// Questions of an exam in the order of its `question_ids` snapshot.
    async fn get_exam_questions(&self, exam_id: i64) -> Result<Vec<Question>, AppError>;

    // Attempts

    async fn get_attempt(&self, exam_id: i64, student_id: i64) -> Result<Option<ExamAttempt>, AppError>;

    /// Creates the attempt lazily, or moves a `not_started` one to `in_progress`.
    /// An attempt that is already in progress is returned unchanged.
    async fn begin_attempt(
        &self,
        exam_id: i64,
        student_id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<ExamAttempt, AppError>;

    async fn mark_attempt_complete(
        &self,
        exam_id: i64,
        student_id: i64,
        outcome: &AttemptOutcome,
    ) -> Result<(), AppError>;

    async fn attempt_taken(&self, exam_id: i64, student_id: i64) -> Result<bool, AppError> {
        Ok(self
            .get_attempt(exam_id, student_id)
            .await?
            .is_some_and(|a| a.is_completed()))
    }

    // Audit entries

    async fn record_exam_entry(&self, entry: &ExamEntry) -> Result<(), AppError>;

    async fn list_exam_entries(&self, exam_id: i64) -> Result<Vec<ExamEntry>, AppError>;

    // Grade reports

    async fn get_grade_record(
        &self,
        student_id: i64,
        class_name: &str,
        term: &str,
        session: &str,
    ) -> Result<Option<GradeReport>, AppError>;

    /// Inserts the report, or replaces the one with the same
    /// (student, class, term, session).
    async fn upsert_grade_record(&self, report: GradeReport) -> Result<GradeReport, AppError>;
}
