// src/services/session.rs

//! One student's sitting of one exam.
//!
//! `Loading -> Active -> Submitting -> Terminated`. Everything a reload needs
//! (the exam blob, the answers and the fixed end time) is kept in the local
//! store, so `Active` can be entered again after the process restarts.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::AppError,
    models::{
        attempt::AttemptOutcome,
        exam::ScheduledExam,
        exam_record::ExamEntry,
        question::{PublicQuestion, Question},
    },
    services::{
        grading::{GradeTarget, score_answers},
        listing,
        outbox::{self, Delivery, PendingSubmission},
    },
    store::{
        LocalStore, RemoteStore,
        local::{answers_key, deadline_key, exam_blob_key, get_json, set_json},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Loading,
    Active,
    Submitting,
    Terminated,
}

/// Exam plus its questions, cached locally for the length of a sitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamBlob {
    pub exam: ScheduledExam,
    pub questions: Vec<Question>,
}

/// The student sitting the exam, as known from their token.
#[derive(Debug, Clone)]
pub struct StudentRef {
    pub id: i64,
    pub name: String,
    pub class_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Running(i64),
    /// The countdown hit zero; the session is now `Submitting`.
    Expired,
    /// Not counting down.
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubmitPreview {
    pub attempted: usize,
    pub total: usize,
    pub remaining_secs: i64,
}

impl SubmitPreview {
    pub fn message(&self) -> String {
        format!(
            "You attempted {} of {} questions. Submit now?",
            self.attempted, self.total
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitDecision {
    NeedsConfirmation(SubmitPreview),
    Proceed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReceipt {
    pub exam_id: i64,
    pub score: i32,
    pub raw_score: usize,
    pub total_questions: usize,
    pub auto_submitted: bool,
    /// Every remote write landed.
    pub synced: bool,
    /// The attempt had already been completed by another submission.
    pub duplicate: bool,
}

/// What the student sees. Never carries correct answers.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub exam_id: i64,
    pub subject: String,
    pub class_name: String,
    pub term: String,
    pub session: String,
    pub state: SessionState,
    pub current_index: usize,
    pub total_questions: usize,
    pub question: Option<PublicQuestion>,
    pub questions: Vec<PublicQuestion>,
    pub answers: BTreeMap<i64, String>,
    pub attempted: usize,
    pub remaining_secs: i64,
    pub ends_at: DateTime<Utc>,
}

pub struct CbtSession {
    state: SessionState,
    blob: ExamBlob,
    student: StudentRef,
    local: Arc<dyn LocalStore>,
    current_index: usize,
    answers: BTreeMap<i64, String>,
    ends_at: DateTime<Utc>,
    remaining_secs: i64,
    auto_submitted: bool,
}

fn seconds_until(ends_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (ends_at - now).num_seconds().max(0)
}

impl CbtSession {
    /// Enters `Loading` and comes out `Active`.
    ///
    /// The cached blob wins over a fresh fetch so a resumed sitting keeps the
    /// questions it started with. A persisted end time is reused as-is; only
    /// the first load fixes one.
    pub async fn load(
        exam_id: i64,
        student: StudentRef,
        remote: &dyn RemoteStore,
        local: Arc<dyn LocalStore>,
        now: DateTime<Utc>,
    ) -> Result<Self, AppError> {
        let blob = match cached_blob(&*local, exam_id, student.id) {
            Some(blob) => blob,
            None => {
                let exam = remote
                    .get_exam(exam_id)
                    .await?
                    .ok_or(AppError::NotFound("Exam not found".to_string()))?;
                let questions = remote.get_exam_questions(exam_id).await?;
                let blob = ExamBlob { exam, questions };
                if !blob.questions.is_empty() {
                    if let Err(e) = set_json(&*local, &exam_blob_key(exam_id, student.id), &blob) {
                        tracing::warn!(exam_id, error = %e, "Failed to cache exam blob");
                    }
                }
                blob
            }
        };

        if blob.questions.is_empty() {
            tracing::error!(exam_id, "Exam has no questions; refusing to start");
            return Err(AppError::NotFound("No questions found for this exam".to_string()));
        }

        let answers_key = answers_key(exam_id, student.id);
        let mut answers: BTreeMap<i64, String> =
            get_json(&*local, &answers_key)?.unwrap_or_default();
        answers.retain(|id, _| blob.questions.iter().any(|q| q.id == *id));

        let deadline_key = deadline_key(exam_id, student.id);
        let ends_at = match get_json::<DateTime<Utc>>(&*local, &deadline_key)? {
            Some(ends_at) => ends_at,
            None => {
                let ends_at = now + Duration::minutes(i64::from(blob.exam.time_limit_minutes.max(0)));
                set_json(&*local, &deadline_key, &ends_at)?;
                ends_at
            }
        };

        let mut session = Self {
            state: SessionState::Loading,
            blob,
            student,
            local,
            current_index: 0,
            answers,
            ends_at,
            remaining_secs: seconds_until(ends_at, now),
            auto_submitted: false,
        };
        session.state = SessionState::Active;

        tracing::info!(
            exam_id,
            student_id = session.student.id,
            remaining_secs = session.remaining_secs,
            answered = session.answers.len(),
            "CBT session active"
        );
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn exam(&self) -> &ScheduledExam {
        &self.blob.exam
    }

    pub fn remaining_secs(&self) -> i64 {
        self.remaining_secs
    }

    pub fn answers(&self) -> &BTreeMap<i64, String> {
        &self.answers
    }

    fn ensure_active(&self) -> Result<(), AppError> {
        match self.state {
            SessionState::Active => Ok(()),
            SessionState::Loading => Err(AppError::Conflict("Exam is still loading".to_string())),
            SessionState::Submitting | SessionState::Terminated => {
                Err(AppError::Conflict("Exam has already been submitted".to_string()))
            }
        }
    }

    /// Records an answer and persists the whole mapping before returning.
    pub fn answer(&mut self, question_id: i64, answer: String) -> Result<(), AppError> {
        self.ensure_active()?;
        if !self.blob.questions.iter().any(|q| q.id == question_id) {
            return Err(AppError::BadRequest("Question is not part of this exam".to_string()));
        }
        self.answers.insert(question_id, answer);
        set_json(
            &*self.local,
            &answers_key(self.blob.exam.id, self.student.id),
            &self.answers,
        )
    }

    pub fn next(&mut self) -> Result<usize, AppError> {
        self.ensure_active()?;
        if self.current_index + 1 < self.blob.questions.len() {
            self.current_index += 1;
        }
        Ok(self.current_index)
    }

    pub fn previous(&mut self) -> Result<usize, AppError> {
        self.ensure_active()?;
        self.current_index = self.current_index.saturating_sub(1);
        Ok(self.current_index)
    }

    pub fn jump(&mut self, index: usize) -> Result<usize, AppError> {
        self.ensure_active()?;
        if index >= self.blob.questions.len() {
            return Err(AppError::BadRequest(format!(
                "Question index {} is out of range",
                index
            )));
        }
        self.current_index = index;
        Ok(self.current_index)
    }

    /// One-second countdown step.
    ///
    /// The count never runs ahead of the wall clock, so a suspended process
    /// catches up on its next tick.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Tick {
        if self.state != SessionState::Active {
            return Tick::Idle;
        }
        let wall = seconds_until(self.ends_at, now);
        self.remaining_secs = (self.remaining_secs - 1).min(wall).max(0);
        if self.remaining_secs == 0 {
            self.state = SessionState::Submitting;
            self.auto_submitted = true;
            tracing::info!(
                exam_id = self.blob.exam.id,
                student_id = self.student.id,
                "Time is up; submitting automatically"
            );
            Tick::Expired
        } else {
            Tick::Running(self.remaining_secs)
        }
    }

    pub fn preview(&self) -> SubmitPreview {
        SubmitPreview {
            attempted: self.answers.len(),
            total: self.blob.questions.len(),
            remaining_secs: self.remaining_secs,
        }
    }

    /// A manual submit needs `confirmed`; an expired countdown does not.
    pub fn request_submit(&mut self, confirmed: bool) -> Result<SubmitDecision, AppError> {
        match self.state {
            SessionState::Active if !confirmed => Ok(SubmitDecision::NeedsConfirmation(self.preview())),
            SessionState::Active => {
                self.state = SessionState::Submitting;
                Ok(SubmitDecision::Proceed)
            }
            SessionState::Submitting => Ok(SubmitDecision::Proceed),
            SessionState::Loading => Err(AppError::Conflict("Exam is still loading".to_string())),
            SessionState::Terminated => {
                Err(AppError::Conflict("Exam has already been submitted".to_string()))
            }
        }
    }

    /// Scores the sitting, pushes it to the remote store and ends the session.
    ///
    /// Remote failures do not fail this call: they are logged, queued in the
    /// outbox, and the session still terminates with local state cleared.
    pub async fn finalize(
        &mut self,
        remote: &dyn RemoteStore,
        now: DateTime<Utc>,
    ) -> Result<SubmissionReceipt, AppError> {
        if self.state != SessionState::Submitting {
            return Err(AppError::Conflict("Exam is not being submitted".to_string()));
        }

        let exam = &self.blob.exam;
        let sheet = score_answers(&self.blob.questions, &self.answers);

        let already_taken = match remote.attempt_taken(exam.id, self.student.id).await {
            Ok(taken) => taken,
            Err(e) => {
                tracing::warn!(exam_id = exam.id, student_id = self.student.id, error = %e,
                    "Could not re-check attempt before submit");
                false
            }
        };

        let delivery = if already_taken {
            tracing::warn!(
                exam_id = exam.id,
                student_id = self.student.id,
                "Attempt already completed; submission not merged"
            );
            Delivery::Duplicate
        } else {
            let outcome = AttemptOutcome {
                score: sheet.component_score,
                answers: self.answers.clone(),
                completed_at: now,
            };
            let entry = ExamEntry {
                exam_id: exam.id,
                student_id: self.student.id,
                student_name: self.student.name.clone(),
                class_name: self.student.class_name.clone(),
                subject: exam.subject.clone(),
                term: exam.term.clone(),
                session: exam.session.clone(),
                score: sheet.component_score,
                raw_score: sheet.raw_score as i32,
                total_questions: sheet.total_questions as i32,
                breakdown: sheet.breakdown.clone(),
                created_at: Some(now),
            };
            let grade = GradeTarget {
                student_id: self.student.id,
                class_name: self.student.class_name.clone(),
                term: exam.term.clone(),
                session: exam.session.clone(),
                subject: exam.subject.clone(),
            };

            let mut pending = PendingSubmission::new(outcome, entry, grade);
            let delivery = outbox::deliver(remote, &mut pending).await;
            if delivery == Delivery::Partial {
                tracing::warn!(
                    exam_id = exam.id,
                    student_id = self.student.id,
                    "Submission queued for retry"
                );
                outbox::enqueue(&*self.local, pending);
            }
            delivery
        };

        self.clear_local(now);
        self.state = SessionState::Terminated;

        tracing::info!(
            exam_id = self.blob.exam.id,
            student_id = self.student.id,
            raw_score = sheet.raw_score,
            score = sheet.component_score,
            auto = self.auto_submitted,
            ?delivery,
            "CBT session submitted"
        );

        Ok(SubmissionReceipt {
            exam_id: self.blob.exam.id,
            score: sheet.component_score,
            raw_score: sheet.raw_score,
            total_questions: sheet.total_questions,
            auto_submitted: self.auto_submitted,
            synced: delivery != Delivery::Partial,
            duplicate: delivery == Delivery::Duplicate,
        })
    }

    fn clear_local(&self, now: DateTime<Utc>) {
        let exam_id = self.blob.exam.id;
        for key in [
            answers_key(exam_id, self.student.id),
            deadline_key(exam_id, self.student.id),
            exam_blob_key(exam_id, self.student.id),
        ] {
            if let Err(e) = self.local.remove(&key) {
                tracing::warn!(%key, error = %e, "Failed to clear local exam state");
            }
        }
        listing::mark_just_completed(&*self.local, self.student.id, exam_id, now);
    }

    pub fn view(&self) -> SessionView {
        let exam = &self.blob.exam;
        let questions: Vec<PublicQuestion> = self.blob.questions.iter().map(PublicQuestion::from).collect();
        SessionView {
            exam_id: exam.id,
            subject: exam.subject.clone(),
            class_name: exam.class_name.clone(),
            term: exam.term.clone(),
            session: exam.session.clone(),
            state: self.state,
            current_index: self.current_index,
            total_questions: questions.len(),
            question: questions.get(self.current_index).cloned(),
            questions,
            answers: self.answers.clone(),
            attempted: self.answers.len(),
            remaining_secs: self.remaining_secs,
            ends_at: self.ends_at,
        }
    }
}

/// The exam blob of a sitting in progress, if one is cached and usable.
fn cached_blob(local: &dyn LocalStore, exam_id: i64, student_id: i64) -> Option<ExamBlob> {
    match get_json::<ExamBlob>(local, &exam_blob_key(exam_id, student_id)) {
        Ok(Some(blob)) if blob.exam.id == exam_id && !blob.questions.is_empty() => Some(blob),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(exam_id, error = %e, "Failed to read cached exam blob");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{
            attempt::ExamAttempt,
            exam::{ExamFilter, NewExam},
            grade::{GradeReport, SubjectGradeRecord},
            question::{AnswerType, NewQuestion, QuestionFilter, QuestionStatus},
        },
        store::{MemoryLocalStore, MemoryRemoteStore, local::just_completed_key},
    };
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap()
    }

    fn student() -> StudentRef {
        StudentRef {
            id: 9,
            name: "Ada Obi".into(),
            class_name: "JSS2".into(),
        }
    }

    fn question(answer: &str) -> Question {
        Question {
            id: 0,
            content: "What is 2 + 2?".into(),
            answer_type: AnswerType::Multichoice,
            options: vec!["3".into(), "4".into(), "5".into()],
            correct_answer: answer.into(),
            subject: "Mathematics".into(),
            class_name: "JSS2".into(),
            term: "Second Term".into(),
            session: "2024/2025".into(),
            status: QuestionStatus::Approved,
            admin_comment: None,
            submitted_by: None,
            created_at: None,
        }
    }

    /// Ten questions whose correct answer is "4"; returns the exam id and question ids.
    async fn setup(remote: &MemoryRemoteStore, time_limit_minutes: i32) -> (i64, Vec<i64>) {
        let mut ids = Vec::new();
        for _ in 0..10 {
            ids.push(remote.seed_question(question("4")).await);
        }
        let exam = remote
            .create_exam(NewExam {
                subject: "Mathematics".into(),
                class_name: "JSS2".into(),
                term: "Second Term".into(),
                session: "2024/2025".into(),
                scheduled_date: start(),
                time_limit_minutes,
                num_questions: 10,
                question_ids: ids.clone(),
            })
            .await
            .unwrap();
        (exam.id, ids)
    }

    async fn load(remote: &MemoryRemoteStore, local: &Arc<MemoryLocalStore>, exam_id: i64, now: DateTime<Utc>) -> CbtSession {
        let local: Arc<dyn LocalStore> = local.clone();
        CbtSession::load(exam_id, student(), remote, local, now).await.unwrap()
    }

    #[tokio::test]
    async fn test_load_fixes_end_time_and_persists_blob() {
        let remote = MemoryRemoteStore::new();
        let local = Arc::new(MemoryLocalStore::new());
        let (exam_id, _) = setup(&remote, 30).await;

        let session = load(&remote, &local, exam_id, start()).await;
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.remaining_secs(), 30 * 60);
        assert!(local.get(&exam_blob_key(exam_id, 9)).unwrap().is_some());
        assert!(local.get(&deadline_key(exam_id, 9)).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_resume_recomputes_remaining_from_wall_clock() {
        let remote = MemoryRemoteStore::new();
        let local = Arc::new(MemoryLocalStore::new());
        let (exam_id, ids) = setup(&remote, 30).await;

        let mut first = load(&remote, &local, exam_id, start()).await;
        first.answer(ids[0], "4".into()).unwrap();
        first.answer(ids[1], "3".into()).unwrap();
        drop(first);

        let resumed = load(&remote, &local, exam_id, start() + Duration::minutes(12)).await;
        assert_eq!(resumed.remaining_secs(), 18 * 60);
        assert_eq!(resumed.answers().len(), 2);
        assert_eq!(resumed.answers()[&ids[1]], "3");
    }

    #[tokio::test]
    async fn test_missing_questions_is_terminal() {
        let remote = MemoryRemoteStore::new();
        let local: Arc<dyn LocalStore> = Arc::new(MemoryLocalStore::new());
        let exam = remote
            .create_exam(NewExam {
                subject: "Mathematics".into(),
                class_name: "JSS2".into(),
                term: "Second Term".into(),
                session: "2024/2025".into(),
                scheduled_date: start(),
                time_limit_minutes: 30,
                num_questions: 10,
                question_ids: vec![404],
            })
            .await
            .unwrap();

        let result = CbtSession::load(exam.id, student(), &remote, local.clone(), start()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));

        let missing = CbtSession::load(777, student(), &remote, local, start()).await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_answer_rejects_foreign_question() {
        let remote = MemoryRemoteStore::new();
        let local = Arc::new(MemoryLocalStore::new());
        let (exam_id, _) = setup(&remote, 30).await;
        let mut session = load(&remote, &local, exam_id, start()).await;

        assert!(matches!(session.answer(9999, "4".into()), Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_navigation_is_clamped_index_movement() {
        let remote = MemoryRemoteStore::new();
        let local = Arc::new(MemoryLocalStore::new());
        let (exam_id, _) = setup(&remote, 30).await;
        let mut session = load(&remote, &local, exam_id, start()).await;

        assert_eq!(session.previous().unwrap(), 0);
        assert_eq!(session.next().unwrap(), 1);
        assert_eq!(session.jump(9).unwrap(), 9);
        assert_eq!(session.next().unwrap(), 9);
        assert!(matches!(session.jump(10), Err(AppError::BadRequest(_))));
        assert_eq!(session.view().current_index, 9);
    }

    #[tokio::test]
    async fn test_countdown_expiry_moves_to_submitting() {
        let remote = MemoryRemoteStore::new();
        let local = Arc::new(MemoryLocalStore::new());
        let (exam_id, _) = setup(&remote, 1).await;
        let mut session = load(&remote, &local, exam_id, start()).await;

        assert_eq!(session.tick(start() + Duration::seconds(1)), Tick::Running(59));
        assert_eq!(session.tick(start() + Duration::seconds(60)), Tick::Expired);
        assert_eq!(session.state(), SessionState::Submitting);
        assert_eq!(session.tick(start() + Duration::seconds(61)), Tick::Idle);
        assert!(session.answer(1, "4".into()).is_err());
        assert_eq!(session.request_submit(false).unwrap(), SubmitDecision::Proceed);
    }

    #[tokio::test]
    async fn test_manual_submit_requires_confirmation() {
        let remote = MemoryRemoteStore::new();
        let local = Arc::new(MemoryLocalStore::new());
        let (exam_id, ids) = setup(&remote, 30).await;
        let mut session = load(&remote, &local, exam_id, start()).await;
        session.answer(ids[0], "4".into()).unwrap();

        match session.request_submit(false).unwrap() {
            SubmitDecision::NeedsConfirmation(preview) => {
                assert_eq!(preview.attempted, 1);
                assert_eq!(preview.total, 10);
                assert_eq!(preview.message(), "You attempted 1 of 10 questions. Submit now?");
            }
            other => panic!("expected confirmation, got {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.request_submit(true).unwrap(), SubmitDecision::Proceed);
        assert_eq!(session.state(), SessionState::Submitting);
    }

    #[tokio::test]
    async fn test_finalize_scores_merges_and_clears_local_state() {
        let remote = MemoryRemoteStore::new();
        let local = Arc::new(MemoryLocalStore::new());
        let (exam_id, ids) = setup(&remote, 30).await;
        remote
            .upsert_grade_record(GradeReport {
                id: None,
                student_id: 9,
                class_name: "JSS2".into(),
                term: "Second Term".into(),
                session: "2024/2025".into(),
                date_recorded: start(),
                subject_records: vec![SubjectGradeRecord::new("Mathematics", 15, 0)],
            })
            .await
            .unwrap();

        let mut session = load(&remote, &local, exam_id, start()).await;
        for id in &ids[..7] {
            session.answer(*id, "4".into()).unwrap();
        }
        session.answer(ids[7], "5".into()).unwrap();
        session.request_submit(true).unwrap();
        let receipt = session.finalize(&remote, start() + Duration::minutes(5)).await.unwrap();

        assert_eq!(receipt.raw_score, 7);
        assert_eq!(receipt.score, 42);
        assert!(receipt.synced);
        assert!(!receipt.duplicate);
        assert_eq!(session.state(), SessionState::Terminated);

        let report = remote
            .get_grade_record(9, "JSS2", "Second Term", "2024/2025")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            report.subject("Mathematics").unwrap(),
            &SubjectGradeRecord { subject: "Mathematics".into(), test: 15, exam: 42, total: 57 }
        );
        assert!(remote.attempt_taken(exam_id, 9).await.unwrap());
        let entries = remote.list_exam_entries(exam_id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].breakdown.len(), 10);

        assert!(local.get(&answers_key(exam_id, 9)).unwrap().is_none());
        assert!(local.get(&deadline_key(exam_id, 9)).unwrap().is_none());
        assert!(local.get(&exam_blob_key(exam_id, 9)).unwrap().is_none());
        assert!(local.get(&just_completed_key(9)).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_double_submit_never_double_merges() {
        let remote = MemoryRemoteStore::new();
        let local = Arc::new(MemoryLocalStore::new());
        let (exam_id, ids) = setup(&remote, 30).await;

        // Two tabs open on the same exam.
        let mut first = load(&remote, &local, exam_id, start()).await;
        let mut second = load(&remote, &local, exam_id, start()).await;
        first.answer(ids[0], "4".into()).unwrap();
        second.answer(ids[0], "4".into()).unwrap();
        second.answer(ids[1], "4".into()).unwrap();

        first.request_submit(true).unwrap();
        let receipt = first.finalize(&remote, start()).await.unwrap();
        assert!(!receipt.duplicate);

        second.request_submit(true).unwrap();
        let again = second.finalize(&remote, start()).await.unwrap();
        assert!(again.duplicate);

        let report = remote
            .get_grade_record(9, "JSS2", "Second Term", "2024/2025")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.subject("Mathematics").unwrap().exam, 6);
        assert_eq!(remote.list_exam_entries(exam_id).await.unwrap().len(), 1);

        assert!(matches!(first.request_submit(true), Err(AppError::Conflict(_))));
        assert!(matches!(first.finalize(&remote, start()).await, Err(AppError::Conflict(_))));
    }

    /// Delegates to the memory store; writes fail while `down` is set.
    struct FlakyRemote {
        inner: MemoryRemoteStore,
        down: AtomicBool,
    }

    impl FlakyRemote {
        fn check(&self) -> Result<(), AppError> {
            if self.down.load(Ordering::SeqCst) {
                Err(AppError::InternalServerError("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl RemoteStore for FlakyRemote {
        async fn submit_questions(&self, questions: Vec<NewQuestion>) -> Result<Vec<Question>, AppError> {
            self.inner.submit_questions(questions).await
        }

        async fn list_questions(&self, filter: &QuestionFilter) -> Result<Vec<Question>, AppError> {
            self.inner.list_questions(filter).await
        }

        async fn get_question(&self, id: i64) -> Result<Option<Question>, AppError> {
            self.inner.get_question(id).await
        }

        async fn set_question_status(
            &self,
            id: i64,
            status: QuestionStatus,
            comment: Option<String>,
        ) -> Result<Question, AppError> {
            self.inner.set_question_status(id, status, comment).await
        }

        async fn resubmit_question(&self, id: i64, question: NewQuestion) -> Result<Question, AppError> {
            self.inner.resubmit_question(id, question).await
        }

        async fn approve_subject(&self, subject: &str) -> Result<u64, AppError> {
            self.inner.approve_subject(subject).await
        }

        async fn list_approved_questions(
            &self,
            subject: &str,
            class_name: &str,
            term: &str,
        ) -> Result<Vec<Question>, AppError> {
            self.inner.list_approved_questions(subject, class_name, term).await
        }

        async fn create_exam(&self, exam: NewExam) -> Result<ScheduledExam, AppError> {
            self.inner.create_exam(exam).await
        }

        async fn update_exam(&self, id: i64, exam: NewExam) -> Result<ScheduledExam, AppError> {
            self.inner.update_exam(id, exam).await
        }

        async fn delete_exam(&self, id: i64) -> Result<(), AppError> {
            self.inner.delete_exam(id).await
        }

        async fn get_exam(&self, id: i64) -> Result<Option<ScheduledExam>, AppError> {
            self.inner.get_exam(id).await
        }

        async fn list_exams(&self, filter: &ExamFilter) -> Result<Vec<ScheduledExam>, AppError> {
            self.inner.list_exams(filter).await
        }

        async fn get_exam_questions(&self, exam_id: i64) -> Result<Vec<Question>, AppError> {
            self.inner.get_exam_questions(exam_id).await
        }

        async fn get_attempt(&self, exam_id: i64, student_id: i64) -> Result<Option<ExamAttempt>, AppError> {
            self.inner.get_attempt(exam_id, student_id).await
        }

        async fn begin_attempt(
            &self,
            exam_id: i64,
            student_id: i64,
            started_at: DateTime<Utc>,
        ) -> Result<ExamAttempt, AppError> {
            self.inner.begin_attempt(exam_id, student_id, started_at).await
        }

        async fn mark_attempt_complete(
            &self,
            exam_id: i64,
            student_id: i64,
            outcome: &AttemptOutcome,
        ) -> Result<(), AppError> {
            self.check()?;
            self.inner.mark_attempt_complete(exam_id, student_id, outcome).await
        }

        async fn record_exam_entry(&self, entry: &ExamEntry) -> Result<(), AppError> {
            self.check()?;
            self.inner.record_exam_entry(entry).await
        }

        async fn list_exam_entries(&self, exam_id: i64) -> Result<Vec<ExamEntry>, AppError> {
            self.inner.list_exam_entries(exam_id).await
        }

        async fn get_grade_record(
            &self,
            student_id: i64,
            class_name: &str,
            term: &str,
            session: &str,
        ) -> Result<Option<GradeReport>, AppError> {
            self.inner.get_grade_record(student_id, class_name, term, session).await
        }

        async fn upsert_grade_record(&self, report: GradeReport) -> Result<GradeReport, AppError> {
            self.check()?;
            self.inner.upsert_grade_record(report).await
        }
    }

    #[tokio::test]
    async fn test_remote_outage_still_ends_the_sitting() {
        let remote = FlakyRemote {
            inner: MemoryRemoteStore::new(),
            down: AtomicBool::new(true),
        };
        let local = Arc::new(MemoryLocalStore::new());
        let (exam_id, ids) = setup(&remote.inner, 30).await;

        let shared: Arc<dyn LocalStore> = local.clone();
        let mut session = CbtSession::load(exam_id, student(), &remote, shared, start()).await.unwrap();
        for id in &ids[..7] {
            session.answer(*id, "4".into()).unwrap();
        }
        session.request_submit(true).unwrap();
        let receipt = session.finalize(&remote, start() + Duration::minutes(5)).await.unwrap();

        assert!(!receipt.synced);
        assert!(!receipt.duplicate);
        assert_eq!(receipt.score, 42);
        assert_eq!(session.state(), SessionState::Terminated);
        assert!(local.get(&answers_key(exam_id, 9)).unwrap().is_none());
        assert!(local.get(&deadline_key(exam_id, 9)).unwrap().is_none());
        assert!(local.get(&exam_blob_key(exam_id, 9)).unwrap().is_none());
        assert_eq!(outbox::queued(&*local).len(), 1);
        assert!(!remote.attempt_taken(exam_id, 9).await.unwrap());

        // Store comes back; the retry lands once.
        remote.down.store(false, Ordering::SeqCst);
        let report = outbox::drain(&remote, &*local).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.remaining, 0);
        assert!(outbox::queued(&*local).is_empty());
        assert_eq!(outbox::drain(&remote, &*local).await, outbox::DrainReport::default());

        assert!(remote.attempt_taken(exam_id, 9).await.unwrap());
        assert_eq!(remote.list_exam_entries(exam_id).await.unwrap().len(), 1);
        let report = remote
            .get_grade_record(9, "JSS2", "Second Term", "2024/2025")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.subject("Mathematics").unwrap().exam, 42);
    }

    #[tokio::test]
    async fn test_later_sitting_sees_rescheduled_exam() {
        let remote = MemoryRemoteStore::new();
        let local = Arc::new(MemoryLocalStore::new());
        let (exam_id, ids) = setup(&remote, 30).await;

        let first = load(&remote, &local, exam_id, start()).await;
        assert_eq!(first.view().total_questions, 10);
        drop(first);

        remote
            .update_exam(
                exam_id,
                NewExam {
                    subject: "Mathematics".into(),
                    class_name: "JSS2".into(),
                    term: "Second Term".into(),
                    session: "2024/2025".into(),
                    scheduled_date: start(),
                    time_limit_minutes: 5,
                    num_questions: 3,
                    question_ids: ids[..3].to_vec(),
                },
            )
            .await
            .unwrap();

        let classmate = StudentRef {
            id: 77,
            name: "Bayo Ade".into(),
            class_name: "JSS2".into(),
        };
        let shared: Arc<dyn LocalStore> = local.clone();
        let later = CbtSession::load(exam_id, classmate, &remote, shared, start()).await.unwrap();
        assert_eq!(later.view().total_questions, 3);
        assert_eq!(later.exam().time_limit_minutes, 5);
        assert_eq!(later.remaining_secs(), 5 * 60);

        // The sitting already underway keeps what it started with.
        let resumed = load(&remote, &local, exam_id, start()).await;
        assert_eq!(resumed.view().total_questions, 10);
    }

    #[tokio::test]
    async fn test_view_hides_correct_answers() {
        let remote = MemoryRemoteStore::new();
        let local = Arc::new(MemoryLocalStore::new());
        let (exam_id, _) = setup(&remote, 30).await;
        let session = load(&remote, &local, exam_id, start()).await;

        let json = serde_json::to_value(session.view()).unwrap();
        assert!(!json.to_string().contains("correct_answer"));
        assert_eq!(json["total_questions"], 10);
        assert_eq!(json["question"]["options"][1], "4");
    }
}
