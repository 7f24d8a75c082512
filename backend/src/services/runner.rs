// src/services/runner.rs

//! Live CBT sessions, one per (exam, student), each driven by its own
//! one-second countdown task.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;

use crate::{
    error::AppError,
    models::attempt::AttemptStatus,
    services::{
        guard,
        session::{CbtSession, SessionView, StudentRef, SubmissionReceipt, SubmitDecision, Tick},
    },
    store::{LocalStore, RemoteStore},
};

type SessionKey = (i64, i64);
type SharedSession = Arc<AsyncMutex<CbtSession>>;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Navigation {
    Next,
    Previous,
    Jump { index: usize },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitResponse {
    ConfirmationRequired {
        attempted: usize,
        total: usize,
        remaining_secs: i64,
        message: String,
    },
    Submitted(SubmissionReceipt),
}

#[derive(Clone)]
pub struct SessionManager {
    remote: Arc<dyn RemoteStore>,
    local: Arc<dyn LocalStore>,
    sessions: Arc<Mutex<HashMap<SessionKey, SharedSession>>>,
}

impl SessionManager {
    pub fn new(remote: Arc<dyn RemoteStore>, local: Arc<dyn LocalStore>) -> Self {
        Self {
            remote,
            local,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock_sessions(&self) -> Result<std::sync::MutexGuard<'_, HashMap<SessionKey, SharedSession>>, AppError> {
        self.sessions
            .lock()
            .map_err(|_| AppError::InternalServerError("session table lock poisoned".to_string()))
    }

    fn live(&self, exam_id: i64, student_id: i64) -> Result<Option<SharedSession>, AppError> {
        Ok(self.lock_sessions()?.get(&(exam_id, student_id)).cloned())
    }

    fn require_live(&self, exam_id: i64, student_id: i64) -> Result<SharedSession, AppError> {
        self.live(exam_id, student_id)?
            .ok_or(AppError::NotFound("No exam in progress".to_string()))
    }

    /// Runs the attempt guard and enters the session. Starting an exam that is
    /// already live returns the live session.
    pub async fn start(&self, exam_id: i64, student: StudentRef, now: DateTime<Utc>) -> Result<SessionView, AppError> {
        if let Some(session) = self.live(exam_id, student.id)? {
            return Ok(session.lock().await.view());
        }

        let exam = self
            .remote
            .get_exam(exam_id)
            .await?
            .ok_or(AppError::NotFound("Exam not found".to_string()))?;
        if exam.class_name != student.class_name {
            return Err(AppError::Forbidden("This exam is not for your class".to_string()));
        }

        let attempt = self.remote.get_attempt(exam_id, student.id).await?;
        guard::can_start(&exam, attempt.as_ref(), now).into_result()?;
        self.remote.begin_attempt(exam_id, student.id, now).await?;

        let student_id = student.id;
        let session = CbtSession::load(exam_id, student, &*self.remote, self.local.clone(), now).await?;

        let key = (exam_id, student_id);
        let (shared, fresh) = {
            let mut sessions = self.lock_sessions()?;
            match sessions.get(&key) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let shared = Arc::new(AsyncMutex::new(session));
                    sessions.insert(key, shared.clone());
                    (shared, true)
                }
            }
        };
        if fresh {
            self.spawn_countdown(key, shared.clone());
            tracing::info!(exam_id, student_id, live = self.live_count(), "Exam started");
        }

        let view = shared.lock().await.view();
        Ok(view)
    }

    /// The live session, or the in-progress one re-entered from local state.
    pub async fn resume(&self, exam_id: i64, student: StudentRef, now: DateTime<Utc>) -> Result<SessionView, AppError> {
        if let Some(session) = self.live(exam_id, student.id)? {
            return Ok(session.lock().await.view());
        }
        match self.remote.get_attempt(exam_id, student.id).await? {
            Some(attempt) if attempt.status == AttemptStatus::InProgress => self.start(exam_id, student, now).await,
            Some(attempt) if attempt.is_completed() => {
                Err(AppError::Conflict(guard::DenyReason::AlreadyTaken.message().to_string()))
            }
            _ => Err(AppError::NotFound("No exam in progress".to_string())),
        }
    }

    pub async fn answer(
        &self,
        exam_id: i64,
        student_id: i64,
        question_id: i64,
        answer: String,
    ) -> Result<SessionView, AppError> {
        let session = self.require_live(exam_id, student_id)?;
        let mut session = session.lock().await;
        session.answer(question_id, answer)?;
        Ok(session.view())
    }

    pub async fn navigate(&self, exam_id: i64, student_id: i64, nav: Navigation) -> Result<SessionView, AppError> {
        let session = self.require_live(exam_id, student_id)?;
        let mut session = session.lock().await;
        match nav {
            Navigation::Next => session.next()?,
            Navigation::Previous => session.previous()?,
            Navigation::Jump { index } => session.jump(index)?,
        };
        Ok(session.view())
    }

    /// Without `confirmed` this only reports how much was attempted.
    pub async fn submit(
        &self,
        exam_id: i64,
        student_id: i64,
        confirmed: bool,
        now: DateTime<Utc>,
    ) -> Result<SubmitResponse, AppError> {
        let Some(shared) = self.live(exam_id, student_id)? else {
            if self.remote.attempt_taken(exam_id, student_id).await? {
                return Err(AppError::Conflict(guard::DenyReason::AlreadyTaken.message().to_string()));
            }
            return Err(AppError::NotFound("No exam in progress".to_string()));
        };

        let receipt = {
            let mut session = shared.lock().await;
            match session.request_submit(confirmed)? {
                SubmitDecision::NeedsConfirmation(preview) => {
                    return Ok(SubmitResponse::ConfirmationRequired {
                        attempted: preview.attempted,
                        total: preview.total,
                        remaining_secs: preview.remaining_secs,
                        message: preview.message(),
                    });
                }
                SubmitDecision::Proceed => session.finalize(&*self.remote, now).await?,
            }
        };

        self.forget((exam_id, student_id), &shared);
        Ok(SubmitResponse::Submitted(receipt))
    }

    /// Number of sessions currently live.
    fn live_count(&self) -> usize {
        self.lock_sessions().map(|s| s.len()).unwrap_or(0)
    }

    fn forget(&self, key: SessionKey, session: &SharedSession) {
        forget(&self.sessions, key, session);
    }

    fn spawn_countdown(&self, key: SessionKey, session: SharedSession) {
        let remote = self.remote.clone();
        let sessions = self.sessions.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let mut guard = session.lock().await;
                match guard.tick(Utc::now()) {
                    Tick::Running(_) => {}
                    Tick::Expired => {
                        if let Err(e) = guard.finalize(&*remote, Utc::now()).await {
                            tracing::error!(exam_id = key.0, student_id = key.1, error = %e, "Auto-submit failed");
                        }
                        break;
                    }
                    // Submitted by hand.
                    Tick::Idle => break,
                }
            }

            forget(&sessions, key, &session);
        });
    }
}

/// Drops `key` from the table if it still maps to `session`.
fn forget(sessions: &Mutex<HashMap<SessionKey, SharedSession>>, key: SessionKey, session: &SharedSession) {
    let mut sessions = sessions.lock().unwrap_or_else(|e| e.into_inner());
    if sessions.get(&key).is_some_and(|s| Arc::ptr_eq(s, session)) {
        sessions.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{
            exam::NewExam,
            question::{AnswerType, Question, QuestionStatus},
        },
        store::{MemoryLocalStore, MemoryRemoteStore},
    };
    use chrono::Duration;

    fn student() -> StudentRef {
        StudentRef {
            id: 9,
            name: "Ada Obi".into(),
            class_name: "JSS2".into(),
        }
    }

    fn question() -> Question {
        Question {
            id: 0,
            content: "Is water wet?".into(),
            answer_type: AnswerType::Truefalse,
            options: Vec::new(),
            correct_answer: "True".into(),
            subject: "Basic Science".into(),
            class_name: "JSS2".into(),
            term: "Second Term".into(),
            session: "2024/2025".into(),
            status: QuestionStatus::Approved,
            admin_comment: None,
            submitted_by: None,
            created_at: None,
        }
    }

    async fn setup(scheduled_date: DateTime<Utc>, time_limit_minutes: i32) -> (SessionManager, Arc<MemoryRemoteStore>, i64, Vec<i64>) {
        let remote = Arc::new(MemoryRemoteStore::new());
        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(remote.seed_question(question()).await);
        }
        let exam = remote
            .create_exam(NewExam {
                subject: "Basic Science".into(),
                class_name: "JSS2".into(),
                term: "Second Term".into(),
                session: "2024/2025".into(),
                scheduled_date,
                time_limit_minutes,
                num_questions: 4,
                question_ids: ids.clone(),
            })
            .await
            .unwrap();
        let manager = SessionManager::new(remote.clone(), Arc::new(MemoryLocalStore::new()));
        (manager, remote, exam.id, ids)
    }

    #[tokio::test]
    async fn test_not_yet_open_is_forbidden() {
        let now = Utc::now();
        let (manager, _, exam_id, _) = setup(now + Duration::hours(1), 30).await;
        let result = manager.start(exam_id, student(), now).await;
        assert!(matches!(result, Err(AppError::Forbidden(msg)) if msg == "This exam hasn't started yet"));
        assert_eq!(manager.live_count(), 0);
    }

    #[tokio::test]
    async fn test_other_class_is_forbidden() {
        let now = Utc::now();
        let (manager, _, exam_id, _) = setup(now, 30).await;
        let mut outsider = student();
        outsider.class_name = "SS1".into();
        assert!(matches!(manager.start(exam_id, outsider, now).await, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_full_sitting_and_retake_is_refused() {
        let now = Utc::now();
        let (manager, remote, exam_id, ids) = setup(now - Duration::minutes(1), 30).await;

        let view = manager.start(exam_id, student(), now).await.unwrap();
        assert_eq!(view.total_questions, 4);
        let again = manager.start(exam_id, student(), now).await.unwrap();
        assert_eq!(again.ends_at, view.ends_at);
        assert_eq!(manager.live_count(), 1);

        manager.answer(exam_id, 9, ids[0], "True".into()).await.unwrap();
        manager.answer(exam_id, 9, ids[1], "False".into()).await.unwrap();
        let view = manager.navigate(exam_id, 9, Navigation::Jump { index: 3 }).await.unwrap();
        assert_eq!(view.current_index, 3);

        match manager.submit(exam_id, 9, false, now).await.unwrap() {
            SubmitResponse::ConfirmationRequired { attempted, total, .. } => {
                assert_eq!((attempted, total), (2, 4));
            }
            other => panic!("expected confirmation, got {:?}", other),
        }

        match manager.submit(exam_id, 9, true, now).await.unwrap() {
            SubmitResponse::Submitted(receipt) => {
                assert_eq!(receipt.raw_score, 1);
                assert_eq!(receipt.score, 15);
                assert!(receipt.synced);
            }
            other => panic!("expected receipt, got {:?}", other),
        }
        assert_eq!(manager.live_count(), 0);
        assert!(remote.attempt_taken(exam_id, 9).await.unwrap());

        assert!(matches!(manager.submit(exam_id, 9, true, now).await, Err(AppError::Conflict(_))));
        assert!(matches!(manager.start(exam_id, student(), now).await, Err(AppError::Conflict(_))));
        assert!(matches!(manager.resume(exam_id, student(), now).await, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_resume_without_attempt_is_not_found() {
        let now = Utc::now();
        let (manager, _, exam_id, _) = setup(now, 30).await;
        assert!(matches!(manager.resume(exam_id, student(), now).await, Err(AppError::NotFound(_))));
        assert!(matches!(manager.answer(exam_id, 9, 1, "True".into()).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_auto_submits_without_confirmation() {
        let now = Utc::now();
        let (manager, remote, exam_id, ids) = setup(now - Duration::minutes(1), 1).await;

        manager.start(exam_id, student(), now).await.unwrap();
        manager.answer(exam_id, 9, ids[0], "True".into()).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_secs(65)).await;

        assert!(remote.attempt_taken(exam_id, 9).await.unwrap());
        assert_eq!(manager.live_count(), 0);
        let entries = remote.list_exam_entries(exam_id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].raw_score, 1);
    }
}
