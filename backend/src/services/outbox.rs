// src/services/outbox.rs

//! Remote side of a CBT submission, with a local retry queue.
//!
//! The student is never kept waiting on these writes. Whatever fails is parked
//! under `PENDING_SUBMISSIONS_KEY` and replayed by `spawn_retry_loop`.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::AppError,
    models::{attempt::AttemptOutcome, exam_record::ExamEntry},
    services::grading::{GradeMerger, GradeTarget},
    store::{
        LocalStore, RemoteStore,
        local::{PENDING_SUBMISSIONS_KEY, get_json, set_json},
    },
};

/// Guards read-modify-write cycles on the queue key.
static OUTBOX_LOCK: Mutex<()> = Mutex::new(());

/// A submission and which of its remote steps have landed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSubmission {
    pub exam_id: i64,
    pub student_id: i64,
    pub outcome: AttemptOutcome,
    pub entry: ExamEntry,
    pub grade: GradeTarget,
    #[serde(default)]
    pub complete_done: bool,
    #[serde(default)]
    pub grade_done: bool,
    #[serde(default)]
    pub entry_done: bool,
    /// Delivery rounds tried so far.
    #[serde(default)]
    pub attempts: u32,
}

impl PendingSubmission {
    pub fn new(outcome: AttemptOutcome, entry: ExamEntry, grade: GradeTarget) -> Self {
        Self {
            exam_id: entry.exam_id,
            student_id: entry.student_id,
            outcome,
            entry,
            grade,
            complete_done: false,
            grade_done: false,
            entry_done: false,
            attempts: 0,
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.complete_done && self.grade_done && self.entry_done
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Every remote step landed.
    Delivered,
    /// The attempt was already completed elsewhere; nothing was merged.
    Duplicate,
    /// Some steps failed and remain queued.
    Partial,
}

/// Runs the remote steps that have not landed yet.
///
/// Marking the attempt complete goes first and gates the grade merge: on the
/// first round a conflict means another submission won, so nothing else is
/// written. On later rounds a conflict means our own earlier write landed.
pub async fn deliver(remote: &dyn RemoteStore, pending: &mut PendingSubmission) -> Delivery {
    let first_round = pending.attempts == 0;
    pending.attempts += 1;

    if !pending.complete_done {
        match remote
            .mark_attempt_complete(pending.exam_id, pending.student_id, &pending.outcome)
            .await
        {
            Ok(()) => pending.complete_done = true,
            Err(AppError::Conflict(_)) if first_round => {
                tracing::warn!(
                    exam_id = pending.exam_id,
                    student_id = pending.student_id,
                    "Attempt already completed elsewhere; skipping grade merge"
                );
                return Delivery::Duplicate;
            }
            Err(AppError::Conflict(_)) => pending.complete_done = true,
            Err(e) => {
                tracing::warn!(
                    exam_id = pending.exam_id,
                    student_id = pending.student_id,
                    error = %e,
                    "Failed to mark attempt complete"
                );
                return Delivery::Partial;
            }
        }
    }

    if !pending.grade_done {
        match GradeMerger::new(remote)
            .merge(&pending.grade, pending.outcome.score)
            .await
        {
            Ok(_) => pending.grade_done = true,
            Err(e) => tracing::warn!(
                exam_id = pending.exam_id,
                student_id = pending.student_id,
                error = %e,
                "Failed to merge grade"
            ),
        }
    }

    if !pending.entry_done {
        match remote.record_exam_entry(&pending.entry).await {
            Ok(()) | Err(AppError::Conflict(_)) => pending.entry_done = true,
            Err(e) => tracing::warn!(
                exam_id = pending.exam_id,
                student_id = pending.student_id,
                error = %e,
                "Failed to record exam entry"
            ),
        }
    }

    if pending.is_delivered() {
        Delivery::Delivered
    } else {
        Delivery::Partial
    }
}

pub fn queued(local: &dyn LocalStore) -> Vec<PendingSubmission> {
    match get_json::<Vec<PendingSubmission>>(local, PENDING_SUBMISSIONS_KEY) {
        Ok(queue) => queue.unwrap_or_default(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to read submission outbox");
            Vec::new()
        }
    }
}

pub fn enqueue(local: &dyn LocalStore, pending: PendingSubmission) {
    let _guard = OUTBOX_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut queue = queued(local);
    queue.retain(|p| !(p.exam_id == pending.exam_id && p.student_id == pending.student_id));
    queue.push(pending);
    if let Err(e) = set_json(local, PENDING_SUBMISSIONS_KEY, &queue) {
        tracing::error!(error = %e, "Failed to queue submission for retry");
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub delivered: usize,
    pub remaining: usize,
}

/// Replays every queued submission once.
pub async fn drain(remote: &dyn RemoteStore, local: &dyn LocalStore) -> DrainReport {
    let queue = queued(local);
    if queue.is_empty() {
        return DrainReport::default();
    }

    let drained: Vec<(i64, i64)> = queue.iter().map(|p| (p.exam_id, p.student_id)).collect();

    let mut report = DrainReport::default();
    let mut still_pending = Vec::new();
    for mut pending in queue {
        match deliver(remote, &mut pending).await {
            Delivery::Partial => still_pending.push(pending),
            Delivery::Delivered | Delivery::Duplicate => report.delivered += 1,
        }
    }

    // Submissions queued while we were draining are kept.
    let _guard = OUTBOX_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let arrived = queued(local)
        .into_iter()
        .filter(|p| !drained.contains(&(p.exam_id, p.student_id)));
    still_pending.extend(arrived);
    report.remaining = still_pending.len();

    if let Err(e) = set_json(local, PENDING_SUBMISSIONS_KEY, &still_pending) {
        tracing::error!(error = %e, "Failed to rewrite submission outbox");
    }

    report
}

/// Retries the outbox every `period` until the process exits.
pub fn spawn_retry_loop(
    remote: Arc<dyn RemoteStore>,
    local: Arc<dyn LocalStore>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let report = drain(&*remote, &*local).await;
            if report.delivered > 0 || report.remaining > 0 {
                tracing::info!(
                    delivered = report.delivered,
                    remaining = report.remaining,
                    "Submission outbox drained"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{exam::NewExam, exam_record::QuestionResult},
        store::{MemoryLocalStore, MemoryRemoteStore},
    };
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn pending(exam_id: i64, student_id: i64) -> PendingSubmission {
        let mut answers = BTreeMap::new();
        answers.insert(1, "A".to_string());
        let outcome = AttemptOutcome {
            score: 42,
            answers,
            completed_at: Utc::now(),
        };
        let entry = ExamEntry {
            exam_id,
            student_id,
            student_name: "Ada".into(),
            class_name: "JSS2".into(),
            subject: "Mathematics".into(),
            term: "Second Term".into(),
            session: "2024/2025".into(),
            score: 42,
            raw_score: 7,
            total_questions: 10,
            breakdown: vec![QuestionResult { question_id: 1, given: Some("A".into()), is_correct: true }],
            created_at: None,
        };
        let grade = GradeTarget {
            student_id,
            class_name: "JSS2".into(),
            term: "Second Term".into(),
            session: "2024/2025".into(),
            subject: "Mathematics".into(),
        };
        PendingSubmission::new(outcome, entry, grade)
    }

    async fn seed_exam(remote: &MemoryRemoteStore) -> i64 {
        remote
            .create_exam(NewExam {
                subject: "Mathematics".into(),
                class_name: "JSS2".into(),
                term: "Second Term".into(),
                session: "2024/2025".into(),
                scheduled_date: Utc::now(),
                time_limit_minutes: 30,
                num_questions: 1,
                question_ids: vec![1],
            })
            .await
            .unwrap()
            .id
    }

    async fn math_total(remote: &MemoryRemoteStore, student_id: i64) -> Option<i32> {
        remote
            .get_grade_record(student_id, "JSS2", "Second Term", "2024/2025")
            .await
            .unwrap()
            .and_then(|r| r.subject("Mathematics").map(|s| s.total))
    }

    #[tokio::test]
    async fn test_deliver_runs_every_step() {
        let remote = MemoryRemoteStore::new();
        let exam_id = seed_exam(&remote).await;
        let mut submission = pending(exam_id, 9);

        assert_eq!(deliver(&remote, &mut submission).await, Delivery::Delivered);
        assert!(submission.is_delivered());
        assert!(remote.attempt_taken(exam_id, 9).await.unwrap());
        assert_eq!(math_total(&remote, 9).await, Some(42));
        assert_eq!(remote.list_exam_entries(exam_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_first_round_conflict_skips_grade_merge() {
        let remote = MemoryRemoteStore::new();
        let exam_id = seed_exam(&remote).await;
        let first = pending(exam_id, 9);
        remote.mark_attempt_complete(exam_id, 9, &first.outcome).await.unwrap();

        let mut second = pending(exam_id, 9);
        assert_eq!(deliver(&remote, &mut second).await, Delivery::Duplicate);
        assert_eq!(math_total(&remote, 9).await, None);
        assert!(remote.list_exam_entries(exam_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_treats_completion_conflict_as_landed() {
        let remote = MemoryRemoteStore::new();
        let exam_id = seed_exam(&remote).await;
        let mut submission = pending(exam_id, 9);
        remote.mark_attempt_complete(exam_id, 9, &submission.outcome).await.unwrap();
        submission.attempts = 1;

        assert_eq!(deliver(&remote, &mut submission).await, Delivery::Delivered);
        assert_eq!(math_total(&remote, 9).await, Some(42));
    }

    #[tokio::test]
    async fn test_enqueue_replaces_same_pair() {
        let local = MemoryLocalStore::new();
        enqueue(&local, pending(4, 9));
        enqueue(&local, pending(4, 9));
        enqueue(&local, pending(5, 9));
        assert_eq!(queued(&local).len(), 2);
    }

    #[tokio::test]
    async fn test_drain_delivers_and_empties_queue() {
        let remote = MemoryRemoteStore::new();
        let exam_id = seed_exam(&remote).await;
        let local = MemoryLocalStore::new();
        let mut half_done = pending(exam_id, 9);
        half_done.attempts = 1;
        half_done.complete_done = true;
        remote.mark_attempt_complete(exam_id, 9, &half_done.outcome).await.unwrap();
        enqueue(&local, half_done);

        let report = drain(&remote, &local).await;
        assert_eq!(report, DrainReport { delivered: 1, remaining: 0 });
        assert!(queued(&local).is_empty());
        assert_eq!(math_total(&remote, 9).await, Some(42));
        assert_eq!(remote.list_exam_entries(exam_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_drain_on_empty_outbox_is_a_no_op() {
        let remote = MemoryRemoteStore::new();
        let local = MemoryLocalStore::new();
        assert_eq!(drain(&remote, &local).await, DrainReport::default());
    }

    #[tokio::test]
    async fn test_submission_for_deleted_exam_stays_queued() {
        let remote = MemoryRemoteStore::new();
        let local = MemoryLocalStore::new();
        let exam_id = seed_exam(&remote).await;
        remote.delete_exam(exam_id).await.unwrap();

        let mut submission = pending(exam_id, 9);
        assert_eq!(deliver(&remote, &mut submission).await, Delivery::Partial);
        assert!(!submission.complete_done);
        enqueue(&local, submission);

        let report = drain(&remote, &local).await;
        assert_eq!(report, DrainReport { delivered: 0, remaining: 1 });
        assert_eq!(queued(&local).len(), 1);
        assert_eq!(math_total(&remote, 9).await, None);
    }
}
