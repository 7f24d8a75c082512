// src/services/listing.rs

//! Exam list as a student sees it.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::AppError,
    models::exam::{ExamFilter, ExamView},
    store::{
        LocalStore, RemoteStore,
        local::{get_json, just_completed_key, set_json},
    },
};

/// Marker left behind by a submission so the list does not flash the exam
/// back while the remote store catches up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JustCompleted {
    pub exam_id: i64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentExamView {
    #[serde(flatten)]
    pub exam: ExamView,
    pub completed: bool,
}

fn read_markers(local: &dyn LocalStore, student_id: i64) -> Vec<JustCompleted> {
    match get_json::<Vec<JustCompleted>>(local, &just_completed_key(student_id)) {
        Ok(markers) => markers.unwrap_or_default(),
        Err(e) => {
            tracing::warn!(student_id, error = %e, "Failed to read just-completed markers");
            Vec::new()
        }
    }
}

pub fn mark_just_completed(local: &dyn LocalStore, student_id: i64, exam_id: i64, now: DateTime<Utc>) {
    let mut markers = read_markers(local, student_id);
    markers.retain(|m| m.exam_id != exam_id);
    markers.push(JustCompleted { exam_id, completed_at: now });
    if let Err(e) = set_json(local, &just_completed_key(student_id), &markers) {
        tracing::warn!(student_id, exam_id, error = %e, "Failed to write just-completed marker");
    }
}

/// Exams completed within `grace` of `now`. Older markers are dropped.
pub fn recently_completed(
    local: &dyn LocalStore,
    student_id: i64,
    now: DateTime<Utc>,
    grace: Duration,
) -> HashSet<i64> {
    let markers = read_markers(local, student_id);
    let before = markers.len();
    let live: Vec<JustCompleted> = markers
        .into_iter()
        .filter(|m| now - m.completed_at < grace)
        .collect();

    if live.len() != before {
        let key = just_completed_key(student_id);
        let result = if live.is_empty() {
            local.remove(&key)
        } else {
            set_json(local, &key, &live)
        };
        if let Err(e) = result {
            tracing::warn!(student_id, error = %e, "Failed to prune just-completed markers");
        }
    }

    live.into_iter().map(|m| m.exam_id).collect()
}

/// Exams for the student's class, annotated with their derived status and
/// whether the student has completed them. Freshly submitted exams are left
/// out until the grace window passes.
pub async fn student_exams(
    remote: &dyn RemoteStore,
    local: &dyn LocalStore,
    student_id: i64,
    filter: &ExamFilter,
    now: DateTime<Utc>,
    grace: Duration,
) -> Result<Vec<StudentExamView>, AppError> {
    let hidden = recently_completed(local, student_id, now, grace);
    let exams = remote.list_exams(filter).await?;

    let mut views = Vec::with_capacity(exams.len());
    for exam in exams {
        if hidden.contains(&exam.id) {
            continue;
        }
        let completed = remote.attempt_taken(exam.id, student_id).await?;
        views.push(StudentExamView {
            exam: ExamView::at(exam, now),
            completed,
        });
    }
    Ok(views)
}
