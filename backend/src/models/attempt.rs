// src/models/attempt.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::NotStarted => "not_started",
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "not_started" => Ok(AttemptStatus::NotStarted),
            "in_progress" => Ok(AttemptStatus::InProgress),
            "completed" => Ok(AttemptStatus::Completed),
            other => Err(AppError::InternalServerError(format!(
                "unknown attempt status '{}'",
                other
            ))),
        }
    }
}

/// One student's interaction with one scheduled exam.
/// Reaches `completed` at most once per (exam, student) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamAttempt {
    pub exam_id: i64,
    pub student_id: i64,
    pub status: AttemptStatus,
    /// Final answers, filled in when the attempt completes.
    #[serde(default)]
    pub answers: BTreeMap<i64, String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub score: Option<i32>,
}

impl ExamAttempt {
    pub fn not_started(exam_id: i64, student_id: i64) -> Self {
        Self {
            exam_id,
            student_id,
            status: AttemptStatus::NotStarted,
            answers: BTreeMap::new(),
            started_at: None,
            completed_at: None,
            score: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == AttemptStatus::Completed
    }
}

/// What a finished session reports when it marks the attempt complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptOutcome {
    pub score: i32,
    pub answers: BTreeMap<i64, String>,
    pub completed_at: DateTime<Utc>,
}

/// Response of `GET /api/cbt/exams/{id}/attempt-status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct AttemptStatusResponse {
    pub taken: bool,
}
