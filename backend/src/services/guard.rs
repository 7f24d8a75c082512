// src/services/guard.rs

//! Eligibility check run before a student enters an exam.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    error::AppError,
    models::{
        attempt::{AttemptStatus, ExamAttempt},
        exam::ScheduledExam,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    AlreadyTaken,
    NotYetOpen,
}

impl DenyReason {
    pub fn message(&self) -> &'static str {
        match self {
            DenyReason::AlreadyTaken => "You have already taken this exam",
            DenyReason::NotYetOpen => "This exam hasn't started yet",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttemptDecision {
    pub allowed: bool,
    pub reason: Option<DenyReason>,
}

impl AttemptDecision {
    fn allow() -> Self {
        Self { allowed: true, reason: None }
    }

    fn deny(reason: DenyReason) -> Self {
        Self { allowed: false, reason: Some(reason) }
    }

    /// Maps a denial to the user-facing error.
    pub fn into_result(self) -> Result<(), AppError> {
        match self.reason {
            None => Ok(()),
            Some(DenyReason::AlreadyTaken) => Err(AppError::Conflict(DenyReason::AlreadyTaken.message().to_string())),
            Some(DenyReason::NotYetOpen) => Err(AppError::Forbidden(DenyReason::NotYetOpen.message().to_string())),
        }
    }
}

/// Decides whether a student may start (or resume) `exam`.
///
/// A completed attempt is refused whatever the time; otherwise the exam must
/// have reached its scheduled start.
pub fn can_start(exam: &ScheduledExam, attempt: Option<&ExamAttempt>, now: DateTime<Utc>) -> AttemptDecision {
    if attempt.is_some_and(|a| a.status == AttemptStatus::Completed) {
        return AttemptDecision::deny(DenyReason::AlreadyTaken);
    }
    if now < exam.scheduled_date {
        return AttemptDecision::deny(DenyReason::NotYetOpen);
    }
    AttemptDecision::allow()
}

/// Moves a `not_started` attempt to `in_progress`. Other states are returned unchanged.
pub fn begin(mut attempt: ExamAttempt, now: DateTime<Utc>) -> ExamAttempt {
    if attempt.status == AttemptStatus::NotStarted {
        attempt.status = AttemptStatus::InProgress;
        attempt.started_at = Some(now);
    }
    attempt
}
