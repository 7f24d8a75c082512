// src/models/exam.rs

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::AppError;

/// A scheduled CBT exam.
///
/// `question_ids` is the ordered snapshot taken when the exam was scheduled
/// (or last edited); later changes to the question bank never alter it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledExam {
    pub id: i64,
    pub subject: String,
    pub class_name: String,
    pub term: String,
    pub session: String,
    pub scheduled_date: DateTime<Utc>,
    pub time_limit_minutes: i32,
    /// Number of questions the admin asked for; `question_ids` may be shorter.
    pub num_questions: i32,
    pub question_ids: Vec<i64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Derived lifecycle of an exam. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExamStatus {
    Upcoming,
    Active,
    Past,
}

impl ScheduledExam {
    pub fn time_limit(&self) -> Duration {
        Duration::minutes(i64::from(self.time_limit_minutes.max(0)))
    }

    /// End of the scheduled sitting window.
    pub fn window_end(&self) -> DateTime<Utc> {
        self.scheduled_date + self.time_limit()
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> ExamStatus {
        if now < self.scheduled_date {
            ExamStatus::Upcoming
        } else if now < self.window_end() {
            ExamStatus::Active
        } else {
            ExamStatus::Past
        }
    }
}

/// An exam annotated with its derived status, as returned by list endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ExamView {
    #[serde(flatten)]
    pub exam: ScheduledExam,
    pub status: ExamStatus,
}

impl ExamView {
    pub fn at(exam: ScheduledExam, now: DateTime<Utc>) -> Self {
        let status = exam.status_at(now);
        Self { exam, status }
    }
}

/// Exam fields handed to the remote store on create and update.
#[derive(Debug, Clone)]
pub struct NewExam {
    pub subject: String,
    pub class_name: String,
    pub term: String,
    pub session: String,
    pub scheduled_date: DateTime<Utc>,
    pub time_limit_minutes: i32,
    pub num_questions: i32,
    pub question_ids: Vec<i64>,
}

/// DTO for scheduling or editing an exam.
///
/// Missing scheduling fields deserialize as empty strings so that the
/// validator reports them instead of a generic JSON error.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ScheduleExamRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 100, message = "subject is required"))]
    pub subject: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 50, message = "class_name is required"))]
    pub class_name: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 50, message = "term is required"))]
    pub term: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 20, message = "session is required"))]
    pub session: String,
    /// Calendar date, `YYYY-MM-DD`.
    #[serde(default)]
    #[validate(length(min = 1, message = "date is required"))]
    pub date: String,
    /// Wall-clock start, `HH:MM` (seconds optional).
    #[serde(default)]
    #[validate(length(min = 1, message = "time is required"))]
    pub time: String,
    #[serde(default = "default_time_limit")]
    #[validate(range(min = 1, max = 600))]
    pub time_limit_minutes: i32,
    #[serde(default = "default_num_questions")]
    #[validate(range(min = 1, max = 200))]
    pub num_questions: i32,
}

fn default_time_limit() -> i32 {
    30
}

fn default_num_questions() -> i32 {
    10
}

impl ScheduleExamRequest {
    /// Combines `date` and `time` into the exam start instant (UTC).
    pub fn scheduled_at(&self) -> Result<DateTime<Utc>, AppError> {
        let date = NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d")
            .map_err(|_| AppError::BadRequest(format!("Invalid date '{}'", self.date)))?;
        let time = NaiveTime::parse_from_str(self.time.trim(), "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(self.time.trim(), "%H:%M:%S"))
            .map_err(|_| AppError::BadRequest(format!("Invalid time '{}'", self.time)))?;
        Ok(NaiveDateTime::new(date, time).and_utc())
    }

    pub fn into_new_exam(self, scheduled_date: DateTime<Utc>, question_ids: Vec<i64>) -> NewExam {
        NewExam {
            subject: self.subject,
            class_name: self.class_name,
            term: self.term,
            session: self.session,
            scheduled_date,
            time_limit_minutes: self.time_limit_minutes,
            num_questions: self.num_questions,
            question_ids,
        }
    }
}

/// Filter for listing exams. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExamFilter {
    pub subject: Option<String>,
    pub class_name: Option<String>,
    pub term: Option<String>,
    pub session: Option<String>,
}

impl ExamFilter {
    pub fn matches(&self, exam: &ScheduledExam) -> bool {
        self.subject.as_deref().is_none_or(|s| exam.subject == s)
            && self.class_name.as_deref().is_none_or(|c| exam.class_name == c)
            && self.term.as_deref().is_none_or(|t| exam.term == t)
            && self.session.as_deref().is_none_or(|s| exam.session == s)
    }
}

/// `DELETE /api/admin/exams/{id}?confirm=true`
#[derive(Debug, Default, Deserialize)]
pub struct DeleteExamQuery {
    #[serde(default)]
    pub confirm: bool,
}

/// Response for create/update; `warning` is set when the pool ran short.
#[derive(Debug, Serialize)]
pub struct ScheduleResponse {
    pub exam: ScheduledExam,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}
