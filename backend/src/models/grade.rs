// src/models/grade.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{EXAM_COMPONENT_MAX, TEST_COMPONENT_MAX};

/// One subject line of a term report.
///
/// `test` is owned by manual teacher entry; the CBT engine only ever writes `exam`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectGradeRecord {
    pub subject: String,
    pub test: i32,
    pub exam: i32,
    pub total: i32,
}

impl SubjectGradeRecord {
    pub fn new(subject: &str, test: i32, exam: i32) -> Self {
        let mut record = Self {
            subject: subject.to_string(),
            test,
            exam,
            total: 0,
        };
        record.recompute_total();
        record
    }

    /// `total = test + exam`, each clamped to its component maximum.
    pub fn recompute_total(&mut self) {
        self.total = self.test.clamp(0, TEST_COMPONENT_MAX) + self.exam.clamp(0, EXAM_COMPONENT_MAX);
    }
}

/// A student's grade report for one (class, term, session).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeReport {
    /// `None` until the remote store has persisted the report.
    #[serde(default)]
    pub id: Option<i64>,
    pub student_id: i64,
    pub class_name: String,
    pub term: String,
    pub session: String,
    pub date_recorded: DateTime<Utc>,
    pub subject_records: Vec<SubjectGradeRecord>,
}

impl GradeReport {
    pub fn subject(&self, subject: &str) -> Option<&SubjectGradeRecord> {
        self.subject_records.iter().find(|r| r.subject == subject)
    }
}

/// `GET /api/cbt/grades?term=..&session=..`
#[derive(Debug, Deserialize)]
pub struct GradeQuery {
    pub term: String,
    pub session: String,
}
