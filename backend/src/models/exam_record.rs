// src/models/exam_record.rs

use serde::{Deserialize, Serialize};

/// Audit record written once per completed attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamEntry {
    pub exam_id: i64,
    pub student_id: i64,
    pub student_name: String,
    pub class_name: String,
    pub subject: String,
    pub term: String,
    pub session: String,

    /// Exam component score (0-60).
    pub score: i32,

    /// Number of correctly answered questions.
    pub raw_score: i32,

    pub total_questions: i32,

    pub breakdown: Vec<QuestionResult>,

    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Per-question line of an exam entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question_id: i64,
    /// `None` when the question was left unanswered.
    pub given: Option<String>,
    pub is_correct: bool,
}
