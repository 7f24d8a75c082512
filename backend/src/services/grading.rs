// src/services/grading.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::{
    config::EXAM_COMPONENT_MAX,
    error::AppError,
    models::{
        exam_record::QuestionResult,
        grade::{GradeReport, SubjectGradeRecord},
        question::Question,
    },
    store::RemoteStore,
};

/// Result of marking one sitting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreSheet {
    pub raw_score: usize,
    pub total_questions: usize,
    /// Scaled to the 60-point exam component.
    pub component_score: i32,
    pub breakdown: Vec<QuestionResult>,
}

/// Scales a raw count of correct answers to the exam component.
pub fn exam_component_score(raw_score: usize, total_questions: usize) -> i32 {
    if total_questions == 0 {
        return 0;
    }
    let scaled = (raw_score as f64 / total_questions as f64) * f64::from(EXAM_COMPONENT_MAX);
    (scaled.round() as i32).clamp(0, EXAM_COMPONENT_MAX)
}

/// Marks `answers` against the exam's questions.
/// Strict string matching: no trimming, no case folding.
pub fn score_answers(questions: &[Question], answers: &BTreeMap<i64, String>) -> ScoreSheet {
    let breakdown: Vec<QuestionResult> = questions
        .iter()
        .map(|q| {
            let given = answers.get(&q.id).cloned();
            let is_correct = given.as_deref() == Some(q.correct_answer.as_str());
            QuestionResult {
                question_id: q.id,
                given,
                is_correct,
            }
        })
        .collect();

    let raw_score = breakdown.iter().filter(|r| r.is_correct).count();
    ScoreSheet {
        raw_score,
        total_questions: questions.len(),
        component_score: exam_component_score(raw_score, questions.len()),
        breakdown,
    }
}

/// Which grade report (and which subject line in it) a score lands in.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GradeTarget {
    pub student_id: i64,
    pub class_name: String,
    pub term: String,
    pub session: String,
    pub subject: String,
}

/// Writes `exam_score` into the subject line of `existing` (or a new report).
///
/// Only `exam` and `total` change on an existing line; `test` is kept verbatim.
pub fn merge_exam_score(
    existing: Option<GradeReport>,
    target: &GradeTarget,
    exam_score: i32,
    now: DateTime<Utc>,
) -> (GradeReport, SubjectGradeRecord) {
    let exam_score = exam_score.clamp(0, EXAM_COMPONENT_MAX);

    let mut report = existing.unwrap_or_else(|| GradeReport {
        id: None,
        student_id: target.student_id,
        class_name: target.class_name.clone(),
        term: target.term.clone(),
        session: target.session.clone(),
        date_recorded: now,
        subject_records: Vec::new(),
    });

    let position = report
        .subject_records
        .iter()
        .position(|r| r.subject == target.subject);

    let record = match position {
        Some(index) => {
            let record = &mut report.subject_records[index];
            record.exam = exam_score;
            record.recompute_total();
            record.clone()
        }
        None => {
            let record = SubjectGradeRecord::new(&target.subject, 0, exam_score);
            report.subject_records.push(record.clone());
            record
        }
    };

    (report, record)
}

/// Merges CBT results into the remote grade-report store.
///
/// Not idempotent: callers must invoke it at most once per completed attempt.
pub struct GradeMerger<'a> {
    remote: &'a dyn RemoteStore,
}

impl<'a> GradeMerger<'a> {
    pub fn new(remote: &'a dyn RemoteStore) -> Self {
        Self { remote }
    }

    pub async fn merge(&self, target: &GradeTarget, exam_score: i32) -> Result<SubjectGradeRecord, AppError> {
        let existing = self
            .remote
            .get_grade_record(target.student_id, &target.class_name, &target.term, &target.session)
            .await?;

        let (report, record) = merge_exam_score(existing, target, exam_score, Utc::now());
        self.remote.upsert_grade_record(report).await?;

        tracing::info!(
            student_id = target.student_id,
            subject = %target.subject,
            exam = record.exam,
            total = record.total,
            "Merged CBT score into grade report"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::question::{AnswerType, QuestionStatus},
        store::MemoryRemoteStore,
    };

    fn question(id: i64, correct: &str) -> Question {
        Question {
            id,
            content: format!("Question {}", id),
            answer_type: AnswerType::Text,
            options: Vec::new(),
            correct_answer: correct.to_string(),
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

    fn target(subject: &str) -> GradeTarget {
        GradeTarget {
            student_id: 9,
            class_name: "JSS2".into(),
            term: "Second Term".into(),
            session: "2024/2025".into(),
            subject: subject.into(),
        }
    }

    fn report_with(records: Vec<SubjectGradeRecord>) -> GradeReport {
        GradeReport {
            id: Some(1),
            student_id: 9,
            class_name: "JSS2".into(),
            term: "Second Term".into(),
            session: "2024/2025".into(),
            date_recorded: Utc::now(),
            subject_records: records,
        }
    }

    #[test]
    fn test_seven_of_ten_scores_forty_two() {
        assert_eq!(exam_component_score(7, 10), 42);
    }

    #[test]
    fn test_component_score_edges() {
        assert_eq!(exam_component_score(0, 10), 0);
        assert_eq!(exam_component_score(10, 10), 60);
        assert_eq!(exam_component_score(1, 3), 20);
        assert_eq!(exam_component_score(2, 7), 17);
        assert_eq!(exam_component_score(0, 0), 0);
    }

    #[test]
    fn test_score_answers_is_exact_match() {
        let questions = vec![question(1, "Paris"), question(2, "True"), question(3, "4")];
        let mut answers = BTreeMap::new();
        answers.insert(1, "paris".to_string());
        answers.insert(2, "True".to_string());
        // question 3 unanswered

        let sheet = score_answers(&questions, &answers);
        assert_eq!(sheet.raw_score, 1);
        assert_eq!(sheet.total_questions, 3);
        assert_eq!(sheet.component_score, 20);
        assert_eq!(
            sheet.breakdown[2],
            QuestionResult { question_id: 3, given: None, is_correct: false }
        );
    }

    #[test]
    fn test_answers_for_foreign_questions_are_ignored() {
        let questions = vec![question(1, "A")];
        let mut answers = BTreeMap::new();
        answers.insert(1, "A".to_string());
        answers.insert(99, "A".to_string());

        let sheet = score_answers(&questions, &answers);
        assert_eq!(sheet.raw_score, 1);
        assert_eq!(sheet.component_score, 60);
    }

    #[test]
    fn test_merge_preserves_teacher_test_score() {
        let existing = report_with(vec![SubjectGradeRecord {
            subject: "Math".into(),
            test: 15,
            exam: 0,
            total: 15,
        }]);

        let (report, record) = merge_exam_score(Some(existing), &target("Math"), 42, Utc::now());

        assert_eq!(
            record,
            SubjectGradeRecord { subject: "Math".into(), test: 15, exam: 42, total: 57 }
        );
        assert_eq!(report.subject_records.len(), 1);
        assert_eq!(report.id, Some(1));
    }

    #[test]
    fn test_merge_appends_missing_subject() {
        let existing = report_with(vec![SubjectGradeRecord::new("English", 30, 50)]);

        let (report, record) = merge_exam_score(Some(existing), &target("Math"), 42, Utc::now());

        assert_eq!(record, SubjectGradeRecord::new("Math", 0, 42));
        assert_eq!(report.subject_records.len(), 2);
        assert_eq!(report.subject("English").unwrap().total, 80);
    }

    #[test]
    fn test_merge_creates_report_when_none_exists() {
        let (report, record) = merge_exam_score(None, &target("Math"), 42, Utc::now());

        assert_eq!(report.id, None);
        assert_eq!(report.student_id, 9);
        assert_eq!(record.total, 42);
        assert_eq!(report.subject_records, vec![record]);
    }

    #[test]
    fn test_total_never_exceeds_hundred() {
        let existing = report_with(vec![SubjectGradeRecord {
            subject: "Math".into(),
            test: 55,
            exam: 0,
            total: 55,
        }]);

        let (_, record) = merge_exam_score(Some(existing), &target("Math"), 90, Utc::now());
        assert_eq!(record.test, 55);
        assert_eq!(record.exam, 60);
        assert_eq!(record.total, 100);
    }

    #[tokio::test]
    async fn test_grade_merger_writes_through_remote_store() {
        let remote = MemoryRemoteStore::new();
        remote
            .upsert_grade_record(report_with(vec![SubjectGradeRecord::new("Math", 15, 0)]))
            .await
            .unwrap();

        let merger = GradeMerger::new(&remote);
        let record = merger.merge(&target("Math"), 42).await.unwrap();
        assert_eq!(record.total, 57);

        let stored = remote
            .get_grade_record(9, "JSS2", "Second Term", "2024/2025")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.subject("Math").unwrap(), &record);
    }
}
