// src/store/memory.rs

//! In-memory `RemoteStore`, used by tests and by database-less runs.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    error::AppError,
    models::{
        attempt::{AttemptOutcome, AttemptStatus, ExamAttempt},
        exam::{ExamFilter, NewExam, ScheduledExam},
        exam_record::ExamEntry,
        grade::GradeReport,
        question::{NewQuestion, Question, QuestionFilter, QuestionStatus},
    },
    services::guard,
    store::RemoteStore,
};

#[derive(Default)]
struct Tables {
    questions: BTreeMap<i64, Question>,
    exams: BTreeMap<i64, ScheduledExam>,
    attempts: HashMap<(i64, i64), ExamAttempt>,
    entries: Vec<ExamEntry>,
    grades: Vec<GradeReport>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryRemoteStore {
    tables: RwLock<Tables>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a question as-is (keeping its status). Returns the assigned id.
    pub async fn seed_question(&self, mut question: Question) -> i64 {
        let mut tables = self.tables.write().await;
        let id = tables.next_id();
        question.id = id;
        tables.questions.insert(id, question);
        id
    }
}

fn build_question(id: i64, q: NewQuestion) -> Question {
    Question {
        id,
        content: q.content,
        answer_type: q.answer_type,
        options: q.options,
        correct_answer: q.correct_answer,
        subject: q.subject,
        class_name: q.class_name,
        term: q.term,
        session: q.session,
        status: QuestionStatus::Pending,
        admin_comment: None,
        submitted_by: q.submitted_by,
        created_at: Some(Utc::now()),
    }
}

fn build_exam(id: i64, exam: NewExam, created_at: Option<DateTime<Utc>>) -> ScheduledExam {
    ScheduledExam {
        id,
        subject: exam.subject,
        class_name: exam.class_name,
        term: exam.term,
        session: exam.session,
        scheduled_date: exam.scheduled_date,
        time_limit_minutes: exam.time_limit_minutes,
        num_questions: exam.num_questions,
        question_ids: exam.question_ids,
        created_at,
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn submit_questions(&self, questions: Vec<NewQuestion>) -> Result<Vec<Question>, AppError> {
        let mut tables = self.tables.write().await;
        let mut stored = Vec::with_capacity(questions.len());
        for q in questions {
            let id = tables.next_id();
            let question = build_question(id, q);
            tables.questions.insert(id, question.clone());
            stored.push(question);
        }
        Ok(stored)
    }

    async fn list_questions(&self, filter: &QuestionFilter) -> Result<Vec<Question>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables
            .questions
            .values()
            .filter(|q| filter.matches(q))
            .cloned()
            .collect())
    }

    async fn get_question(&self, id: i64) -> Result<Option<Question>, AppError> {
        Ok(self.tables.read().await.questions.get(&id).cloned())
    }

    async fn set_question_status(
        &self,
        id: i64,
        status: QuestionStatus,
        comment: Option<String>,
    ) -> Result<Question, AppError> {
        let mut tables = self.tables.write().await;
        let question = tables
            .questions
            .get_mut(&id)
            .ok_or(AppError::NotFound("Question not found".to_string()))?;
        question.status = status;
        question.admin_comment = comment;
        Ok(question.clone())
    }

    async fn resubmit_question(&self, id: i64, question: NewQuestion) -> Result<Question, AppError> {
        let mut tables = self.tables.write().await;
        let existing = tables
            .questions
            .get(&id)
            .ok_or(AppError::NotFound("Question not found".to_string()))?;
        let mut replacement = build_question(id, question);
        replacement.created_at = existing.created_at;
        tables.questions.insert(id, replacement.clone());
        Ok(replacement)
    }

    async fn approve_subject(&self, subject: &str) -> Result<u64, AppError> {
        let mut tables = self.tables.write().await;
        let mut changed = 0;
        for q in tables.questions.values_mut() {
            if q.subject == subject && q.status == QuestionStatus::Pending {
                q.status = QuestionStatus::Approved;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn list_approved_questions(
        &self,
        subject: &str,
        class_name: &str,
        term: &str,
    ) -> Result<Vec<Question>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables
            .questions
            .values()
            .filter(|q| {
                q.status == QuestionStatus::Approved
                    && q.subject == subject
                    && q.class_name == class_name
                    && q.term == term
            })
            .cloned()
            .collect())
    }

    async fn create_exam(&self, exam: NewExam) -> Result<ScheduledExam, AppError> {
        let mut tables = self.tables.write().await;
        let id = tables.next_id();
        let exam = build_exam(id, exam, Some(Utc::now()));
        tables.exams.insert(id, exam.clone());
        Ok(exam)
    }

    async fn update_exam(&self, id: i64, exam: NewExam) -> Result<ScheduledExam, AppError> {
        let mut tables = self.tables.write().await;
        let created_at = tables
            .exams
            .get(&id)
            .ok_or(AppError::NotFound("Exam not found".to_string()))?
            .created_at;
        let exam = build_exam(id, exam, created_at);
        tables.exams.insert(id, exam.clone());
        Ok(exam)
    }

    async fn delete_exam(&self, id: i64) -> Result<(), AppError> {
        let mut tables = self.tables.write().await;
        tables
            .exams
            .remove(&id)
            .ok_or(AppError::NotFound("Exam not found".to_string()))?;
        tables.attempts.retain(|(exam_id, _), _| *exam_id != id);
        Ok(())
    }

    async fn get_exam(&self, id: i64) -> Result<Option<ScheduledExam>, AppError> {
        Ok(self.tables.read().await.exams.get(&id).cloned())
    }

    async fn list_exams(&self, filter: &ExamFilter) -> Result<Vec<ScheduledExam>, AppError> {
        let tables = self.tables.read().await;
        let mut exams: Vec<ScheduledExam> = tables
            .exams
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        exams.sort_by_key(|e| e.scheduled_date);
        Ok(exams)
    }

    async fn get_exam_questions(&self, exam_id: i64) -> Result<Vec<Question>, AppError> {
        let tables = self.tables.read().await;
        let exam = tables
            .exams
            .get(&exam_id)
            .ok_or(AppError::NotFound("Exam not found".to_string()))?;
        Ok(exam
            .question_ids
            .iter()
            .filter_map(|id| tables.questions.get(id).cloned())
            .collect())
    }

    async fn get_attempt(&self, exam_id: i64, student_id: i64) -> Result<Option<ExamAttempt>, AppError> {
        Ok(self
            .tables
            .read()
            .await
            .attempts
            .get(&(exam_id, student_id))
            .cloned())
    }

    async fn begin_attempt(
        &self,
        exam_id: i64,
        student_id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<ExamAttempt, AppError> {
        let mut tables = self.tables.write().await;
        let attempt = tables
            .attempts
            .get(&(exam_id, student_id))
            .cloned()
            .unwrap_or_else(|| ExamAttempt::not_started(exam_id, student_id));
        if attempt.is_completed() {
            return Err(AppError::Conflict("You have already taken this exam".to_string()));
        }
        let attempt = guard::begin(attempt, started_at);
        tables.attempts.insert((exam_id, student_id), attempt.clone());
        Ok(attempt)
    }

    async fn mark_attempt_complete(
        &self,
        exam_id: i64,
        student_id: i64,
        outcome: &AttemptOutcome,
    ) -> Result<(), AppError> {
        let mut tables = self.tables.write().await;
        if !tables.exams.contains_key(&exam_id) {
            return Err(AppError::NotFound("Exam not found".to_string()));
        }
        let attempt = tables
            .attempts
            .entry((exam_id, student_id))
            .or_insert_with(|| ExamAttempt::not_started(exam_id, student_id));
        if attempt.is_completed() {
            return Err(AppError::Conflict("Attempt already completed".to_string()));
        }
        attempt.status = AttemptStatus::Completed;
        attempt.answers = outcome.answers.clone();
        attempt.completed_at = Some(outcome.completed_at);
        attempt.score = Some(outcome.score);
        Ok(())
    }

    async fn record_exam_entry(&self, entry: &ExamEntry) -> Result<(), AppError> {
        let mut tables = self.tables.write().await;
        if tables
            .entries
            .iter()
            .any(|e| e.exam_id == entry.exam_id && e.student_id == entry.student_id)
        {
            return Err(AppError::Conflict("Exam entry already recorded".to_string()));
        }
        let mut entry = entry.clone();
        entry.created_at.get_or_insert_with(Utc::now);
        tables.entries.push(entry);
        Ok(())
    }

    async fn list_exam_entries(&self, exam_id: i64) -> Result<Vec<ExamEntry>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables
            .entries
            .iter()
            .filter(|e| e.exam_id == exam_id)
            .cloned()
            .collect())
    }

    async fn get_grade_record(
        &self,
        student_id: i64,
        class_name: &str,
        term: &str,
        session: &str,
    ) -> Result<Option<GradeReport>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables
            .grades
            .iter()
            .find(|r| {
                r.student_id == student_id
                    && r.class_name == class_name
                    && r.term == term
                    && r.session == session
            })
            .cloned())
    }

    async fn upsert_grade_record(&self, mut report: GradeReport) -> Result<GradeReport, AppError> {
        let mut tables = self.tables.write().await;
        let existing = tables.grades.iter().position(|r| {
            r.student_id == report.student_id
                && r.class_name == report.class_name
                && r.term == report.term
                && r.session == report.session
        });
        match existing {
            Some(index) => {
                report.id = tables.grades[index].id;
                tables.grades[index] = report.clone();
            }
            None => {
                report.id = Some(tables.next_id());
                tables.grades.push(report.clone());
            }
        }
        Ok(report)
    }
}
