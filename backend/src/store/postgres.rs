// src/store/postgres.rs

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, types::Json};

use crate::{
    error::AppError,
    models::{
        attempt::{AttemptOutcome, AttemptStatus, ExamAttempt},
        exam::{ExamFilter, NewExam, ScheduledExam},
        exam_record::{ExamEntry, QuestionResult},
        grade::{GradeReport, SubjectGradeRecord},
        question::{NewQuestion, Question, QuestionFilter, QuestionStatus},
    },
    store::RemoteStore,
};

const QUESTION_COLUMNS: &str = "id, content, answer_type, options, correct_answer, subject, \
     class_name, term, session, status, admin_comment, submitted_by, created_at";

const EXAM_COLUMNS: &str = "id, subject, class_name, term, session, scheduled_date, \
     time_limit_minutes, num_questions, question_ids, created_at";

const ATTEMPT_COLUMNS: &str =
    "exam_id, student_id, status, answers, started_at, completed_at, score";

const ENTRY_COLUMNS: &str = "exam_id, student_id, student_name, class_name, subject, term, \
     session, score, raw_score, total_questions, breakdown, created_at";

const GRADE_COLUMNS: &str =
    "id, student_id, class_name, term, session, date_recorded, subject_records";

/// Represents a row of the 'questions' table.
#[derive(FromRow)]
struct QuestionRow {
    id: i64,
    content: String,
    answer_type: String,
    options: Json<Vec<String>>,
    correct_answer: String,
    subject: String,
    class_name: String,
    term: String,
    session: String,
    status: String,
    admin_comment: Option<String>,
    submitted_by: Option<i64>,
    created_at: DateTime<Utc>,
}

impl TryFrom<QuestionRow> for Question {
    type Error = AppError;

    fn try_from(row: QuestionRow) -> Result<Self, Self::Error> {
        Ok(Question {
            id: row.id,
            content: row.content,
            answer_type: row.answer_type.parse()?,
            options: row.options.0,
            correct_answer: row.correct_answer,
            subject: row.subject,
            class_name: row.class_name,
            term: row.term,
            session: row.session,
            status: row.status.parse()?,
            admin_comment: row.admin_comment,
            submitted_by: row.submitted_by,
            created_at: Some(row.created_at),
        })
    }
}

#[derive(FromRow)]
struct ExamRow {
    id: i64,
    subject: String,
    class_name: String,
    term: String,
    session: String,
    scheduled_date: DateTime<Utc>,
    time_limit_minutes: i32,
    num_questions: i32,
    question_ids: Json<Vec<i64>>,
    created_at: DateTime<Utc>,
}

impl From<ExamRow> for ScheduledExam {
    fn from(row: ExamRow) -> Self {
        ScheduledExam {
            id: row.id,
            subject: row.subject,
            class_name: row.class_name,
            term: row.term,
            session: row.session,
            scheduled_date: row.scheduled_date,
            time_limit_minutes: row.time_limit_minutes,
            num_questions: row.num_questions,
            question_ids: row.question_ids.0,
            created_at: Some(row.created_at),
        }
    }
}

#[derive(FromRow)]
struct AttemptRow {
    exam_id: i64,
    student_id: i64,
    status: String,
    answers: Json<BTreeMap<i64, String>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    score: Option<i32>,
}

impl TryFrom<AttemptRow> for ExamAttempt {
    type Error = AppError;

    fn try_from(row: AttemptRow) -> Result<Self, Self::Error> {
        Ok(ExamAttempt {
            exam_id: row.exam_id,
            student_id: row.student_id,
            status: AttemptStatus::parse(&row.status)?,
            answers: row.answers.0,
            started_at: row.started_at,
            completed_at: row.completed_at,
            score: row.score,
        })
    }
}

#[derive(FromRow)]
struct EntryRow {
    exam_id: i64,
    student_id: i64,
    student_name: String,
    class_name: String,
    subject: String,
    term: String,
    session: String,
    score: i32,
    raw_score: i32,
    total_questions: i32,
    breakdown: Json<Vec<QuestionResult>>,
    created_at: DateTime<Utc>,
}

impl From<EntryRow> for ExamEntry {
    fn from(row: EntryRow) -> Self {
        ExamEntry {
            exam_id: row.exam_id,
            student_id: row.student_id,
            student_name: row.student_name,
            class_name: row.class_name,
            subject: row.subject,
            term: row.term,
            session: row.session,
            score: row.score,
            raw_score: row.raw_score,
            total_questions: row.total_questions,
            breakdown: row.breakdown.0,
            created_at: Some(row.created_at),
        }
    }
}

#[derive(FromRow)]
struct GradeRow {
    id: i64,
    student_id: i64,
    class_name: String,
    term: String,
    session: String,
    date_recorded: DateTime<Utc>,
    subject_records: Json<Vec<SubjectGradeRecord>>,
}

impl From<GradeRow> for GradeReport {
    fn from(row: GradeRow) -> Self {
        GradeReport {
            id: Some(row.id),
            student_id: row.student_id,
            class_name: row.class_name,
            term: row.term,
            session: row.session,
            date_recorded: row.date_recorded,
            subject_records: row.subject_records.0,
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

/// `RemoteStore` backed by Postgres.
#[derive(Clone)]
pub struct PgRemoteStore {
    pool: PgPool,
}

impl PgRemoteStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RemoteStore for PgRemoteStore {
    async fn submit_questions(&self, questions: Vec<NewQuestion>) -> Result<Vec<Question>, AppError> {
        let mut tx = self.pool.begin().await?;
        let mut stored = Vec::with_capacity(questions.len());

        for q in questions {
            let row: QuestionRow = sqlx::query_as(&format!(
                r#"
                INSERT INTO questions
                (content, answer_type, options, correct_answer, subject, class_name, term, session, submitted_by)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                RETURNING {QUESTION_COLUMNS}
                "#
            ))
            .bind(&q.content)
            .bind(q.answer_type.as_str())
            .bind(Json(&q.options))
            .bind(&q.correct_answer)
            .bind(&q.subject)
            .bind(&q.class_name)
            .bind(&q.term)
            .bind(&q.session)
            .bind(q.submitted_by)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                tracing::error!("Failed to insert question: {:?}", e);
                AppError::InternalServerError(e.to_string())
            })?;
            stored.push(Question::try_from(row)?);
        }

        tx.commit().await?;
        Ok(stored)
    }

    async fn list_questions(&self, filter: &QuestionFilter) -> Result<Vec<Question>, AppError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {QUESTION_COLUMNS} FROM questions WHERE TRUE"));

        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(class_name) = &filter.class_name {
            builder.push(" AND class_name = ").push_bind(class_name.clone());
        }
        if let Some(subject) = &filter.subject {
            builder.push(" AND subject = ").push_bind(subject.clone());
        }
        builder.push(" ORDER BY id");

        let rows = builder.build_query_as::<QuestionRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(Question::try_from).collect()
    }

    async fn get_question(&self, id: i64) -> Result<Option<Question>, AppError> {
        let row: Option<QuestionRow> =
            sqlx::query_as(&format!("SELECT {QUESTION_COLUMNS} FROM questions WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Question::try_from).transpose()
    }

    async fn set_question_status(
        &self,
        id: i64,
        status: QuestionStatus,
        comment: Option<String>,
    ) -> Result<Question, AppError> {
        let row: QuestionRow = sqlx::query_as(&format!(
            "UPDATE questions SET status = $1, admin_comment = $2 WHERE id = $3 RETURNING {QUESTION_COLUMNS}"
        ))
        .bind(status.as_str())
        .bind(comment)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound("Question not found".to_string()))?;
        Question::try_from(row)
    }

    async fn resubmit_question(&self, id: i64, q: NewQuestion) -> Result<Question, AppError> {
        let row: QuestionRow = sqlx::query_as(&format!(
            r#"
            UPDATE questions SET
                content = $1, answer_type = $2, options = $3, correct_answer = $4,
                subject = $5, class_name = $6, term = $7, session = $8,
                status = 'pending', admin_comment = NULL
            WHERE id = $9
            RETURNING {QUESTION_COLUMNS}
            "#
        ))
        .bind(&q.content)
        .bind(q.answer_type.as_str())
        .bind(Json(&q.options))
        .bind(&q.correct_answer)
        .bind(&q.subject)
        .bind(&q.class_name)
        .bind(&q.term)
        .bind(&q.session)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound("Question not found".to_string()))?;
        Question::try_from(row)
    }

    async fn approve_subject(&self, subject: &str) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE questions SET status = 'approved' WHERE subject = $1 AND status = 'pending'",
        )
        .bind(subject)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_approved_questions(
        &self,
        subject: &str,
        class_name: &str,
        term: &str,
    ) -> Result<Vec<Question>, AppError> {
        let rows: Vec<QuestionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {QUESTION_COLUMNS} FROM questions
            WHERE status = 'approved' AND subject = $1 AND class_name = $2 AND term = $3
            ORDER BY id
            "#
        ))
        .bind(subject)
        .bind(class_name)
        .bind(term)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch approved questions: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;
        rows.into_iter().map(Question::try_from).collect()
    }

    async fn create_exam(&self, exam: NewExam) -> Result<ScheduledExam, AppError> {
        let row: ExamRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO exams
            (subject, class_name, term, session, scheduled_date, time_limit_minutes, num_questions, question_ids)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {EXAM_COLUMNS}
            "#
        ))
        .bind(exam.subject)
        .bind(exam.class_name)
        .bind(exam.term)
        .bind(exam.session)
        .bind(exam.scheduled_date)
        .bind(exam.time_limit_minutes)
        .bind(exam.num_questions)
        .bind(Json(exam.question_ids))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to create exam: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;
        Ok(row.into())
    }

    async fn update_exam(&self, id: i64, exam: NewExam) -> Result<ScheduledExam, AppError> {
        let row: ExamRow = sqlx::query_as(&format!(
            r#"
            UPDATE exams SET
                subject = $1, class_name = $2, term = $3, session = $4, scheduled_date = $5,
                time_limit_minutes = $6, num_questions = $7, question_ids = $8
            WHERE id = $9
            RETURNING {EXAM_COLUMNS}
            "#
        ))
        .bind(exam.subject)
        .bind(exam.class_name)
        .bind(exam.term)
        .bind(exam.session)
        .bind(exam.scheduled_date)
        .bind(exam.time_limit_minutes)
        .bind(exam.num_questions)
        .bind(Json(exam.question_ids))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound("Exam not found".to_string()))?;
        Ok(row.into())
    }

    async fn delete_exam(&self, id: i64) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM exams WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to delete exam: {:?}", e);
                AppError::InternalServerError(e.to_string())
            })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Exam not found".to_string()));
        }
        Ok(())
    }

    async fn get_exam(&self, id: i64) -> Result<Option<ScheduledExam>, AppError> {
        let row: Option<ExamRow> =
            sqlx::query_as(&format!("SELECT {EXAM_COLUMNS} FROM exams WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(ScheduledExam::from))
    }

    async fn list_exams(&self, filter: &ExamFilter) -> Result<Vec<ScheduledExam>, AppError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {EXAM_COLUMNS} FROM exams WHERE TRUE"));

        if let Some(subject) = &filter.subject {
            builder.push(" AND subject = ").push_bind(subject.clone());
        }
        if let Some(class_name) = &filter.class_name {
            builder.push(" AND class_name = ").push_bind(class_name.clone());
        }
        if let Some(term) = &filter.term {
            builder.push(" AND term = ").push_bind(term.clone());
        }
        if let Some(session) = &filter.session {
            builder.push(" AND session = ").push_bind(session.clone());
        }
        builder.push(" ORDER BY scheduled_date");

        let rows = builder.build_query_as::<ExamRow>().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(ScheduledExam::from).collect())
    }

    async fn get_exam_questions(&self, exam_id: i64) -> Result<Vec<Question>, AppError> {
        let exam = self
            .get_exam(exam_id)
            .await?
            .ok_or(AppError::NotFound("Exam not found".to_string()))?;

        let rows: Vec<QuestionRow> = sqlx::query_as(&format!(
            "SELECT {QUESTION_COLUMNS} FROM questions WHERE id = ANY($1)"
        ))
        .bind(&exam.question_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_id: HashMap<i64, Question> = HashMap::with_capacity(rows.len());
        for row in rows {
            let question = Question::try_from(row)?;
            by_id.insert(question.id, question);
        }

        // Keep the snapshot order
        Ok(exam
            .question_ids
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect())
    }

    async fn get_attempt(&self, exam_id: i64, student_id: i64) -> Result<Option<ExamAttempt>, AppError> {
        let row: Option<AttemptRow> = sqlx::query_as(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM exam_attempts WHERE exam_id = $1 AND student_id = $2"
        ))
        .bind(exam_id)
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ExamAttempt::try_from).transpose()
    }

    async fn begin_attempt(
        &self,
        exam_id: i64,
        student_id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<ExamAttempt, AppError> {
        let row: AttemptRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO exam_attempts (exam_id, student_id, status, started_at)
            VALUES ($1, $2, 'in_progress', $3)
            ON CONFLICT (exam_id, student_id) DO UPDATE SET
                status = CASE WHEN exam_attempts.status = 'not_started'
                    THEN 'in_progress' ELSE exam_attempts.status END,
                started_at = COALESCE(exam_attempts.started_at, EXCLUDED.started_at)
            RETURNING {ATTEMPT_COLUMNS}
            "#
        ))
        .bind(exam_id)
        .bind(student_id)
        .bind(started_at)
        .fetch_one(&self.pool)
        .await?;

        let attempt = ExamAttempt::try_from(row)?;
        if attempt.is_completed() {
            return Err(AppError::Conflict("You have already taken this exam".to_string()));
        }
        Ok(attempt)
    }

    async fn mark_attempt_complete(
        &self,
        exam_id: i64,
        student_id: i64,
        outcome: &AttemptOutcome,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO exam_attempts
            (exam_id, student_id, status, answers, started_at, completed_at, score)
            VALUES ($1, $2, 'completed', $3, $4, $4, $5)
            ON CONFLICT (exam_id, student_id) DO UPDATE SET
                status = 'completed',
                answers = EXCLUDED.answers,
                completed_at = EXCLUDED.completed_at,
                score = EXCLUDED.score
            WHERE exam_attempts.status <> 'completed'
            "#,
        )
        .bind(exam_id)
        .bind(student_id)
        .bind(Json(&outcome.answers))
        .bind(outcome.completed_at)
        .bind(outcome.score)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to mark attempt complete: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict("Attempt already completed".to_string()));
        }
        Ok(())
    }

    async fn record_exam_entry(&self, entry: &ExamEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO exam_entries
            (exam_id, student_id, student_name, class_name, subject, term, session,
             score, raw_score, total_questions, breakdown)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(entry.exam_id)
        .bind(entry.student_id)
        .bind(&entry.student_name)
        .bind(&entry.class_name)
        .bind(&entry.subject)
        .bind(&entry.term)
        .bind(&entry.session)
        .bind(entry.score)
        .bind(entry.raw_score)
        .bind(entry.total_questions)
        .bind(Json(&entry.breakdown))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("Exam entry already recorded".to_string())
            } else {
                tracing::error!("Failed to record exam entry: {:?}", e);
                AppError::InternalServerError(e.to_string())
            }
        })?;
        Ok(())
    }

    async fn list_exam_entries(&self, exam_id: i64) -> Result<Vec<ExamEntry>, AppError> {
        let rows: Vec<EntryRow> = sqlx::query_as(&format!(
            "SELECT {ENTRY_COLUMNS} FROM exam_entries WHERE exam_id = $1 ORDER BY created_at"
        ))
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ExamEntry::from).collect())
    }

    async fn get_grade_record(
        &self,
        student_id: i64,
        class_name: &str,
        term: &str,
        session: &str,
    ) -> Result<Option<GradeReport>, AppError> {
        let row: Option<GradeRow> = sqlx::query_as(&format!(
            r#"
            SELECT {GRADE_COLUMNS} FROM grade_reports
            WHERE student_id = $1 AND class_name = $2 AND term = $3 AND session = $4
            "#
        ))
        .bind(student_id)
        .bind(class_name)
        .bind(term)
        .bind(session)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(GradeReport::from))
    }

    async fn upsert_grade_record(&self, report: GradeReport) -> Result<GradeReport, AppError> {
        let row: GradeRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO grade_reports
            (student_id, class_name, term, session, date_recorded, subject_records)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (student_id, class_name, term, session) DO UPDATE SET
                date_recorded = EXCLUDED.date_recorded,
                subject_records = EXCLUDED.subject_records
            RETURNING {GRADE_COLUMNS}
            "#
        ))
        .bind(report.student_id)
        .bind(report.class_name)
        .bind(report.term)
        .bind(report.session)
        .bind(report.date_recorded)
        .bind(Json(report.subject_records))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to upsert grade record: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;
        Ok(row.into())
    }
}
