// src/models/question.rs

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::AppError;

/// How a question is answered. Stored as lowercase text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerType {
    Multichoice,
    Truefalse,
    Text,
}

impl AnswerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerType::Multichoice => "multichoice",
            AnswerType::Truefalse => "truefalse",
            AnswerType::Text => "text",
        }
    }
}

impl FromStr for AnswerType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "multichoice" => Ok(AnswerType::Multichoice),
            "truefalse" => Ok(AnswerType::Truefalse),
            "text" => Ok(AnswerType::Text),
            other => Err(AppError::InternalServerError(format!(
                "unknown answer type '{}'",
                other
            ))),
        }
    }
}

/// Review status of a question in the bank.
/// Only `approved` questions are eligible for exam selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionStatus {
    Pending,
    Approved,
    Rejected,
}

impl QuestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionStatus::Pending => "pending",
            QuestionStatus::Approved => "approved",
            QuestionStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for QuestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QuestionStatus::Pending),
            "approved" => Ok(QuestionStatus::Approved),
            "rejected" => Ok(QuestionStatus::Rejected),
            other => Err(AppError::InternalServerError(format!(
                "unknown question status '{}'",
                other
            ))),
        }
    }
}

/// A question in the bank, including its answer key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,

    /// The text content of the question (sanitized on submission).
    pub content: String,

    pub answer_type: AnswerType,

    /// Choices for `multichoice` questions; empty otherwise.
    #[serde(default)]
    pub options: Vec<String>,

    /// Compared verbatim against the student's answer.
    pub correct_answer: String,

    pub subject: String,
    pub class_name: String,
    pub term: String,
    pub session: String,

    pub status: QuestionStatus,

    /// Reviewer note left when a question is rejected.
    #[serde(default)]
    pub admin_comment: Option<String>,

    #[serde(default)]
    pub submitted_by: Option<i64>,

    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// DTO for sending a question to a student (excludes the answer key).
#[derive(Debug, Clone, Serialize)]
pub struct PublicQuestion {
    pub id: i64,
    pub content: String,
    pub answer_type: AnswerType,
    pub options: Vec<String>,
}

impl From<&Question> for PublicQuestion {
    fn from(q: &Question) -> Self {
        let options = match q.answer_type {
            AnswerType::Truefalse => vec!["True".to_string(), "False".to_string()],
            _ => q.options.clone(),
        };
        PublicQuestion {
            id: q.id,
            content: q.content.clone(),
            answer_type: q.answer_type,
            options,
        }
    }
}

/// Fields of a question as written by a teacher, ready to be stored.
#[derive(Debug, Clone)]
pub struct NewQuestion {
    pub content: String,
    pub answer_type: AnswerType,
    pub options: Vec<String>,
    pub correct_answer: String,
    pub subject: String,
    pub class_name: String,
    pub term: String,
    pub session: String,
    pub submitted_by: Option<i64>,
}

/// DTO for submitting (or resubmitting) a question for approval.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitQuestionRequest {
    #[validate(length(min = 1, max = 2000, message = "Question content is required."))]
    pub content: String,
    pub answer_type: AnswerType,
    #[serde(default)]
    #[validate(custom(function = validate_options))]
    pub options: Vec<String>,
    #[validate(length(min = 1, max = 500, message = "A correct answer is required."))]
    pub correct_answer: String,
    #[validate(length(min = 1, max = 100))]
    pub subject: String,
    #[validate(length(min = 1, max = 50))]
    pub class_name: String,
    #[validate(length(min = 1, max = 50))]
    pub term: String,
    #[validate(length(min = 1, max = 20))]
    pub session: String,
}

impl SubmitQuestionRequest {
    /// Checks that the answer key is consistent with the answer type.
    pub fn check_shape(&self) -> Result<(), AppError> {
        match self.answer_type {
            AnswerType::Multichoice => {
                let filled = self.options.iter().filter(|o| !o.trim().is_empty()).count();
                if filled < 2 {
                    return Err(AppError::BadRequest(
                        "Multichoice questions need at least two options".to_string(),
                    ));
                }
                if !self.options.contains(&self.correct_answer) {
                    return Err(AppError::BadRequest(
                        "Correct answer must be one of the options".to_string(),
                    ));
                }
            }
            AnswerType::Truefalse => {
                if self.correct_answer != "True" && self.correct_answer != "False" {
                    return Err(AppError::BadRequest(
                        "True/false answers must be 'True' or 'False'".to_string(),
                    ));
                }
            }
            AnswerType::Text => {}
        }
        Ok(())
    }

    pub fn into_new_question(self, content: String, submitted_by: Option<i64>) -> NewQuestion {
        let options = match self.answer_type {
            AnswerType::Multichoice => self.options,
            _ => Vec::new(),
        };
        NewQuestion {
            content,
            answer_type: self.answer_type,
            options,
            correct_answer: self.correct_answer,
            subject: self.subject,
            class_name: self.class_name,
            term: self.term,
            session: self.session,
            submitted_by,
        }
    }
}

/// Batch wrapper used by the teacher submission form.
#[derive(Debug, Deserialize)]
pub struct SubmitQuestionsRequest {
    pub questions: Vec<SubmitQuestionRequest>,
}

/// DTO for rejecting a question.
#[derive(Debug, Deserialize, Validate)]
pub struct RejectQuestionRequest {
    #[validate(length(min = 1, max = 1000, message = "A rejection comment is required."))]
    pub comment: String,
}

/// DTO for approving every pending question of one subject.
#[derive(Debug, Deserialize, Validate)]
pub struct ApproveSubjectRequest {
    #[validate(length(min = 1, max = 100))]
    pub subject: String,
}

/// Query parameters for listing questions.
#[derive(Debug, Default, Deserialize)]
pub struct QuestionFilter {
    pub status: Option<QuestionStatus>,
    pub class_name: Option<String>,
    pub subject: Option<String>,
}

impl QuestionFilter {
    pub fn matches(&self, q: &Question) -> bool {
        self.status.is_none_or(|s| q.status == s)
            && self.class_name.as_deref().is_none_or(|c| q.class_name == c)
            && self.subject.as_deref().is_none_or(|s| q.subject == s)
    }
}

fn validate_options(options: &[String]) -> Result<(), validator::ValidationError> {
    if options.len() > 10 {
        return Err(validator::ValidationError::new("too_many_options"));
    }
    for opt in options {
        if opt.len() > 500 {
            return Err(validator::ValidationError::new("option_too_long"));
        }
    }
    Ok(())
}
