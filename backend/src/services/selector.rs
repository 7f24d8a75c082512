// src/services/selector.rs

//! Question selection for a scheduled exam.
//!
//! An exam is drawn mostly (70%) from questions written for its own session and
//! tops up from earlier sessions of the same subject, class and term. When one
//! side runs short the deficit moves to the other side, never past what exists.

use std::collections::HashSet;

use crate::{
    config::CURRENT_SESSION_PERCENT,
    models::question::{Question, QuestionStatus},
};

/// What the exam is being drawn for.
#[derive(Debug, Clone, Copy)]
pub struct SelectionCriteria<'a> {
    pub subject: &'a str,
    pub class_name: &'a str,
    pub term: &'a str,
    pub session: &'a str,
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub questions: Vec<Question>,
    pub requested: usize,
    pub from_current: usize,
    pub from_previous: usize,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// How many questions short of the request the selection fell.
    pub fn shortfall(&self) -> usize {
        self.requested.saturating_sub(self.questions.len())
    }

    pub fn question_ids(&self) -> Vec<i64> {
        self.questions.iter().map(|q| q.id).collect()
    }
}

/// How many current- and previous-session questions to take.
pub fn split_counts(count: usize, current_available: usize, previous_available: usize) -> (usize, usize) {
    let mut needed_current = (count * CURRENT_SESSION_PERCENT).div_ceil(100);
    let mut needed_previous = count - needed_current;

    if current_available < needed_current {
        needed_previous += needed_current - current_available;
        needed_current = current_available;
    }

    if previous_available < needed_previous {
        needed_current = (needed_current + needed_previous - previous_available).min(current_available);
        needed_previous = previous_available;
    }

    (needed_current, needed_previous)
}

/// Selects up to `count` questions from `pool`.
///
/// Only approved questions matching subject, class and term are considered.
/// Pool order is preserved within each side, so the result is deterministic.
/// A question id seen twice in the pool is only used once.
pub fn select_questions(pool: &[Question], count: usize, criteria: &SelectionCriteria<'_>) -> Selection {
    let mut seen = HashSet::new();
    let mut current = Vec::new();
    let mut previous = Vec::new();

    for q in pool {
        if q.status != QuestionStatus::Approved
            || q.subject != criteria.subject
            || q.class_name != criteria.class_name
            || q.term != criteria.term
        {
            continue;
        }
        if !seen.insert(q.id) {
            continue;
        }
        if q.session == criteria.session {
            current.push(q);
        } else {
            previous.push(q);
        }
    }

    let (take_current, take_previous) = split_counts(count, current.len(), previous.len());

    let questions = current
        .into_iter()
        .take(take_current)
        .chain(previous.into_iter().take(take_previous))
        .cloned()
        .collect();

    Selection {
        questions,
        requested: count,
        from_current: take_current,
        from_previous: take_previous,
    }
}
