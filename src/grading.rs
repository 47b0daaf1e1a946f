// src/grading.rs

use std::collections::HashMap;

use crate::models::question::Question;

/// Working copy of one answer while a submission is being scored.
/// Persisted into the 'answers' table once grading has run.
#[derive(Debug, Clone)]
pub struct GradedAnswer {
    pub question_id: i64,
    pub student_answer: String,
    pub is_correct: Option<bool>,
    pub marks_obtained: Option<i64>,
    /// Snapshot of the question's answer key, copied at grading time so the
    /// submission stays reviewable even if the question bank changes later.
    pub correct_answer: Option<String>,
}

impl GradedAnswer {
    pub fn new(question_id: i64, student_answer: String) -> Self {
        GradedAnswer {
            question_id,
            student_answer,
            is_correct: None,
            marks_obtained: None,
            correct_answer: None,
        }
    }
}

/// Result of one auto-grading pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GradeOutcome {
    /// Marks earned on the MCQ portion.
    pub auto_graded_marks: i64,
    /// Sum of marks across MCQ questions that were answered. Never zero.
    pub total_mcq_marks: i64,
    pub correct_count: u32,
    /// Answers whose question id matched nothing in the bank.
    pub skipped: u32,
}

impl GradeOutcome {
    /// Percentage over the MCQ portion only. Safe: `total_mcq_marks >= 1`.
    pub fn mcq_percentage(&self) -> f64 {
        self.auto_graded_marks as f64 / self.total_mcq_marks as f64 * 100.0
    }
}

/// Marks a question is worth, with unset/non-positive values treated as 1.
pub fn effective_marks(question: &Question) -> i64 {
    if question.marks > 0 { question.marks } else { 1 }
}

/// MCQ answer comparison: leading/trailing whitespace and ASCII case are
/// ignored, so "true" and " True " grade the same.
pub fn answers_match(given: &str, expected: &str) -> bool {
    given.trim().eq_ignore_ascii_case(expected.trim())
}

/// Scores the MCQ portion of a submission against the test's question bank.
///
/// * Each answer is matched to its question by id. An unmatched answer is
///   skipped and counted, never an error: one stale id must not block
///   grading for every other item.
/// * Matched MCQ answers get `is_correct`/`marks_obtained` set and the
///   answer key snapshotted onto them. Non-MCQ answers are left untouched
///   for manual review.
/// * Pure and idempotent: same inputs always produce the same outcome.
pub fn grade_submission(answers: &mut [GradedAnswer], questions: &[Question]) -> GradeOutcome {
    let bank: HashMap<i64, &Question> = questions.iter().map(|q| (q.id, q)).collect();

    let mut auto_graded_marks: i64 = 0;
    let mut total_mcq_marks: i64 = 0;
    let mut correct_count: u32 = 0;
    let mut skipped: u32 = 0;

    for answer in answers.iter_mut() {
        let Some(question) = bank.get(&answer.question_id) else {
            skipped += 1;
            tracing::warn!(
                "Answer references unknown question {}, skipping",
                answer.question_id
            );
            continue;
        };

        if !question.is_mcq() {
            continue;
        }

        let marks = effective_marks(question);
        total_mcq_marks += marks;

        let correct = matches!(
            question.correct_answer.as_deref(),
            Some(key) if answers_match(&answer.student_answer, key)
        );

        if correct {
            answer.is_correct = Some(true);
            answer.marks_obtained = Some(marks);
            auto_graded_marks += marks;
            correct_count += 1;
        } else {
            answer.is_correct = Some(false);
            answer.marks_obtained = Some(0);
        }

        // Snapshot the key whether the answer was right or wrong.
        answer.correct_answer = question.correct_answer.clone();
    }

    // Floor to 1 so percentage math never divides by zero.
    if total_mcq_marks == 0 {
        total_mcq_marks = 1;
    }

    GradeOutcome {
        auto_graded_marks,
        total_mcq_marks,
        correct_count,
        skipped,
    }
}

/// A submission can be finalized by the auto-grader alone only when every
/// question in the test is MCQ; any theory content keeps it pending.
pub fn all_auto_gradable(questions: &[Question]) -> bool {
    !questions.is_empty() && questions.iter().all(|q| q.is_mcq())
}
