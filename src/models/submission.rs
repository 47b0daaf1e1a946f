// src/models/submission.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_GRADED: &str = "graded";

/// Represents the 'submissions' table: one student's attempt at a Test.
/// At most one row per (test, student), enforced by a unique index.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Submission {
    pub id: i64,
    pub test_id: i64,
    pub student_id: i64,
    /// 'pending' until every question carries marks; 'graded' afterwards.
    pub status: String,
    pub marks_obtained: Option<i64>,
    pub percentage: Option<f64>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub graded_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Represents the 'answers' table, owned by a Submission.
/// `correct_answer` is a snapshot taken at grading time so historical
/// submissions stay interpretable even if the question bank changes.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Answer {
    pub id: i64,
    pub submission_id: i64,
    pub question_id: i64,
    pub student_answer: String,
    pub is_correct: Option<bool>,
    pub marks_obtained: Option<i64>,
    pub correct_answer: Option<String>,
}

/// DTO for one answer in a submission payload.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct AnswerPayload {
    pub question_id: i64,
    #[validate(length(max = 5000, message = "Answer text exceeds the 5000 character limit."))]
    pub student_answer: String,
}

/// DTO for submitting a test attempt.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitTestRequest {
    #[validate(length(min = 1, message = "At least one answer is required."), nested)]
    pub answers: Vec<AnswerPayload>,
}

/// DTO for a teacher assigning marks to one theory answer.
#[derive(Debug, Serialize, Deserialize)]
pub struct QuestionGrade {
    pub question_id: i64,
    pub marks: i64,
}

/// DTO for manual grading of the theory portion of a submission.
#[derive(Debug, Deserialize, Validate)]
pub struct ManualGradeRequest {
    #[validate(length(min = 1, message = "At least one grade entry is required."))]
    pub grades: Vec<QuestionGrade>,
}
