// src/models/question.rs

use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};
use validator::Validate;

/// Question type tag that the grading engine can auto-grade.
/// Anything else ('theory', 'knowledge', 'application', ...) waits for
/// manual review.
pub const TYPE_MCQ: &str = "mcq";

/// Represents the 'questions' table. Owned by a Test; immutable once the
/// test has submissions.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,

    pub test_id: i64,

    /// Order of the question within its test.
    pub position: i64,

    /// Type tag: 'mcq', 'theory' or a knowledge/application/comprehension tag.
    pub question_type: String,

    /// The text content of the question.
    pub content: String,

    /// List of options (e.g., ["Option A", "Option B"]).
    /// Stored as a JSON array in the database. Empty for non-MCQ questions.
    pub options: Json<Vec<String>>,

    /// The correct answer key or content. Present for MCQ only.
    pub correct_answer: Option<String>,

    /// Marks the question is worth. Non-positive values are treated as 1
    /// by the grading engine.
    pub marks: i64,
}

impl Question {
    pub fn is_mcq(&self) -> bool {
        self.question_type.eq_ignore_ascii_case(TYPE_MCQ)
    }
}

/// DTO for sending a question to students (excludes the answer key).
#[derive(Debug, Serialize)]
pub struct PublicQuestion {
    pub id: i64,
    pub position: i64,
    #[serde(rename = "type")]
    pub question_type: String,
    pub content: String,
    pub options: Json<Vec<String>>,
    pub marks: i64,
}

impl From<Question> for PublicQuestion {
    fn from(q: Question) -> Self {
        PublicQuestion {
            id: q.id,
            position: q.position,
            question_type: q.question_type,
            content: q.content,
            options: q.options,
            marks: q.marks,
        }
    }
}

/// DTO for creating a question inside a new test.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateQuestionRequest {
    #[validate(length(min = 1, max = 20))]
    pub question_type: String,
    #[validate(length(min = 1, max = 2000))]
    pub content: String,
    #[validate(custom(function = validate_options))]
    #[serde(default)]
    pub options: Vec<String>,
    #[validate(length(min = 1, max = 500))]
    pub correct_answer: Option<String>,
    /// Defaults to 1 when absent.
    pub marks: Option<i64>,
}

fn validate_options(options: &[String]) -> Result<(), validator::ValidationError> {
    for opt in options {
        if opt.is_empty() || opt.len() > 500 {
            return Err(validator::ValidationError::new("option_length_invalid"));
        }
    }
    Ok(())
}
