// src/handlers/submissions.rs

use axum::{
    Json,
    extract::{Extension, Path, State},
    response::IntoResponse,
};
use serde_json::json;
use sqlx::SqlitePool;
use validator::Validate;

use crate::{
    error::AppError,
    grading::{self, GradedAnswer},
    handlers::tests::{fetch_questions, fetch_test},
    models::submission::{
        Answer, ManualGradeRequest, STATUS_GRADED, STATUS_PENDING, SubmitTestRequest, Submission,
    },
    utils::jwt::Claims,
};

/// Submits a student's attempt and auto-grades its MCQ portion.
///
/// * At most one submission per (test, student): a pre-check gives the
///   friendly error, the unique index is what survives a race.
/// * The MCQ portion is scored immediately; the submission only transitions
///   to 'graded' when the whole test is MCQ. Mixed tests stay 'pending'
///   until a teacher grades the theory answers.
/// * Submission row and answers are persisted in a single transaction.
pub async fn submit_test(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Path(test_id): Path<i64>,
    Json(payload): Json<SubmitTestRequest>,
) -> Result<impl IntoResponse, AppError> {
    if claims.role != "student" {
        return Err(AppError::Forbidden(
            "Only students can submit tests".to_string(),
        ));
    }

    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let student_id = claims.sub.parse::<i64>().unwrap_or(0);
    let test = fetch_test(&pool, test_id, claims.school_id).await?;

    let existing = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM submissions WHERE test_id = ? AND student_id = ?",
    )
    .bind(test.id)
    .bind(student_id)
    .fetch_optional(&pool)
    .await?;
    if existing.is_some() {
        return Err(AppError::Conflict("Test already submitted".to_string()));
    }

    let questions = fetch_questions(&pool, test.id).await?;

    let mut answers: Vec<GradedAnswer> = payload
        .answers
        .iter()
        .map(|a| GradedAnswer::new(a.question_id, a.student_answer.clone()))
        .collect();

    let outcome = grading::grade_submission(&mut answers, &questions);
    let fully_graded = grading::all_auto_gradable(&questions);

    if outcome.skipped > 0 {
        tracing::warn!(
            "Submission for test {} by student {}: {} answers referenced unknown questions",
            test.id,
            student_id,
            outcome.skipped
        );
    }

    let now = chrono::Utc::now();
    let (status, percentage, graded_at) = if fully_graded {
        (STATUS_GRADED, Some(outcome.mcq_percentage()), Some(now))
    } else {
        (STATUS_PENDING, None, None)
    };

    let mut tx = pool.begin().await?;

    let submission = sqlx::query_as::<_, Submission>(
        r#"
        INSERT INTO submissions (test_id, student_id, status, marks_obtained, percentage, created_at, graded_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(test.id)
    .bind(student_id)
    .bind(status)
    .bind(outcome.auto_graded_marks)
    .bind(percentage)
    .bind(now)
    .bind(graded_at)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        if e.to_string().contains("UNIQUE constraint") {
            AppError::Conflict("Test already submitted".to_string())
        } else {
            tracing::error!("Failed to insert submission: {:?}", e);
            AppError::InternalServerError(e.to_string())
        }
    })?;

    for answer in &answers {
        sqlx::query(
            r#"
            INSERT INTO answers (submission_id, question_id, student_answer, is_correct, marks_obtained, correct_answer)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(submission.id)
        .bind(answer.question_id)
        .bind(&answer.student_answer)
        .bind(answer.is_correct)
        .bind(answer.marks_obtained)
        .bind(&answer.correct_answer)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    let stored_answers = fetch_answers(&pool, submission.id).await?;

    Ok(Json(json!({
        "submission": submission,
        "answers": stored_answers,
        "auto_graded": {
            "marks": outcome.auto_graded_marks,
            "total_mcq_marks": outcome.total_mcq_marks,
            "correct_count": outcome.correct_count,
            "skipped": outcome.skipped,
            "percentage": outcome.mcq_percentage(),
        },
        "message": if fully_graded {
            "Submission graded automatically"
        } else {
            "Submission received; theory answers await manual grading"
        }
    })))
}

/// Lists all submissions for a test. Staff only.
pub async fn list_submissions(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Path(test_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if !claims.is_staff() {
        return Err(AppError::Forbidden(
            "Only staff can list submissions".to_string(),
        ));
    }

    let test = fetch_test(&pool, test_id, claims.school_id).await?;

    let submissions = sqlx::query_as::<_, Submission>(
        "SELECT * FROM submissions WHERE test_id = ? ORDER BY id",
    )
    .bind(test.id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(submissions))
}

/// Fetches one submission with its answers.
/// Visible to the owning student and to staff.
pub async fn get_submission(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let submission = fetch_submission(&pool, id, claims.school_id).await?;

    let caller_id = claims.sub.parse::<i64>().unwrap_or(0);
    if !claims.is_staff() && submission.student_id != caller_id {
        return Err(AppError::Forbidden(
            "You may only view your own submissions".to_string(),
        ));
    }

    let answers = fetch_answers(&pool, submission.id).await?;

    Ok(Json(json!({ "submission": submission, "answers": answers })))
}

/// Applies a teacher's marks to the theory answers of a submission.
///
/// MCQ answers cannot be overridden here; they were scored at submission
/// time. Once every answer carries marks the submission transitions to
/// 'graded' with a percentage over the test's total marks; otherwise the
/// partial marks are stored and the submission stays 'pending'.
pub async fn grade_theory(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<ManualGradeRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !claims.is_staff() {
        return Err(AppError::Forbidden(
            "Only staff can grade submissions".to_string(),
        ));
    }

    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let submission = fetch_submission(&pool, id, claims.school_id).await?;
    let test = fetch_test(&pool, submission.test_id, claims.school_id).await?;
    let questions = fetch_questions(&pool, test.id).await?;
    let mut answers = fetch_answers(&pool, submission.id).await?;

    for grade in &payload.grades {
        let Some(question) = questions.iter().find(|q| q.id == grade.question_id) else {
            return Err(AppError::BadRequest(format!(
                "Question {} does not belong to this test",
                grade.question_id
            )));
        };
        if question.is_mcq() {
            return Err(AppError::BadRequest(format!(
                "Question {} is auto-graded and cannot be regraded manually",
                grade.question_id
            )));
        }
        let max = grading::effective_marks(question);
        if grade.marks < 0 || grade.marks > max {
            return Err(AppError::BadRequest(format!(
                "Marks for question {} must be between 0 and {}",
                grade.question_id, max
            )));
        }
        let Some(answer) = answers.iter_mut().find(|a| a.question_id == grade.question_id)
        else {
            return Err(AppError::BadRequest(format!(
                "No answer recorded for question {}",
                grade.question_id
            )));
        };
        answer.marks_obtained = Some(grade.marks);
    }

    let total: i64 = answers.iter().filter_map(|a| a.marks_obtained).sum();
    let complete = answers.iter().all(|a| a.marks_obtained.is_some());
    let now = chrono::Utc::now();

    let (status, percentage, graded_at) = if complete {
        let denominator = test.total_marks.max(1) as f64;
        (
            STATUS_GRADED,
            Some(total as f64 / denominator * 100.0),
            Some(now),
        )
    } else {
        (STATUS_PENDING, None, None)
    };

    let mut tx = pool.begin().await?;

    for answer in &answers {
        sqlx::query("UPDATE answers SET marks_obtained = ? WHERE id = ?")
            .bind(answer.marks_obtained)
            .bind(answer.id)
            .execute(&mut *tx)
            .await?;
    }

    let updated = sqlx::query_as::<_, Submission>(
        r#"
        UPDATE submissions SET status = ?, marks_obtained = ?, percentage = ?, graded_at = ?
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(status)
    .bind(total)
    .bind(percentage)
    .bind(graded_at)
    .bind(submission.id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Json(json!({
        "submission": updated,
        "message": if complete { "Submission fully graded" } else { "Partial grades saved" }
    })))
}

/// School-scoped submission lookup (through the owning test).
async fn fetch_submission(
    pool: &SqlitePool,
    id: i64,
    school_id: i64,
) -> Result<Submission, AppError> {
    sqlx::query_as::<_, Submission>(
        r#"
        SELECT s.* FROM submissions s
        JOIN tests t ON t.id = s.test_id
        WHERE s.id = ? AND t.school_id = ?
        "#,
    )
    .bind(id)
    .bind(school_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Submission not found".to_string()))
}

async fn fetch_answers(pool: &SqlitePool, submission_id: i64) -> Result<Vec<Answer>, AppError> {
    let answers = sqlx::query_as::<_, Answer>(
        "SELECT * FROM answers WHERE submission_id = ? ORDER BY id",
    )
    .bind(submission_id)
    .fetch_all(pool)
    .await?;
    Ok(answers)
}
