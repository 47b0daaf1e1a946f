// src/handlers/tests.rs

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::SqlitePool;
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        question::{PublicQuestion, Question},
        test::{CreateTestRequest, Test},
    },
    utils::jwt::Claims,
};

/// Creates a test together with its questions in one shot.
/// Staff only. Question content is sanitized before storage as a fail-safe
/// against stored XSS in whatever client renders it later.
pub async fn create_test(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateTestRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !claims.is_staff() {
        return Err(AppError::Forbidden(
            "Only teachers and admins can create tests".to_string(),
        ));
    }

    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    // Structural checks the derive can't express.
    for (idx, q) in payload.questions.iter().enumerate() {
        if q.question_type.eq_ignore_ascii_case(crate::models::question::TYPE_MCQ) {
            if q.options.len() < 2 {
                return Err(AppError::BadRequest(format!(
                    "Question {}: an MCQ needs at least two options",
                    idx + 1
                )));
            }
            if q.correct_answer.as_deref().is_none_or(str::is_empty) {
                return Err(AppError::BadRequest(format!(
                    "Question {}: an MCQ needs a correct answer",
                    idx + 1
                )));
            }
        }
        if q.marks.is_some_and(|m| m < 0) {
            return Err(AppError::BadRequest(format!(
                "Question {}: marks cannot be negative",
                idx + 1
            )));
        }
    }

    let marks_sum: i64 = payload
        .questions
        .iter()
        .map(|q| q.marks.filter(|m| *m > 0).unwrap_or(1))
        .sum();
    let total_marks = payload.total_marks.filter(|m| *m > 0).unwrap_or(marks_sum);

    let created_by = claims.sub.parse::<i64>().unwrap_or(0);
    let now = chrono::Utc::now();

    let mut tx = pool.begin().await?;

    let test_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO tests (school_id, subject, class_name, section, title, total_marks, created_by, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(claims.school_id)
    .bind(&payload.subject)
    .bind(&payload.class_name)
    .bind(&payload.section)
    .bind(&payload.title)
    .bind(total_marks)
    .bind(created_by)
    .bind(now)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create test: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    for (position, q) in payload.questions.iter().enumerate() {
        let options_json = serde_json::to_value(&q.options).unwrap_or_default();

        sqlx::query(
            r#"
            INSERT INTO questions (test_id, position, question_type, content, options, correct_answer, marks)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(test_id)
        .bind(position as i64 + 1)
        .bind(q.question_type.to_lowercase())
        .bind(ammonia::clean(&q.content))
        .bind(options_json.to_string())
        .bind(&q.correct_answer)
        .bind(q.marks.filter(|m| *m > 0).unwrap_or(1))
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!("Failed to insert question: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;
    }

    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(json!({"id": test_id}))))
}

/// Lists the tests of the caller's school.
pub async fn list_tests(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let tests = sqlx::query_as::<_, Test>(
        "SELECT * FROM tests WHERE school_id = ? ORDER BY id DESC",
    )
    .bind(claims.school_id)
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list tests: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(tests))
}

/// Fetches one test and its questions.
/// Students and parents get the public view, without answer keys.
pub async fn get_test(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let test = fetch_test(&pool, id, claims.school_id).await?;
    let questions = fetch_questions(&pool, id).await?;

    if claims.is_staff() {
        return Ok(Json(json!({ "test": test, "questions": questions })));
    }

    let public: Vec<PublicQuestion> = questions.into_iter().map(PublicQuestion::from).collect();
    Ok(Json(json!({ "test": test, "questions": public })))
}

/// School-scoped test lookup shared with the submission handlers.
pub(crate) async fn fetch_test(
    pool: &SqlitePool,
    id: i64,
    school_id: i64,
) -> Result<Test, AppError> {
    sqlx::query_as::<_, Test>("SELECT * FROM tests WHERE id = ? AND school_id = ?")
        .bind(id)
        .bind(school_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Test not found".to_string()))
}

/// The test's question bank, in authoring order.
pub(crate) async fn fetch_questions(
    pool: &SqlitePool,
    test_id: i64,
) -> Result<Vec<Question>, AppError> {
    let questions = sqlx::query_as::<_, Question>(
        "SELECT * FROM questions WHERE test_id = ? ORDER BY position",
    )
    .bind(test_id)
    .fetch_all(pool)
    .await?;
    Ok(questions)
}
