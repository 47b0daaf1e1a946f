// src/handlers/admin.rs

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        school::{CreateSchoolRequest, School},
        teacher::{CreateTeacherRequest, Teacher, UpdateTeacherRequest},
        user::User,
    },
    utils::{hash::hash_password, jwt::Claims},
};

const PROVISIONABLE_ROLES: [&str; 4] = ["sub_admin", "teacher", "student", "parent"];

/// Lists all users of the caller's school.
pub async fn list_users(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let users = sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE school_id = ? ORDER BY id DESC",
    )
    .bind(claims.school_id)
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list users: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(users))
}

/// DTO for an admin creating a user with a specific role.
#[derive(Debug, Deserialize, Validate)]
pub struct AdminCreateUserRequest {
    #[validate(length(
        min = 3,
        max = 50,
        message = "Username length must be between 3 and 50 characters."
    ))]
    pub username: String,
    #[validate(length(
        min = 4,
        max = 128,
        message = "Password length must be between 4 and 128 characters."
    ))]
    pub password: String,
    pub role: String,
    #[validate(length(max = 100))]
    pub full_name: Option<String>,
}

/// Creates a user in the caller's school with the requested role.
pub async fn create_user(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<AdminCreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    if !PROVISIONABLE_ROLES.contains(&payload.role.as_str()) {
        return Err(AppError::BadRequest(format!(
            "'{}' is not a provisionable role",
            payload.role
        )));
    }

    let hashed_password = hash_password(&payload.password)?;

    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO users (school_id, username, password, role, full_name, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(claims.school_id)
    .bind(&payload.username)
    .bind(&hashed_password)
    .bind(&payload.role)
    .bind(&payload.full_name)
    .bind(chrono::Utc::now())
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        if e.to_string().contains("UNIQUE constraint") {
            AppError::Conflict(format!("Username '{}' already exists", payload.username))
        } else {
            tracing::error!("Failed to create user: {:?}", e);
            AppError::InternalServerError(e.to_string())
        }
    })?;

    Ok((StatusCode::CREATED, Json(json!({"id": id}))))
}

/// DTO for updating a user. Fields are optional.
#[derive(Debug, Deserialize)]
pub struct AdminUpdateUserRequest {
    pub username: Option<String>,
    pub role: Option<String>,
    pub password: Option<String>,
    pub full_name: Option<String>,
}

/// Updates user information within the caller's school.
pub async fn update_user(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<AdminUpdateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE id = ? AND school_id = ?")
        .bind(id)
        .bind(claims.school_id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("User not found".to_string()))?;

    if let Some(role) = &payload.role {
        if !PROVISIONABLE_ROLES.contains(&role.as_str()) {
            return Err(AppError::BadRequest(format!(
                "'{}' is not a provisionable role",
                role
            )));
        }
    }

    if let Some(new_username) = payload.username {
        sqlx::query("UPDATE users SET username = ? WHERE id = ?")
            .bind(new_username)
            .bind(id)
            .execute(&pool)
            .await?;
    }

    if let Some(new_role) = payload.role {
        sqlx::query("UPDATE users SET role = ? WHERE id = ?")
            .bind(new_role)
            .bind(id)
            .execute(&pool)
            .await?;
    }

    if let Some(new_full_name) = payload.full_name {
        sqlx::query("UPDATE users SET full_name = ? WHERE id = ?")
            .bind(new_full_name)
            .bind(id)
            .execute(&pool)
            .await?;
    }

    if let Some(new_password) = payload.password {
        let hashed = hash_password(&new_password)?;
        sqlx::query("UPDATE users SET password = ? WHERE id = ?")
            .bind(hashed)
            .bind(id)
            .execute(&pool)
            .await?;
    }

    Ok(StatusCode::OK)
}

/// Deletes a user by ID. Prevents deleting self.
pub async fn delete_user(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let current_user_id = claims.sub.parse::<i64>().unwrap_or(0);
    if id == current_user_id {
        return Err(AppError::BadRequest("Cannot delete yourself".to_string()));
    }

    let result = sqlx::query("DELETE FROM users WHERE id = ? AND school_id = ?")
        .bind(id)
        .bind(claims.school_id)
        .execute(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete user: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Creates a new school. Super admin only.
pub async fn create_school(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateSchoolRequest>,
) -> Result<impl IntoResponse, AppError> {
    if claims.role != "super_admin" {
        return Err(AppError::Forbidden(
            "Only the super admin can create schools".to_string(),
        ));
    }

    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let school = sqlx::query_as::<_, School>(
        r#"
        INSERT INTO schools (name, created_at)
        VALUES (?, ?)
        RETURNING *
        "#,
    )
    .bind(&payload.name)
    .bind(chrono::Utc::now())
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        if e.to_string().contains("UNIQUE constraint") {
            AppError::Conflict(format!("School '{}' already exists", payload.name))
        } else {
            tracing::error!("Failed to create school: {:?}", e);
            AppError::InternalServerError(e.to_string())
        }
    })?;

    Ok((StatusCode::CREATED, Json(school)))
}

/// Lists the teacher roster of the caller's school.
pub async fn list_teachers(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let teachers = sqlx::query_as::<_, Teacher>(
        "SELECT * FROM teachers WHERE school_id = ? ORDER BY id",
    )
    .bind(claims.school_id)
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list teachers: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(teachers))
}

/// Adds a teacher to the roster the allocator schedules from.
pub async fn create_teacher(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateTeacherRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let subjects_json = serde_json::to_value(&payload.subjects).unwrap_or_default();

    let teacher = sqlx::query_as::<_, Teacher>(
        r#"
        INSERT INTO teachers (school_id, user_id, name, subjects, created_at)
        VALUES (?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(claims.school_id)
    .bind(payload.user_id)
    .bind(&payload.name)
    .bind(subjects_json.to_string())
    .bind(chrono::Utc::now())
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create teacher: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok((StatusCode::CREATED, Json(teacher)))
}

/// Updates a roster entry by ID. Fields are optional.
pub async fn update_teacher(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateTeacherRequest>,
) -> Result<impl IntoResponse, AppError> {
    if payload.name.is_none() && payload.subjects.is_none() && payload.user_id.is_none() {
        return Ok(StatusCode::OK);
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE teachers SET ");
    let mut separated = builder.separated(", ");

    if let Some(name) = payload.name {
        separated.push("name = ");
        separated.push_bind_unseparated(name);
    }

    if let Some(subjects) = payload.subjects {
        if subjects.is_empty() {
            return Err(AppError::BadRequest(
                "A teacher needs at least one subject".to_string(),
            ));
        }
        separated.push("subjects = ");
        separated.push_bind_unseparated(
            serde_json::to_value(subjects).unwrap_or_default().to_string(),
        );
    }

    if let Some(user_id) = payload.user_id {
        separated.push("user_id = ");
        separated.push_bind_unseparated(user_id);
    }

    builder.push(" WHERE id = ");
    builder.push_bind(id);
    builder.push(" AND school_id = ");
    builder.push_bind(claims.school_id);

    let result = builder.build().execute(&pool).await.map_err(|e| {
        tracing::error!("Failed to update teacher: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Teacher not found".to_string()));
    }

    Ok(StatusCode::OK)
}

/// Removes a teacher from the roster.
pub async fn delete_teacher(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM teachers WHERE id = ? AND school_id = ?")
        .bind(id)
        .bind(claims.school_id)
        .execute(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete teacher: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Teacher not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}
