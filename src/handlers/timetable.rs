// src/handlers/timetable.rs

use std::collections::HashSet;
use std::sync::LazyLock;

use axum::{
    Json,
    extract::{Extension, Path, State},
    response::IntoResponse,
};
use regex::Regex;
use serde_json::json;
use sqlx::SqlitePool;

use crate::{
    allocator::{self, AllocationInput, RosterTeacher, WEEK_DAYS},
    error::AppError,
    models::{
        teacher::Teacher,
        timetable::{GenerateTimetableRequest, Timetable, TimetableEntry, UpdateEntryRequest},
    },
    utils::jwt::Claims,
};

static TIME_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([01]\d|2[0-3]):[0-5]\d$").unwrap());

/// Generates and persists conflict-free timetables for the requested
/// classes. Admin only.
///
/// The deterministic allocator is the ground-truth scheduling path. Slots
/// already taken by timetables outside this run seed the busy set, so
/// regenerating a subset of classes cannot double-book a teacher against a
/// grid that is left untouched. Existing entries of every target timetable
/// are replaced wholesale inside a single transaction.
pub async fn generate_timetable(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<GenerateTimetableRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_generate(&payload)?;

    let teachers: Vec<RosterTeacher> = if payload.teachers.is_empty() {
        let roster = sqlx::query_as::<_, Teacher>(
            "SELECT * FROM teachers WHERE school_id = ? ORDER BY id",
        )
        .bind(claims.school_id)
        .fetch_all(&pool)
        .await?;
        roster
            .into_iter()
            .map(|t| RosterTeacher {
                id: t.id,
                name: t.name,
                subjects: t.subjects.0,
            })
            .collect()
    } else {
        payload.teachers.clone()
    };

    if teachers.is_empty() {
        return Err(AppError::BadRequest(
            "No teachers available for scheduling".to_string(),
        ));
    }

    let input = AllocationInput {
        teachers,
        classes: payload.classes.clone(),
        working_days: payload.working_days.clone(),
        periods: payload.periods.clone(),
        subject_hours_per_week: payload.subject_hours_per_week.clone(),
        constraints: payload.constraints.clone(),
    };

    // Timetables this run will replace.
    let mut target_ids: Vec<i64> = Vec::new();
    for class in &input.classes {
        for section in &class.sections {
            let id = sqlx::query_scalar::<_, i64>(
                "SELECT id FROM timetables WHERE school_id = ? AND class_name = ? AND section = ?",
            )
            .bind(claims.school_id)
            .bind(&class.name)
            .bind(section)
            .fetch_optional(&pool)
            .await?;
            if let Some(id) = id {
                target_ids.push(id);
            }
        }
    }

    let existing = fetch_foreign_bookings(&pool, claims.school_id, &target_ids).await?;
    let allocation = allocator::allocate_with_existing(&input, &existing);

    // Replace the grids in one transaction: resolve + clear every target
    // timetable first, then insert, so a new grid can never collide with a
    // stale row of another grid from the same run.
    let now = chrono::Utc::now();
    let mut tx = pool.begin().await?;

    let mut timetable_ids: Vec<i64> = Vec::with_capacity(allocation.grids.len());
    for grid in &allocation.grids {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM timetables WHERE school_id = ? AND class_name = ? AND section = ?",
        )
        .bind(claims.school_id)
        .bind(&grid.class_name)
        .bind(&grid.section)
        .fetch_optional(&mut *tx)
        .await?;

        let timetable_id = match found {
            Some(id) => id,
            None => {
                sqlx::query_scalar::<_, i64>(
                    r#"
                    INSERT INTO timetables (school_id, class_name, section, created_at)
                    VALUES (?, ?, ?, ?)
                    RETURNING id
                    "#,
                )
                .bind(claims.school_id)
                .bind(&grid.class_name)
                .bind(&grid.section)
                .bind(now)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        sqlx::query("DELETE FROM timetable_entries WHERE timetable_id = ?")
            .bind(timetable_id)
            .execute(&mut *tx)
            .await?;

        timetable_ids.push(timetable_id);
    }

    for (grid, timetable_id) in allocation.grids.iter().zip(&timetable_ids) {
        for cell in &grid.cells {
            sqlx::query(
                r#"
                INSERT INTO timetable_entries
                (timetable_id, school_id, day, period_number, start_time, end_time,
                 subject, teacher_id, teacher_name, room, entry_kind)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(timetable_id)
            .bind(claims.school_id)
            .bind(&cell.day)
            .bind(cell.period_number)
            .bind(&cell.start_time)
            .bind(&cell.end_time)
            .bind(&cell.subject)
            .bind(cell.teacher_id)
            .bind(&cell.teacher_name)
            .bind(Option::<String>::None)
            .bind(cell.kind.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if e.to_string().contains("UNIQUE constraint") {
                    AppError::Conflict(
                        "A concurrent regeneration booked a teacher into the same slot"
                            .to_string(),
                    )
                } else {
                    tracing::error!("Failed to insert timetable entry: {:?}", e);
                    AppError::InternalServerError(e.to_string())
                }
            })?;
        }
    }

    tx.commit().await?;

    if allocation.summary.unassigned > 0 {
        tracing::warn!(
            "Timetable generation left {} periods unassigned across {} grids",
            allocation.summary.unassigned,
            allocation.grids.len()
        );
    }

    Ok(Json(json!({
        "success": true,
        "summary": allocation.summary,
        "timetables": allocation.grids,
    })))
}

/// Fetches the stored grid for one class-section.
pub async fn get_timetable(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Path((class_name, section)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let timetable = sqlx::query_as::<_, Timetable>(
        "SELECT * FROM timetables WHERE school_id = ? AND class_name = ? AND section = ?",
    )
    .bind(claims.school_id)
    .bind(&class_name)
    .bind(&section)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Timetable not found".to_string()))?;

    // Insertion order is day-major, so id order reproduces the grid.
    let entries = sqlx::query_as::<_, TimetableEntry>(
        "SELECT * FROM timetable_entries WHERE timetable_id = ? ORDER BY id",
    )
    .bind(timetable.id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(json!({ "timetable": timetable, "entries": entries })))
}

/// Overwrites a single cell without re-running the allocator. Admin only.
///
/// Quota tracking is deliberately bypassed here, but the teacher
/// double-booking invariant is re-checked on this path too: a cell edit is
/// rejected with 409 when the teacher already holds that slot in another
/// timetable of the school.
pub async fn update_entry(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Path(timetable_id): Path<i64>,
    Json(payload): Json<UpdateEntryRequest>,
) -> Result<impl IntoResponse, AppError> {
    let timetable = sqlx::query_as::<_, Timetable>(
        "SELECT * FROM timetables WHERE id = ? AND school_id = ?",
    )
    .bind(timetable_id)
    .bind(claims.school_id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Timetable not found".to_string()))?;

    if !WEEK_DAYS.contains(&payload.day.as_str()) {
        return Err(AppError::BadRequest(format!(
            "'{}' is not a valid working day",
            payload.day
        )));
    }

    let teacher = sqlx::query_as::<_, Teacher>(
        "SELECT * FROM teachers WHERE id = ? AND school_id = ?",
    )
    .bind(payload.teacher_id)
    .bind(claims.school_id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Teacher not found".to_string()))?;

    if !teacher.subjects.0.contains(&payload.subject) {
        return Err(AppError::BadRequest(format!(
            "{} does not teach {}",
            teacher.name, payload.subject
        )));
    }

    let current = sqlx::query_as::<_, TimetableEntry>(
        "SELECT * FROM timetable_entries WHERE timetable_id = ? AND day = ? AND period_number = ?",
    )
    .bind(timetable.id)
    .bind(&payload.day)
    .bind(payload.period_number)
    .fetch_optional(&pool)
    .await?;

    if let Some(entry) = &current {
        if entry.entry_kind == "break" || entry.entry_kind == "lunch" {
            return Err(AppError::BadRequest(
                "Break and lunch slots cannot be assigned".to_string(),
            ));
        }
    }

    let clash = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT id FROM timetable_entries
        WHERE school_id = ? AND day = ? AND period_number = ? AND teacher_id = ?
          AND timetable_id != ?
        "#,
    )
    .bind(claims.school_id)
    .bind(&payload.day)
    .bind(payload.period_number)
    .bind(payload.teacher_id)
    .bind(timetable.id)
    .fetch_optional(&pool)
    .await?;

    if clash.is_some() {
        return Err(AppError::Conflict(format!(
            "{} is already scheduled elsewhere on {} period {}",
            teacher.name, payload.day, payload.period_number
        )));
    }

    // Times come from the existing cell unless the payload overrides them;
    // a brand new cell must bring its own.
    let start_time = payload
        .start_time
        .clone()
        .or_else(|| current.as_ref().map(|e| e.start_time.clone()));
    let end_time = payload
        .end_time
        .clone()
        .or_else(|| current.as_ref().map(|e| e.end_time.clone()));
    let (Some(start_time), Some(end_time)) = (start_time, end_time) else {
        return Err(AppError::BadRequest(
            "start_time and end_time are required for a new cell".to_string(),
        ));
    };
    if !TIME_FORMAT.is_match(&start_time) || !TIME_FORMAT.is_match(&end_time) {
        return Err(AppError::BadRequest(
            "Period times must use the HH:MM format".to_string(),
        ));
    }

    let entry = sqlx::query_as::<_, TimetableEntry>(
        r#"
        INSERT INTO timetable_entries
        (timetable_id, school_id, day, period_number, start_time, end_time,
         subject, teacher_id, teacher_name, room, entry_kind)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'regular')
        ON CONFLICT(timetable_id, day, period_number) DO UPDATE SET
            start_time = excluded.start_time,
            end_time = excluded.end_time,
            subject = excluded.subject,
            teacher_id = excluded.teacher_id,
            teacher_name = excluded.teacher_name,
            room = excluded.room,
            entry_kind = excluded.entry_kind
        RETURNING *
        "#,
    )
    .bind(timetable.id)
    .bind(claims.school_id)
    .bind(&payload.day)
    .bind(payload.period_number)
    .bind(&start_time)
    .bind(&end_time)
    .bind(&payload.subject)
    .bind(payload.teacher_id)
    .bind(&teacher.name)
    .bind(&payload.room)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        if e.to_string().contains("UNIQUE constraint") {
            AppError::Conflict(format!(
                "{} is already scheduled elsewhere in that slot",
                teacher.name
            ))
        } else {
            tracing::error!("Failed to update timetable entry: {:?}", e);
            AppError::InternalServerError(e.to_string())
        }
    })?;

    Ok(Json(json!({ "entry": entry })))
}

/// Bookings owned by timetables outside the current generation run.
async fn fetch_foreign_bookings(
    pool: &SqlitePool,
    school_id: i64,
    exclude_ids: &[i64],
) -> Result<Vec<(String, i64, i64)>, AppError> {
    let mut builder = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
        "SELECT day, period_number, teacher_id FROM timetable_entries \
         WHERE teacher_id IS NOT NULL AND school_id = ",
    );
    builder.push_bind(school_id);

    if !exclude_ids.is_empty() {
        builder.push(" AND timetable_id NOT IN (");
        let mut separated = builder.separated(",");
        for id in exclude_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
    }

    let bookings: Vec<(String, i64, i64)> = builder
        .build_query_as()
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;
    Ok(bookings)
}

/// Structural checks on a generation request: valid unique day names,
/// unique period numbers, HH:MM times, at least one class/section and one
/// quota entry.
fn validate_generate(req: &GenerateTimetableRequest) -> Result<(), AppError> {
    if req.classes.is_empty()
        || req
            .classes
            .iter()
            .any(|c| c.name.is_empty() || c.sections.is_empty())
    {
        return Err(AppError::BadRequest(
            "At least one class with one section is required".to_string(),
        ));
    }

    if req.working_days.is_empty() {
        return Err(AppError::BadRequest(
            "At least one working day is required".to_string(),
        ));
    }
    let mut seen_days: HashSet<&str> = HashSet::new();
    for day in &req.working_days {
        if !WEEK_DAYS.contains(&day.as_str()) {
            return Err(AppError::BadRequest(format!(
                "'{}' is not a valid working day",
                day
            )));
        }
        if !seen_days.insert(day.as_str()) {
            return Err(AppError::BadRequest(format!(
                "Duplicate working day '{}'",
                day
            )));
        }
    }

    if req.periods.is_empty() {
        return Err(AppError::BadRequest(
            "At least one period slot is required".to_string(),
        ));
    }
    let mut seen_numbers: HashSet<i64> = HashSet::new();
    for period in &req.periods {
        if !seen_numbers.insert(period.number) {
            return Err(AppError::BadRequest(format!(
                "Duplicate period number {}",
                period.number
            )));
        }
        if !TIME_FORMAT.is_match(&period.start_time) || !TIME_FORMAT.is_match(&period.end_time) {
            return Err(AppError::BadRequest(
                "Period times must use the HH:MM format".to_string(),
            ));
        }
    }

    if req.subject_hours_per_week.is_empty() {
        return Err(AppError::BadRequest(
            "subject_hours_per_week cannot be empty".to_string(),
        ));
    }

    Ok(())
}
