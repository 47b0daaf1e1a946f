// tests/timetable_tests.rs
//
// Generation end-to-end: conflict-free grids are persisted wholesale,
// shortfalls are reported, and manual cell edits re-check the
// double-booking invariant.

use std::collections::HashSet;

use custos::{config::Config, routes, state::AppState};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

async fn spawn_app() -> (String, SqlitePool) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    let config = Config {
        database_url: "sqlite::memory:".to_string(),
        jwt_secret: "timetable_test_secret".to_string(),
        jwt_expiration: 600,
        rust_log: "error".to_string(),
        admin_username: None,
        admin_password: None,
    };

    let state = AppState {
        pool: pool.clone(),
        config,
    };
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (address, pool)
}

async fn seed_school(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar::<_, i64>(
        "INSERT INTO schools (name, created_at) VALUES (?, ?) RETURNING id",
    )
    .bind(format!("School {}", &uuid::Uuid::new_v4().to_string()[..8]))
    .bind(chrono::Utc::now())
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn seed_user(pool: &SqlitePool, school_id: i64, role: &str) -> String {
    let username = format!("u_{}", &uuid::Uuid::new_v4().to_string()[..8]);
    let hashed = custos::utils::hash::hash_password("password123").unwrap();
    sqlx::query(
        "INSERT INTO users (school_id, username, password, role, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(school_id)
    .bind(&username)
    .bind(&hashed)
    .bind(role)
    .bind(chrono::Utc::now())
    .execute(pool)
    .await
    .unwrap();
    username
}

async fn login(address: &str, username: &str) -> String {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/auth/login", address))
        .json(&serde_json::json!({"username": username, "password": "password123"}))
        .send()
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap();
    resp["token"].as_str().unwrap().to_string()
}

fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

fn periods_json(regular: i64) -> serde_json::Value {
    let mut slots: Vec<serde_json::Value> = (1..=regular)
        .map(|n| {
            serde_json::json!({
                "number": n,
                "start_time": format!("{:02}:00", 8 + n),
                "end_time": format!("{:02}:45", 8 + n),
                "kind": "regular"
            })
        })
        .collect();
    slots.push(serde_json::json!({
        "number": regular + 1,
        "start_time": "13:00",
        "end_time": "13:30",
        "kind": "lunch"
    }));
    serde_json::Value::Array(slots)
}

#[tokio::test]
async fn generation_reports_shortfall_and_never_misassigns() {
    let (address, pool) = spawn_app().await;
    let client = reqwest::Client::new();
    let school_id = seed_school(&pool).await;
    let admin = seed_user(&pool, school_id, "sub_admin").await;
    let token = login(&address, &admin).await;

    // One maths-only teacher; science has no eligible resource.
    let resp = client
        .post(format!("{}/api/admin/timetables/generate", address))
        .header("Authorization", bearer(&token))
        .json(&serde_json::json!({
            "teachers": [{"id": 1, "name": "Asha", "subjects": ["Math"]}],
            "classes": [{"name": "10", "sections": ["A"]}],
            "working_days": ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday"],
            "periods": periods_json(3),
            "subject_hours_per_week": {"Math": 3, "Science": 3}
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["summary"]["total_periods"], 3);
    assert_eq!(body["summary"]["classes_scheduled"], 1);
    // 15 regular cells, 3 filled.
    assert_eq!(body["summary"]["unassigned"], 12);

    let grid: serde_json::Value = client
        .get(format!("{}/api/timetables/10/A", address))
        .header("Authorization", bearer(&token))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let entries = grid["entries"].as_array().unwrap();
    // 5 days x (3 regular + 1 lunch placeholder)
    assert_eq!(entries.len(), 20);
    assert!(
        entries
            .iter()
            .all(|e| e["subject"].as_str() != Some("Science"))
    );
    for entry in entries {
        if entry["entry_kind"] == "lunch" {
            assert!(entry["subject"].is_null());
            assert!(entry["teacher_id"].is_null());
        }
    }
    assert_eq!(
        entries
            .iter()
            .filter(|e| e["subject"].as_str() == Some("Math"))
            .count(),
        3
    );
}

#[tokio::test]
async fn one_teacher_is_never_in_two_sections_at_once() {
    let (address, pool) = spawn_app().await;
    let client = reqwest::Client::new();
    let school_id = seed_school(&pool).await;
    let admin = seed_user(&pool, school_id, "sub_admin").await;
    let token = login(&address, &admin).await;

    let resp = client
        .post(format!("{}/api/admin/timetables/generate", address))
        .header("Authorization", bearer(&token))
        .json(&serde_json::json!({
            "teachers": [{"id": 1, "name": "Asha", "subjects": ["Math"]}],
            "classes": [{"name": "10", "sections": ["A", "B"]}],
            "working_days": ["Monday"],
            "periods": periods_json(2),
            "subject_hours_per_week": {"Math": 2}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    // Section B finds the only teacher already booked everywhere.
    assert_eq!(body["summary"]["unassigned"], 2);

    let mut taken: HashSet<(String, i64, i64)> = HashSet::new();
    for section in ["A", "B"] {
        let grid: serde_json::Value = client
            .get(format!("{}/api/timetables/10/{}", address, section))
            .header("Authorization", bearer(&token))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        for entry in grid["entries"].as_array().unwrap() {
            if let Some(teacher_id) = entry["teacher_id"].as_i64() {
                let key = (
                    entry["day"].as_str().unwrap().to_string(),
                    entry["period_number"].as_i64().unwrap(),
                    teacher_id,
                );
                assert!(taken.insert(key), "teacher double-booked across sections");
            }
        }
    }
}

#[tokio::test]
async fn regeneration_replaces_entries_wholesale() {
    let (address, pool) = spawn_app().await;
    let client = reqwest::Client::new();
    let school_id = seed_school(&pool).await;
    let admin = seed_user(&pool, school_id, "sub_admin").await;
    let token = login(&address, &admin).await;

    let payload = serde_json::json!({
        "teachers": [{"id": 1, "name": "Asha", "subjects": ["Math"]}],
        "classes": [{"name": "10", "sections": ["A"]}],
        "working_days": ["Monday", "Tuesday"],
        "periods": periods_json(2),
        "subject_hours_per_week": {"Math": 3}
    });

    for _ in 0..2 {
        let resp = client
            .post(format!("{}/api/admin/timetables/generate", address))
            .header("Authorization", bearer(&token))
            .json(&payload)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
    }

    // Still exactly one grid's worth of rows: 2 days x 3 slots.
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM timetable_entries")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 6);

    let timetables = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM timetables")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(timetables, 1);
}

#[tokio::test]
async fn generation_requires_admin_and_valid_input() {
    let (address, pool) = spawn_app().await;
    let client = reqwest::Client::new();
    let school_id = seed_school(&pool).await;
    let admin = seed_user(&pool, school_id, "sub_admin").await;
    let student = seed_user(&pool, school_id, "student").await;
    let admin_token = login(&address, &admin).await;
    let student_token = login(&address, &student).await;

    let valid = serde_json::json!({
        "teachers": [{"id": 1, "name": "Asha", "subjects": ["Math"]}],
        "classes": [{"name": "10", "sections": ["A"]}],
        "working_days": ["Monday"],
        "periods": periods_json(2),
        "subject_hours_per_week": {"Math": 2}
    });

    // Students are kept out by the router guard.
    let resp = client
        .post(format!("{}/api/admin/timetables/generate", address))
        .header("Authorization", bearer(&student_token))
        .json(&valid)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 403);

    // Invalid day name.
    let mut bad_day = valid.clone();
    bad_day["working_days"] = serde_json::json!(["Funday"]);
    let resp = client
        .post(format!("{}/api/admin/timetables/generate", address))
        .header("Authorization", bearer(&admin_token))
        .json(&bad_day)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    // Malformed period time.
    let mut bad_time = valid.clone();
    bad_time["periods"] = serde_json::json!([
        {"number": 1, "start_time": "9am", "end_time": "09:45", "kind": "regular"}
    ]);
    let resp = client
        .post(format!("{}/api/admin/timetables/generate", address))
        .header("Authorization", bearer(&admin_token))
        .json(&bad_time)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    // No roster given and none stored.
    let mut no_teachers = valid.clone();
    no_teachers["teachers"] = serde_json::json!([]);
    let resp = client
        .post(format!("{}/api/admin/timetables/generate", address))
        .header("Authorization", bearer(&admin_token))
        .json(&no_teachers)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
}

#[tokio::test]
async fn manual_cell_edit_enforces_double_booking() {
    let (address, pool) = spawn_app().await;
    let client = reqwest::Client::new();
    let school_id = seed_school(&pool).await;
    let admin = seed_user(&pool, school_id, "sub_admin").await;
    let token = login(&address, &admin).await;

    // Roster stored in the database; generation falls back to it.
    let teacher: serde_json::Value = client
        .post(format!("{}/api/admin/teachers", address))
        .header("Authorization", bearer(&token))
        .json(&serde_json::json!({"name": "Asha", "subjects": ["Math", "Science"]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let teacher_id = teacher["id"].as_i64().unwrap();

    let resp = client
        .post(format!("{}/api/admin/timetables/generate", address))
        .header("Authorization", bearer(&token))
        .json(&serde_json::json!({
            "classes": [{"name": "10", "sections": ["A", "B"]}],
            "working_days": ["Monday"],
            "periods": periods_json(2),
            "subject_hours_per_week": {"Math": 2}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let grid_a: serde_json::Value = client
        .get(format!("{}/api/timetables/10/A", address))
        .header("Authorization", bearer(&token))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let grid_b: serde_json::Value = client
        .get(format!("{}/api/timetables/10/B", address))
        .header("Authorization", bearer(&token))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let timetable_b = grid_b["timetable"]["id"].as_i64().unwrap();

    // Section A holds the teacher on Monday period 1; putting them into
    // section B's same slot must be refused.
    assert!(
        grid_a["entries"]
            .as_array()
            .unwrap()
            .iter()
            .any(|e| e["period_number"] == 1 && e["teacher_id"].as_i64() == Some(teacher_id))
    );
    let resp = client
        .put(format!(
            "{}/api/admin/timetables/{}/entries",
            address, timetable_b
        ))
        .header("Authorization", bearer(&token))
        .json(&serde_json::json!({
            "day": "Monday",
            "period_number": 1,
            "subject": "Science",
            "teacher_id": teacher_id
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 409);

    // A subject outside the teacher's set is refused too.
    let resp = client
        .put(format!(
            "{}/api/admin/timetables/{}/entries",
            address, timetable_b
        ))
        .header("Authorization", bearer(&token))
        .json(&serde_json::json!({
            "day": "Tuesday",
            "period_number": 1,
            "subject": "History",
            "teacher_id": teacher_id,
            "start_time": "09:00",
            "end_time": "09:45"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    // A free slot on another day works and lands in the stored grid.
    let resp = client
        .put(format!(
            "{}/api/admin/timetables/{}/entries",
            address, timetable_b
        ))
        .header("Authorization", bearer(&token))
        .json(&serde_json::json!({
            "day": "Tuesday",
            "period_number": 1,
            "subject": "Science",
            "teacher_id": teacher_id,
            "start_time": "09:00",
            "end_time": "09:45"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["entry"]["subject"], "Science");
    assert_eq!(body["entry"]["teacher_name"], "Asha");

    // Lunch placeholders can never be assigned.
    let resp = client
        .put(format!(
            "{}/api/admin/timetables/{}/entries",
            address, timetable_b
        ))
        .header("Authorization", bearer(&token))
        .json(&serde_json::json!({
            "day": "Monday",
            "period_number": 3,
            "subject": "Science",
            "teacher_id": teacher_id
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
}
