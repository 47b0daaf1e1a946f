// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{admin, auth, submissions, tests, timetable},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Assembles the main application router.
///
/// * Merges all sub-routers (auth, tests, submissions, timetables, admin).
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (Database Pool + Config).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        "http://localhost:3000".parse::<HeaderValue>().unwrap(),
        "http://127.0.0.1:3000".parse::<HeaderValue>().unwrap(),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login));

    // Role checks finer than "authenticated" (staff-only authoring, the
    // student-only submit path) happen inside the handlers via Claims.
    let test_routes = Router::new()
        .route("/", get(tests::list_tests).post(tests::create_test))
        .route("/{id}", get(tests::get_test))
        .route(
            "/{id}/submissions",
            post(submissions::submit_test).get(submissions::list_submissions),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let submission_routes = Router::new()
        .route("/{id}", get(submissions::get_submission))
        .route("/{id}/grade", put(submissions::grade_theory))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let timetable_routes = Router::new()
        .route(
            "/{class_name}/{section}",
            get(timetable::get_timetable),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let admin_routes = Router::new()
        .route("/users", get(admin::list_users).post(admin::create_user))
        .route(
            "/users/{id}",
            put(admin::update_user).delete(admin::delete_user),
        )
        .route("/schools", post(admin::create_school))
        .route(
            "/teachers",
            get(admin::list_teachers).post(admin::create_teacher),
        )
        .route(
            "/teachers/{id}",
            put(admin::update_teacher).delete(admin::delete_teacher),
        )
        .route("/timetables/generate", post(timetable::generate_timetable))
        .route("/timetables/{id}/entries", put(timetable::update_entry))
        // Double middleware protection: Auth first, then Admin check
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/tests", test_routes)
        .nest("/api/submissions", submission_routes)
        .nest("/api/timetables", timetable_routes)
        .nest("/api/admin", admin_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
