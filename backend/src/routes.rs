// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, patch, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{cbt, exams, questions},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware, staff_middleware, student_middleware},
};

/// Assembles the main application router.
///
/// * Staff routes (question bank, exam entries) need a teacher or admin token.
/// * Admin routes (review, scheduling) need an admin token.
/// * CBT routes need a student token.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let staff_routes = Router::new()
        .route("/api/questions/submit", post(questions::submit_questions))
        .route("/api/questions", get(questions::list_questions))
        .route("/api/questions/{id}/resubmit", patch(questions::resubmit_question))
        .route("/api/exams/{id}/entries", get(exams::list_entries))
        // Merged at the top level, so only matched routes get the guards
        .route_layer(from_fn(staff_middleware))
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    let admin_routes = Router::new()
        .route("/questions/{id}/approve", patch(questions::approve_question))
        .route("/questions/{id}/reject", patch(questions::reject_question))
        .route("/questions/approve-subject", post(questions::approve_subject))
        .route("/exams", post(exams::create_exam).get(exams::list_exams))
        .route("/exams/{id}", put(exams::update_exam).delete(exams::delete_exam))
        // Auth first, then the admin check
        .layer(from_fn(admin_middleware))
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    let cbt_routes = Router::new()
        .route("/exams", get(cbt::list_exams))
        .route("/exams/{id}/attempt-status", get(cbt::attempt_status))
        .route("/exams/{id}/start", post(cbt::start_exam))
        .route("/exams/{id}/session", get(cbt::get_session))
        .route("/exams/{id}/answers", put(cbt::save_answer))
        .route("/exams/{id}/navigate", post(cbt::navigate))
        .route("/exams/{id}/submit", post(cbt::submit_exam))
        .route("/grades", get(cbt::get_grades))
        .layer(from_fn(student_middleware))
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(staff_routes)
        .nest("/api/admin", admin_routes)
        .nest("/api/cbt", cbt_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
