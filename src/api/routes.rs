use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.max_upload_size as usize;
    // Room for the text fields and multipart framing around a full-size file
    let body_limit = upload_limit.saturating_mul(2).saturating_add(64 * 1024);

    let mut router = Router::new()
        // Manuscripts
        .route("/manuscripts", get(handlers::list_manuscripts))
        .route(
            "/manuscripts",
            post(handlers::create_manuscript).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/manuscripts/:id", get(handlers::get_manuscript))
        .route(
            "/manuscripts/:id",
            put(handlers::update_manuscript).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/manuscripts/:id", delete(handlers::delete_manuscript))
        .route("/manuscripts/:id/file", get(handlers::get_manuscript_file))
        .route("/manuscripts/:id/thumbnail", get(handlers::get_thumbnail))
        .route("/manuscripts/:id/start-review", post(handlers::start_review))
        .route("/manuscripts/:id/submit-review", post(handlers::submit_review))
        .route("/published-manuscripts", get(handlers::list_published))
        // Locally signed blob links
        .route("/blobs/:key", get(handlers::serve_blob))
        // Accounts
        .route("/auth/register", post(handlers::register))
        .route("/auth/login", post(handlers::login))
        .route("/auth/me", get(handlers::me))
        .route("/auth/forgot-password", post(handlers::forgot_password))
        .route("/auth/reset-password", post(handlers::reset_password))
        .route("/notifications", get(handlers::list_notifications))
        .route("/notifications/read", post(handlers::mark_notifications_read))
        .route("/expert-requests", post(handlers::submit_expert_request))
        .route("/inquiry", post(handlers::send_inquiry))
        // Admin
        .route("/admin/experts", get(handlers::list_experts))
        .route("/admin/assign-reviewer", post(handlers::assign_reviewer))
        .route("/admin/publish-toggle", post(handlers::publish_toggle))
        .route("/admin/expert-requests", get(handlers::list_expert_requests))
        .route(
            "/admin/expert-requests/:id/approve",
            post(handlers::approve_expert_request),
        )
        .route(
            "/admin/expert-requests/:id/reject",
            post(handlers::reject_expert_request),
        )
        // Internal
        .route("/_internal/health", get(handlers::health));

    if state.google.is_some() {
        router = router
            .route("/auth/google", get(handlers::google_start))
            .route("/auth/google/callback", get(handlers::google_callback));
    }

    // Test-only routes
    if state.config.test_mode {
        tracing::warn!("Test mode enabled, purge route is available.");
        router = router.route("/admin/purge", delete(handlers::admin_purge));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
