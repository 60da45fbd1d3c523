mod admin;
mod auth;
mod files;
mod inbox;
mod manuscripts;

pub use admin::{
    admin_purge, approve_expert_request, assign_reviewer, health, list_expert_requests,
    list_experts, publish_toggle, reject_expert_request,
};
pub use auth::{
    forgot_password, google_callback, google_start, login, me, register, reset_password,
};
pub use files::{get_manuscript_file, get_thumbnail, serve_blob};
pub use inbox::{list_notifications, mark_notifications_read, send_inquiry, submit_expert_request};
pub use manuscripts::{
    create_manuscript, delete_manuscript, get_manuscript, list_manuscripts, list_published,
    start_review, submit_review, update_manuscript,
};
