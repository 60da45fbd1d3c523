//! manuscript-desk - Manuscript submission and peer-review workflow service
//!
//! This crate provides the review desk behind a journal-style web client:
//! - Manuscript lifecycle state machine (pending → submitted → under review → decided → published)
//! - Role-scoped file delivery, streamed or through short-lived signed URLs
//! - Swappable object storage backends (local filesystem, GCS)
//! - redb embedded database for records (ACID, MVCC, crash-safe)
//! - Password and Google sign-in, bearer session tokens, email notifications

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod notify;
pub mod object_store;
pub mod signing;
pub mod state_machine;
pub mod storage;
#[cfg(test)]
pub mod testutil;
pub mod workflow;

use std::sync::Arc;

use auth::google::GoogleOAuth;
use auth::IdentityService;
use config::Config;
use notify::Notifier;
use signing::UrlSigner;
use storage::Database;
use workflow::Workflow;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub identity: IdentityService,
    pub notifier: Arc<dyn Notifier>,
    pub object_store: Arc<dyn object_store::ObjectStore>,
    /// Present when Google sign-in is configured
    pub google: Option<GoogleOAuth>,
    pub url_signer: UrlSigner,
    pub workflow: Workflow,
}

impl AppState {
    /// Wire the services together over one database, blob store and notifier.
    pub fn new(
        config: Config,
        db: Database,
        object_store: Arc<dyn object_store::ObjectStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let secret = config.auth.secret.as_bytes();
        let tokens = auth::TokenService::new(
            secret,
            chrono::Duration::seconds(config.auth.token_ttl_seconds),
        );
        let identity = IdentityService::new(
            db.clone(),
            tokens,
            Arc::clone(&notifier),
            &config.node.frontend_url,
        );
        let workflow = Workflow::new(
            db.clone(),
            Arc::clone(&object_store),
            Arc::clone(&notifier),
            chrono::Duration::seconds(config.auth.signed_url_ttl_seconds),
        );
        let google = config.oauth.clone().map(GoogleOAuth::new);

        Self {
            url_signer: UrlSigner::new(secret),
            config,
            db,
            identity,
            notifier,
            object_store,
            google,
            workflow,
        }
    }
}
