//! Shared test helpers for manuscript-desk unit tests.

use std::sync::Arc;

use crate::config::{AuthConfig, Config, NodeConfig, NotifyConfig, StorageConfig};
use crate::notify::LogNotifier;
use crate::object_store::LocalStore;
use crate::signing::UrlSigner;
use crate::storage::Database;
use crate::AppState;

pub const TEST_SECRET: &str = "test-secret-for-unit-testing-only";

/// Create a test AppState with a temporary database and local object store.
pub fn test_state(temp_dir: &tempfile::TempDir) -> Arc<AppState> {
    let data_dir = temp_dir.path().join("data");
    let files_dir = temp_dir.path().join("files");

    let config = Config {
        auth: AuthConfig {
            secret: TEST_SECRET.to_string(),
            ..AuthConfig::default()
        },
        node: NodeConfig {
            bind_address: "127.0.0.1:0".to_string(),
            data_dir: data_dir.to_string_lossy().to_string(),
            public_base_url: "http://localhost:8080".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
        },
        notify: NotifyConfig {
            smtp: None,
            inquiry_recipient: Some("desk@example.com".to_string()),
        },
        oauth: None,
        storage: StorageConfig::default(),
        test_mode: true,
        max_upload_size: 10 * 1024 * 1024, // 10MB for tests
        admin_seed: None,
    };

    let db = Database::open(&data_dir).expect("Failed to open test database");
    let object_store = LocalStore::new(&files_dir)
        .expect("Failed to create test object store")
        .with_signed_urls(
            UrlSigner::new(TEST_SECRET.as_bytes()),
            &config.node.public_base_url,
        );

    Arc::new(AppState::new(
        config,
        db,
        Arc::new(object_store),
        Arc::new(LogNotifier),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_wires_services() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        assert!(state.google.is_none());
        assert!(state.config.test_mode);
        assert!(state.identity.list_experts().unwrap().is_empty());
    }
}
