use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Minimum HMAC secret length outside test mode
const MIN_SECRET_LENGTH: usize = 32;

#[derive(Debug, Clone)]
pub struct Config {
    pub auth: AuthConfig,
    pub node: NodeConfig,
    pub notify: NotifyConfig,
    pub oauth: Option<GoogleOAuthConfig>,
    pub storage: StorageConfig,
    /// Enables dangerous operations like purge. Must never be true in production.
    pub test_mode: bool,
    /// Maximum upload size in bytes
    pub max_upload_size: u64,
    /// Account created at startup when no user holds this email
    pub admin_seed: Option<AdminSeed>,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_address: String,
    pub data_dir: String,
    /// Externally reachable base URL of this service (locally signed blob URLs)
    pub public_base_url: String,
    /// Web client base URL (OAuth redirect, password reset links)
    pub frontend_url: String,
}

#[derive(Clone)]
pub struct AuthConfig {
    /// HMAC key for session tokens and signed URLs
    pub secret: String,
    pub token_ttl_seconds: i64,
    pub signed_url_ttl_seconds: i64,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"<redacted>")
            .field("token_ttl_seconds", &self.token_ttl_seconds)
            .field("signed_url_ttl_seconds", &self.signed_url_ttl_seconds)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Log-only delivery when absent
    pub smtp: Option<SmtpConfig>,
    /// Destination for contact inquiries
    pub inquiry_recipient: Option<String>,
}

#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub starttls: bool,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("starttls", &self.starttls)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct GoogleOAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub callback_url: String,
}

#[derive(Clone)]
pub struct AdminSeed {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for AdminSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminSeed")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum StorageBackend {
    Gcs,
    Local,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for local storage backend
    pub local_storage_path: String,
    /// GCS bucket name (required when backend is gcs)
    pub gcs_bucket: Option<String>,
    /// Path to GCS service account JSON (optional, defaults to ADC)
    pub gcs_credentials_file: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            local_storage_path: "./files".to_string(),
            gcs_bucket: None,
            gcs_credentials_file: None,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            token_ttl_seconds: 24 * 60 * 60,
            signed_url_ttl_seconds: 60,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parsed = |key: &str| var(key).and_then(|s| s.parse::<i64>().ok());

        let bind_address = var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let data_dir = var("DATA_DIR").unwrap_or_else(|| "./data".to_string());
        let public_base_url =
            var("PUBLIC_BASE_URL").unwrap_or_else(|| "http://localhost:8080".to_string());
        let frontend_url =
            var("FRONTEND_URL").unwrap_or_else(|| "http://localhost:5173".to_string());

        let test_mode = var("TEST_MODE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let max_upload_size = var("MAX_UPLOAD_SIZE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(10 * 1024 * 1024); // 10MB

        let storage_backend = match var("STORAGE_BACKEND")
            .unwrap_or_else(|| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "gcs" => StorageBackend::Gcs,
            _ => StorageBackend::Local,
        };

        let auth = AuthConfig {
            secret: var("AUTH_SECRET").unwrap_or_default(),
            token_ttl_seconds: parsed("TOKEN_TTL_SECONDS").unwrap_or(24 * 60 * 60),
            signed_url_ttl_seconds: parsed("SIGNED_URL_TTL_SECONDS").unwrap_or(60),
        };

        let smtp = match (var("SMTP_HOST"), var("SMTP_USER"), var("SMTP_PASS")) {
            (Some(host), Some(user), Some(password)) => Some(SmtpConfig {
                host,
                port: var("SMTP_PORT")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(587),
                user,
                password,
                starttls: var("SMTP_STARTTLS")
                    .map(|v| v == "true" || v == "1")
                    .unwrap_or(true),
            }),
            _ => None,
        };
        let inquiry_recipient = var("INQUIRY_RECIPIENT")
            .or_else(|| smtp.as_ref().map(|s| s.user.clone()));

        let oauth = match (
            var("GOOGLE_CLIENT_ID"),
            var("GOOGLE_CLIENT_SECRET"),
            var("GOOGLE_CALLBACK_URL"),
        ) {
            (Some(client_id), Some(client_secret), Some(callback_url)) => {
                Some(GoogleOAuthConfig {
                    client_id,
                    client_secret,
                    callback_url,
                })
            }
            _ => None,
        };

        let admin_seed = match (var("ADMIN_EMAIL"), var("ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(AdminSeed { email, password }),
            _ => None,
        };

        let config = Config {
            auth,
            node: NodeConfig {
                bind_address,
                data_dir,
                public_base_url,
                frontend_url,
            },
            notify: NotifyConfig {
                smtp,
                inquiry_recipient,
            },
            oauth,
            storage: StorageConfig {
                backend: storage_backend,
                local_storage_path: var("LOCAL_STORAGE_PATH")
                    .unwrap_or_else(|| "./files".to_string()),
                gcs_bucket: var("GCS_BUCKET"),
                gcs_credentials_file: var("GCS_CREDENTIALS_FILE"),
            },
            test_mode,
            max_upload_size,
            admin_seed,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.secret.is_empty() {
            return Err(ConfigError::ValidationError(
                "AUTH_SECRET is required".to_string(),
            ));
        }

        if !self.test_mode && self.auth.secret.len() < MIN_SECRET_LENGTH {
            return Err(ConfigError::ValidationError(format!(
                "AUTH_SECRET must be at least {MIN_SECRET_LENGTH} bytes"
            )));
        }

        if self.auth.token_ttl_seconds <= 0 || self.auth.signed_url_ttl_seconds <= 0 {
            return Err(ConfigError::ValidationError(
                "TOKEN_TTL_SECONDS and SIGNED_URL_TTL_SECONDS must be positive".to_string(),
            ));
        }

        if matches!(self.storage.backend, StorageBackend::Gcs) && self.storage.gcs_bucket.is_none()
        {
            return Err(ConfigError::ValidationError(
                "GCS_BUCKET is required when STORAGE_BACKEND=gcs".to_string(),
            ));
        }

        if self.test_mode {
            tracing::warn!("TEST_MODE is enabled. Never run this in production.");
        }

        Ok(())
    }
}
