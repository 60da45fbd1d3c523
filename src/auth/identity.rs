use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::password::{self, MIN_PASSWORD_LEN};
use super::{Actor, TokenService};
use crate::error::ServiceError;
use crate::notify::{self, Email, Notifier};
use crate::storage::models::{Notification, Role, User};
use crate::storage::{Database, Guarded};

/// How long a password reset link stays valid
const RESET_TOKEN_TTL_MINUTES: i64 = 10;

const INVALID_CREDENTIALS: &str = "Invalid email or password";
const INVALID_RESET_TOKEN: &str = "Invalid or expired reset token";

#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// What an identity provider tells us about a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedProfile {
    pub provider_id: String,
    pub email: String,
    pub name: String,
}

/// Public view of a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl From<&User> for Profile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub token: String,
    pub user: Profile,
}

/// Registration, login, password reset and bearer-token validation.
#[derive(Clone)]
pub struct IdentityService {
    db: Database,
    tokens: TokenService,
    notifier: Arc<dyn Notifier>,
    frontend_url: String,
}

impl IdentityService {
    pub fn new(
        db: Database,
        tokens: TokenService,
        notifier: Arc<dyn Notifier>,
        frontend_url: &str,
    ) -> Self {
        Self {
            db,
            tokens,
            notifier,
            frontend_url: frontend_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn register(&self, registration: Registration) -> Result<Session, ServiceError> {
        let name = registration.name.trim();
        if name.is_empty() {
            return Err(ServiceError::validation("Name is required"));
        }
        let email = normalize_email(&registration.email)?;
        check_password(&registration.password)?;

        let user = new_user(
            name,
            &email,
            Some(hash(&registration.password)?),
            None,
            Role::Author,
        );
        if !self.db.create_user(&user)? {
            return Err(ServiceError::validation("Email already registered"));
        }

        info!(user_id = %user.id, "User registered");
        self.session(&user)
    }

    pub fn login(&self, email: &str, password: &str) -> Result<Session, ServiceError> {
        let email = email.trim().to_lowercase();
        let user = self
            .db
            .get_user_by_email(&email)?
            .ok_or_else(|| ServiceError::unauthenticated(INVALID_CREDENTIALS))?;

        let Some(ref stored) = user.password_hash else {
            return Err(ServiceError::unauthenticated(
                "This account uses federated login",
            ));
        };
        if !password::verify_password(password, stored) {
            return Err(ServiceError::unauthenticated(INVALID_CREDENTIALS));
        }

        self.session(&user)
    }

    /// Resolve a bearer token to the acting principal. The role is read from
    /// the user record, so a promotion takes effect without a new login.
    pub fn authenticate(&self, token: &str) -> Result<Actor, ServiceError> {
        let claims = self
            .tokens
            .verify(token)
            .map_err(|e| ServiceError::unauthenticated(e.to_string()))?;

        let user = self
            .db
            .get_user(&claims.sub)?
            .ok_or_else(|| ServiceError::unauthenticated("Account no longer exists"))?;

        Ok(Actor {
            id: user.id,
            role: user.role,
        })
    }

    /// Sign in through an identity provider, linking or creating the account.
    pub fn federated_login(&self, profile: FederatedProfile) -> Result<Session, ServiceError> {
        if let Some(user) = self.db.get_user_by_google_id(&profile.provider_id)? {
            return self.session(&user);
        }

        let email = normalize_email(&profile.email)?;
        if let Some(existing) = self.db.get_user_by_email(&email)? {
            let provider_id = profile.provider_id.clone();
            let linked = match self.db.modify_user(&existing.id, |user| {
                if user.google_id.is_none() {
                    user.google_id = Some(provider_id);
                }
                Ok::<(), std::convert::Infallible>(())
            })? {
                Guarded::Applied(user) => user,
                Guarded::Missing | Guarded::Rejected(_) => existing,
            };
            info!(user_id = %linked.id, "Linked federated identity to existing account");
            return self.session(&linked);
        }

        let name = match profile.name.trim() {
            "" => email.split('@').next().unwrap_or_default().to_string(),
            name => name.to_string(),
        };
        let user = new_user(
            &name,
            &email,
            None,
            Some(profile.provider_id),
            Role::Author,
        );
        if !self.db.create_user(&user)? {
            // Lost a race with a concurrent sign-in for the same email
            let existing = self
                .db
                .get_user_by_email(&email)?
                .ok_or_else(|| ServiceError::Dependency("Account creation raced".to_string()))?;
            return self.session(&existing);
        }

        info!(user_id = %user.id, "User registered through federated login");
        self.session(&user)
    }

    /// Start a password reset. Succeeds whether or not the account exists.
    pub fn forgot_password(&self, email: &str) -> Result<(), ServiceError> {
        let email = email.trim().to_lowercase();
        let Some(user) = self.db.get_user_by_email(&email)? else {
            return Ok(());
        };
        if user.password_hash.is_none() {
            return Ok(());
        }

        let token = password::generate_reset_token()
            .map_err(|e| ServiceError::Dependency(e.to_string()))?;
        let token_hash = password::hash_reset_token(&token);
        let expires_at = Utc::now() + Duration::minutes(RESET_TOKEN_TTL_MINUTES);

        self.db.modify_user(&user.id, |u| {
            u.reset_token_hash = Some(token_hash);
            u.reset_expires_at = Some(expires_at);
            Ok::<(), std::convert::Infallible>(())
        })?;

        let link = format!("{}/reset-password/{token}", self.frontend_url);
        notify::dispatch(
            &self.notifier,
            Email::new(
                &user.email,
                "Password reset",
                format!(
                    "Use this link to choose a new password. It expires in \
                     {RESET_TOKEN_TTL_MINUTES} minutes.\n\n{link}\n"
                ),
            )
            .with_html(format!(
                "<p>Use this link to choose a new password. It expires in \
                 {RESET_TOKEN_TTL_MINUTES} minutes.</p><p><a href=\"{link}\">Reset password</a></p>"
            )),
        );

        info!(user_id = %user.id, "Password reset requested");
        Ok(())
    }

    /// Consume a reset token. The token is cleared in the same transaction
    /// that replaces the password, so it works at most once.
    pub fn reset_password(&self, token: &str, new_password: &str) -> Result<(), ServiceError> {
        check_password(new_password)?;

        let token_hash = password::hash_reset_token(token);
        let user = self
            .db
            .get_user_by_reset_token(&token_hash)?
            .ok_or_else(|| ServiceError::validation(INVALID_RESET_TOKEN))?;
        let new_hash = hash(new_password)?;

        let now = Utc::now();
        match self.db.modify_user(&user.id, |u| {
            let valid = u.reset_token_hash.as_deref() == Some(token_hash.as_str())
                && u.reset_expires_at.is_some_and(|exp| now < exp);
            if !valid {
                return Err(ServiceError::validation(INVALID_RESET_TOKEN));
            }
            u.password_hash = Some(new_hash);
            u.reset_token_hash = None;
            u.reset_expires_at = None;
            Ok(())
        })? {
            Guarded::Applied(_) => {
                info!(user_id = %user.id, "Password reset completed");
                Ok(())
            }
            Guarded::Rejected(e) => Err(e),
            Guarded::Missing => Err(ServiceError::validation(INVALID_RESET_TOKEN)),
        }
    }

    /// Create the configured admin account if no user holds its email.
    pub fn seed_admin(&self, email: &str, password: &str) -> Result<(), ServiceError> {
        let email = normalize_email(email)?;
        if let Some(existing) = self.db.get_user_by_email(&email)? {
            if existing.role != Role::Admin {
                warn!(user_id = %existing.id, "Seed admin email belongs to a non-admin account");
            }
            return Ok(());
        }

        check_password(password)?;
        let user = new_user(
            "Administrator",
            &email,
            Some(hash(password)?),
            None,
            Role::Admin,
        );
        if self.db.create_user(&user)? {
            info!(user_id = %user.id, "Seeded admin account");
        }
        Ok(())
    }

    pub fn profile(&self, actor: &Actor) -> Result<Profile, ServiceError> {
        let user = self
            .db
            .get_user(&actor.id)?
            .ok_or_else(|| ServiceError::not_found("User not found"))?;
        Ok(Profile::from(&user))
    }

    /// The actor's inbox, newest first
    pub fn notifications(&self, actor: &Actor) -> Result<Vec<Notification>, ServiceError> {
        let user = self
            .db
            .get_user(&actor.id)?
            .ok_or_else(|| ServiceError::not_found("User not found"))?;
        let mut notifications = user.notifications;
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notifications)
    }

    pub fn mark_notifications_read(&self, actor: &Actor) -> Result<usize, ServiceError> {
        Ok(self.db.mark_notifications_read(&actor.id)?)
    }

    /// Users eligible to review, by name
    pub fn list_experts(&self) -> Result<Vec<Profile>, ServiceError> {
        Ok(self
            .db
            .list_users_by_role(Role::Expert)?
            .iter()
            .map(Profile::from)
            .collect())
    }

    fn session(&self, user: &User) -> Result<Session, ServiceError> {
        let token = self
            .tokens
            .issue(&user.id, user.role)
            .map_err(|e| ServiceError::Dependency(e.to_string()))?;
        Ok(Session {
            token,
            user: Profile::from(user),
        })
    }
}

fn new_user(
    name: &str,
    email: &str,
    password_hash: Option<String>,
    google_id: Option<String>,
    role: Role,
) -> User {
    let now = Utc::now();
    User {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        email: email.to_string(),
        password_hash,
        google_id,
        role,
        notifications: Vec::new(),
        reset_token_hash: None,
        reset_expires_at: None,
        created_at: now,
        updated_at: now,
    }
}

fn normalize_email(email: &str) -> Result<String, ServiceError> {
    let email = email.trim().to_lowercase();
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'))
        && !email.contains(char::is_whitespace);
    if !valid {
        return Err(ServiceError::validation("A valid email is required"));
    }
    Ok(email)
}

fn check_password(password: &str) -> Result<(), ServiceError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ServiceError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn hash(password: &str) -> Result<String, ServiceError> {
    password::hash_password(password).map_err(|e| ServiceError::Dependency(e.to_string()))
}
