use chrono::Utc;
use redb::ReadableTable;

use super::db::{Database, DatabaseError, Guarded};
use super::models::{Notification, Role, User};
use super::tables::*;

impl Database {
    // ========================================================================
    // User operations
    // ========================================================================

    /// Insert a new user. Returns `false` without writing if the email is
    /// already registered.
    pub fn create_user(&self, user: &User) -> Result<bool, DatabaseError> {
        debug_assert!(!user.id.is_empty(), "user id must not be empty");

        let write_txn = self.begin_write()?;
        let created = {
            let mut email_table = write_txn.open_table(USER_EMAILS)?;
            let taken = email_table.get(user.email.as_str())?.is_some();
            if taken {
                false
            } else {
                email_table.insert(user.email.as_str(), user.id.as_str())?;

                let mut table = write_txn.open_table(USERS)?;
                let data = rmp_serde::to_vec_named(user)?;
                table.insert(user.id.as_str(), data.as_slice())?;
                true
            }
        };

        if created {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(created)
    }

    /// Get a user by UUID
    pub fn get_user(&self, id: &str) -> Result<Option<User>, DatabaseError> {
        self.get_record(USERS, id)
    }

    /// Get a user by (lowercased) email
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let email_table = read_txn.open_table(USER_EMAILS)?;

        let id = match email_table.get(email)? {
            Some(data) => data.value().to_string(),
            None => return Ok(None),
        };

        let table = read_txn.open_table(USERS)?;
        match table.get(id.as_str())? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Resolve a password reset token hash to its user
    pub fn get_user_by_reset_token(&self, token_hash: &str) -> Result<Option<User>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let reset_table = read_txn.open_table(RESET_TOKENS)?;

        let id = match reset_table.get(token_hash)? {
            Some(data) => data.value().to_string(),
            None => return Ok(None),
        };

        let table = read_txn.open_table(USERS)?;
        match table.get(id.as_str())? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_user_by_google_id(&self, google_id: &str) -> Result<Option<User>, DatabaseError> {
        Ok(self
            .get_all_users()?
            .into_iter()
            .find(|u| u.google_id.as_deref() == Some(google_id)))
    }

    pub fn get_all_users(&self) -> Result<Vec<User>, DatabaseError> {
        self.all_records(USERS)
    }

    pub fn list_users_by_role(&self, role: Role) -> Result<Vec<User>, DatabaseError> {
        let mut users: Vec<User> = self
            .get_all_users()?
            .into_iter()
            .filter(|u| u.role == role)
            .collect();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(users)
    }

    /// Guarded user update. Keeps the reset-token index in step with
    /// `reset_token_hash`; id and email are fixed.
    pub fn modify_user<E, F>(&self, id: &str, f: F) -> Result<Guarded<User, E>, DatabaseError>
    where
        F: FnOnce(&mut User) -> Result<(), E>,
    {
        let write_txn = self.begin_write()?;

        let existing: Option<User> = {
            let table = write_txn.open_table(USERS)?;
            let result = match table.get(id)? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };
            result
        };

        let outcome = match existing {
            None => Guarded::Missing,
            Some(mut user) => {
                let old_hash = user.reset_token_hash.clone();
                let email = user.email.clone();
                match f(&mut user) {
                    Err(e) => Guarded::Rejected(e),
                    Ok(()) => {
                        user.id = id.to_string();
                        user.email = email;
                        user.updated_at = Utc::now();

                        if user.reset_token_hash != old_hash {
                            let mut reset_table = write_txn.open_table(RESET_TOKENS)?;
                            if let Some(ref old) = old_hash {
                                reset_table.remove(old.as_str())?;
                            }
                            if let Some(ref new) = user.reset_token_hash {
                                reset_table.insert(new.as_str(), id)?;
                            }
                        }

                        let data = rmp_serde::to_vec_named(&user)?;
                        let mut table = write_txn.open_table(USERS)?;
                        table.insert(id, data.as_slice())?;
                        Guarded::Applied(user)
                    }
                }
            }
        };

        if matches!(outcome, Guarded::Applied(_)) {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(outcome)
    }

    /// Append an inbox entry. Returns `false` if the user does not exist.
    pub fn push_notification(&self, user_id: &str, message: &str) -> Result<bool, DatabaseError> {
        let outcome = self.modify_user(user_id, |user| {
            user.notifications.push(Notification {
                message: message.to_string(),
                read: false,
                created_at: Utc::now(),
            });
            Ok::<(), std::convert::Infallible>(())
        })?;
        Ok(matches!(outcome, Guarded::Applied(_)))
    }

    /// Mark every inbox entry read. Returns how many changed.
    pub fn mark_notifications_read(&self, user_id: &str) -> Result<usize, DatabaseError> {
        let mut changed = 0;
        self.modify_user(user_id, |user| {
            for n in user.notifications.iter_mut().filter(|n| !n.read) {
                n.read = true;
                changed += 1;
            }
            Ok::<(), std::convert::Infallible>(())
        })?;
        Ok(changed)
    }
}
