use chrono::{NaiveDateTime, Utc};
use rand::Rng;
use serde::Serialize;

use super::{Permission, Role};
use crate::error::AppError;

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub display_name: String,
    pub is_active: bool,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbUser {
    pub id: Option<i64>,
    pub username: Option<String>,
    pub role: Option<String>,
    pub display_name: Option<String>,
    pub is_active: Option<bool>,
}

impl From<DbUser> for User {
    fn from(user: DbUser) -> Self {
        let username = user.username.unwrap_or_default();
        let role = match user.role.as_deref().map(str::parse::<Role>) {
            Some(Ok(role)) => role,
            _ => {
                tracing::warn!(
                    username = %username,
                    "Unrecognised role in database, treating as student"
                );
                Role::Student
            }
        };

        Self {
            id: user.id.unwrap_or_default(),
            display_name: user.display_name.unwrap_or_else(|| username.clone()),
            username,
            role,
            is_active: user.is_active.unwrap_or(true),
        }
    }
}

impl User {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.role.has_permission(permission)
    }

    pub fn require_permission(&self, permission: Permission) -> Result<(), AppError> {
        if self.role.has_permission(permission) {
            Ok(())
        } else {
            tracing::warn!(
                username = %self.username,
                role = %self.role.as_str(),
                permission = ?permission,
                "Permission denied"
            );
            Err(AppError::Authorization(
                "You don't have permission to perform this action".to_string(),
            ))
        }
    }

    /// Anyone may read their own progress; reading someone else's needs
    /// `ViewAllProgress`.
    pub fn require_progress_access(&self, user_id: i64) -> Result<(), AppError> {
        if self.id == user_id {
            self.require_permission(Permission::ViewOwnProgress)
        } else {
            self.require_permission(Permission::ViewAllProgress)
        }
    }

    /// Admins manage other accounts, never their own role or status.
    pub fn require_manage_other(&self, user_id: i64) -> Result<(), AppError> {
        self.require_permission(Permission::ManageUsers)?;
        if self.id == user_id {
            return Err(AppError::Validation(
                "You cannot change your own role or status".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct UserSession {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbUserSession {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub token: Option<String>,
    pub created_at: Option<NaiveDateTime>,
    pub expires_at: Option<NaiveDateTime>,
}

impl From<DbUserSession> for UserSession {
    fn from(session: DbUserSession) -> Self {
        let now = Utc::now().naive_utc();
        Self {
            id: session.id.unwrap_or_default(),
            user_id: session.user_id.unwrap_or_default(),
            token: session.token.unwrap_or_default(),
            created_at: session.created_at.unwrap_or(now),
            // A missing expiry is treated as already expired.
            expires_at: session.expires_at.unwrap_or(now),
        }
    }
}

impl UserSession {
    pub fn is_valid(&self) -> bool {
        self.expires_at > Utc::now().naive_utc()
    }

    pub fn generate_token() -> String {
        let salt: u128 = rand::rng().random();
        format!("{}{:032x}", uuid::Uuid::new_v4().simple(), salt)
    }
}
