use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::{auth::password::Password, validator::Validator};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role {other:?}")),
        }
    }
}

/// User record. `id`, timestamps and `version` are assigned by the store.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub username: String,
    pub email: String,
    #[serde(skip)]
    pub password: Password,
    pub activated: bool,
    pub role: Role,
    #[serde(skip)]
    pub version: i32,
}

impl User {
    /// A not yet persisted user.
    pub fn new(username: &str, email: &str, password: Password) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: 0,
            created_at: now,
            updated_at: now,
            username: username.to_string(),
            email: email.to_string(),
            password,
            activated: false,
            role: Role::default(),
            version: 0,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Whether this user may read or modify the account `user_id`.
    pub fn owns_or_admin(&self, user_id: i64) -> bool {
        self.id == user_id || self.is_admin()
    }

    pub(crate) fn normalize(&mut self) {
        self.username = self.username.to_lowercase();
        self.email = self.email.to_lowercase();
    }
}

/// Row shape of the `users` table.
#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub activated: bool,
    pub role: String,
    pub version: i32,
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        Self {
            id: r.id,
            created_at: r.created_at,
            updated_at: r.updated_at,
            username: r.username,
            email: r.email,
            password: Password::from_hash(r.password_hash),
            activated: r.activated,
            // The column is constrained to the two known values.
            role: r.role.parse().unwrap_or_default(),
            version: r.version,
        }
    }
}

/// Who a request acts as.
#[derive(Debug, Clone)]
pub enum Identity {
    Anonymous,
    User(User),
}

/// The identity of every request that presents no credential.
pub static ANONYMOUS: Identity = Identity::Anonymous;

impl Identity {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Identity::Anonymous => None,
            Identity::User(user) => Some(user),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.user().is_some_and(User::is_admin)
    }

    pub fn owns_or_admin(&self, user_id: i64) -> bool {
        self.user().is_some_and(|user| user.owns_or_admin(user_id))
    }
}

pub fn validate_email(v: &mut Validator, email: &str) {
    v.check(!email.is_empty(), "email", "must be provided");
    v.check(
        crate::validator::matches_email(email),
        "email",
        "must be a valid email address",
    );
}

pub fn validate_username(v: &mut Validator, username: &str) {
    v.check(!username.is_empty(), "username", "must be provided");
    v.check(
        username.len() <= 500,
        "username",
        "must not be more than 500 bytes long",
    );
}

pub fn validate_role(v: &mut Validator, role: &str) {
    v.check(!role.is_empty(), "role", "must be provided");
    v.check(
        crate::validator::permitted_value(&role, &["user", "admin"]),
        "role",
        "must be either 'user' or 'admin'",
    );
}

/// Validates a user about to be written.
///
/// # Panics
/// When the user carries no password hash.
pub fn validate_user(v: &mut Validator, user: &User) {
    validate_username(v, &user.username);
    validate_email(v, &user.email);
    if let Some(plain) = user.password.plaintext() {
        crate::auth::password::validate_plaintext(v, plain);
    }
    user.password.require_hash();
}
