use std::time::Duration;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use tracing::debug;

use super::{
    filters::{Filters, Metadata},
    model::{Role, User, UserRow},
};
use crate::{
    db::{not_found, timed, unique_violation},
    errors::{Error, Result},
    tokens::model::{hash_plaintext, Scope},
};

/// Persistence for user records.
///
/// Every mutation is guarded by the record's `version`: a write carrying a
/// stale version fails with `EditConflict` and the caller must re-fetch.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Inserts `user`, filling in the store-assigned id, timestamps and version.
    async fn insert(&self, user: &mut User) -> Result<()>;
    async fn get_by_id(&self, id: i64) -> Result<User>;
    async fn get_by_email(&self, email: &str) -> Result<User>;
    /// Writes `user` if its version is still current, then bumps the version
    /// on the caller's copy.
    async fn update(&self, user: &mut User) -> Result<()>;
    async fn delete(&self, id: i64) -> Result<()>;
    async fn count_by_role(&self, role: Role) -> Result<i64>;
    async fn search(
        &self,
        username: &str,
        email: &str,
        filters: &Filters,
    ) -> Result<(Vec<User>, Metadata)>;
    /// The owner of an unexpired token of `scope` whose plaintext is `plaintext`.
    async fn get_for_token(&self, scope: Scope, plaintext: &str) -> Result<User>;
}

/// Maps a unique-constraint name to the identifier it protects. Any other
/// constraint stays a `StoreFailure`.
pub(crate) fn duplicate_field(constraint: &str) -> Option<&'static str> {
    match constraint {
        "users_email_key" => Some("email"),
        "users_username_key" => Some("username"),
        _ => None,
    }
}

fn translate_write_error(err: Error) -> Error {
    match unique_violation(&err).and_then(duplicate_field) {
        Some(field) => Error::DuplicateIdentifier(field),
        None => err,
    }
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
    timeout: Duration,
}

impl PgUserStore {
    pub fn new(db: PgPool, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    /// Deletes `id` only while it is still at `version`. A row that changed
    /// or vanished since it was read is an `EditConflict`.
    pub async fn delete_if_version(&self, id: i64, version: i32) -> Result<()> {
        let result = timed(
            "DELETE",
            self.timeout,
            sqlx::query("DELETE FROM users WHERE id = $1 AND version = $2")
                .bind(id)
                .bind(version)
                .execute(&self.db),
        )
        .await?;
        if result.rows_affected() == 0 {
            debug!(user_id = id, version, "stale user delete");
            return Err(Error::EditConflict);
        }
        Ok(())
    }
}

#[derive(FromRow)]
struct Assigned {
    id: i64,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    version: i32,
}

#[derive(FromRow)]
struct Bumped {
    updated_at: OffsetDateTime,
    version: i32,
}

#[derive(FromRow)]
struct CountedRow {
    total: i64,
    #[sqlx(flatten)]
    user: UserRow,
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert(&self, user: &mut User) -> Result<()> {
        user.normalize();
        let hash = user.password.require_hash();
        let assigned = timed(
            "INSERT",
            self.timeout,
            sqlx::query_as::<_, Assigned>(
                r#"
                INSERT INTO users (username, email, password_hash, activated, role)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id, created_at, updated_at, version
                "#,
            )
            .bind(&user.username)
            .bind(&user.email)
            .bind(hash)
            .bind(user.activated)
            .bind(user.role.as_str())
            .fetch_one(&self.db),
        )
        .await
        .map_err(translate_write_error)?;

        user.id = assigned.id;
        user.created_at = assigned.created_at;
        user.updated_at = assigned.updated_at;
        user.version = assigned.version;
        debug!(user_id = user.id, "user inserted");
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> Result<User> {
        let row = timed(
            "SELECT",
            self.timeout,
            sqlx::query_as::<_, UserRow>(
                r#"
                SELECT id, created_at, updated_at, username, email, password_hash, activated, role, version
                FROM users
                WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_one(&self.db),
        )
        .await
        .map_err(not_found)?;
        Ok(row.into())
    }

    async fn get_by_email(&self, email: &str) -> Result<User> {
        let row = timed(
            "SELECT",
            self.timeout,
            sqlx::query_as::<_, UserRow>(
                r#"
                SELECT id, created_at, updated_at, username, email, password_hash, activated, role, version
                FROM users
                WHERE email = $1
                "#,
            )
            .bind(email.to_lowercase())
            .fetch_one(&self.db),
        )
        .await
        .map_err(not_found)?;
        Ok(row.into())
    }

    async fn update(&self, user: &mut User) -> Result<()> {
        user.normalize();
        let hash = user.password.require_hash();
        let bumped = timed(
            "UPDATE",
            self.timeout,
            sqlx::query_as::<_, Bumped>(
                r#"
                UPDATE users
                SET username = $1, email = $2, password_hash = $3, activated = $4, role = $5,
                    version = version + 1, updated_at = now()
                WHERE id = $6 AND version = $7
                RETURNING updated_at, version
                "#,
            )
            .bind(&user.username)
            .bind(&user.email)
            .bind(hash)
            .bind(user.activated)
            .bind(user.role.as_str())
            .bind(user.id)
            .bind(user.version)
            .fetch_optional(&self.db),
        )
        .await
        .map_err(translate_write_error)?;

        let Some(bumped) = bumped else {
            debug!(user_id = user.id, version = user.version, "stale user update");
            return Err(Error::EditConflict);
        };
        user.updated_at = bumped.updated_at;
        user.version = bumped.version;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let current = self.get_by_id(id).await?;
        self.delete_if_version(id, current.version).await
    }

    async fn count_by_role(&self, role: Role) -> Result<i64> {
        timed(
            "SELECT",
            self.timeout,
            sqlx::query_scalar::<_, i64>("SELECT count(*) FROM users WHERE role = $1")
                .bind(role.as_str())
                .fetch_one(&self.db),
        )
        .await
    }

    async fn search(
        &self,
        username: &str,
        email: &str,
        filters: &Filters,
    ) -> Result<(Vec<User>, Metadata)> {
        let username = username.to_lowercase();
        let email = email.to_lowercase();
        // Column and direction come from the sort safelist.
        let query = format!(
            r#"
            SELECT count(*) OVER() AS total, id, created_at, updated_at, username, email,
                   password_hash, activated, role, version
            FROM users
            WHERE (strpos(username, $1) > 0 OR $1 = '')
            AND (strpos(email, $2) > 0 OR $2 = '')
            ORDER BY {} {}, id ASC
            LIMIT $3 OFFSET $4
            "#,
            filters.sort_column(),
            filters.sort_direction()
        );
        let rows = timed(
            "SELECT",
            self.timeout,
            sqlx::query_as::<_, CountedRow>(&query)
                .bind(&username)
                .bind(&email)
                .bind(filters.limit())
                .bind(filters.offset())
                .fetch_all(&self.db),
        )
        .await?;

        let total = rows.first().map(|r| r.total).unwrap_or(0);
        let users = rows.into_iter().map(|r| User::from(r.user)).collect();
        Ok((
            users,
            Metadata::calculate(total, filters.page, filters.page_size),
        ))
    }

    async fn get_for_token(&self, scope: Scope, plaintext: &str) -> Result<User> {
        let row = timed(
            "SELECT",
            self.timeout,
            sqlx::query_as::<_, UserRow>(
                r#"
                SELECT users.id, users.created_at, users.updated_at, users.username, users.email,
                       users.password_hash, users.activated, users.role, users.version
                FROM users
                INNER JOIN tokens ON users.id = tokens.user_id
                WHERE tokens.hash = $1
                AND tokens.scope = $2
                AND tokens.expiry > $3
                "#,
            )
            .bind(hash_plaintext(plaintext))
            .bind(scope.as_str())
            .bind(OffsetDateTime::now_utc())
            .fetch_one(&self.db),
        )
        .await
        .map_err(not_found)?;
        Ok(row.into())
    }
}
