use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use super::model::{hash_plaintext, Scope, Token};
use crate::{
    db::timed,
    errors::Result,
};

/// Persistence for tokens. Rows are only ever inserted and deleted.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert(&self, token: &Token) -> Result<()>;

    async fn new_token(&self, user_id: i64, ttl: time::Duration, scope: Scope) -> Result<Token> {
        let token = Token::generate(user_id, ttl, scope);
        self.insert(&token).await?;
        Ok(token)
    }

    async fn delete_all_for_user(&self, scope: Scope, user_id: i64) -> Result<()>;
    async fn delete_by_plaintext(&self, scope: Scope, plaintext: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct PgTokenStore {
    db: PgPool,
    timeout: Duration,
}

impl PgTokenStore {
    pub fn new(db: PgPool, timeout: Duration) -> Self {
        Self { db, timeout }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn insert(&self, token: &Token) -> Result<()> {
        timed(
            "INSERT",
            self.timeout,
            sqlx::query(
                r#"
                INSERT INTO tokens (hash, user_id, expiry, scope)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&token.hash)
            .bind(token.user_id)
            .bind(token.expiry)
            .bind(token.scope.as_str())
            .execute(&self.db),
        )
        .await?;
        debug!(user_id = token.user_id, scope = %token.scope, "token stored");
        Ok(())
    }

    async fn delete_all_for_user(&self, scope: Scope, user_id: i64) -> Result<()> {
        let result = timed(
            "DELETE",
            self.timeout,
            sqlx::query("DELETE FROM tokens WHERE scope = $1 AND user_id = $2")
                .bind(scope.as_str())
                .bind(user_id)
                .execute(&self.db),
        )
        .await?;
        debug!(user_id, %scope, deleted = result.rows_affected(), "tokens deleted");
        Ok(())
    }

    async fn delete_by_plaintext(&self, scope: Scope, plaintext: &str) -> Result<()> {
        timed(
            "DELETE",
            self.timeout,
            sqlx::query("DELETE FROM tokens WHERE scope = $1 AND hash = $2")
                .bind(scope.as_str())
                .bind(hash_plaintext(plaintext))
                .execute(&self.db),
        )
        .await?;
        Ok(())
    }
}
