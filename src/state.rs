use std::sync::Arc;

use crate::{
    auth::authenticator::Authenticator,
    config::{AppConfig, TokenConfig},
    db,
    memory::MemoryStore,
    tokens::store::{PgTokenStore, TokenStore},
    users::store::{PgUserStore, UserStore},
};

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);
        let pool = db::connect(&config).await?;
        db::migrate(&pool).await?;

        let users = Arc::new(PgUserStore::new(pool.clone(), config.store_timeout));
        let tokens = Arc::new(PgTokenStore::new(pool, config.store_timeout));
        Ok(Self::from_parts(users, tokens, config))
    }

    pub fn from_parts(
        users: Arc<dyn UserStore>,
        tokens: Arc<dyn TokenStore>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            users,
            tokens,
            config,
        }
    }

    /// State over an in-memory store, for tests and local runs.
    pub fn fake() -> (Self, MemoryStore) {
        let store = MemoryStore::new();
        let config = Arc::new(AppConfig {
            database_url: "memory".into(),
            db_max_connections: 1,
            store_timeout: std::time::Duration::from_secs(3),
            tokens: TokenConfig::default(),
        });
        let state = Self::from_parts(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            config,
        );
        (state, store)
    }

    pub fn authenticator(&self) -> Authenticator {
        Authenticator::new(self.users.clone())
    }
}
