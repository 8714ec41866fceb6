//! Inserts a fixed set of accounts for local development.

use accounts::{
    auth::password::Password,
    config::AppConfig,
    db,
    errors::Error,
    users::{
        model::{Role, User},
        store::{PgUserStore, UserStore},
    },
};
use anyhow::Context;

struct SeedUser {
    username: &'static str,
    email: &'static str,
    password: &'static str,
    activated: bool,
    role: Role,
}

const USERS: &[SeedUser] = &[
    SeedUser {
        username: "admin",
        email: "admin@example.com",
        password: "admin-password",
        activated: true,
        role: Role::Admin,
    },
    SeedUser {
        username: "alice",
        email: "alice@example.com",
        password: "alice-password",
        activated: true,
        role: Role::User,
    },
    SeedUser {
        username: "bob",
        email: "bob@example.com",
        password: "bob-password",
        activated: false,
        role: Role::User,
    },
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    accounts::init_tracing();

    let config = AppConfig::from_env()?;
    let pool = db::connect(&config).await?;
    db::migrate(&pool).await?;
    let store = PgUserStore::new(pool, config.store_timeout);

    for seed in USERS {
        let password = Password::derive(seed.password.to_string())
            .await
            .context("hash seed password")?;
        let mut user = User::new(seed.username, seed.email, password);
        user.activated = seed.activated;
        user.role = seed.role;

        match store.insert(&mut user).await {
            Ok(()) => tracing::info!(user_id = user.id, username = seed.username, "seeded"),
            Err(Error::DuplicateIdentifier(field)) => {
                tracing::info!(username = seed.username, field, "already present, skipping")
            }
            Err(e) => return Err(e).context("insert seed user"),
        }
    }
    Ok(())
}
