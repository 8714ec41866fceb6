use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::{
    auth::password::{self, Password},
    errors::{Error, Result},
    tokens::{
        model::{Scope, Token},
        store::TokenStore,
    },
    users::{model::User, store::UserStore},
};

/// Verified against when the email is unknown so both failure paths cost
/// one Argon2 verification. Derived on the blocking pool on first use.
static DUMMY: OnceCell<Option<Password>> = OnceCell::const_new();

async fn dummy_password() -> Option<Password> {
    DUMMY
        .get_or_init(|| async {
            Password::derive("dummy-password-for-timing".to_string())
                .await
                .ok()
        })
        .await
        .clone()
}

/// Checks an email/password pair and mints a session token.
///
/// Unknown email and wrong password both come back as `InvalidCredential`.
pub async fn login(
    users: &dyn UserStore,
    tokens: &dyn TokenStore,
    ttl: time::Duration,
    email: &str,
    plain: &str,
) -> Result<Token> {
    let user = match users.get_by_email(email).await {
        Ok(user) => user,
        Err(Error::NotFound) => {
            if let Some(dummy) = dummy_password().await {
                let _ = password::verify(dummy, plain.to_string()).await;
            }
            warn!("login with unknown email");
            return Err(Error::InvalidCredential);
        }
        Err(e) => return Err(e),
    };

    if !password::verify(user.password.clone(), plain.to_string()).await? {
        warn!(user_id = user.id, "login with invalid password");
        return Err(Error::InvalidCredential);
    }

    let token = tokens.new_token(user.id, ttl, Scope::Session).await?;
    info!(user_id = user.id, "user logged in");
    Ok(token)
}

pub async fn logout(tokens: &dyn TokenStore, user: &User, plain: &str) -> Result<()> {
    tokens
        .delete_by_plaintext(Scope::Session, plain)
        .await?;
    info!(user_id = user.id, "user logged out");
    Ok(())
}

/// Redeems an activation token. The token and any sibling activation tokens
/// are gone afterwards.
pub async fn activate(
    users: &dyn UserStore,
    tokens: &dyn TokenStore,
    plain: &str,
) -> Result<User> {
    let mut user = users.get_for_token(Scope::Activation, plain).await?;
    user.activated = true;
    users.update(&mut user).await?;
    tokens
        .delete_all_for_user(Scope::Activation, user.id)
        .await?;
    info!(user_id = user.id, "user activated");
    Ok(user)
}

/// Redeems a password-reset token, replacing the user's credential.
pub async fn reset_password(
    users: &dyn UserStore,
    tokens: &dyn TokenStore,
    plain: &str,
    new_password: Password,
) -> Result<User> {
    let mut user = users.get_for_token(Scope::PasswordReset, plain).await?;
    user.password = new_password;
    users.update(&mut user).await?;
    tokens
        .delete_all_for_user(Scope::PasswordReset, user.id)
        .await?;
    info!(user_id = user.id, "password reset");
    Ok(user)
}
