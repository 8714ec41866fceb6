use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::{
    errors::{ApiError, Error, Result},
    state::AppState,
    tokens::model::{validate_plaintext, Scope},
    users::{
        model::{Identity, User},
        store::UserStore,
    },
    validator::Validator,
};

/// Resolves the bearer credential of a request into an [`Identity`].
#[derive(Clone)]
pub struct Authenticator {
    users: Arc<dyn UserStore>,
}

impl Authenticator {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// No header means anonymous. A header that is present but unusable is
    /// always `InvalidCredential`, whatever the reason.
    pub async fn resolve(&self, authorization: Option<&str>) -> Result<Identity> {
        let Some(header) = authorization else {
            return Ok(Identity::Anonymous);
        };

        let token = header
            .strip_prefix("Bearer ")
            .ok_or(Error::InvalidCredential)?;

        let mut v = Validator::new();
        validate_plaintext(&mut v, token);
        if !v.valid() {
            return Err(Error::InvalidCredential);
        }

        match self.users.get_for_token(Scope::Session, token).await {
            Ok(user) => {
                debug!(user_id = user.id, "request authenticated");
                Ok(Identity::User(user))
            }
            Err(Error::NotFound) => Err(Error::InvalidCredential),
            Err(e) => Err(e),
        }
    }
}

/// Middleware that attaches the request's [`Identity`] to its extensions.
/// Every response it lets through or produces varies on `Authorization`.
pub async fn authenticate(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let mut res = match identify(&state, req).await {
        Ok(req) => next.run(req).await,
        Err(err) => err.into_response(),
    };
    res.headers_mut()
        .append(header::VARY, HeaderValue::from_static("Authorization"));
    res
}

async fn identify(state: &AppState, mut req: Request) -> Result<Request, ApiError> {
    let authorization = match req.headers().get(header::AUTHORIZATION) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| ApiError::InvalidAuthenticationToken)?
                .to_owned(),
        ),
        None => None,
    };

    let identity = state
        .authenticator()
        .resolve(authorization.as_deref())
        .await
        .map_err(|e| match e {
            Error::InvalidCredential => {
                warn!("invalid or expired authentication token");
                ApiError::InvalidAuthenticationToken
            }
            other => ApiError::Internal(other),
        })?;

    req.extensions_mut().insert(identity);
    Ok(req)
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<Identity>()
            .cloned()
            .unwrap_or(Identity::Anonymous))
    }
}

/// Any non-anonymous user.
pub struct AuthenticatedUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Identity::from_request_parts(parts, state).await? {
            Identity::User(user) => Ok(AuthenticatedUser(user)),
            Identity::Anonymous => Err(ApiError::AuthenticationRequired),
        }
    }
}

/// An authenticated user whose account is activated.
pub struct ActivatedUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for ActivatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthenticatedUser(user) = AuthenticatedUser::from_request_parts(parts, state).await?;
        if !user.activated {
            return Err(ApiError::InactiveAccount);
        }
        Ok(ActivatedUser(user))
    }
}

/// An activated administrator.
pub struct AdminUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let ActivatedUser(user) = ActivatedUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(ApiError::NotPermitted);
        }
        Ok(AdminUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::password::Password, memory::MemoryStore, tokens::store::TokenStore,
    };

    async fn setup() -> (Authenticator, MemoryStore, User) {
        let store = MemoryStore::new();
        let mut password = Password::empty();
        password.set("secret123").unwrap();
        let mut user = User::new("alice", "alice@x.com", password);
        UserStore::insert(&store, &mut user).await.unwrap();
        (Authenticator::new(Arc::new(store.clone())), store, user)
    }

    #[tokio::test]
    async fn missing_header_is_anonymous() {
        let (auth, _, _) = setup().await;
        assert!(auth.resolve(None).await.unwrap().is_anonymous());
    }

    #[tokio::test]
    async fn valid_session_token_resolves_user() {
        let (auth, store, user) = setup().await;
        let token = store
            .new_token(user.id, time::Duration::hours(1), Scope::Session)
            .await
            .unwrap();
        let identity = auth
            .resolve(Some(&format!("Bearer {}", token.plaintext)))
            .await
            .unwrap();
        assert_eq!(identity.user().map(|u| u.id), Some(user.id));
    }

    #[tokio::test]
    async fn bad_credentials_never_fall_back_to_anonymous() {
        let (auth, store, user) = setup().await;
        let expired = store
            .new_token(user.id, time::Duration::hours(1), Scope::Session)
            .await
            .unwrap();
        store.expire_tokens(user.id);
        let activation = store
            .new_token(user.id, time::Duration::hours(1), Scope::Activation)
            .await
            .unwrap();

        let unknown = format!("Bearer {}", "A".repeat(43));
        let wrong_scope = format!("Bearer {}", activation.plaintext);
        let stale = format!("Bearer {}", expired.plaintext);
        let basic = format!("Basic {}", expired.plaintext);
        for header in [
            "",
            "Bearer",
            "Bearer short",
            basic.as_str(),
            unknown.as_str(),
            wrong_scope.as_str(),
            stale.as_str(),
        ] {
            assert!(
                matches!(auth.resolve(Some(header)).await, Err(Error::InvalidCredential)),
                "header {header:?} should be rejected"
            );
        }
    }
}
