use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tracing::instrument;

use crate::{
    auth::{
        authenticator::AuthenticatedUser,
        dto::{ActivateRequest, EmailRequest, LoginRequest, ResetPasswordRequest},
        password::{self, Password},
        services,
    },
    errors::{ApiError, Error},
    state::AppState,
    tokens::model::{self as token_model, Scope},
    users::model::validate_email,
    validator::Validator,
};

pub fn token_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/tokens/session",
            post(create_authentication_token).delete(delete_authentication_token),
        )
        .route("/tokens/activation", post(create_activation_token))
        .route("/tokens/password-reset", post(create_password_reset_token))
}

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/users/activate", post(activate_user))
        .route("/users/reset-password", post(reset_password))
}

#[instrument(skip(state, payload))]
pub async fn create_authentication_token(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let mut v = Validator::new();
    validate_email(&mut v, &payload.email);
    password::validate_plaintext(&mut v, &payload.password);
    v.finish()?;

    let token = services::login(
        state.users.as_ref(),
        state.tokens.as_ref(),
        state.config.tokens.session_ttl,
        &payload.email,
        &payload.password,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "authentication_token": token })),
    ))
}

#[instrument(skip_all)]
pub async fn delete_authentication_token(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::InvalidAuthenticationToken)?;

    services::logout(state.tokens.as_ref(), &user, token).await?;
    Ok(Json(json!({ "message": "you have been logged out" })))
}

#[instrument(skip(state, payload))]
pub async fn create_activation_token(
    State(state): State<AppState>,
    Json(payload): Json<EmailRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let mut v = Validator::new();
    validate_email(&mut v, &payload.email);
    v.finish()?;

    let user = match state.users.get_by_email(&payload.email).await {
        Ok(user) => user,
        Err(Error::NotFound) => {
            return Err(ApiError::field("email", "no matching email address found"))
        }
        Err(e) => return Err(e.into()),
    };
    if user.activated {
        return Err(ApiError::field("email", "user has already been activated"));
    }

    let token = state
        .tokens
        .new_token(user.id, state.config.tokens.activation_ttl, Scope::Activation)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "activation_token": token })),
    ))
}

#[instrument(skip(state, payload))]
pub async fn create_password_reset_token(
    State(state): State<AppState>,
    Json(payload): Json<EmailRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let mut v = Validator::new();
    validate_email(&mut v, &payload.email);
    v.finish()?;

    let user = match state.users.get_by_email(&payload.email).await {
        Ok(user) => user,
        Err(Error::NotFound) => {
            return Err(ApiError::field("email", "no matching email address found"))
        }
        Err(e) => return Err(e.into()),
    };
    if !user.activated {
        return Err(ApiError::field("email", "user account must be activated"));
    }

    let token = state
        .tokens
        .new_token(
            user.id,
            state.config.tokens.password_reset_ttl,
            Scope::PasswordReset,
        )
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "password_reset_token": token })),
    ))
}

#[instrument(skip(state, payload))]
pub async fn activate_user(
    State(state): State<AppState>,
    Json(payload): Json<ActivateRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut v = Validator::new();
    token_model::validate_plaintext(&mut v, &payload.token);
    v.finish()?;

    match services::activate(state.users.as_ref(), state.tokens.as_ref(), &payload.token).await {
        Ok(user) => Ok(Json(json!({ "user": user }))),
        Err(Error::NotFound) => Err(ApiError::field(
            "token",
            "invalid or expired activation token",
        )),
        Err(e) => Err(e.into()),
    }
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut v = Validator::new();
    password::validate_plaintext(&mut v, &payload.password);
    token_model::validate_plaintext(&mut v, &payload.token);
    v.finish()?;

    let new_password = Password::derive(payload.password).await?;
    match services::reset_password(
        state.users.as_ref(),
        state.tokens.as_ref(),
        &payload.token,
        new_password,
    )
    .await
    {
        Ok(_) => Ok(Json(
            json!({ "message": "your password was successfully reset" }),
        )),
        Err(Error::NotFound) => Err(ApiError::field(
            "token",
            "invalid or expired password reset token",
        )),
        Err(e) => Err(e.into()),
    }
}
