use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use super::{
    dto::{ListQuery, RegisterRequest, RoleRequest, UpdateUserRequest},
    model::{validate_role, validate_user, Role, User},
};
use crate::{
    auth::{
        authenticator::{ActivatedUser, AdminUser},
        password::{self, Password},
    },
    errors::ApiError,
    state::AppState,
    tokens::model::Scope,
    validator::Validator,
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(register_user))
        .route(
            "/users/:id",
            get(get_user).patch(update_user).delete(delete_user),
        )
        .route("/users/:id/role", patch(update_user_role))
}

fn ensure_owner_or_admin(actor: &User, id: i64) -> Result<(), ApiError> {
    if actor.owns_or_admin(id) {
        Ok(())
    } else {
        warn!(actor_id = actor.id, target_id = id, "ownership check failed");
        Err(ApiError::NotPermitted)
    }
}

#[instrument(skip(state, payload))]
pub async fn register_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    // Reject bad plaintexts before paying for a hash.
    let mut v = Validator::new();
    password::validate_plaintext(&mut v, &payload.password);
    v.finish()?;

    let password = Password::derive(payload.password).await?;
    let mut user = User::new(&payload.username, &payload.email, password);

    let mut v = Validator::new();
    validate_user(&mut v, &user);
    v.finish()?;

    state.users.insert(&mut user).await?;
    let token = state
        .tokens
        .new_token(user.id, state.config.tokens.activation_ttl, Scope::Activation)
        .await?;

    info!(user_id = user.id, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "user": user, "activation_token": token })),
    ))
}

#[instrument(skip(state, _admin))]
pub async fn list_users(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let filters = query.filters();
    let mut v = Validator::new();
    filters.validate(&mut v);
    v.finish()?;

    let (users, metadata) = state
        .users
        .search(&query.username, &query.email, &filters)
        .await?;
    Ok(Json(json!({ "users": users, "metadata": metadata })))
}

#[instrument(skip(state, actor))]
pub async fn get_user(
    State(state): State<AppState>,
    ActivatedUser(actor): ActivatedUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    ensure_owner_or_admin(&actor, id)?;
    let user = state.users.get_by_id(id).await?;
    Ok(Json(json!({ "user": user })))
}

#[instrument(skip(state, actor, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    ActivatedUser(actor): ActivatedUser,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<Value>, ApiError> {
    ensure_owner_or_admin(&actor, id)?;
    let mut user = state.users.get_by_id(id).await?;

    if let Some(username) = payload.username {
        user.username = username;
    }
    if let Some(email) = payload.email {
        user.email = email;
    }
    if let Some(plain) = payload.password {
        let mut v = Validator::new();
        password::validate_plaintext(&mut v, &plain);
        v.finish()?;
        user.password = Password::derive(plain).await?;
    }

    let mut v = Validator::new();
    validate_user(&mut v, &user);
    v.finish()?;

    // A stale version surfaces as 409; the client re-reads and retries.
    state.users.update(&mut user).await?;
    Ok(Json(json!({ "user": user })))
}

#[instrument(skip(state, actor))]
pub async fn delete_user(
    State(state): State<AppState>,
    ActivatedUser(actor): ActivatedUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    ensure_owner_or_admin(&actor, id)?;
    state.users.delete(id).await?;
    info!(user_id = id, actor_id = actor.id, "user deleted");
    Ok(Json(json!({ "message": "user successfully deleted" })))
}

#[instrument(skip(state, admin, payload))]
pub async fn update_user_role(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
    Json(payload): Json<RoleRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut v = Validator::new();
    validate_role(&mut v, &payload.role);
    v.finish()?;
    let role: Role = payload
        .role
        .parse()
        .map_err(|_| ApiError::field("role", "must be either 'user' or 'admin'"))?;

    let mut user = state.users.get_by_id(id).await?;
    // Count and update are separate statements: two admins demoting each
    // other at the same moment can both pass this check.
    if user.is_admin()
        && role != Role::Admin
        && state.users.count_by_role(Role::Admin).await? <= 1
    {
        return Err(ApiError::field("role", "cannot remove the last admin"));
    }

    user.role = role;
    state.users.update(&mut user).await?;
    info!(user_id = id, admin_id = admin.id, %role, "role changed");
    Ok(Json(json!({ "user": user })))
}
