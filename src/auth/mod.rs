use crate::state::AppState;
use axum::Router;

pub mod authenticator;
mod dto;
pub mod handlers;
pub mod password;
pub mod services;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::token_routes())
        .merge(handlers::account_routes())
}
