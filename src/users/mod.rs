mod dto;
pub mod filters;
pub mod handlers;
pub mod model;
pub mod store;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    handlers::user_routes()
}
