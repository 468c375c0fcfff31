//! Backend management API, mounted at `/gateway/backend`.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/all", get(get_all))
        .route("/active", get(get_active))
        .route("/modify/add", post(upsert_backend))
        .route("/modify/update", post(upsert_backend))
        .route("/modify/delete", post(delete_backend))
        .route("/activate/{name}", post(activate))
        .route("/deactivate/{name}", post(deactivate))
        .layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}
