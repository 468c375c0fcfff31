//! Backend management handlers.
//!
//! Every write goes through [`BackendRegistry`](crate::load_balancer::BackendRegistry),
//! so a change is visible to the next routing decision.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::config::BackendConfig;
use crate::http::server::AppState;
use crate::load_balancer::Backend;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("invalid backend definition: {0}")]
    BadRequest(String),

    #[error("backend not found: {0}")]
    NotFound(String),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match self {
            AdminError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AdminError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        (status, self.to_string()).into_response()
    }
}

pub async fn get_all(State(state): State<AppState>) -> Json<Vec<Backend>> {
    Json(
        state
            .registry
            .all()
            .iter()
            .map(|b| b.as_ref().clone())
            .collect(),
    )
}

pub async fn get_active(State(state): State<AppState>) -> Json<Vec<Backend>> {
    Json(
        state
            .registry
            .all()
            .iter()
            .filter(|b| b.active)
            .map(|b| b.as_ref().clone())
            .collect(),
    )
}

/// Register or replace a backend.
pub async fn upsert_backend(
    State(state): State<AppState>,
    Json(config): Json<BackendConfig>,
) -> Result<Json<Backend>, AdminError> {
    if config.name.trim().is_empty() {
        return Err(AdminError::BadRequest("name must not be empty".into()));
    }
    if config.routing_group.as_deref().is_some_and(|g| g.trim().is_empty()) {
        return Err(AdminError::BadRequest("routing group must not be empty".into()));
    }
    let backend = Backend::from_config(&config, state.registry.default_group())
        .map_err(|e| AdminError::BadRequest(format!("proxy_to {:?}: {}", config.proxy_to, e)))?;

    state.registry.upsert(backend);
    state
        .registry
        .get(&config.name)
        .map(|b| Json(b.as_ref().clone()))
        .ok_or(AdminError::NotFound(config.name))
}

/// Remove a backend. The body is the backend name, plain or JSON-quoted.
pub async fn delete_backend(State(state): State<AppState>, body: String) -> Result<StatusCode, AdminError> {
    let name = body.trim().trim_matches('"');
    if state.registry.remove(name) {
        Ok(StatusCode::OK)
    } else {
        Err(AdminError::NotFound(name.to_string()))
    }
}

pub async fn activate(State(state): State<AppState>, Path(name): Path<String>) -> Result<StatusCode, AdminError> {
    set_active(&state, name, true)
}

pub async fn deactivate(State(state): State<AppState>, Path(name): Path<String>) -> Result<StatusCode, AdminError> {
    set_active(&state, name, false)
}

fn set_active(state: &AppState, name: String, active: bool) -> Result<StatusCode, AdminError> {
    if state.registry.set_active(&name, active) {
        Ok(StatusCode::OK)
    } else {
        Err(AdminError::NotFound(name))
    }
}
