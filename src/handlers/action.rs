//! Operator commands: named actions, raw overrides and shutdown.
//!
//! Each command is posted to the override mailbox and applied by the arbiter
//! on its next cycle; the response only says it was accepted.

use crate::attention::OverrideCommand;
use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::info;

fn ensure_running(state: &AppState) -> Result<(), AppError> {
    if state.shutdown.is_triggered() {
        return Err(AppError::Unavailable("Server is shutting down".to_string()));
    }
    Ok(())
}

/// `GET /api/v1/action/{command}`
pub async fn run_action(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    ensure_running(&state)?;
    let name = path.into_inner();
    let command = state
        .get_config()
        .command(&name)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("Unknown action: {}", name)))?;

    let replaced = state.mailbox.post(command);
    info!(action = %name, replaced, "Operator action posted");

    Ok(HttpResponse::Ok().json(json!({
        "status": "ok",
        "command": name,
        "replaced_pending": replaced,
    })))
}

/// `POST /api/v1/override`
pub async fn post_override(
    state: web::Data<AppState>,
    body: web::Json<OverrideCommand>,
) -> Result<HttpResponse, AppError> {
    ensure_running(&state)?;
    let command = body.into_inner();
    for (field, value) in [("image", &command.image), ("icon", &command.icon)] {
        if value.as_deref().is_some_and(|name| name.trim().is_empty()) {
            return Err(AppError::ValidationError(format!("{} name must not be blank", field)));
        }
    }
    let replaced = state.mailbox.post(command.clone());
    info!(?command, replaced, "Override posted");

    Ok(HttpResponse::Ok().json(json!({
        "status": "ok",
        "command": command,
        "replaced_pending": replaced,
    })))
}

/// `GET /api/v1/stop`
pub async fn stop(state: web::Data<AppState>) -> HttpResponse {
    if state.shutdown.trigger() {
        info!("Stop requested over HTTP");
    }
    HttpResponse::Ok().json(json!({ "status": "stopping" }))
}
