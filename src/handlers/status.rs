use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `GET /api/v1/speakers`
pub async fn get_speakers(state: web::Data<AppState>) -> HttpResponse {
    let channels: Vec<_> = state
        .registry
        .snapshot()
        .into_iter()
        .map(|(channel, speaking)| json!({ "channel": channel, "speaking": speaking }))
        .collect();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "channels": channels,
        "speaking_count": state.registry.speaking_count(),
    }))
}

/// `GET /api/v1/focus`
pub async fn get_focus(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "focus": state.focus_view(),
        "override_pending": state.mailbox.is_pending(),
    }))
}
