use axum::{Json, extract::State};
use std::sync::Arc;

use casabot_api_types::{FollowUpRequest, FollowUpResponse};

use crate::advisor::Advisor;
use crate::config::AppConfig;
use crate::error::ApiErr;
use crate::storage::Db;

/// POST /api/follow-up — contextual question shown after a card is expanded.
///
/// Fails with `502` when the advisor cannot produce one; the widget then
/// falls back to its own template.
pub async fn follow_up(
    State(db): State<Db>,
    State(advisor): State<Arc<dyn Advisor>>,
    State(config): State<Arc<AppConfig>>,
    Json(req): Json<FollowUpRequest>,
) -> Result<Json<FollowUpResponse>, ApiErr> {
    let property_id = req.property_id.trim();
    if property_id.is_empty() {
        return Err(ApiErr::bad_request("propertyId is required"));
    }

    let listing = db
        .get_listing(property_id)
        .map_err(ApiErr::from_db("get_listing"))?
        .ok_or_else(|| ApiErr::not_found("property not found"))?;

    let history = db
        .get_history(&req.session_id, config.session.history_limit)
        .map_err(ApiErr::from_db("get_history"))?;

    let prompt = advisor.follow_up(&listing, &history).await.map_err(|e| {
        tracing::warn!(property_id, "follow-up generation failed: {e:#}");
        ApiErr::bad_gateway("follow-up unavailable")
    })?;

    Ok(Json(FollowUpResponse { prompt }))
}
