use axum::{Json, extract::State, http::StatusCode};

use casabot_api_types::{LeadRequest, LeadResponse};

use crate::error::ApiErr;
use crate::storage::{Db, NewLead};

/// POST /api/leads — store the visitor's contact details.
pub async fn create_lead(
    State(db): State<Db>,
    Json(req): Json<LeadRequest>,
) -> Result<(StatusCode, Json<LeadResponse>), ApiErr> {
    let name = req.name.trim();
    let phone = req.phone.trim();
    if req.session_id.trim().is_empty() {
        return Err(ApiErr::bad_request("sessionId is required"));
    }
    if name.is_empty() || phone.is_empty() {
        return Err(ApiErr::bad_request("name and phone are required"));
    }
    if !phone.chars().any(|c| c.is_ascii_digit()) {
        return Err(ApiErr::bad_request("invalid phone number"));
    }
    let email = req
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty());
    if email.is_some_and(|e| !e.contains('@')) {
        return Err(ApiErr::bad_request("invalid email"));
    }

    let id = db
        .create_lead(&NewLead {
            session_id: req.session_id.trim(),
            name,
            phone,
            email,
            property_id: req.property_id.as_deref().filter(|p| !p.trim().is_empty()),
        })
        .map_err(ApiErr::from_db("create_lead"))?;

    tracing::info!(session_id = %req.session_id, "lead captured");
    Ok((StatusCode::CREATED, Json(LeadResponse { id })))
}
