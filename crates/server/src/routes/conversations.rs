use axum::{
    Json,
    extract::{Path, State},
};

use casabot_api_types::{ConversationMessage, ConversationResponse};

use crate::error::ApiErr;
use crate::storage::Db;

/// GET /api/conversations/{session_id} — persisted transcript, oldest first.
pub async fn get_conversation(
    State(db): State<Db>,
    Path(session_id): Path<String>,
) -> Result<Json<ConversationResponse>, ApiErr> {
    let known = db
        .get_conversation(&session_id)
        .map_err(ApiErr::from_db("get_conversation"))?;
    if known.is_none() {
        return Err(ApiErr::not_found("conversation not found"));
    }

    let messages = db
        .list_messages(&session_id)
        .map_err(ApiErr::from_db("list_messages"))?
        .into_iter()
        .map(|m| ConversationMessage {
            role: m.role.as_str().to_string(),
            content: m.content,
            item_ids: m.item_ids,
            created_at: m.created_at,
        })
        .collect();

    Ok(Json(ConversationResponse {
        session_id,
        messages,
    }))
}
