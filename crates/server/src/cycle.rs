//! One response cycle: persist the visitor's message, ask the advisor, persist
//! the reply and play it back on the socket with human-like pacing.

use casabot_api_types::ServerMessage;
use casabot_core::advisor::{
    Advice, AdviceRequest, HistoryTurn, Personalization, Role, shown_item_ids,
};
use casabot_core::delivery::{ScheduledEvent, plan_delivery, typing_started};
use casabot_core::listing::{Listing, rank};
use casabot_core::chunk_message;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::AppState;
use crate::config::DeliverySettings;
use crate::registry;
use crate::scheduler::{DeliveryOutcome, deliver};

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("persistence failed: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// Run a cycle for a session already marked busy. Always clears the busy
/// flag before returning.
pub async fn run_cycle(
    state: AppState,
    session_id: String,
    user_text: String,
    outbound: mpsc::Sender<ServerMessage>,
    closed: watch::Receiver<bool>,
) {
    let opened = deliver(vec![typing_started()], &outbound, closed.clone()).await;
    if opened == DeliveryOutcome::Completed {
        match prepare(&state, &session_id, &user_text).await {
            Ok(plan) => {
                let outcome = deliver(plan, &outbound, closed).await;
                if outcome == DeliveryOutcome::Cancelled {
                    debug!(session_id = %session_id, "delivery cancelled");
                }
            }
            Err(e) => {
                error!(session_id = %session_id, "response cycle failed: {e}");
                let _ = outbound.send(ServerMessage::generic_error()).await;
            }
        }
    }

    registry::lock(&state.registry).set_busy(&session_id, false);
}

async fn prepare(
    state: &AppState,
    session_id: &str,
    user_text: &str,
) -> Result<Vec<ScheduledEvent>, CycleError> {
    let db = &state.db;
    let settings = &state.config.session;

    let mut transcript = db.get_conversation(session_id)?.unwrap_or_default();
    let returning_visitor = !transcript.is_empty();

    db.create_message(session_id, Role::User, user_text, &[])?;

    // The stored user message is the newest row; the advisor gets it separately.
    let mut history = db.get_history(session_id, settings.history_limit + 1)?;
    history.pop();

    let excluded_ids = shown_item_ids(&transcript);
    let catalog = db.list_listings()?;
    let candidates: Vec<Listing> = rank(
        &search_query(user_text, &history),
        &catalog,
        &excluded_ids,
        settings.candidate_limit,
    )
    .into_iter()
    .map(|scored| scored.listing.clone())
    .collect();

    let request = AdviceRequest {
        user_text: user_text.to_string(),
        history,
        candidates,
        excluded_ids,
        personalization: Personalization {
            returning_visitor,
            lead_captured: db.has_lead(session_id)?,
        },
    };

    let mut advice = match state.advisor.advise(&request).await {
        Ok(advice) => advice,
        Err(e) => {
            warn!(session_id = %session_id, "advisor failed, using fallback: {e:#}");
            Advice::fallback()
        }
    };
    advice.retain_candidates(&request.candidates);

    let items: Vec<Listing> = advice
        .item_ids
        .iter()
        .filter_map(|id| request.candidates.iter().find(|c| &c.id == id).cloned())
        .collect();

    db.create_message(
        session_id,
        Role::Assistant,
        &advice.response_message,
        &advice.item_ids,
    )?;

    transcript.push(HistoryTurn {
        role: Role::User,
        content: user_text.to_string(),
        item_ids: Vec::new(),
    });
    transcript.push(HistoryTurn {
        role: Role::Assistant,
        content: advice.response_message.clone(),
        item_ids: advice.item_ids.clone(),
    });
    db.update_conversation(session_id, &transcript)?;

    info!(
        session_id = %session_id,
        items = items.len(),
        "reply ready"
    );

    Ok(build_plan(&advice, items, &state.config.delivery))
}

/// Recent visitor turns sharpen the ranking for short follow-ups like "e em Moema?".
fn search_query(user_text: &str, history: &[HistoryTurn]) -> String {
    let mut query = user_text.to_string();
    for turn in history.iter().rev().filter(|t| t.role == Role::User).take(2) {
        query.push(' ');
        query.push_str(&turn.content);
    }
    query
}

fn build_plan(
    advice: &Advice,
    items: Vec<Listing>,
    delivery: &DeliverySettings,
) -> Vec<ScheduledEvent> {
    let mut rng = rand::thread_rng();
    let chunks = chunk_message(&advice.response_message, delivery.chunk_delay, &mut rng);
    plan_delivery(
        &advice.response_message,
        &chunks,
        items,
        Some(advice.reasoning.clone()),
        delivery.item_delay,
        &mut rng,
    )
}
