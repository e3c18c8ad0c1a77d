//! Request and reply shapes exchanged with the upstream LLM, plus parsing of
//! its JSON reply and the fixed fallback used when the call fails.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use thiserror::Error;

use crate::listing::Listing;

/// Shown to the visitor whenever the advisor cannot be reached or replies
/// with garbage.
pub const FALLBACK_MESSAGE: &str = "Desculpe, tive um problema para processar sua mensagem agora. \
     Pode repetir, por favor? Enquanto isso, fique à vontade para me contar o que procura.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// One persisted message of a conversation, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryTurn {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub item_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Personalization {
    pub returning_visitor: bool,
    pub lead_captured: bool,
}

#[derive(Debug, Clone)]
pub struct AdviceRequest {
    pub user_text: String,
    pub history: Vec<HistoryTurn>,
    pub candidates: Vec<Listing>,
    /// Listings already shown in this conversation.
    pub excluded_ids: Vec<String>,
    pub personalization: Personalization,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Advice {
    pub reasoning: String,
    pub item_ids: Vec<String>,
    pub response_message: String,
}

impl Advice {
    pub fn fallback() -> Self {
        Self {
            reasoning: String::new(),
            item_ids: Vec::new(),
            response_message: FALLBACK_MESSAGE.to_string(),
        }
    }

    /// Drop ids that are not among `candidates` and duplicates, keeping rank.
    pub fn retain_candidates(&mut self, candidates: &[Listing]) {
        let mut seen = std::collections::HashSet::new();
        self.item_ids
            .retain(|id| candidates.iter().any(|c| &c.id == id) && seen.insert(id.clone()));
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AdviceError {
    #[error("advisor reply is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("advisor reply has no response message")]
    EmptyMessage,
}

#[derive(Deserialize)]
struct RawAdvice {
    #[serde(default)]
    reasoning: String,
    #[serde(
        default,
        alias = "propertyIds",
        alias = "property_ids",
        alias = "itemIds",
        alias = "item_ids"
    )]
    ids: Vec<serde_json::Value>,
    #[serde(
        default,
        alias = "responseMessage",
        alias = "response_message",
        alias = "message"
    )]
    response: Option<String>,
}

static FENCED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("valid regex"));

/// Parse the advisor's reply. Accepts a bare JSON object, one wrapped in a
/// Markdown code fence, or one surrounded by stray prose.
pub fn parse_advice(raw: &str) -> Result<Advice, AdviceError> {
    let body = extract_json(raw);
    let parsed: RawAdvice = serde_json::from_str(body)?;

    let response_message = parsed
        .response
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .ok_or(AdviceError::EmptyMessage)?;

    let item_ids = parsed
        .ids
        .into_iter()
        .filter_map(|v| match v {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect();

    Ok(Advice {
        reasoning: parsed.reasoning.trim().to_string(),
        item_ids,
        response_message,
    })
}

fn extract_json(raw: &str) -> &str {
    if let Some(inner) = FENCED.captures(raw).and_then(|c| c.get(1)) {
        return inner.as_str();
    }
    match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => raw.trim(),
    }
}

/// Ids of every listing already recommended in `history`, in first-shown order.
pub fn shown_item_ids(history: &[HistoryTurn]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for id in history.iter().flat_map(|t| t.item_ids.iter()) {
        if !out.contains(id) {
            out.push(id.clone());
        }
    }
    out
}
