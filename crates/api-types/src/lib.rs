//! Wire types for casabot.
//!
//! This crate is the **single source of truth** for everything that crosses
//! the transport: WebSocket events in both directions and the REST bodies.
//! The server and the widget import these types directly; the browser widget
//! consumes TypeScript generated from them via `ts-rs`.
//!
//! To regenerate TypeScript types:
//!   cargo test -p casabot-api-types -- export_typescript --nocapture

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use casabot_core::delivery::DeliveryEvent;
use casabot_core::listing::Listing;

// ─── WebSocket: client → server ──────────────────────────────────────────────

/// Inbound frame. Anything that fails to parse is logged and ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export)]
pub enum ClientMessage {
    UserMessage {
        #[serde(default)]
        content: String,
    },
    Ping,
}

// ─── WebSocket: server → client ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export)]
pub enum ServerMessage {
    SessionStart(SessionStart),
    Typing(Typing),
    BotResponseChunk(BotResponseChunk),
    BotResponse(BotResponse),
    BotProperty(BotProperty),
    Error(ErrorEvent),
    Pong,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SessionStart {
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Typing {
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct BotResponseChunk {
    pub content: String,
    pub chunk_index: u32,
    pub is_last_chunk: bool,
}

/// The complete reply text. Carries the stop-typing signal only when no
/// property cards follow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct BotResponse {
    pub content: String,
    pub is_chunked: bool,
    pub is_last_chunk: bool,
    pub stop_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct BotProperty {
    pub property: PropertyCard,
    pub property_index: u32,
    /// Set on the final card; ends the response cycle.
    pub is_last_property: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ErrorEvent {
    pub message: String,
}

/// Listing as rendered by the widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PropertyCard {
    pub id: String,
    pub title: String,
    pub neighborhood: String,
    pub city: String,
    pub price: u64,
    pub bedrooms: u32,
    pub area_m2: f32,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Terse text shown when a response cycle fails.
pub const GENERIC_ERROR_MESSAGE: &str =
    "Desculpe, algo deu errado. Tente enviar sua mensagem novamente.";

impl ServerMessage {
    pub fn session_start(session_id: impl Into<String>) -> Self {
        ServerMessage::SessionStart(SessionStart {
            session_id: session_id.into(),
        })
    }

    pub fn typing(is_typing: bool) -> Self {
        ServerMessage::Typing(Typing { is_typing })
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorEvent {
            message: message.into(),
        })
    }

    pub fn generic_error() -> Self {
        Self::error(GENERIC_ERROR_MESSAGE)
    }

    /// Whether the client should clear its typing indicator on this event.
    pub fn stops_typing(&self) -> bool {
        match self {
            ServerMessage::Typing(t) => !t.is_typing,
            ServerMessage::BotResponse(r) => r.stop_typing,
            ServerMessage::BotProperty(p) => p.is_last_property,
            ServerMessage::Error(_) => true,
            _ => false,
        }
    }
}

impl From<&Listing> for PropertyCard {
    fn from(l: &Listing) -> Self {
        Self {
            id: l.id.clone(),
            title: l.title.clone(),
            neighborhood: l.neighborhood.clone(),
            city: l.city.clone(),
            price: l.price,
            bedrooms: l.bedrooms,
            area_m2: l.area_m2,
            description: l.description.clone(),
            image_url: l.image_url.clone(),
        }
    }
}

impl From<DeliveryEvent> for ServerMessage {
    fn from(event: DeliveryEvent) -> Self {
        match event {
            DeliveryEvent::TypingState { typing } => ServerMessage::typing(typing),
            DeliveryEvent::TextChunk { content, index } => {
                ServerMessage::BotResponseChunk(BotResponseChunk {
                    content,
                    chunk_index: saturating_u32(index),
                    is_last_chunk: false,
                })
            }
            DeliveryEvent::TextFinal {
                content,
                chunked,
                stop_typing,
            } => ServerMessage::BotResponse(BotResponse {
                content,
                is_chunked: chunked,
                is_last_chunk: true,
                stop_typing,
            }),
            DeliveryEvent::ItemReveal {
                item,
                index,
                is_last,
                reasoning,
            } => ServerMessage::BotProperty(BotProperty {
                property: PropertyCard::from(&item),
                property_index: saturating_u32(index),
                is_last_property: is_last,
                reasoning,
            }),
        }
    }
}

fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

// ─── Conversations ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ConversationMessage {
    /// `user` or `assistant`
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub item_ids: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ConversationResponse {
    pub session_id: String,
    pub messages: Vec<ConversationMessage>,
}

// ─── Follow-up prompts ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct FollowUpRequest {
    pub session_id: String,
    pub property_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FollowUpResponse {
    pub prompt: String,
}

// ─── Leads ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct LeadRequest {
    pub session_id: String,
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub property_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LeadResponse {
    pub id: String,
}

// ─── Health ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

// ─── Error ───────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ApiError {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use std::path::PathBuf;

    fn card() -> PropertyCard {
        PropertyCard {
            id: "p1".into(),
            title: "Casa térrea".into(),
            neighborhood: "Moema".into(),
            city: "São Paulo".into(),
            price: 1_250_000,
            bedrooms: 3,
            area_m2: 140.0,
            description: String::new(),
            image_url: None,
        }
    }

    #[test]
    fn client_messages_use_snake_case_tags() {
        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "user_message", "content": "oi"})).unwrap();
        assert_eq!(
            msg,
            ClientMessage::UserMessage {
                content: "oi".into()
            }
        );
        let ping: ClientMessage = serde_json::from_value(json!({"type": "ping"})).unwrap();
        assert_eq!(ping, ClientMessage::Ping);
        let empty: ClientMessage =
            serde_json::from_value(json!({"type": "user_message"})).unwrap();
        assert_eq!(
            empty,
            ClientMessage::UserMessage {
                content: String::new()
            }
        );
    }

    #[test]
    fn unknown_client_type_is_rejected() {
        assert!(serde_json::from_value::<ClientMessage>(json!({"type": "hack"})).is_err());
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }

    #[test]
    fn server_messages_use_interop_field_names() {
        let v = serde_json::to_value(ServerMessage::session_start("s1")).unwrap();
        assert_eq!(v, json!({"type": "session_start", "sessionId": "s1"}));

        let v = serde_json::to_value(ServerMessage::typing(true)).unwrap();
        assert_eq!(v, json!({"type": "typing", "isTyping": true}));

        let v = serde_json::to_value(ServerMessage::Pong).unwrap();
        assert_eq!(v, json!({"type": "pong"}));

        let v = serde_json::to_value(ServerMessage::from(DeliveryEvent::TextChunk {
            content: "parte".into(),
            index: 0,
        }))
        .unwrap();
        assert_eq!(
            v,
            json!({"type": "bot_response_chunk", "content": "parte", "chunkIndex": 0, "isLastChunk": false})
        );

        let v = serde_json::to_value(ServerMessage::from(DeliveryEvent::TextFinal {
            content: "tudo".into(),
            chunked: true,
            stop_typing: false,
        }))
        .unwrap();
        assert_eq!(
            v,
            json!({"type": "bot_response", "content": "tudo", "isChunked": true, "isLastChunk": true, "stopTyping": false})
        );
    }

    #[test]
    fn bot_property_serializes_card_and_flags() {
        let msg = ServerMessage::BotProperty(BotProperty {
            property: card(),
            property_index: 1,
            is_last_property: true,
            reasoning: Some("perto do parque".into()),
        });
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "bot_property");
        assert_eq!(v["isLastProperty"], true);
        assert_eq!(v["propertyIndex"], 1);
        assert_eq!(v["property"]["areaM2"], 140.0);
        assert_eq!(v["reasoning"], "perto do parque");
        assert!(v["property"].get("imageUrl").is_none());

        let back: ServerMessage = serde_json::from_value(v).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn stop_typing_flags() {
        assert!(ServerMessage::generic_error().stops_typing());
        assert!(ServerMessage::typing(false).stops_typing());
        assert!(!ServerMessage::typing(true).stops_typing());
        assert!(!ServerMessage::Pong.stops_typing());
    }

    #[test]
    fn lead_request_accepts_missing_optionals() {
        let req: LeadRequest = serde_json::from_value(json!({
            "sessionId": "s1", "name": "Ana", "phone": "+55 11 99999-0000"
        }))
        .unwrap();
        assert_eq!(req.email, None);
        assert_eq!(req.property_id, None);
    }

    /// Run with: cargo test -p casabot-api-types -- export_typescript --nocapture
    #[test]
    fn export_typescript() {
        let out_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../../web/src/lib/protocol.generated.ts");

        let cfg = ts_rs::Config::new().with_large_int("number");
        let mut parts: Vec<String> = Vec::new();
        parts.push("// AUTO-GENERATED by casabot-api-types — DO NOT EDIT".to_string());
        parts.push(
            "// Regenerate with: cargo test -p casabot-api-types -- export_typescript".to_string(),
        );
        parts.push(String::new());

        macro_rules! collect_ts {
            ($($t:ty),+ $(,)?) => {
                $(
                    parts.push(format!("export {}", <$t>::decl(&cfg)));
                    parts.push(String::new());
                )+
            };
        }

        collect_ts!(
            // WebSocket
            ClientMessage,
            ServerMessage,
            SessionStart,
            Typing,
            BotResponseChunk,
            BotResponse,
            BotProperty,
            ErrorEvent,
            PropertyCard,
            // REST
            ConversationMessage,
            ConversationResponse,
            FollowUpRequest,
            FollowUpResponse,
            LeadRequest,
            LeadResponse,
            HealthResponse,
            ApiError,
        );

        let content = parts.join("\n");

        if let Some(parent) = out_dir.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let mut file = std::fs::File::create(&out_dir)
            .unwrap_or_else(|e| panic!("Failed to create {}: {}", out_dir.display(), e));
        file.write_all(content.as_bytes())
            .unwrap_or_else(|e| panic!("Failed to write {}: {}", out_dir.display(), e));

        println!("Generated TypeScript types at: {}", out_dir.display());
    }
}
