//! Chat transcript as rendered by the widget.
//!
//! Every input, whether it came from the server or from the visitor, is first
//! appended to a raw log and then folded into the entry list. Message keys are
//! derived from log positions, so replaying the same log with
//! [`Timeline::from_log`] rebuilds an identical transcript.

use casabot_api_types::{PropertyCard, ServerMessage};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// One input to the reducer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogRecord {
    Server(ServerMessage),
    /// The visitor pressed send.
    Submitted(String),
    /// The visitor opened a card's detail view.
    Expanded(String),
    /// Result of the follow-up fetch for an expanded card; `None` on failure.
    FollowUp {
        property_id: String,
        prompt: Option<String>,
    },
    CaptureCompleted,
    CaptureDismissed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Author {
    Visitor,
    Bot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryKind {
    Message {
        author: Author,
        text: String,
        /// Chunks are still arriving.
        streaming: bool,
    },
    Property {
        card: PropertyCard,
        reasoning: Option<String>,
    },
    ExpandedItem {
        card: PropertyCard,
    },
    FollowUpPrompt {
        property_id: String,
        text: String,
    },
    CapturePrompt {
        /// Message waiting for the capture form to close.
        held: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub key: String,
    /// Ordering only; assigned once at creation.
    pub seq: u64,
    pub kind: EntryKind,
}

/// What the caller should do with a submitted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Send this text to the server now.
    Send(String),
    /// The capture prompt is showing. The first held text is released when
    /// it closes; later input while it is open is dropped.
    Held,
    /// Blank input.
    Ignored,
}

/// Handle for the follow-up fetch started by an expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowUpTicket {
    pub property_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Capture {
    NotOffered,
    Showing { held: String },
    Closed,
}

#[derive(Debug, Clone)]
pub struct Timeline {
    log: Vec<LogRecord>,
    entries: Vec<TimelineEntry>,
    next_seq: u64,
    session_id: Option<String>,
    typing: bool,
    /// Key of the bot message currently receiving chunks.
    streaming: Option<String>,
    /// Cards revealed in the current response cycle.
    revealed: HashSet<String>,
    /// Every card seen this session, for expansion.
    cards: HashMap<String, PropertyCard>,
    expanded: HashSet<String>,
    followed_up: HashSet<String>,
    capture: Capture,
    lead_captured: bool,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Timeline {
    pub fn new() -> Self {
        Self {
            log: Vec::new(),
            entries: Vec::new(),
            next_seq: 0,
            session_id: None,
            typing: false,
            streaming: None,
            revealed: HashSet::new(),
            cards: HashMap::new(),
            expanded: HashSet::new(),
            followed_up: HashSet::new(),
            capture: Capture::NotOffered,
            lead_captured: false,
        }
    }

    /// Rebuild a timeline by replaying a raw log.
    pub fn from_log(log: &[LogRecord]) -> Self {
        let mut timeline = Self::new();
        for record in log {
            timeline.record(record.clone());
        }
        timeline
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.key.as_str()).collect()
    }

    pub fn log(&self) -> &[LogRecord] {
        &self.log
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn is_typing(&self) -> bool {
        self.typing
    }

    pub fn lead_captured(&self) -> bool {
        self.lead_captured
    }

    pub fn capture_showing(&self) -> bool {
        matches!(self.capture, Capture::Showing { .. })
    }

    pub fn card(&self, property_id: &str) -> Option<&PropertyCard> {
        self.cards.get(property_id)
    }

    /// The card the visitor most likely means: the last one expanded, else
    /// the last one shown.
    pub fn focused_card_id(&self) -> Option<&str> {
        let expanded = self.entries.iter().rev().find_map(|e| match &e.kind {
            EntryKind::ExpandedItem { card } => Some(card.id.as_str()),
            _ => None,
        });
        expanded.or_else(|| {
            self.entries.iter().rev().find_map(|e| match &e.kind {
                EntryKind::Property { card, .. } => Some(card.id.as_str()),
                _ => None,
            })
        })
    }

    pub fn apply(&mut self, msg: ServerMessage) {
        self.record(LogRecord::Server(msg));
    }

    pub fn submit(&mut self, text: &str) -> Submission {
        let text = text.trim();
        if text.is_empty() {
            return Submission::Ignored;
        }
        self.record(LogRecord::Submitted(text.to_string()));
        if self.capture_showing() {
            Submission::Held
        } else {
            Submission::Send(text.to_string())
        }
    }

    /// Open a card's detail view. Returns a ticket the first time a known card
    /// is expanded.
    pub fn expand(&mut self, property_id: &str) -> Option<FollowUpTicket> {
        if self.expanded.contains(property_id) || !self.cards.contains_key(property_id) {
            return None;
        }
        self.record(LogRecord::Expanded(property_id.to_string()));
        Some(FollowUpTicket {
            property_id: property_id.to_string(),
        })
    }

    /// Append the follow-up prompt for an expansion. Blank or missing text
    /// falls back to a template.
    pub fn attach_follow_up(&mut self, ticket: FollowUpTicket, prompt: Option<String>) {
        self.record(LogRecord::FollowUp {
            property_id: ticket.property_id,
            prompt,
        });
    }

    /// Close the capture prompt after the lead was stored. Returns the held
    /// message, which the caller now sends.
    pub fn complete_capture(&mut self) -> Option<String> {
        let held = self.held_message()?;
        self.record(LogRecord::CaptureCompleted);
        Some(held)
    }

    /// Close the capture prompt without a lead.
    pub fn dismiss_capture(&mut self) -> Option<String> {
        let held = self.held_message()?;
        self.record(LogRecord::CaptureDismissed);
        Some(held)
    }

    fn held_message(&self) -> Option<String> {
        match &self.capture {
            Capture::Showing { held } => Some(held.clone()),
            _ => None,
        }
    }

    fn record(&mut self, record: LogRecord) {
        let index = self.log.len();
        self.log.push(record.clone());
        self.reduce(index, record);
        self.entries.sort_by_key(|e| e.seq);
    }

    fn reduce(&mut self, index: usize, record: LogRecord) {
        match record {
            LogRecord::Server(msg) => self.reduce_server(index, msg),
            LogRecord::Submitted(text) => {
                if self.should_offer_capture() {
                    let held = text.clone();
                    self.push("capture".to_string(), EntryKind::CapturePrompt { held });
                    self.capture = Capture::Showing { held: text };
                } else if !self.capture_showing() {
                    self.push_message(index, Author::Visitor, text, false);
                }
            }
            LogRecord::Expanded(property_id) => {
                if let Some(card) = self.cards.get(&property_id).cloned() {
                    if self.expanded.insert(property_id.clone()) {
                        let key = format!("expanded-{property_id}");
                        self.push(key, EntryKind::ExpandedItem { card });
                    }
                }
            }
            LogRecord::FollowUp {
                property_id,
                prompt,
            } => {
                if !self.expanded.contains(&property_id) {
                    return;
                }
                if !self.followed_up.insert(property_id.clone()) {
                    return;
                }
                let text = prompt
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .unwrap_or_else(|| self.template_follow_up(&property_id));
                self.push(
                    format!("follow-up-{property_id}"),
                    EntryKind::FollowUpPrompt { property_id, text },
                );
            }
            LogRecord::CaptureCompleted => self.close_capture(index, true),
            LogRecord::CaptureDismissed => self.close_capture(index, false),
        }
    }

    fn reduce_server(&mut self, index: usize, msg: ServerMessage) {
        match msg {
            ServerMessage::SessionStart(start) => self.session_id = Some(start.session_id),
            ServerMessage::Typing(t) => {
                if t.is_typing {
                    self.revealed.clear();
                    self.end_streaming();
                }
                self.typing = t.is_typing;
            }
            ServerMessage::BotResponseChunk(chunk) => match self.streaming_message() {
                Some(text) => {
                    if !text.is_empty() {
                        text.push(' ');
                    }
                    text.push_str(&chunk.content);
                }
                None => {
                    let key = self.push_message(index, Author::Bot, chunk.content, true);
                    self.streaming = Some(key);
                }
            },
            ServerMessage::BotResponse(response) => {
                match self.streaming.take() {
                    Some(key) => {
                        if let Some(EntryKind::Message {
                            text, streaming, ..
                        }) = self.entry_kind_mut(&key)
                        {
                            *text = response.content;
                            *streaming = false;
                        }
                    }
                    None => {
                        self.push_message(index, Author::Bot, response.content, false);
                    }
                }
                if response.stop_typing {
                    self.typing = false;
                }
            }
            ServerMessage::BotProperty(prop) => {
                let id = prop.property.id.clone();
                if self.revealed.insert(id.clone()) {
                    self.cards.insert(id, prop.property.clone());
                    self.push(
                        format!("msg-{index}"),
                        EntryKind::Property {
                            card: prop.property,
                            reasoning: prop.reasoning,
                        },
                    );
                }
                if prop.is_last_property {
                    self.typing = false;
                }
            }
            ServerMessage::Error(err) => {
                self.end_streaming();
                self.typing = false;
                self.push_message(index, Author::Bot, err.message, false);
            }
            ServerMessage::Pong => {}
        }
    }

    fn should_offer_capture(&self) -> bool {
        self.capture == Capture::NotOffered && !self.lead_captured && !self.cards.is_empty()
    }

    fn close_capture(&mut self, index: usize, captured: bool) {
        let Capture::Showing { held } = &self.capture else {
            return;
        };
        let held = held.clone();
        self.capture = Capture::Closed;
        self.entries
            .retain(|e| !matches!(e.kind, EntryKind::CapturePrompt { .. }));
        if captured {
            self.lead_captured = true;
        }
        self.push_message(index, Author::Visitor, held, false);
    }

    fn template_follow_up(&self, property_id: &str) -> String {
        match self.cards.get(property_id) {
            Some(card) => format!(
                "Gostou de \"{}\" em {}? Posso agendar uma visita ou tirar suas dúvidas sobre o imóvel.",
                card.title, card.neighborhood
            ),
            None => "Posso agendar uma visita ou tirar suas dúvidas sobre o imóvel.".to_string(),
        }
    }

    /// Freeze the open bubble as it stands; no more chunks will reach it.
    fn end_streaming(&mut self) {
        let Some(key) = self.streaming.take() else {
            return;
        };
        if let Some(EntryKind::Message { streaming, .. }) = self.entry_kind_mut(&key) {
            *streaming = false;
        }
    }

    fn streaming_message(&mut self) -> Option<&mut String> {
        let key = self.streaming.clone()?;
        match self.entry_kind_mut(&key) {
            Some(EntryKind::Message { text, .. }) => Some(text),
            _ => None,
        }
    }

    fn entry_kind_mut(&mut self, key: &str) -> Option<&mut EntryKind> {
        self.entries
            .iter_mut()
            .find(|e| e.key == key)
            .map(|e| &mut e.kind)
    }

    fn push_message(
        &mut self,
        index: usize,
        author: Author,
        text: String,
        streaming: bool,
    ) -> String {
        let key = format!("msg-{index}");
        self.push(
            key.clone(),
            EntryKind::Message {
                author,
                text,
                streaming,
            },
        );
        key
    }

    fn push(&mut self, key: String, kind: EntryKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(TimelineEntry { key, seq, kind });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casabot_api_types::{BotProperty, BotResponse, BotResponseChunk};

    fn card(id: &str, title: &str) -> PropertyCard {
        PropertyCard {
            id: id.into(),
            title: title.into(),
            neighborhood: "Pinheiros".into(),
            city: "São Paulo".into(),
            price: 720_000,
            bedrooms: 2,
            area_m2: 68.0,
            description: String::new(),
            image_url: None,
        }
    }

    fn chunk(content: &str, index: u32) -> ServerMessage {
        ServerMessage::BotResponseChunk(BotResponseChunk {
            content: content.into(),
            chunk_index: index,
            is_last_chunk: false,
        })
    }

    fn response(content: &str, chunked: bool, stop_typing: bool) -> ServerMessage {
        ServerMessage::BotResponse(BotResponse {
            content: content.into(),
            is_chunked: chunked,
            is_last_chunk: true,
            stop_typing,
        })
    }

    fn property(id: &str, index: u32, last: bool) -> ServerMessage {
        ServerMessage::BotProperty(BotProperty {
            property: card(id, &format!("Casa {id}")),
            property_index: index,
            is_last_property: last,
            reasoning: last.then(|| "perto do metrô".to_string()),
        })
    }

    fn texts(timeline: &Timeline) -> Vec<String> {
        timeline
            .entries()
            .iter()
            .map(|e| match &e.kind {
                EntryKind::Message { text, .. } => text.clone(),
                EntryKind::Property { card, .. } => format!("[{}]", card.id),
                EntryKind::ExpandedItem { card } => format!("<{}>", card.id),
                EntryKind::FollowUpPrompt { text, .. } => format!("?{text}"),
                EntryKind::CapturePrompt { .. } => "{capture}".to_string(),
            })
            .collect()
    }

    /// One chunked reply followed by two cards.
    fn with_cycle(timeline: &mut Timeline) {
        assert_eq!(timeline.submit("quero 2 quartos"), Submission::Send("quero 2 quartos".into()));
        timeline.apply(ServerMessage::typing(true));
        timeline.apply(chunk("Primeira parte.", 0));
        timeline.apply(chunk("Segunda parte.", 1));
        timeline.apply(response("Primeira parte. Segunda parte. Final.", true, false));
        timeline.apply(property("p1", 0, false));
        timeline.apply(property("p2", 1, true));
    }

    #[test]
    fn chunks_merge_into_one_bubble() {
        let mut timeline = Timeline::new();
        timeline.apply(ServerMessage::session_start("s1"));
        timeline.apply(ServerMessage::typing(true));
        timeline.apply(chunk("Olá!", 0));
        match &timeline.entries()[0].kind {
            EntryKind::Message { text, streaming, .. } => {
                assert_eq!(text, "Olá!");
                assert!(*streaming);
            }
            other => panic!("unexpected {other:?}"),
        }
        timeline.apply(chunk("Tudo bem?", 1));
        timeline.apply(response("Olá! Tudo bem? Como posso ajudar?", true, true));

        assert_eq!(timeline.entries().len(), 1);
        assert_eq!(texts(&timeline), vec!["Olá! Tudo bem? Como posso ajudar?"]);
        assert!(!timeline.is_typing());
        assert_eq!(timeline.session_id(), Some("s1"));
    }

    #[test]
    fn typing_stays_on_until_last_card() {
        let mut timeline = Timeline::new();
        timeline.submit("oi");
        timeline.apply(ServerMessage::typing(true));
        timeline.apply(response("Veja:", false, false));
        assert!(timeline.is_typing());
        timeline.apply(property("p1", 0, false));
        assert!(timeline.is_typing());
        timeline.apply(property("p2", 1, true));
        assert!(!timeline.is_typing());
        assert_eq!(texts(&timeline), vec!["oi", "Veja:", "[p1]", "[p2]"]);
    }

    #[test]
    fn duplicate_card_in_cycle_is_ignored() {
        let mut timeline = Timeline::new();
        timeline.apply(ServerMessage::typing(true));
        timeline.apply(response("Veja:", false, false));
        timeline.apply(property("p1", 0, false));
        timeline.apply(property("p1", 0, false));
        timeline.apply(property("p2", 1, true));
        assert_eq!(texts(&timeline), vec!["Veja:", "[p1]", "[p2]"]);
    }

    #[test]
    fn replaying_the_log_is_idempotent() {
        let mut timeline = Timeline::new();
        with_cycle(&mut timeline);
        let ticket = timeline.expand("p1").unwrap();
        timeline.attach_follow_up(ticket, None);
        timeline.submit("Quero visitar a primeira casa");
        timeline.complete_capture();

        let rebuilt = Timeline::from_log(timeline.log());
        assert_eq!(rebuilt.keys(), timeline.keys());
        assert_eq!(rebuilt.entries(), timeline.entries());
        assert_eq!(
            Timeline::from_log(rebuilt.log()).keys(),
            timeline.keys()
        );
    }

    #[test]
    fn sequence_numbers_are_strictly_increasing() {
        let mut timeline = Timeline::new();
        with_cycle(&mut timeline);
        timeline.submit("Quero visitar a primeira casa");
        timeline.complete_capture();
        let seqs: Vec<u64> = timeline.entries().iter().map(|e| e.seq).collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn capture_prompt_holds_message_until_completed() {
        let mut timeline = Timeline::new();
        with_cycle(&mut timeline);

        assert_eq!(timeline.submit("Quero visitar a primeira casa"), Submission::Held);
        assert!(timeline.capture_showing());
        assert_eq!(texts(&timeline).last().unwrap(), "{capture}");
        assert!(!texts(&timeline).contains(&"Quero visitar a primeira casa".to_string()));

        // Further input while the form is open is swallowed.
        assert_eq!(timeline.submit("alô?"), Submission::Held);
        assert!(!texts(&timeline).contains(&"alô?".to_string()));

        assert_eq!(
            timeline.complete_capture(),
            Some("Quero visitar a primeira casa".to_string())
        );
        assert!(!timeline.capture_showing());
        assert!(timeline.lead_captured());
        let all = texts(&timeline);
        assert!(!all.contains(&"{capture}".to_string()));
        assert_eq!(all.last().unwrap(), "Quero visitar a primeira casa");

        // Never offered again.
        assert_eq!(timeline.submit("e a segunda?"), Submission::Send("e a segunda?".into()));
        assert_eq!(timeline.complete_capture(), None);
    }

    #[test]
    fn capture_is_not_offered_before_any_card() {
        let mut timeline = Timeline::new();
        timeline.apply(ServerMessage::typing(true));
        timeline.apply(response("Olá!", false, true));
        assert_eq!(timeline.submit("oi"), Submission::Send("oi".into()));
        assert!(!timeline.capture_showing());
    }

    #[test]
    fn dismissed_capture_is_not_shown_again() {
        let mut timeline = Timeline::new();
        with_cycle(&mut timeline);
        assert_eq!(timeline.submit("quero ver mais"), Submission::Held);
        assert_eq!(timeline.dismiss_capture(), Some("quero ver mais".to_string()));
        assert!(!timeline.lead_captured());
        assert_eq!(timeline.submit("outra"), Submission::Send("outra".into()));
        assert!(!texts(&timeline).contains(&"{capture}".to_string()));
    }

    #[test]
    fn expansion_appends_detail_then_follow_up() {
        let mut timeline = Timeline::new();
        with_cycle(&mut timeline);

        assert_eq!(timeline.expand("ghost"), None);
        let ticket = timeline.expand("p2").unwrap();
        assert_eq!(timeline.expand("p2"), None);
        assert_eq!(texts(&timeline).last().unwrap(), "<p2>");

        timeline.attach_follow_up(ticket.clone(), Some("Quer ver as fotos da varanda?".into()));
        assert_eq!(texts(&timeline).last().unwrap(), "?Quer ver as fotos da varanda?");

        // A second result for the same card is dropped.
        timeline.attach_follow_up(ticket, Some("outra".into()));
        assert_eq!(
            timeline
                .entries()
                .iter()
                .filter(|e| matches!(e.kind, EntryKind::FollowUpPrompt { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn focused_card_prefers_expanded() {
        let mut timeline = Timeline::new();
        assert_eq!(timeline.focused_card_id(), None);
        with_cycle(&mut timeline);
        assert_eq!(timeline.focused_card_id(), Some("p2"));
        timeline.expand("p1");
        assert_eq!(timeline.focused_card_id(), Some("p1"));
    }

    #[test]
    fn failed_follow_up_uses_template() {
        let mut timeline = Timeline::new();
        with_cycle(&mut timeline);
        let ticket = timeline.expand("p1").unwrap();
        timeline.attach_follow_up(ticket, Some("   ".into()));
        match &timeline.entries().last().unwrap().kind {
            EntryKind::FollowUpPrompt { property_id, text } => {
                assert_eq!(property_id, "p1");
                assert!(text.contains("Casa p1"));
                assert!(text.contains("Pinheiros"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn error_event_appends_message_and_clears_typing() {
        let mut timeline = Timeline::new();
        timeline.apply(ServerMessage::typing(true));
        timeline.apply(chunk("Começando", 0));
        timeline.apply(ServerMessage::generic_error());
        assert!(!timeline.is_typing());
        assert_eq!(timeline.entries().len(), 2);
        assert!(streaming_flags(&timeline).iter().all(|s| !s));

        // A new cycle starts a fresh bubble.
        timeline.apply(ServerMessage::typing(true));
        timeline.apply(chunk("Nova resposta", 0));
        assert_eq!(timeline.entries().len(), 3);
        assert_eq!(streaming_flags(&timeline), vec![false, false, true]);
    }

    #[test]
    fn new_cycle_freezes_an_abandoned_bubble() {
        let mut timeline = Timeline::new();
        timeline.apply(ServerMessage::typing(true));
        timeline.apply(chunk("Resposta interrompida", 0));
        // The previous cycle was cancelled before its final text.
        timeline.apply(ServerMessage::typing(true));
        assert_eq!(streaming_flags(&timeline), vec![false]);

        timeline.apply(chunk("Outra", 0));
        assert_eq!(streaming_flags(&timeline), vec![false, true]);
        assert_eq!(timeline.entries().len(), 2);
    }

    fn streaming_flags(timeline: &Timeline) -> Vec<bool> {
        timeline
            .entries()
            .iter()
            .filter_map(|e| match &e.kind {
                EntryKind::Message { streaming, .. } => Some(*streaming),
                _ => None,
            })
            .collect()
    }
}
