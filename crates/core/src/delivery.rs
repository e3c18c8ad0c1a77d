//! Turns one reply (chunks plus recommended listings) into a timed plan of
//! events for a single response cycle.
//!
//! Offsets are cumulative from the start of delivery: every chunk waits its
//! own delay after the previous emission, and every card waits a fresh random
//! delay after the text and the cards before it. The plan is built up front so
//! the ordering can be checked without a clock; the server walks it with
//! timers.

use rand::Rng;
use std::time::Duration;

use crate::chunker::Chunk;
use crate::delay::DelayRange;
use crate::listing::Listing;

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryEvent {
    /// Opens (or closes) the typing indicator.
    TypingState {
        typing: bool,
    },
    /// An intermediate fragment of the reply.
    TextChunk {
        content: String,
        index: usize,
    },
    /// The complete reply text. `stop_typing` is false when cards follow.
    TextFinal {
        content: String,
        chunked: bool,
        stop_typing: bool,
    },
    ItemReveal {
        item: Listing,
        index: usize,
        is_last: bool,
        reasoning: Option<String>,
    },
}

impl DeliveryEvent {
    /// Whether this event clears the client's typing indicator.
    pub fn stops_typing(&self) -> bool {
        match self {
            DeliveryEvent::TypingState { typing } => !typing,
            DeliveryEvent::TextChunk { .. } => false,
            DeliveryEvent::TextFinal { stop_typing, .. } => *stop_typing,
            DeliveryEvent::ItemReveal { is_last, .. } => *is_last,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(
            self,
            DeliveryEvent::TextChunk { .. } | DeliveryEvent::TextFinal { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEvent {
    /// Offset from the start of delivery.
    pub offset: Duration,
    pub event: DeliveryEvent,
}

/// The immediate event that opens a cycle, sent before the advisor is asked.
pub fn typing_started() -> ScheduledEvent {
    ScheduledEvent {
        offset: Duration::ZERO,
        event: DeliveryEvent::TypingState { typing: true },
    }
}

/// Build the emission plan for one reply.
///
/// `full_text` is what the final text event carries; `chunks` come from
/// [`crate::chunker::chunk_message`] on the same text. An empty chunk list is
/// treated as one empty final chunk.
pub fn plan_delivery<R: Rng + ?Sized>(
    full_text: &str,
    chunks: &[Chunk],
    items: Vec<Listing>,
    reasoning: Option<String>,
    item_delay: DelayRange,
    rng: &mut R,
) -> Vec<ScheduledEvent> {
    let has_items = !items.is_empty();
    let chunked = chunks.len() > 1;
    let mut plan = Vec::with_capacity(chunks.len() + items.len());
    let mut elapsed = Duration::ZERO;

    let final_event = || DeliveryEvent::TextFinal {
        content: full_text.to_string(),
        chunked,
        stop_typing: !has_items,
    };

    if chunks.is_empty() {
        plan.push(ScheduledEvent {
            offset: elapsed,
            event: final_event(),
        });
    }

    for (index, chunk) in chunks.iter().enumerate() {
        elapsed += chunk.delay;
        let event = if chunk.is_last {
            final_event()
        } else {
            DeliveryEvent::TextChunk {
                content: chunk.content.clone(),
                index,
            }
        };
        plan.push(ScheduledEvent {
            offset: elapsed,
            event,
        });
    }

    let reasoning = reasoning.filter(|r| !r.trim().is_empty());
    let last = items.len().saturating_sub(1);
    for (index, item) in items.into_iter().enumerate() {
        elapsed += item_delay.sample(rng);
        let is_last = index == last;
        plan.push(ScheduledEvent {
            offset: elapsed,
            event: DeliveryEvent::ItemReveal {
                item,
                index,
                is_last,
                reasoning: if is_last { reasoning.clone() } else { None },
            },
        });
    }

    plan
}

/// Total time the plan takes to play out.
pub fn plan_duration(plan: &[ScheduledEvent]) -> Duration {
    plan.last().map(|e| e.offset).unwrap_or_default()
}
