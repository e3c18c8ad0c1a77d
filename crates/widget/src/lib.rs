//! Client side of the casabot chat widget.
//!
//! [`timeline`] is the pure reducer that turns the event stream into a
//! renderable transcript; [`session`] wires it to a live connection
//! ([`transport`]) and the REST endpoints ([`api`]).

pub mod api;
pub mod follow_up;
pub mod session;
pub mod timeline;
pub mod transport;

pub use api::WidgetApi;
pub use follow_up::{FOLLOW_UP_DELAY, FollowUpSource, resolve_follow_up};
pub use session::{LeadForm, LeadSink, WidgetSession};
pub use timeline::{
    Author, EntryKind, FollowUpTicket, LogRecord, Submission, Timeline, TimelineEntry,
};
pub use transport::{Connection, connect};
