pub mod advisor;
pub mod chunker;
pub mod delay;
pub mod delivery;
pub mod listing;

pub use advisor::{Advice, AdviceError, AdviceRequest, HistoryTurn, Personalization, Role};
pub use chunker::{Chunk, chunk_message, split_message};
pub use delay::DelayRange;
pub use delivery::{DeliveryEvent, ScheduledEvent, plan_delivery, typing_started};
pub use listing::Listing;
