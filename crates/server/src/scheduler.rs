use casabot_api_types::ServerMessage;
use casabot_core::delivery::ScheduledEvent;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Completed,
    /// The session closed (or the socket writer went away) mid-plan.
    Cancelled,
}

/// Play a delivery plan onto the session's outbound queue, honoring each
/// event's offset from the moment this is called.
pub async fn deliver(
    plan: Vec<ScheduledEvent>,
    outbound: &mpsc::Sender<ServerMessage>,
    mut closed: watch::Receiver<bool>,
) -> DeliveryOutcome {
    let start = Instant::now();

    for scheduled in plan {
        if *closed.borrow() {
            return DeliveryOutcome::Cancelled;
        }

        tokio::select! {
            _ = tokio::time::sleep_until(start + scheduled.offset) => {}
            _ = closed.changed() => {
                debug!("session closed during delivery");
                return DeliveryOutcome::Cancelled;
            }
            _ = outbound.closed() => return DeliveryOutcome::Cancelled,
        }

        if outbound.send(scheduled.event.into()).await.is_err() {
            return DeliveryOutcome::Cancelled;
        }
    }

    DeliveryOutcome::Completed
}
