use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::timeline::FollowUpTicket;

/// Pause between expanding a card and asking for its follow-up prompt.
pub const FOLLOW_UP_DELAY: Duration = Duration::from_secs(1);

#[async_trait]
pub trait FollowUpSource: Send + Sync {
    async fn fetch_follow_up(&self, session_id: &str, property_id: &str) -> anyhow::Result<String>;
}

/// Wait [`FOLLOW_UP_DELAY`], then fetch the prompt for `ticket`.
///
/// Failures and blank prompts come back as `None`; the timeline substitutes
/// its template.
pub async fn resolve_follow_up(
    source: &dyn FollowUpSource,
    session_id: &str,
    ticket: &FollowUpTicket,
) -> Option<String> {
    tokio::time::sleep(FOLLOW_UP_DELAY).await;
    match source.fetch_follow_up(session_id, &ticket.property_id).await {
        Ok(prompt) if !prompt.trim().is_empty() => Some(prompt),
        Ok(_) => None,
        Err(e) => {
            debug!(property_id = %ticket.property_id, "follow-up fetch failed: {e:#}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    struct Fixed(Option<&'static str>);

    #[async_trait]
    impl FollowUpSource for Fixed {
        async fn fetch_follow_up(&self, _: &str, _: &str) -> anyhow::Result<String> {
            self.0
                .map(str::to_string)
                .ok_or_else(|| anyhow::anyhow!("502 Bad Gateway"))
        }
    }

    fn ticket() -> FollowUpTicket {
        FollowUpTicket {
            property_id: "p1".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn waits_one_second_before_fetching() {
        let start = Instant::now();
        let prompt = resolve_follow_up(&Fixed(Some("Quer agendar?")), "s1", &ticket()).await;
        assert_eq!(prompt.as_deref(), Some("Quer agendar?"));
        assert_eq!(start.elapsed(), FOLLOW_UP_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_and_blank_prompts_are_none() {
        assert_eq!(resolve_follow_up(&Fixed(None), "s1", &ticket()).await, None);
        assert_eq!(resolve_follow_up(&Fixed(Some("  ")), "s1", &ticket()).await, None);
    }
}
