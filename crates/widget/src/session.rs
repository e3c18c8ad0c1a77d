//! Drives one widget session: feeds server events into the timeline, sends
//! the visitor's input and runs the follow-up and lead-capture side effects.

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use casabot_api_types::{ClientMessage, LeadRequest, LeadResponse, ServerMessage};

use crate::api::WidgetApi;
use crate::follow_up::{FollowUpSource, resolve_follow_up};
use crate::timeline::{Submission, Timeline, TimelineEntry};

#[async_trait]
pub trait LeadSink: Send + Sync {
    async fn submit_lead(&self, req: &LeadRequest) -> Result<LeadResponse>;
}

#[async_trait]
impl LeadSink for WidgetApi {
    async fn submit_lead(&self, req: &LeadRequest) -> Result<LeadResponse> {
        WidgetApi::submit_lead(self, req).await
    }
}

/// Contents of the capture form.
#[derive(Debug, Clone, Default)]
pub struct LeadForm {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
}

pub struct WidgetSession<B> {
    timeline: Arc<Mutex<Timeline>>,
    outbound: mpsc::Sender<ClientMessage>,
    backend: Arc<B>,
}

impl<B> WidgetSession<B>
where
    B: FollowUpSource + LeadSink + 'static,
{
    pub fn new(backend: Arc<B>, outbound: mpsc::Sender<ClientMessage>) -> Self {
        Self {
            timeline: Arc::new(Mutex::new(Timeline::new())),
            outbound,
            backend,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Timeline> {
        self.timeline
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn entries(&self) -> Vec<TimelineEntry> {
        self.lock().entries().to_vec()
    }

    pub fn session_id(&self) -> Option<String> {
        self.lock().session_id().map(str::to_string)
    }

    pub fn is_typing(&self) -> bool {
        self.lock().is_typing()
    }

    pub fn capture_showing(&self) -> bool {
        self.lock().capture_showing()
    }

    pub fn handle_server(&self, msg: ServerMessage) {
        self.lock().apply(msg);
    }

    /// Apply inbound events until the connection closes.
    pub async fn run(&self, mut inbound: mpsc::Receiver<ServerMessage>) {
        while let Some(msg) = inbound.recv().await {
            self.handle_server(msg);
        }
        debug!("inbound stream ended");
    }

    pub async fn send(&self, text: &str) -> Result<Submission> {
        let submission = self.lock().submit(text);
        if let Submission::Send(content) = &submission {
            self.transmit(content.clone()).await?;
        }
        Ok(submission)
    }

    /// Expand a card and schedule its follow-up prompt.
    pub fn expand(&self, property_id: &str) -> Option<JoinHandle<()>> {
        let (ticket, session_id) = {
            let mut timeline = self.lock();
            let ticket = timeline.expand(property_id)?;
            (ticket, timeline.session_id().unwrap_or_default().to_string())
        };
        let timeline = self.timeline.clone();
        let backend = self.backend.clone();
        Some(tokio::spawn(async move {
            let prompt = resolve_follow_up(backend.as_ref(), &session_id, &ticket).await;
            timeline
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .attach_follow_up(ticket, prompt);
        }))
    }

    /// Store the lead, close the capture prompt and release the held message.
    /// On failure the prompt stays open.
    pub async fn submit_lead(&self, form: LeadForm) -> Result<LeadResponse> {
        let (session_id, property_id) = {
            let timeline = self.lock();
            let Some(session_id) = timeline.session_id() else {
                bail!("no session yet");
            };
            (
                session_id.to_string(),
                timeline.focused_card_id().map(str::to_string),
            )
        };

        let resp = self
            .backend
            .submit_lead(&LeadRequest {
                session_id,
                name: form.name,
                phone: form.phone,
                email: form.email,
                property_id,
            })
            .await?;
        info!(lead_id = %resp.id, "lead submitted");

        let released = self.lock().complete_capture();
        if let Some(content) = released {
            self.transmit(content).await?;
        }
        Ok(resp)
    }

    pub async fn dismiss_capture(&self) -> Result<()> {
        let released = self.lock().dismiss_capture();
        if let Some(content) = released {
            self.transmit(content).await?;
        }
        Ok(())
    }

    async fn transmit(&self, content: String) -> Result<()> {
        if self
            .outbound
            .send(ClientMessage::UserMessage { content })
            .await
            .is_err()
        {
            bail!("connection closed");
        }
        Ok(())
    }
}
