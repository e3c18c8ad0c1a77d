use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;

use casabot_api_types::{
    ConversationResponse, FollowUpRequest, FollowUpResponse, LeadRequest, LeadResponse,
};

use crate::follow_up::FollowUpSource;

/// Typed HTTP client for the widget's REST calls.
#[derive(Clone)]
pub struct WidgetApi {
    client: reqwest::Client,
    base_url: String,
}

impl WidgetApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    /// WebSocket endpoint derived from the HTTP base URL.
    pub fn ws_url(&self) -> String {
        let url = self.url("/ws");
        if let Some(rest) = url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            url
        }
    }

    pub async fn follow_up(&self, req: &FollowUpRequest) -> Result<FollowUpResponse> {
        let resp = self
            .client
            .post(self.url("/follow-up"))
            .json(req)
            .send()
            .await?;
        parse_response(resp).await
    }

    pub async fn submit_lead(&self, req: &LeadRequest) -> Result<LeadResponse> {
        let resp = self.client.post(self.url("/leads")).json(req).send().await?;
        parse_response(resp).await
    }

    pub async fn conversation(&self, session_id: &str) -> Result<ConversationResponse> {
        let resp = self
            .client
            .get(self.url(&format!("/conversations/{session_id}")))
            .send()
            .await?;
        parse_response(resp).await
    }
}

#[async_trait]
impl FollowUpSource for WidgetApi {
    async fn fetch_follow_up(&self, session_id: &str, property_id: &str) -> Result<String> {
        let resp = self
            .follow_up(&FollowUpRequest {
                session_id: session_id.to_string(),
                property_id: property_id.to_string(),
            })
            .await?;
        Ok(resp.prompt)
    }
}

async fn parse_response<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("{status}: {body}");
    }
    Ok(resp.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_follows_scheme() {
        let api = WidgetApi::new("https://casa.example.com/", Duration::from_secs(5)).unwrap();
        assert_eq!(api.base_url(), "https://casa.example.com");
        assert_eq!(api.ws_url(), "wss://casa.example.com/api/ws");

        let api = WidgetApi::new("http://localhost:3000", Duration::from_secs(5)).unwrap();
        assert_eq!(api.ws_url(), "ws://localhost:3000/api/ws");
    }
}
