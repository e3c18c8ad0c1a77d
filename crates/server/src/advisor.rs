use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use casabot_core::advisor::{Advice, AdviceRequest, HistoryTurn, Role, parse_advice};
use casabot_core::listing::Listing;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LlmSettings;

/// Upstream language model, as seen by the response cycle and the follow-up
/// endpoint.
#[async_trait]
pub trait Advisor: Send + Sync {
    async fn advise(&self, request: &AdviceRequest) -> Result<Advice>;

    /// One short question inviting the visitor to go deeper on `listing`.
    async fn follow_up(&self, listing: &Listing, history: &[HistoryTurn]) -> Result<String>;
}

const ADVISE_INSTRUCTIONS: &str = "Você é um corretor de imóveis simpático conversando \
     em português com um visitante do site. Recomende no máximo 3 imóveis dentre os \
     candidatos fornecidos, nunca repita imóveis já mostrados e responda apenas com um \
     objeto JSON: {\"reasoning\": string, \"propertyIds\": string[], \"responseMessage\": string}.";

const FOLLOW_UP_INSTRUCTIONS: &str = "Você é um corretor de imóveis. Escreva uma única \
     pergunta curta, em português, convidando o visitante a contar mais sobre o interesse \
     dele no imóvel descrito. Responda só com a pergunta.";

/// OpenAI-compatible `/chat/completions` client.
pub struct HttpAdvisor {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

impl HttpAdvisor {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        if settings.api_key.is_empty() {
            tracing::warn!("CASABOT_LLM_API_KEY not set; every reply will use the fallback message");
        }
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
        })
    }

    async fn complete(&self, messages: Vec<ChatMessage>, json: bool) -> Result<String> {
        if self.api_key.is_empty() {
            bail!("no API key configured");
        }
        let body = ChatRequest {
            model: &self.model,
            messages,
            response_format: json.then_some(ResponseFormat {
                kind: "json_object",
            }),
            temperature: 0.7,
        };
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("calling chat completions")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("{status}: {text}");
        }
        let parsed: ChatResponse = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("completion has no choices")
    }
}

#[async_trait]
impl Advisor for HttpAdvisor {
    async fn advise(&self, request: &AdviceRequest) -> Result<Advice> {
        let raw = self.complete(advise_messages(request), true).await?;
        Ok(parse_advice(&raw)?)
    }

    async fn follow_up(&self, listing: &Listing, history: &[HistoryTurn]) -> Result<String> {
        let mut messages = vec![ChatMessage::new("system", FOLLOW_UP_INSTRUCTIONS)];
        messages.extend(history_messages(history));
        messages.push(ChatMessage::new(
            "user",
            format!("Imóvel: {}", serde_json::to_string(listing)?),
        ));
        let prompt = self.complete(messages, false).await?;
        let prompt = prompt.trim();
        if prompt.is_empty() {
            bail!("empty follow-up prompt");
        }
        Ok(prompt.to_string())
    }
}

fn history_messages(history: &[HistoryTurn]) -> impl Iterator<Item = ChatMessage> + '_ {
    history
        .iter()
        .map(|turn| ChatMessage::new(turn.role.as_str(), turn.content.clone()))
}

fn advise_messages(request: &AdviceRequest) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::new("system", ADVISE_INSTRUCTIONS)];
    messages.extend(history_messages(&request.history));

    let context = serde_json::json!({
        "candidates": request.candidates,
        "alreadyShown": request.excluded_ids,
        "returningVisitor": request.personalization.returning_visitor,
        "leadCaptured": request.personalization.lead_captured,
    });
    messages.push(ChatMessage::new(
        Role::User.as_str(),
        format!("{}\n\nContexto: {context}", request.user_text),
    ));
    messages
}
