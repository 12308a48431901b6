//! NLU over an OpenAI-compatible `/chat/completions` API.
//!
//! Every call asks for a JSON object (`response_format = json_object`) and
//! parses the first choice's content.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{check_http_response, Nlu, NluError};
use crate::conversation::intent::{Intent, ALL_INTENTS};
use crate::conversation::replies;
use crate::conversation::state::{is_filled, Entities};

const INTENT_SYSTEM_PROMPT: &str = "You classify WhatsApp messages (Brazilian Portuguese) \
sent to a small-business assistant. Answer with a JSON object {\"intent\": \"<label>\"} \
using exactly one of these labels: ";

const ENTITY_SYSTEM_PROMPT: &str = "You extract structured fields from a WhatsApp message \
(Brazilian Portuguese). Answer with a JSON object whose keys are the requested field names \
and whose values are strings copied from the message. Omit any field that is not present. \
Do not invent values.";

const CONFIRM_SYSTEM_PROMPT: &str = "You write short WhatsApp confirmation prompts in \
Brazilian Portuguese. Summarise the action and every field on its own line, then ask the \
user to answer \"sim\" or \"não\". Answer with a JSON object {\"text\": \"<prompt>\"}.";

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// Chat completions request body.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<ChatMessage>,
    /// Forces a JSON object answer.
    pub response_format: ResponseFormat,
    /// Sampling temperature.
    pub temperature: f32,
}

/// A message in chat format.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct ChatMessage {
    /// `system` or `user`.
    pub role: &'static str,
    /// Message text.
    pub content: String,
}

/// `response_format` request field.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct ResponseFormat {
    /// Always `json_object`.
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// Request / Response builders (pub for integration testing)
// ---------------------------------------------------------------------------

/// Build a JSON-mode request with a system and a user message.
#[doc(hidden)]
pub fn build_request(model: &str, system: String, user: String) -> ChatRequest {
    ChatRequest {
        model: model.to_owned(),
        messages: vec![
            ChatMessage {
                role: "system",
                content: system,
            },
            ChatMessage {
                role: "user",
                content: user,
            },
        ],
        response_format: ResponseFormat { kind: "json_object" },
        temperature: 0.0,
    }
}

/// Extract the JSON object from the first choice of a response body.
///
/// # Errors
///
/// Returns `NluError::Parse` if the body, the choice, or its content is
/// not the expected shape.
#[doc(hidden)]
pub fn parse_json_content(body: &str) -> Result<serde_json::Map<String, Value>, NluError> {
    let resp: ChatResponse = serde_json::from_str(body).map_err(|e| NluError::Parse(e.to_string()))?;
    let content = resp
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| NluError::Parse("missing choices[0].message.content".to_owned()))?;
    match serde_json::from_str::<Value>(content.trim()) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(NluError::Parse(format!("expected JSON object, got {other}"))),
        Err(e) => Err(NluError::Parse(e.to_string())),
    }
}

/// Intent label from a parsed `{"intent": ...}` object.
#[doc(hidden)]
pub fn intent_from_object(object: &serde_json::Map<String, Value>) -> Intent {
    object
        .get("intent")
        .and_then(Value::as_str)
        .map_or(Intent::Unknown, Intent::from_label)
}

/// Keep only requested, filled fields.
#[doc(hidden)]
pub fn entities_from_object(object: serde_json::Map<String, Value>, fields: &[&str]) -> Entities {
    object
        .into_iter()
        .filter(|(key, value)| fields.contains(&key.as_str()) && is_filled(value))
        .collect()
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// LLM-backed [`Nlu`].
#[derive(Debug, Clone)]
pub struct OpenAiNlu {
    endpoint: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiNlu {
    /// Create a backend. `base_url` is the API root, e.g. `https://api.openai.com/v1`.
    pub fn new(base_url: &str, model: &str, api_key: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build NLU HTTP client with timeout, using default");
                reqwest::Client::default()
            });
        Self {
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_owned(),
            api_key,
            client,
        }
    }

    async fn complete_json(
        &self,
        system: String,
        user: String,
    ) -> Result<serde_json::Map<String, Value>, NluError> {
        let request = build_request(&self.model, system, user);
        let response = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;
        let payload = check_http_response(response).await?;
        parse_json_content(&payload)
    }
}

#[async_trait]
impl Nlu for OpenAiNlu {
    async fn detect_intent(&self, text: &str) -> Result<Intent, NluError> {
        let labels: Vec<&str> = ALL_INTENTS.iter().map(Intent::as_str).collect();
        let system = format!("{INTENT_SYSTEM_PROMPT}{}.", labels.join(", "));
        let object = self.complete_json(system, text.to_owned()).await?;
        let intent = intent_from_object(&object);
        debug!(%intent, "intent detected by model");
        Ok(intent)
    }

    async fn extract_entities(&self, text: &str, fields: &[&str]) -> Result<Entities, NluError> {
        let user = format!("Fields: {}\nMessage: {text}", fields.join(", "));
        let object = self.complete_json(ENTITY_SYSTEM_PROMPT.to_owned(), user).await?;
        Ok(entities_from_object(object, fields))
    }

    async fn generate_confirmation_text(
        &self,
        intent: Intent,
        entities: &Entities,
    ) -> Result<String, NluError> {
        let fields = serde_json::to_string(entities).map_err(|e| NluError::Parse(e.to_string()))?;
        let user = format!("Action: {intent}\nFields: {fields}");
        let object = self.complete_json(CONFIRM_SYSTEM_PROMPT.to_owned(), user).await?;
        let text = object
            .get("text")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| NluError::Parse("missing \"text\" in confirmation".to_owned()))?;
        if text.contains(replies::CONFIRM_QUESTION) || text.to_lowercase().contains("sim") {
            Ok(text.to_owned())
        } else {
            Ok(format!("{text}\n\n{}", replies::CONFIRM_QUESTION))
        }
    }
}
