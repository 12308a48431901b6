//! Natural-language understanding boundary.
//!
//! Defines the [`Nlu`] trait consumed by the conversation engine and two
//! backends:
//! - [`rules::RulesNlu`]: deterministic keyword and regex matching, offline
//! - [`openai::OpenAiNlu`]: an OpenAI-compatible `/chat/completions` model
//!
//! Contract shared by both: unrecognised text maps to [`Intent::Unknown`]
//! rather than an error, and fields that cannot be extracted are simply
//! absent from the returned map.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;

use crate::config::{NluConfig, NluProviderKind};
use crate::conversation::intent::Intent;
use crate::conversation::state::Entities;

pub mod openai;
pub mod rules;

/// Errors from an NLU backend.
#[derive(Debug, thiserror::Error)]
pub enum NluError {
    /// HTTP transport failure.
    #[error("NLU request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream responded with an error status.
    #[error("NLU returned non-success status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Sanitised response body.
        body: String,
    },

    /// Response did not match the expected schema.
    #[error("NLU response parse error: {0}")]
    Parse(String),

    /// The call exceeded its time budget.
    #[error("NLU call timed out after {0} seconds")]
    Timeout(u64),
}

/// Intent classification and field extraction.
#[async_trait]
pub trait Nlu: Send + Sync {
    /// Classify free text into one intent.
    ///
    /// # Errors
    ///
    /// Only transport or protocol failures; unrecognised text is
    /// [`Intent::Unknown`].
    async fn detect_intent(&self, text: &str) -> Result<Intent, NluError>;

    /// Extract the requested fields. Missing fields are absent from the map.
    ///
    /// # Errors
    ///
    /// Only transport or protocol failures.
    async fn extract_entities(&self, text: &str, fields: &[&str]) -> Result<Entities, NluError>;

    /// Human-readable confirmation prompt summarising the entities.
    ///
    /// # Errors
    ///
    /// Only transport or protocol failures.
    async fn generate_confirmation_text(
        &self,
        intent: Intent,
        entities: &Entities,
    ) -> Result<String, NluError>;
}

/// Build the configured backend.
///
/// # Errors
///
/// Returns an error if the OpenAI backend is selected and its API key
/// environment variable is unset.
pub fn build_nlu(config: &NluConfig) -> anyhow::Result<Arc<dyn Nlu>> {
    match config.provider {
        NluProviderKind::Rules => Ok(Arc::new(rules::RulesNlu::new())),
        NluProviderKind::OpenAi => {
            let api_key = std::env::var(&config.api_key_env)
                .with_context(|| format!("{} is not set", config.api_key_env))?;
            Ok(Arc::new(openai::OpenAiNlu::new(
                &config.base_url,
                &config.model,
                api_key,
                config.timeout(),
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

/// Maximum characters of an upstream error body kept in [`NluError::HttpStatus`].
const MAX_ERROR_BODY_CHARS: usize = 256;

/// Check HTTP response status and return body text or a structured error.
///
/// # Errors
///
/// Returns `NluError::Http` on transport failure, `NluError::HttpStatus` on non-2xx.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, NluError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(NluError::HttpStatus {
            status: status.as_u16(),
            body: sanitize_http_error_body(&body),
        });
    }
    Ok(body)
}

/// Collapse whitespace, redact key-like tokens, and truncate.
pub fn sanitize_http_error_body(raw: &str) -> String {
    let mut sanitized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    for pattern in [r"sk-[A-Za-z0-9_\-]{20,}", r"Bearer [A-Za-z0-9._\-]{10,}"] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized.chars().take(MAX_ERROR_BODY_CHARS).collect::<String>();
        return format!("{shortened}...[truncated]");
    }
    sanitized
}
