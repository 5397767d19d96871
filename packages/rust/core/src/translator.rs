//! Localized summaries via an OpenAI-compatible chat-completions API.
//!
//! [`Translate::translate`] is total: it always returns a string. Failures
//! come back as one of the sentinel constants below instead of an error, so
//! one bad note never takes the batch down with it.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use relnotes_shared::{
    CallError, RelnotesError, Result, RetryError, RetryPolicy, TranslatorConfig, is_transient,
    resolve_secret, retry_with_backoff,
};

/// Empty or whitespace-only description; no upstream call is made.
pub const INVALID_INPUT: &str = "invalid input";
/// Upstream answered but carried no usable text.
pub const NO_RESPONSE: &str = "no response from service";
/// Transport error, non-transient status, or undecodable body.
pub const CALL_FAILED: &str = "call failed";
/// Every attempt hit a transient status.
pub const MAX_RETRIES_REACHED: &str = "max retries reached";
/// The whole translation, retries included, overran its time budget.
pub const TIMED_OUT: &str = "request timed out";

/// Longest description sent upstream, in characters.
const MAX_INPUT_CHARS: usize = 8_000;

/// Produces a localized summary of a release-note body.
#[async_trait]
pub trait Translate: Send + Sync {
    async fn translate(&self, description: &str) -> String;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// Translator
// ---------------------------------------------------------------------------

/// Chat-completions backed translator.
pub struct Translator {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    language: String,
    policy: RetryPolicy,
}

impl Translator {
    pub fn new(
        config: &TranslatorConfig,
        api_key: impl Into<String>,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(relnotes_extractor::USER_AGENT)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RelnotesError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: config.model.clone(),
            language: config.language.clone(),
            policy,
        })
    }

    /// Build from config, reading the API key from its env var.
    pub fn from_config(config: &TranslatorConfig, policy: RetryPolicy) -> Result<Self> {
        let key = resolve_secret(&config.api_key_env)?;
        Self::new(config, key, policy)
    }

    /// Prompt sent for one description.
    pub fn prompt(&self, description: &str) -> String {
        format!(
            "Translate the following cloud release note into {lang} and summarize it \
             in at most three short lines. Keep product names, API names and version \
             numbers as written. Reply with the summary only.\n\n{body}",
            lang = self.language,
            body = truncate_chars(description.trim(), MAX_INPUT_CHARS),
        )
    }

    async fn call_once(&self, prompt: &str) -> std::result::Result<Option<String>, CallError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| CallError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CallError::Malformed(e.to_string()))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty()))
    }
}

#[async_trait]
impl Translate for Translator {
    #[instrument(skip_all, fields(model = %self.model, chars = char_len(description)))]
    async fn translate(&self, description: &str) -> String {
        if description.trim().is_empty() {
            debug!("empty description, skipping upstream call");
            return INVALID_INPUT.to_string();
        }

        let prompt = self.prompt(description);
        let prompt = prompt.as_str();
        let outcome =
            retry_with_backoff(&self.policy, "translate", is_transient, |_| self.call_once(prompt))
                .await;

        match outcome {
            Ok(Some(text)) => text,
            Ok(None) => {
                warn!("translation response carried no content");
                NO_RESPONSE.to_string()
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                warn!(attempts, error = %last, "translation retries exhausted");
                MAX_RETRIES_REACHED.to_string()
            }
            Err(RetryError::Permanent { error, .. }) => {
                warn!(%error, "translation call failed");
                CALL_FAILED.to_string()
            }
        }
    }
}

/// Length in characters, which is what [`MAX_INPUT_CHARS`] and the span field count.
fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Truncate to at most `max_chars` characters, on a char boundary.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
