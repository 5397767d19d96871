//! Slack delivery of an enriched batch.
//!
//! Exactly one `chat.postMessage` call per run, including for an empty
//! batch. Delivery problems are logged and reported as a
//! [`DeliveryOutcome`]; they never fail the run.

use std::fmt;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use relnotes_shared::{
    CallError, Note, NotifierConfig, RelnotesError, Result, RetryError, RetryPolicy,
    is_transient, resolve_secret, retry_with_backoff,
};

/// What happened to the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DeliveryOutcome {
    Delivered,
    /// Slack answered `ok: false`.
    Rejected { error: String },
    /// Transport fault, permanent status, or retries exhausted.
    Failed { reason: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivered => f.write_str("delivered"),
            Self::Rejected { error } => write!(f, "rejected: {error}"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Sends one message describing a batch.
#[async_trait]
pub trait Notify: Send + Sync {
    async fn notify(&self, label: &str, notes: &[Note]) -> DeliveryOutcome;
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Render the message text for a batch.
///
/// The deep-link fragment is the label with `-` replaced by `_`, which is
/// how the release-notes page anchors its date headings.
pub fn format_message(label: &str, notes: &[Note], link_base: &str) -> String {
    if notes.is_empty() {
        return format!("No new release notes since {label}.");
    }

    let anchor = label.replace('-', "_");
    let mut blocks = Vec::with_capacity(notes.len() + 1);
    blocks.push(format!(
        "*Release notes since {label}* <{link_base}#{anchor}|View on site>"
    ));
    for note in notes {
        blocks.push(format!(
            "*{}* [{}]\n{}",
            note.resource_name,
            note.note_type,
            note.display_text()
        ));
    }
    blocks.join("\n\n")
}

// ---------------------------------------------------------------------------
// Slack client
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SlackReply {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Posts to Slack's `chat.postMessage`.
pub struct Notifier {
    client: Client,
    endpoint: String,
    token: String,
    channel: String,
    link_base: String,
    policy: RetryPolicy,
}

impl Notifier {
    pub fn new(
        config: &NotifierConfig,
        token: impl Into<String>,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(relnotes_extractor::USER_AGENT)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| RelnotesError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token: token.into(),
            channel: config.channel.clone(),
            link_base: config.link_base.trim_end_matches('/').to_string(),
            policy,
        })
    }

    /// Build from config, reading the bot token from its env var.
    pub fn from_config(config: &NotifierConfig, policy: RetryPolicy) -> Result<Self> {
        let token = resolve_secret(&config.token_env)?;
        Self::new(config, token, policy)
    }

    async fn post_once(&self, text: &str) -> std::result::Result<SlackReply, CallError> {
        let response = self
            .client
            .post(format!("{}/chat.postMessage", self.endpoint))
            .bearer_auth(&self.token)
            .json(&PostMessage {
                channel: &self.channel,
                text,
            })
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

        response
            .json()
            .await
            .map_err(|e| CallError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl Notify for Notifier {
    #[instrument(skip_all, fields(channel = %self.channel, notes = notes.len()))]
    async fn notify(&self, label: &str, notes: &[Note]) -> DeliveryOutcome {
        let text = format_message(label, notes, &self.link_base);
        let text = text.as_str();

        let outcome =
            retry_with_backoff(&self.policy, "notify", is_transient, |_| self.post_once(text))
                .await;

        match outcome {
            Ok(SlackReply { ok: true, .. }) => {
                info!("notification delivered");
                DeliveryOutcome::Delivered
            }
            Ok(SlackReply { error: reason, .. }) => {
                let reason = reason.unwrap_or_else(|| "unknown_error".into());
                warn!(error = %reason, "slack rejected notification");
                DeliveryOutcome::Rejected { error: reason }
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                error!(attempts, error = %last, "notification retries exhausted");
                DeliveryOutcome::Failed {
                    reason: format!("max retries reached: {last}"),
                }
            }
            Err(RetryError::Permanent { error: e, .. }) => {
                error!(error = %e, "notification failed");
                DeliveryOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use relnotes_shared::NoteType;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn note(name: &str, kind: NoteType, content: &str) -> Note {
        Note::new(
            NaiveDate::from_ymd_opt(2025, 2, 3).unwrap(),
            name,
            kind,
            "",
            content,
        )
    }

    fn notifier(endpoint: &str) -> Notifier {
        let config = NotifierConfig {
            endpoint: endpoint.to_string(),
            channel: "#test".into(),
            ..NotifierConfig::default()
        };
        Notifier::new(&config, "xoxb-test", RetryPolicy::immediate(3)).unwrap()
    }

    #[test]
    fn empty_batch_message() {
        let text = format_message("2025-02-01", &[], "https://example.com/notes");
        assert_eq!(text, "No new release notes since 2025-02-01.");
    }

    #[test]
    fn batch_message_layout() {
        let notes = vec![
            note("Cloud Run", NoteType::Feature, "Jobs are GA.")
                .with_translation("ジョブが GA になりました。"),
            note("BigQuery", NoteType::Unknown, "Raw text."),
        ];
        let text = format_message("2025-02-01", &notes, "https://example.com/notes");
        assert_eq!(
            text,
            "*Release notes since 2025-02-01* <https://example.com/notes#2025_02_01|View on site>\n\n\
             *Cloud Run* [feature]\nジョブが GA になりました。\n\n\
             *BigQuery* [unknown]\nRaw text."
        );
    }

    #[tokio::test]
    async fn delivers_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .and(header("authorization", "Bearer xoxb-test"))
            .and(body_partial_json(json!({
                "channel": "#test",
                "text": "No new release notes since 2025-02-01."
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "ts": "1.2" })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = notifier(&server.uri()).notify("2025-02-01", &[]).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered);
    }

    #[tokio::test]
    async fn invalid_auth_is_rejected_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "ok": false, "error": "invalid_auth" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let outcome = notifier(&server.uri()).notify("2025-02-01", &[]).await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Rejected {
                error: "invalid_auth".into()
            }
        );
    }

    #[tokio::test]
    async fn rate_limit_is_retried_to_the_bound() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let outcome = notifier(&server.uri()).notify("2025-02-01", &[]).await;
        match outcome {
            DeliveryOutcome::Failed { reason } => assert!(reason.starts_with("max retries reached")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn permanent_status_fails_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = notifier(&server.uri()).notify("2025-02-01", &[]).await;
        assert!(matches!(outcome, DeliveryOutcome::Failed { .. }));
        assert!(!outcome.is_delivered());
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(DeliveryOutcome::Rejected {
            error: "channel_not_found".into(),
        })
        .unwrap();
        assert_eq!(json, json!({ "status": "rejected", "error": "channel_not_found" }));
    }
}
