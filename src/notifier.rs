// =============================================================================
// Telegram Notifier — Bot API sendMessage with bounded 429 retry
// =============================================================================
//
// Only rate-limit responses are retried; every other failure is reported to
// the caller as `Error::Notification` immediately.  The bot token is part of
// the request path and is never logged.
// =============================================================================

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{TelegramCredentials, TelegramSettings};
use crate::error::{Error, Result};

const BASE_URL: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Telegram rejects messages longer than this many characters.
const MAX_MESSAGE_CHARS: usize = 4096;

/// Upper bound on any single back-off sleep.
const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(60);

/// What a single sendMessage attempt amounted to.
#[derive(Debug, Clone, PartialEq)]
enum Delivery {
    Sent,
    /// Rate limited; Telegram's suggested wait in seconds, if it gave one.
    RetryAfter(Option<u64>),
    Failed(String),
}

fn classify_response(status: StatusCode, body: &serde_json::Value) -> Delivery {
    if body["ok"].as_bool() == Some(true) {
        return Delivery::Sent;
    }

    let code = body["error_code"].as_i64().unwrap_or(i64::from(status.as_u16()));
    if code == 429 || status == StatusCode::TOO_MANY_REQUESTS {
        return Delivery::RetryAfter(body["parameters"]["retry_after"].as_u64());
    }

    let description = body["description"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {status}"));
    Delivery::Failed(format!("{code}: {description}"))
}

fn preview(text: &str) -> String {
    text.chars().take(100).collect()
}

/// Clip to Telegram's length limit.  Markdown spans never cross a line, so
/// the cut lands on the last line break that fits; a single oversized line
/// falls back to a character cut.
fn clip_message(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(MAX_MESSAGE_CHARS - 2).collect();
    match head.rfind('\n') {
        Some(idx) => format!("{}\n…", &head[..idx]),
        None => {
            let mut clipped: String = text.chars().take(MAX_MESSAGE_CHARS - 1).collect();
            clipped.push('…');
            clipped
        }
    }
}

pub struct TelegramNotifier {
    bot_token: String,
    chat_id: String,
    parse_mode: String,
    max_retries: u32,
    max_wait: Duration,
    base_url: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(credentials: &TelegramCredentials, settings: &TelegramSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Notification(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            bot_token: credentials.bot_token.clone(),
            chat_id: credentials.chat_id.clone(),
            parse_mode: settings.parse_mode.clone(),
            max_retries: settings.max_retries,
            max_wait: DEFAULT_MAX_WAIT,
            base_url: BASE_URL.to_string(),
            client,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Cap every back-off sleep at `max_wait`.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    fn backoff(&self, attempt: u32, retry_after: Option<u64>) -> Duration {
        let wait = match retry_after {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => Duration::from_secs(1u64 << attempt.min(6)),
        };
        wait.min(self.max_wait)
    }

    /// Deliver `text` to the configured chat.
    #[instrument(skip(self, text), name = "telegram::send")]
    pub async fn send(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);
        let payload = json!({
            "chat_id": self.chat_id,
            "text": clip_message(text),
            "parse_mode": self.parse_mode,
        });

        let mut attempt = 0;
        loop {
            let resp = self
                .client
                .post(&url)
                .json(&payload)
                .send()
                .await
                // Drop the URL from the error: it contains the bot token.
                .map_err(|e| Error::Notification(e.without_url().to_string()))?;

            let status = resp.status();
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            debug!(%status, attempt, "telegram API responded");

            match classify_response(status, &body) {
                Delivery::Sent => {
                    info!(preview = %preview(text), "message sent to Telegram");
                    return Ok(());
                }
                Delivery::RetryAfter(retry_after) if attempt < self.max_retries => {
                    let wait = self.backoff(attempt, retry_after);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        wait_secs = wait.as_secs_f64(),
                        "Telegram rate limit hit, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Delivery::RetryAfter(_) => {
                    error!(attempts = attempt + 1, "Telegram rate limit persisted, giving up");
                    return Err(Error::Notification(format!(
                        "rate limited after {} attempts",
                        attempt + 1
                    )));
                }
                Delivery::Failed(reason) => {
                    error!(%reason, preview = %preview(text), "Telegram API rejected message");
                    return Err(Error::Notification(reason));
                }
            }
        }
    }
}

impl std::fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("bot_token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}
