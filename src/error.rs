// =============================================================================
// Error taxonomy shared by the fetchers, the notifier and the scheduler
// =============================================================================
//
// The aggregator and the report formatter are infallible; everything that
// touches the network returns `error::Result`.
// =============================================================================

use thiserror::Error;

use crate::types::Exchange;

#[derive(Debug, Error)]
pub enum Error {
    /// Network unreachable, timeout, or a 5xx from the remote side.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// Missing or rejected credentials.
    #[error("{exchange} authentication failed: {reason}")]
    Auth { exchange: Exchange, reason: String },

    /// Malformed payload or missing position fields.
    #[error("malformed {context}: {reason}")]
    Data { context: String, reason: String },

    /// Any other API-level rejection (non-auth error codes).
    #[error("{exchange} API error {code}: {message}")]
    Exchange {
        exchange: Exchange,
        code: String,
        message: String,
    },

    /// Telegram delivery failed, possibly after retries.
    #[error("notification failed: {0}")]
    Notification(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn data(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Data {
            context: context.into(),
            reason: reason.into(),
        }
    }

    pub fn auth(exchange: Exchange, reason: impl Into<String>) -> Self {
        Self::Auth {
            exchange,
            reason: reason.into(),
        }
    }

    /// True for failures that a later attempt could plausibly fix.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::data("response body", e.to_string())
        } else {
            Self::Connectivity(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_error_names_the_exchange() {
        let e = Error::auth(Exchange::Bitget, "missing passphrase");
        assert_eq!(e.to_string(), "bitget authentication failed: missing passphrase");
    }

    #[test]
    fn only_connectivity_is_transient() {
        assert!(Error::Connectivity("timeout".into()).is_transient());
        assert!(!Error::data("positions", "not an array").is_transient());
        assert!(!Error::Notification("chat not found".into()).is_transient());
    }
}
