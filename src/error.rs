use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single remote call, before retry classification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("rate limited by remote service")]
    RateLimited,
    #[error("remote service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
}

impl TransportError {
    /// Timeouts and explicit rate-limit responses are worth another attempt;
    /// everything else fails the call immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Timeout | TransportError::RateLimited)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return TransportError::Timeout;
        }
        if let Some(status) = e.status() {
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return TransportError::RateLimited;
            }
            return TransportError::Status {
                status: status.as_u16(),
                body: String::new(),
            };
        }
        TransportError::Network(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("failed to parse remote response: {0}")]
    Parse(String),
    #[error("failed to publish message: {0}")]
    Publish(String),
    #[error("PubMed API error: {message}")]
    Api {
        message: String,
        #[source]
        source: Option<TransportError>,
    },
}

impl Error {
    pub(crate) fn api(message: impl Into<String>) -> Self {
        Error::Api {
            message: message.into(),
            source: None,
        }
    }

    /// Text safe to show an end user. Remote payload details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Error::Api { .. } | Error::Parse(_) => {
                "Unable to complete the search right now. Please try again later.".to_string()
            }
            Error::Validation(msg) => format!("Invalid search request: {}", msg),
            Error::Config(_) => "The search service is not configured.".to_string(),
            Error::Publish(_) => "Unable to post the reply.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_timeouts_and_rate_limits_are_transient() {
        assert!(TransportError::Timeout.is_transient());
        assert!(TransportError::RateLimited.is_transient());
        assert!(!TransportError::Network("dns failure".into()).is_transient());
        assert!(!TransportError::Status {
            status: 500,
            body: "boom".into()
        }
        .is_transient());
    }

    #[test]
    fn user_message_hides_remote_details() {
        let err = Error::Api {
            message: "esearch said: internal token xyz".into(),
            source: Some(TransportError::Timeout),
        };
        let msg = err.user_message();
        assert!(msg.contains("Unable to complete the search"));
        assert!(!msg.contains("xyz"));

        let parse = Error::Parse("expected value at line 1".into());
        assert_eq!(parse.user_message(), msg);
    }
}
