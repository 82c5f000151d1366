//! Failure taxonomy for calls to the hosted model.
//!
//! The upstream API reports failures as free text with no stable codes, so
//! [`classify_message`] is a best-effort substring heuristic. It is the only
//! place that inspects message text for retry decisions.

use regex::RegexSet;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Quota, rate limiting or temporary unavailability. Worth trying another key.
    Transient,
    /// Request was rejected for reasons another key will not fix.
    Terminal,
    /// The key itself was refused.
    AuthInvalid,
    Unknown,
}

#[derive(Error, Debug)]
pub enum AiError {
    #[error("Gemini API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid model response: {0}")]
    InvalidResponse(String),

    #[error("Todas las {keys} claves de API se han agotado. Último error: {last}. Intenta de nuevo en unos minutos.")]
    KeysExhausted { keys: usize, last: String },
}

impl AiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            // An exhausted pool has already tried every key.
            AiError::InvalidInput(_)
            | AiError::InvalidResponse(_)
            | AiError::KeysExhausted { .. } => ErrorKind::Terminal,
            AiError::Api { .. } | AiError::Http(_) => classify_message(&self.to_string()),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

const TRANSIENT_MARKERS: &[&str] = &[
    "429",
    "503",
    "quota",
    "rate limit",
    "rate_limit",
    "high demand",
    "resource exhausted",
    "resource_exhausted",
    "unavailable",
];

const AUTH_MARKERS: &[&str] = &[
    "api key not valid",
    "api_key_invalid",
    "invalid api key",
];

const TERMINAL_MARKERS: &[&str] = &[
    "400",
    "invalid_argument",
    "invalid argument",
    "failed_precondition",
    "permission_denied",
    "404",
];

fn marker_set(markers: &[&str]) -> RegexSet {
    let patterns = markers
        .iter()
        .map(|m| format!("(?i){}", regex::escape(m)));
    RegexSet::new(patterns).unwrap_or_else(|_| RegexSet::empty())
}

fn transient_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| marker_set(TRANSIENT_MARKERS))
}

fn auth_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| marker_set(AUTH_MARKERS))
}

fn terminal_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| marker_set(TERMINAL_MARKERS))
}

/// Case-insensitive substring classification of an upstream error message.
///
/// Auth markers win over the generic `400` terminal marker because an invalid
/// key is reported as a 400 with `API_KEY_INVALID`.
pub fn classify_message(message: &str) -> ErrorKind {
    if transient_set().is_match(message) {
        ErrorKind::Transient
    } else if auth_set().is_match(message) {
        ErrorKind::AuthInvalid
    } else if terminal_set().is_match(message) {
        ErrorKind::Terminal
    } else {
        ErrorKind::Unknown
    }
}

/// First `max` characters of `message`, on a char boundary.
pub fn excerpt(message: &str, max: usize) -> &str {
    match message.char_indices().nth(max) {
        Some((idx, _)) => &message[..idx],
        None => message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_and_rate_messages_are_transient() {
        for msg in [
            "[429 Too Many Requests] You exceeded your current quota",
            "Quota exceeded for metric generate_content",
            "The model is overloaded. HIGH DEMAND right now",
            "RESOURCE_EXHAUSTED",
            "Service Unavailable",
            "got status 503",
            "Rate limit reached",
        ] {
            assert_eq!(classify_message(msg), ErrorKind::Transient, "{msg}");
        }
    }

    #[test]
    fn generate_is_not_mistaken_for_rate() {
        assert_eq!(
            classify_message("failed to generate content: malformed schema"),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn invalid_key_is_auth() {
        let err = AiError::Api {
            status: 400,
            message: "API key not valid. Please pass a valid API key.".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::AuthInvalid);
        assert!(!err.is_retryable());
    }

    #[test]
    fn bad_request_is_terminal() {
        let err = AiError::Api {
            status: 400,
            message: "[INVALID_ARGUMENT] Request contains an invalid argument.".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Terminal);
    }

    #[test]
    fn status_code_alone_drives_classification() {
        let err = AiError::Api {
            status: 429,
            message: "slow down".to_string(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn local_failures_never_retry() {
        assert!(!AiError::InvalidResponse("no candidates".to_string()).is_retryable());
        assert!(!AiError::InvalidInput("not a data uri".to_string()).is_retryable());
    }

    #[test]
    fn exhausted_pool_is_not_retryable() {
        let err = AiError::KeysExhausted {
            keys: 3,
            last: "[429] [RESOURCE_EXHAUSTED] quota exceeded".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Terminal);
        assert!(!err.is_retryable());
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("Último error", 3), "Últ");
        assert_eq!(excerpt("abc", 10), "abc");
    }
}
