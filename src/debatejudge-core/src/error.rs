//! Error types for the debate system.

use thiserror::Error;

use crate::session::SessionStatus;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DebateError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cannot {operation} a session that is {from}")]
    InvalidTransition {
        operation: &'static str,
        from: SessionStatus,
    },

    #[error("Round limit exceeded: the debate only has {total_rounds} rounds")]
    RoundLimitExceeded { total_rounds: u32 },

    #[error("Unknown provider: '{0}'")]
    UnknownProvider(String),

    #[error("Provider '{provider}' does not support parameter '{parameter}'")]
    UnsupportedCapability { provider: String, parameter: String },

    #[error("Request too large for '{provider}': {requested} tokens requested, limit is {limit}")]
    ContextTooLarge {
        provider: String,
        requested: u64,
        limit: u64,
    },

    #[error("Provider '{provider}' failed{}: {message}", status_suffix(.status))]
    ProviderError {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Judge '{judge}' returned an unusable verdict: {reason}")]
    MalformedVerdict { judge: String, reason: String },

    #[error("Unknown character: '{0}'")]
    CharacterNotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" with status {s}")).unwrap_or_default()
}

impl DebateError {
    /// Build a provider failure without an upstream status code.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        DebateError::ProviderError {
            provider: provider.into(),
            status: None,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_display_with_status() {
        let err = DebateError::ProviderError {
            provider: "deepseek".to_string(),
            status: Some(429),
            message: "rate limited".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Provider 'deepseek' failed with status 429: rate limited"
        );
    }

    #[test]
    fn test_provider_error_display_without_status() {
        let err = DebateError::provider("ollama", "connection refused");
        assert_eq!(err.to_string(), "Provider 'ollama' failed: connection refused");
    }

    #[test]
    fn test_unknown_provider_names_key() {
        let err = DebateError::UnknownProvider("unknown".to_string());
        assert!(err.to_string().contains("'unknown'"));
    }
}
