use thiserror::Error;

/// Errors that can occur in the firewall
#[derive(Error, Debug)]
pub enum FirewallError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Reputation provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    #[error("DNS error: {0}")]
    Dns(String),

    #[error("Invalid URI: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),
}

impl FirewallError {
    pub(crate) fn provider(provider: &str, message: impl Into<String>) -> Self {
        Self::Provider { provider: provider.to_string(), message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, FirewallError>;
