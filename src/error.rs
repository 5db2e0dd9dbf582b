use thiserror::Error;

// --------------------------------------------------------------------------------------------------------------

pub type Result<T> = std::result::Result<T, NedEpexError>;

#[derive(Debug, Error)]
pub enum NedEpexError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// The NED API or the recorder rejected our token (HTTP 401/403).
    #[error("Authentication failed for {service} (HTTP {status})")]
    Auth { service: &'static str, status: u16 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned HTTP {status}: {message}")]
    Api { service: &'static str, status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No data: {0}")]
    NoData(String),
}

impl NedEpexError {
    /// Network hiccups and 5xx responses are worth retrying next cycle, the rest are not.
    pub fn is_transient(&self) -> bool {
        match self {
            NedEpexError::Http(_)                 => true,
            NedEpexError::Api { status, .. }      => *status >= 500 || *status == 429,
            NedEpexError::NoData(_)               => true,
            NedEpexError::Config(_)
            | NedEpexError::Auth { .. }
            | NedEpexError::Parse(_)
            | NedEpexError::Io(_)                 => false,
        }
    }
}
