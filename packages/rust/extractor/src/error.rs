//! Extraction failures.

use espforge_shared::EspforgeError;

/// Why a page could not be turned into a raw component record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    /// The locator is not a URL we are willing to fetch.
    #[error("invalid locator '{locator}': {reason}")]
    InvalidLocator { locator: String, reason: String },

    /// Timeouts, connection failures, 5xx and 429, after every attempt was used.
    #[error("{url}: transient failure after {attempts} attempt(s): {message}")]
    Transient {
        url: String,
        attempts: u32,
        message: String,
    },

    /// 404 or 410.
    #[error("{url}: not found (HTTP {status})")]
    NotFound { url: String, status: u16 },

    /// Any other client-side rejection; retrying will not help.
    #[error("{url}: permanent failure: {reason}")]
    Permanent { url: String, reason: String },

    /// Cancelled before or between attempts.
    #[error("{url}: cancelled")]
    Cancelled { url: String },

    /// Page has no title, no description and no variables.
    #[error("{url}: page has no title, description or configuration variables")]
    ParseEmpty { url: String },
}

impl ExtractError {
    /// Whether a retry could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Short stable label for job history and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidLocator { .. } => "invalid-locator",
            Self::Transient { .. } => "transient",
            Self::NotFound { .. } => "not-found",
            Self::Permanent { .. } => "permanent",
            Self::Cancelled { .. } => "cancelled",
            Self::ParseEmpty { .. } => "parse-empty",
        }
    }
}

impl From<ExtractError> for EspforgeError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::InvalidLocator { .. } => EspforgeError::validation(err.to_string()),
            ExtractError::ParseEmpty { .. } => EspforgeError::parse(err.to_string()),
            _ => EspforgeError::Network(err.to_string()),
        }
    }
}
