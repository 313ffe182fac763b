use thiserror::Error;

/// Faults produced by the synchronization layer.
///
/// Polling converts these into a logged no-op; interactive paths (session,
/// watchlist) record them for display.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("request failed: {0}")]
    Network(String),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("authentication failed: {status} {message}")]
    Auth { status: u16, message: String },

    #[error("unexpected response shape: {0}")]
    Shape(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no access token received")]
    MissingToken,

    #[error("credential store error: {0}")]
    Storage(String),

    #[error("superseded by a later login or logout")]
    Superseded,
}

impl SyncError {
    /// Stable label for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Status { .. } => "status",
            Self::Auth { .. } => "auth",
            Self::Shape(_) => "shape",
            Self::NotFound(_) => "not_found",
            Self::MissingToken => "missing_token",
            Self::Storage(_) => "storage",
            Self::Superseded => "superseded",
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } | Self::Auth { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Re-labels a non-success HTTP status as an authentication failure.
    pub(crate) fn into_auth(self) -> Self {
        match self {
            Self::Status { status, message } => Self::Auth { status, message },
            other => other,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}
