use thiserror::Error;

/// Errors surfaced by upstream chain clients.
///
/// The variants matter to callers: transient per-endpoint failures are
/// retried against other endpoints inside the client, while
/// [`ClientError::AllEndpointsExhausted`] is the distinguishable signal that
/// every endpoint is currently unavailable and the calling worker should
/// back off on a fixed interval instead of retrying immediately.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A single endpoint returned an error response.
    #[error("endpoint {url} request failed: {msg}")]
    Endpoint {
        /// Endpoint base url.
        url: String,
        /// Upstream error description.
        msg: String,
    },
    /// A single endpoint exceeded the per-call timeout.
    #[error("request to {url} timed out")]
    Timeout {
        /// Endpoint base url.
        url: String,
    },
    /// A single endpoint rejected the call due to rate limiting.
    #[error("endpoint {url} rate limited the request")]
    RateLimited {
        /// Endpoint base url.
        url: String,
    },
    /// Every configured endpoint is tripped or failed for this call.
    #[error("all upstream endpoints are unavailable")]
    AllEndpointsExhausted,
    /// The endpoint answered but the payload could not be interpreted.
    #[error("invalid response from {url}: {msg}")]
    InvalidResponse {
        /// Endpoint base url.
        url: String,
        /// What was wrong with the payload.
        msg: String,
    },
    /// The upstream does not (yet) have the requested item.
    #[error("upstream is missing data for {what}")]
    MissingData {
        /// Description of the missing item.
        what: String,
    },
}

impl ClientError {
    /// Build an [`ClientError::Endpoint`] from any displayable source.
    pub fn endpoint(url: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Endpoint {
            url: url.into(),
            msg: err.to_string(),
        }
    }

    /// Build an [`ClientError::InvalidResponse`].
    pub fn invalid_response(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidResponse {
            url: url.into(),
            msg: msg.into(),
        }
    }

    /// True when every endpoint was unavailable and the caller should apply
    /// a uniform backoff.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::AllEndpointsExhausted)
    }
}

/// Result type for upstream client calls.
pub type ClientResult<T> = Result<T, ClientError>;
