use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("Upstream request timed out")]
    Timeout,

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Upstream server error: {0}")]
    Server(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Group not found upstream: {0}")]
    GroupNotFound(String),

    #[error("Invalid upstream data: {0}")]
    DataInvalid(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl UpstreamError {
    /// Timeouts, rate limits and 5xx are worth another attempt; malformed
    /// payloads and missing groups are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Timeout | UpstreamError::RateLimited | UpstreamError::Server(_) => true,
            UpstreamError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            UpstreamError::GroupNotFound(_) | UpstreamError::DataInvalid(_) => false,
        }
    }

    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            format!(
                "{}... (truncated, {} total bytes)",
                &body[..MAX_ERROR_BODY_LENGTH],
                body.len()
            )
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            404 => UpstreamError::GroupNotFound(truncated),
            408 => UpstreamError::Timeout,
            429 => UpstreamError::RateLimited,
            500..=599 => UpstreamError::Server(truncated),
            _ => UpstreamError::DataInvalid(format!("Status {}: {}", status, truncated)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            UpstreamError::from_status(StatusCode::TOO_MANY_REQUESTS, ""),
            UpstreamError::RateLimited
        ));
        assert!(matches!(
            UpstreamError::from_status(StatusCode::BAD_GATEWAY, "gateway"),
            UpstreamError::Server(_)
        ));
        assert!(matches!(
            UpstreamError::from_status(StatusCode::NOT_FOUND, ""),
            UpstreamError::GroupNotFound(_)
        ));
        assert!(matches!(
            UpstreamError::from_status(StatusCode::IM_A_TEAPOT, ""),
            UpstreamError::DataInvalid(_)
        ));
    }

    #[test]
    fn test_retryability() {
        assert!(UpstreamError::RateLimited.is_retryable());
        assert!(UpstreamError::Server("boom".into()).is_retryable());
        assert!(UpstreamError::Timeout.is_retryable());
        assert!(!UpstreamError::DataInvalid("bad".into()).is_retryable());
        assert!(!UpstreamError::GroupNotFound("gone".into()).is_retryable());
    }

    #[test]
    fn test_body_truncation() {
        let long = "x".repeat(2000);
        let err = UpstreamError::from_status(StatusCode::INTERNAL_SERVER_ERROR, &long);
        let msg = err.to_string();
        assert!(msg.len() < 700);
        assert!(msg.contains("truncated"));
    }
}
