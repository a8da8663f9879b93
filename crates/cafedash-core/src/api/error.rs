use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Message shown when neither the server nor the transport says anything useful.
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong";

/// Maximum length for error response bodies in log output
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// A network or server failure, normalized to a single human-readable message.
///
/// The message is picked in priority order: the server's `message` field,
/// the transport-level description, then [`GENERIC_ERROR_MESSAGE`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    pub status: Option<u16>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: Option<String>,
}

impl TransportError {
    /// Build an error from whatever the failure exposed.
    pub fn normalize(
        status: Option<u16>,
        server_body: Option<&str>,
        transport_message: Option<&str>,
    ) -> Self {
        let message = server_body
            .and_then(Self::server_message)
            .or_else(|| non_empty(transport_message))
            .unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_string());

        Self { status, message }
    }

    /// Error for a non-success HTTP response.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let transport = if status == StatusCode::TOO_MANY_REQUESTS {
            "Rate limited - please wait before retrying".to_string()
        } else {
            format!("Request failed with status code {}", status.as_u16())
        };
        Self::normalize(Some(status.as_u16()), Some(body), Some(&transport))
    }

    /// Error for a request that never produced a response.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        Self::normalize(status, None, Some(&err.to_string()))
    }

    /// A success response whose body could not be used.
    pub fn invalid_response(status: Option<u16>, detail: impl std::fmt::Display) -> Self {
        Self {
            status,
            message: format!("Invalid response: {}", detail),
        }
    }

    /// Whether the server rejected the credential attached to the request.
    pub fn is_auth_rejection(&self) -> bool {
        self.status == Some(StatusCode::UNAUTHORIZED.as_u16())
    }

    /// Whether the server rejected the submitted credentials or input.
    pub fn is_credential_rejection(&self) -> bool {
        matches!(self.status, Some(400 | 401 | 403 | 422))
    }

    fn server_message(body: &str) -> Option<String> {
        let payload: ErrorPayload = serde_json::from_str(body).ok()?;
        non_empty(payload.message.as_deref())
    }

    /// Truncate a response body to avoid logging excessive data
    pub(crate) fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }
}

fn non_empty(message: Option<&str>) -> Option<String> {
    message
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

/// Error returned to callers of the session-aware client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The server rejected the session credential. The session has already
    /// been logged out by the time the caller sees this.
    #[error("Session invalidated: {0}")]
    SessionInvalidated(TransportError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ApiError {
    /// The underlying normalized failure.
    pub fn transport(&self) -> &TransportError {
        match self {
            ApiError::SessionInvalidated(e) | ApiError::Transport(e) => e,
        }
    }

    /// Message suitable for display to the user.
    pub fn user_message(&self) -> &str {
        &self.transport().message
    }

    pub fn is_session_invalidated(&self) -> bool {
        matches!(self, ApiError::SessionInvalidated(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_message_takes_priority() {
        let err = TransportError::normalize(
            Some(500),
            Some(r#"{"message": "Cafe is closed"}"#),
            Some("Request failed with status code 500"),
        );
        assert_eq!(err.message, "Cafe is closed");
        assert_eq!(err.status, Some(500));
    }

    #[test]
    fn test_transport_message_when_server_silent() {
        let err = TransportError::normalize(
            Some(502),
            Some("<html>Bad Gateway</html>"),
            Some("Request failed with status code 502"),
        );
        assert_eq!(err.message, "Request failed with status code 502");

        // A blank server message does not count
        let err = TransportError::normalize(Some(500), Some(r#"{"message": "  "}"#), Some("boom"));
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn test_generic_fallback() {
        let err = TransportError::normalize(None, None, None);
        assert_eq!(err.message, GENERIC_ERROR_MESSAGE);

        let err = TransportError::normalize(None, Some("{}"), Some(""));
        assert_eq!(err.message, GENERIC_ERROR_MESSAGE);
    }

    #[test]
    fn test_normalization_is_deterministic() {
        let a = TransportError::from_status(StatusCode::BAD_REQUEST, r#"{"message":"Bad email"}"#);
        let b = TransportError::from_status(StatusCode::BAD_REQUEST, r#"{"message":"Bad email"}"#);
        assert_eq!(a, b);
    }

    #[test]
    fn test_from_status() {
        let err = TransportError::from_status(StatusCode::NOT_FOUND, "");
        assert_eq!(err.message, "Request failed with status code 404");
        assert!(!err.is_auth_rejection());

        let err = TransportError::from_status(StatusCode::UNAUTHORIZED, "");
        assert!(err.is_auth_rejection());
        assert!(err.is_credential_rejection());

        let err = TransportError::from_status(StatusCode::TOO_MANY_REQUESTS, "");
        assert!(err.message.contains("Rate limited"));
    }

    #[test]
    fn test_truncate_body() {
        assert_eq!(TransportError::truncate_body("short"), "short");
        let long = "é".repeat(400);
        let truncated = TransportError::truncate_body(&long);
        assert!(truncated.contains("truncated, 800 total bytes"));
    }

    #[test]
    fn test_api_error_user_message() {
        let inner = TransportError::normalize(Some(401), Some(r#"{"message":"Token expired"}"#), None);
        let err = ApiError::SessionInvalidated(inner);
        assert!(err.is_session_invalidated());
        assert_eq!(err.user_message(), "Token expired");
    }
}
