use thiserror::Error;

use crate::api::TransportError;

/// Failure of the durable credential storage.
///
/// Distinct from "no token saved", which stores report as `Ok(None)`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Credential storage unavailable: {0}")]
    Unavailable(String),

    #[error("Credential storage failure: {0}")]
    Backend(String),

    #[error("Stored credential is corrupt: {0}")]
    Corrupt(String),

    #[error("Credential file I/O failed: {0}")]
    Io(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        StorageError::Backend(format!("storage task failed: {}", err))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Identifier and secret are required")]
    MissingCredentials,

    #[error("A login request is already in progress")]
    LoginInProgress,

    #[error("A token refresh is already in progress")]
    RefreshInProgress,

    #[error("Credentials rejected: {0}")]
    Rejected(String),

    #[error("Authentication request failed: {0}")]
    Transport(TransportError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Superseded by a logout")]
    Superseded,

    #[error("No authenticated session")]
    NotAuthenticated,
}

impl AuthError {
    /// Message suitable for display on the login screen.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::MissingCredentials => "Please fill in all fields.".to_string(),
            AuthError::LoginInProgress | AuthError::RefreshInProgress => {
                "Please wait, still signing in.".to_string()
            }
            AuthError::Rejected(_) => "Invalid credentials".to_string(),
            AuthError::Transport(e) => e.message.clone(),
            AuthError::Storage(_) => "Unable to save your session. Please try again.".to_string(),
            AuthError::Superseded => "Login was cancelled.".to_string(),
            AuthError::NotAuthenticated => "Please log in.".to_string(),
        }
    }
}

impl From<TransportError> for AuthError {
    fn from(err: TransportError) -> Self {
        if err.is_credential_rejection() {
            AuthError::Rejected(err.message)
        } else {
            AuthError::Transport(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_classification() {
        let rejected = TransportError {
            status: Some(401),
            message: "Bad credentials".to_string(),
        };
        assert_eq!(
            AuthError::from(rejected),
            AuthError::Rejected("Bad credentials".to_string())
        );

        let outage = TransportError {
            status: Some(503),
            message: "Request failed with status code 503".to_string(),
        };
        let err = AuthError::from(outage);
        assert!(matches!(err, AuthError::Transport(_)));
        assert_eq!(err.user_message(), "Request failed with status code 503");

        let offline = TransportError {
            status: None,
            message: "error sending request".to_string(),
        };
        assert!(matches!(AuthError::from(offline), AuthError::Transport(_)));
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(
            AuthError::MissingCredentials.user_message(),
            "Please fill in all fields."
        );
        assert_eq!(
            AuthError::Rejected("whatever".to_string()).user_message(),
            "Invalid credentials"
        );
    }
}
