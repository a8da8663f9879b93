use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::UserProfile;
use crate::api::TransportError;

/// Request body for `POST /login`.
#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub identifier: &'a str,
    pub secret: &'a str,
}

/// Successful `POST /login` response.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

/// Successful `POST /refresh` response.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub token: String,
}

/// The remote authentication endpoint, as seen by the session manager.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Exchange credentials for a session token.
    async fn login(&self, identifier: &str, secret: &str) -> Result<LoginResponse, TransportError>;

    /// Exchange a still-valid token for a fresh one.
    async fn refresh(&self, token: &str) -> Result<RefreshResponse, TransportError>;
}
