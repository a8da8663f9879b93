//! Session-aware wrapper around [`ApiClient`].
//!
//! Every request carries the session's current token, read fresh from the
//! session manager. When the server answers 401 to a request that carried a
//! token, that token's session is logged out. Either way the caller gets
//! [`ApiError::SessionInvalidated`]; the request is not retried without a
//! credential.

use std::sync::Arc;

use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::{ApiClient, ApiError};
use crate::auth::SessionManager;

#[derive(Clone)]
pub struct SessionClient {
    api: ApiClient,
    session: Arc<SessionManager>,
}

impl SessionClient {
    pub fn new(api: ApiClient, session: Arc<SessionManager>) -> Self {
        Self { api, session }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send::<T, ()>(Method::GET, path, None).await
    }

    pub async fn post_json<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(Method::POST, path, Some(body)).await
    }

    pub async fn send<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let token = self.session.token();
        match self.api.request_json(method, path, token.as_deref(), body).await {
            Ok(value) => Ok(value),
            Err(e) if e.is_auth_rejection() => {
                match token.as_deref() {
                    Some(sent) => {
                        warn!(path = %path, "Server rejected the session credential");
                        self.session.invalidate(sent).await;
                    }
                    None => debug!(path = %path, "Request without a credential was rejected"),
                }
                Err(ApiError::SessionInvalidated(e))
            }
            Err(e) => Err(ApiError::Transport(e)),
        }
    }
}
