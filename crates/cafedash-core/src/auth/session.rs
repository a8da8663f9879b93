use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, OnceCell};
use tracing::{debug, info, warn};

use super::{AuthBackend, AuthError, CredentialStore, StorageError};
use crate::api::TransportError;

/// Where the session stands. Starts as `Unknown` until the credential store
/// has been consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum SessionStatus {
    #[default]
    Unknown,
    Authenticated,
    Unauthenticated,
}

/// Minimal profile of the signed-in user, as returned by the login endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct UserProfile {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl UserProfile {
    pub fn display_name(&self) -> &str {
        if !self.username.is_empty() {
            &self.username
        } else {
            self.email.as_deref().unwrap_or("guest")
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    pub status: SessionStatus,
    pub token: Option<String>,
    pub user: Option<UserProfile>,
    pub authenticated_at: Option<DateTime<Utc>>,
}

impl Session {
    fn authenticated(token: String, user: Option<UserProfile>) -> Self {
        Self {
            status: SessionStatus::Authenticated,
            token: Some(token),
            user,
            authenticated_at: Some(Utc::now()),
        }
    }

    fn unauthenticated() -> Self {
        Self {
            status: SessionStatus::Unauthenticated,
            ..Self::default()
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            user: self.user.clone(),
            authenticated_at: self.authenticated_at,
        }
    }
}

/// Token-free view of the session for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub user: Option<UserProfile>,
    #[cfg_attr(feature = "ts", ts(type = "string | null"))]
    pub authenticated_at: Option<DateTime<Utc>>,
}

/// Holds a single-flight flag for as long as the operation runs, including
/// when its future is dropped midway.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owner of the process-wide session.
///
/// Share it by `Arc`. Status changes are published on a watch channel (see
/// [`SessionManager::subscribe`]) so the route guard can re-evaluate.
///
/// Every credential store write happens under `store_writes`, so a logout's
/// clear can never land in between another operation's save and commit.
/// `logout_epoch` is bumped by every logout; operations that started before
/// the bump discard their result.
pub struct SessionManager {
    store: Arc<dyn CredentialStore>,
    backend: Arc<dyn AuthBackend>,
    session: RwLock<Session>,
    status_tx: watch::Sender<SessionStatus>,
    initialized: OnceCell<Option<StorageError>>,
    store_writes: Mutex<()>,
    login_in_flight: AtomicBool,
    refresh_in_flight: AtomicBool,
    logout_epoch: AtomicU64,
    live: AtomicBool,
}

impl SessionManager {
    pub fn new(store: Arc<dyn CredentialStore>, backend: Arc<dyn AuthBackend>) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::Unknown);
        Self {
            store,
            backend,
            session: RwLock::new(Session::default()),
            status_tx,
            initialized: OnceCell::new(),
            store_writes: Mutex::new(()),
            login_in_flight: AtomicBool::new(false),
            refresh_in_flight: AtomicBool::new(false),
            logout_epoch: AtomicU64::new(0),
            live: AtomicBool::new(true),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn status(&self) -> SessionStatus {
        self.read_session().status
    }

    /// The in-memory token. Never touches the credential store.
    pub fn token(&self) -> Option<String> {
        self.read_session().token.clone()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.read_session().user.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.read_session().snapshot()
    }

    /// Receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    pub fn is_login_in_flight(&self) -> bool {
        self.login_in_flight.load(Ordering::Acquire)
    }

    /// Mark the manager defunct. A restore still in progress will not apply.
    pub fn shutdown(&self) {
        debug!("Session manager shutting down");
        self.live.store(false, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Restore the session from the credential store.
    ///
    /// Runs once per manager; later and concurrent calls share the first
    /// outcome. A storage failure leaves the session `Unauthenticated` and is
    /// returned for the caller to report.
    pub async fn initialize(&self) -> Result<SessionStatus, StorageError> {
        let failure = self
            .initialized
            .get_or_init(|| async {
                debug!("Restoring session from credential store");
                let loaded = self.store.load().await;
                self.restore(loaded)
            })
            .await;

        match failure {
            Some(err) => Err(err.clone()),
            None => Ok(self.status()),
        }
    }

    fn restore(&self, loaded: Result<Option<String>, StorageError>) -> Option<StorageError> {
        let (next, failure) = match loaded {
            Ok(Some(token)) if !token.is_empty() => (Session::authenticated(token, None), None),
            Ok(_) => (Session::unauthenticated(), None),
            Err(e) => {
                warn!(error = %e, "Credential store unavailable at startup, starting signed out");
                (Session::unauthenticated(), Some(e))
            }
        };

        if !self.is_live() {
            debug!("Manager shut down before restore finished, discarding");
            return failure;
        }

        let mut session = self.write_session();
        if session.status != SessionStatus::Unknown {
            debug!(status = ?session.status, "Session settled before restore finished, keeping it");
            return failure;
        }

        info!(status = ?next.status, "Session restored");
        self.replace_session(&mut session, next);
        failure
    }

    /// Sign in with the remote authentication endpoint.
    ///
    /// Only one login runs at a time; a second call while one is pending
    /// fails with [`AuthError::LoginInProgress`] and sends nothing. The token
    /// is persisted before the session becomes `Authenticated`.
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<SessionSnapshot, AuthError> {
        let identifier = identifier.trim();
        if identifier.is_empty() || secret.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let _in_flight = InFlight::acquire(&self.login_in_flight).ok_or_else(|| {
            debug!("Login already in flight, ignoring");
            AuthError::LoginInProgress
        })?;
        let epoch = self.logout_epoch.load(Ordering::SeqCst);

        info!(identifier = %identifier, "Logging in");
        // A failure leaves the status as it was; `Unknown` is settled by initialize()
        let response = self.backend.login(identifier, secret).await.map_err(|e| {
            warn!(error = %e, status = ?e.status, "Login failed");
            AuthError::from(e)
        })?;

        if response.token.is_empty() {
            return Err(AuthError::Transport(TransportError::invalid_response(
                None,
                "login response carried an empty token",
            )));
        }

        let _writes = self.store_writes.lock().await;
        if self.logout_epoch.load(Ordering::SeqCst) != epoch {
            info!("Logged out while login was in flight, discarding result");
            return Err(AuthError::Superseded);
        }

        self.store.save(&response.token).await.map_err(|e| {
            warn!(error = %e, "Failed to persist session token, login aborted");
            e
        })?;

        let next = Session::authenticated(response.token, response.user);
        let snapshot = next.snapshot();
        if !self.commit_if(epoch, None, next) {
            info!("Logged out while login was saving, discarding result");
            self.clear_store_locked().await;
            return Err(AuthError::Superseded);
        }

        info!("Login successful");
        Ok(snapshot)
    }

    /// Exchange the current token for a fresh one.
    pub async fn refresh(&self) -> Result<(), AuthError> {
        let token = self.token().ok_or(AuthError::NotAuthenticated)?;
        let _in_flight =
            InFlight::acquire(&self.refresh_in_flight).ok_or(AuthError::RefreshInProgress)?;
        let epoch = self.logout_epoch.load(Ordering::SeqCst);

        let response = match self.backend.refresh(&token).await {
            Ok(response) => response,
            Err(e) if e.is_auth_rejection() => {
                self.invalidate(&token).await;
                return Err(AuthError::Rejected(e.message));
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                return Err(AuthError::Transport(e));
            }
        };

        if response.token.is_empty() {
            return Err(AuthError::Transport(TransportError::invalid_response(
                None,
                "refresh response carried an empty token",
            )));
        }

        let _writes = self.store_writes.lock().await;
        if !self.is_current(epoch, &token) {
            return Err(AuthError::Superseded);
        }

        self.store.save(&response.token).await?;

        let mut next = self.read_session().clone();
        next.token = Some(response.token);
        next.authenticated_at = Some(Utc::now());
        if !self.commit_if(epoch, Some(&token), next) {
            self.clear_store_locked().await;
            return Err(AuthError::Superseded);
        }

        debug!("Session token refreshed");
        Ok(())
    }

    /// Sign out. The in-memory session is cleared before the first await, so
    /// the next status read already sees `Unauthenticated`. A store failure is
    /// logged and not retried.
    pub async fn logout(&self) {
        if self.sign_out_locally(|_| true) == Some(true) {
            info!("Logged out");
        } else {
            debug!("Logout with no active session");
        }
        self.clear_store().await;
    }

    /// Forced logout after the server rejected `rejected_token`.
    ///
    /// Does nothing unless `rejected_token` is still the session's token, so
    /// neither a stale request nor a still-loading session is signed out.
    /// Returns whether a logout happened.
    pub async fn invalidate(&self, rejected_token: &str) -> bool {
        let signed_out =
            self.sign_out_locally(|session| session.token.as_deref() == Some(rejected_token));
        if signed_out.is_none() {
            debug!("Rejected token is no longer current, keeping session");
            return false;
        }

        warn!("Server rejected the session credential, logged out");
        self.clear_store().await;
        true
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn read_session(&self) -> RwLockReadGuard<'_, Session> {
        self.session.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_session(&self) -> RwLockWriteGuard<'_, Session> {
        self.session.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish under the session lock so watchers see changes in order.
    fn replace_session(&self, session: &mut Session, next: Session) {
        let status = next.status;
        *session = next;
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    /// Sign out if `should` approves of the current session. Returns whether
    /// the session had been authenticated, or `None` if nothing was done.
    fn sign_out_locally(&self, should: impl FnOnce(&Session) -> bool) -> Option<bool> {
        let mut session = self.write_session();
        if !should(&session) {
            return None;
        }
        self.logout_epoch.fetch_add(1, Ordering::SeqCst);
        let was_authenticated = session.status == SessionStatus::Authenticated;
        self.replace_session(&mut session, Session::unauthenticated());
        Some(was_authenticated)
    }

    fn is_current(&self, epoch: u64, token: &str) -> bool {
        let session = self.read_session();
        self.logout_epoch.load(Ordering::SeqCst) == epoch && session.token.as_deref() == Some(token)
    }

    /// Apply `next` unless a logout happened since `epoch` or, when given,
    /// the token changed from `expected_token`.
    fn commit_if(&self, epoch: u64, expected_token: Option<&str>, next: Session) -> bool {
        let mut session = self.write_session();
        if self.logout_epoch.load(Ordering::SeqCst) != epoch {
            return false;
        }
        if let Some(expected) = expected_token {
            if session.token.as_deref() != Some(expected) {
                return false;
            }
        }
        self.replace_session(&mut session, next);
        true
    }

    async fn clear_store(&self) {
        let _writes = self.store_writes.lock().await;
        self.clear_store_locked().await;
    }

    /// Caller must hold `store_writes`.
    async fn clear_store_locked(&self) {
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "Failed to clear stored credential");
        }
    }
}
