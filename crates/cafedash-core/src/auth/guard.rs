//! Route gating for protected screens.
//!
//! The guard wraps one protected route group. Every render recomputes the
//! gate decision from the live session status:
//!
//! | status            | decision  | effect                         |
//! |-------------------|-----------|--------------------------------|
//! | `Unknown`         | `Pending` | neutral placeholder            |
//! | `Unauthenticated` | `Deny`    | redirect to the login flow     |
//! | `Authenticated`   | `Allow`   | render the protected content   |

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use super::{SessionManager, SessionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum GateDecision {
    Pending,
    Allow,
    Deny,
}

impl From<SessionStatus> for GateDecision {
    fn from(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Unknown => GateDecision::Pending,
            SessionStatus::Authenticated => GateDecision::Allow,
            SessionStatus::Unauthenticated => GateDecision::Deny,
        }
    }
}

/// The navigation stack, as far as the guard is concerned.
pub trait Navigator: Send + Sync {
    fn redirect_to_login(&self);
}

/// Outcome of rendering through the guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered<T> {
    Placeholder,
    Redirected,
    Content(T),
}

pub struct RouteGuard<N: Navigator> {
    status_rx: watch::Receiver<SessionStatus>,
    navigator: N,
    redirected: bool,
}

impl<N: Navigator> RouteGuard<N> {
    /// Mount the guard around a protected route group.
    pub fn mount(session: &SessionManager, navigator: N) -> Self {
        Self {
            status_rx: session.subscribe(),
            navigator,
            redirected: false,
        }
    }

    /// Current decision, read from the live status every time.
    pub fn decision(&self) -> GateDecision {
        GateDecision::from(*self.status_rx.borrow())
    }

    /// Render the protected route. `content` is only built when allowed.
    ///
    /// Issues one redirect per transition into `Deny`; repeated renders while
    /// still denied do not navigate again.
    pub fn render<T>(&mut self, content: impl FnOnce() -> T) -> Rendered<T> {
        let decision = GateDecision::from(*self.status_rx.borrow_and_update());
        match decision {
            GateDecision::Pending => {
                self.redirected = false;
                Rendered::Placeholder
            }
            GateDecision::Allow => {
                self.redirected = false;
                Rendered::Content(content())
            }
            GateDecision::Deny => {
                if !self.redirected {
                    debug!("Session not authenticated, redirecting to login");
                    self.navigator.redirect_to_login();
                    self.redirected = true;
                }
                Rendered::Redirected
            }
        }
    }

    /// Wait for the next status change and return the new decision.
    ///
    /// Returns `None` once the session manager is gone.
    pub async fn changed(&mut self) -> Option<GateDecision> {
        self.status_rx.changed().await.ok()?;
        Some(self.decision())
    }

    pub fn navigator(&self) -> &N {
        &self.navigator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TransportError;
    use crate::auth::{AuthBackend, LoginResponse, MemoryStore, RefreshResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct CountingNavigator {
        redirects: AtomicUsize,
    }

    impl Navigator for CountingNavigator {
        fn redirect_to_login(&self) {
            self.redirects.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CountingNavigator {
        fn redirects(&self) -> usize {
            self.redirects.load(Ordering::SeqCst)
        }
    }

    struct AcceptAll;

    #[async_trait]
    impl AuthBackend for AcceptAll {
        async fn login(&self, _identifier: &str, _secret: &str) -> Result<LoginResponse, TransportError> {
            Ok(LoginResponse {
                token: "abc".to_string(),
                user: None,
            })
        }

        async fn refresh(&self, _token: &str) -> Result<RefreshResponse, TransportError> {
            Ok(RefreshResponse {
                token: "def".to_string(),
            })
        }
    }

    fn session(store: MemoryStore) -> SessionManager {
        SessionManager::new(Arc::new(store), Arc::new(AcceptAll))
    }

    #[test]
    fn test_decision_is_pure_function_of_status() {
        assert_eq!(GateDecision::from(SessionStatus::Unknown), GateDecision::Pending);
        assert_eq!(
            GateDecision::from(SessionStatus::Unauthenticated),
            GateDecision::Deny
        );
        assert_eq!(
            GateDecision::from(SessionStatus::Authenticated),
            GateDecision::Allow
        );
    }

    #[tokio::test]
    async fn test_pending_renders_placeholder_without_navigation() {
        let manager = session(MemoryStore::new());
        let mut guard = RouteGuard::mount(&manager, CountingNavigator::default());

        let mut built = false;
        let rendered = guard.render(|| built = true);

        assert_eq!(rendered, Rendered::Placeholder);
        assert!(!built);
        assert_eq!(guard.navigator().redirects(), 0);
    }

    #[tokio::test]
    async fn test_deny_redirects_once_per_transition() {
        let manager = session(MemoryStore::new());
        let mut guard = RouteGuard::mount(&manager, CountingNavigator::default());
        manager.initialize().await.unwrap();

        assert_eq!(guard.render(|| "hub"), Rendered::Redirected);
        assert_eq!(guard.render(|| "hub"), Rendered::Redirected);
        assert_eq!(guard.navigator().redirects(), 1);

        manager.login("user@x.com", "goodpass").await.unwrap();
        assert_eq!(guard.render(|| "hub"), Rendered::Content("hub"));

        manager.logout().await;
        assert_eq!(guard.render(|| "hub"), Rendered::Redirected);
        assert_eq!(guard.navigator().redirects(), 2);
    }

    #[tokio::test]
    async fn test_restored_session_allows() {
        let manager = session(MemoryStore::with_token("persisted"));
        let mut guard = RouteGuard::mount(&manager, CountingNavigator::default());
        manager.initialize().await.unwrap();

        assert_eq!(guard.decision(), GateDecision::Allow);
        assert_eq!(guard.render(|| 42), Rendered::Content(42));
        assert_eq!(guard.navigator().redirects(), 0);
    }

    #[tokio::test]
    async fn test_logout_is_visible_on_next_render() {
        let manager = session(MemoryStore::with_token("persisted"));
        let mut guard = RouteGuard::mount(&manager, CountingNavigator::default());
        manager.initialize().await.unwrap();
        assert_eq!(guard.render(|| ()), Rendered::Content(()));

        manager.logout().await;
        assert_eq!(guard.decision(), GateDecision::Deny);
    }

    #[tokio::test]
    async fn test_changed_follows_status() {
        let manager = session(MemoryStore::new());
        let mut guard = RouteGuard::mount(&manager, CountingNavigator::default());

        manager.initialize().await.unwrap();
        assert_eq!(guard.changed().await, Some(GateDecision::Deny));

        manager.login("user@x.com", "goodpass").await.unwrap();
        assert_eq!(guard.changed().await, Some(GateDecision::Allow));

        drop(manager);
        assert_eq!(guard.changed().await, None);
    }
}
