//! cafedash-core - session management for the Cafe-Dash storefront client.
//!
//! Establishes a login session, persists it across restarts, exposes it to
//! the rest of the app and gates protected routes on it.
//!
//! - `auth`: session manager, credential stores, route guard
//! - `api`: HTTP transport and the session-aware client
//! - `config`: application configuration
//! - `context`: wiring of the above into one injectable value

pub mod api;
pub mod auth;
pub mod config;
pub mod context;

pub use api::{ApiClient, ApiError, SessionClient, TransportError};
pub use auth::{
    AuthError, CredentialStore, GateDecision, Navigator, Rendered, RouteGuard, SessionManager,
    SessionSnapshot, SessionStatus, StorageError, UserProfile,
};
pub use config::{Config, StoreBackend};
pub use context::AuthContext;
