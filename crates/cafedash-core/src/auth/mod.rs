//! Authentication module: session state, credential storage and route gating.
//!
//! This module provides:
//! - `SessionManager`: the single owner of the session state machine
//!   (`Unknown -> Authenticated | Unauthenticated`)
//! - `CredentialStore`: durable token storage (keychain with an encrypted
//!   file fallback, encrypted file, memory)
//! - `RouteGuard`: gate decisions for protected routes
//!
//! Persisted tokens are trusted at startup until the server first rejects one.

pub mod backend;
pub mod credentials;
pub mod encrypted;
pub mod error;
pub mod fallback;
pub mod guard;
pub mod session;

pub use backend::{AuthBackend, LoginRequest, LoginResponse, RefreshResponse};
pub use credentials::{CredentialStore, KeyringStore, MemoryStore, SERVICE_NAME, TOKEN_KEY};
pub use encrypted::EncryptedFileStore;
pub use error::{AuthError, StorageError};
pub use fallback::FallbackStore;
pub use guard::{GateDecision, Navigator, Rendered, RouteGuard};
pub use session::{Session, SessionManager, SessionSnapshot, SessionStatus, UserProfile};
