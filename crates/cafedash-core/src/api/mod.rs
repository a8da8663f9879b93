//! REST API client module for the Cafe-Dash backend.
//!
//! - `ApiClient`: raw HTTP transport, also the login/refresh endpoint
//! - `SessionClient`: attaches the session token and logs out on rejection
//!
//! The API uses bearer token authentication obtained from `POST /login`.

pub mod client;
pub mod error;
pub mod session_client;

pub use client::ApiClient;
pub use error::{ApiError, TransportError, GENERIC_ERROR_MESSAGE};
pub use session_client::SessionClient;
