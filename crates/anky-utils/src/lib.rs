//! Foundation shared by every anky pipeline crate.
//!
//! - [`types`] - writing sessions, artifacts, and the artifact status lifecycle
//! - [`error`] - the error taxonomy used across crate boundaries
//! - [`logging`] - tracing subscriber setup and stage span helpers
//! - [`atomic_write`] - temp file + fsync + rename writes for file-backed state
//! - [`redaction`] - scrubbing of credentials from upstream error messages
//! - [`http_client`] - retrying HTTP client shared by the service collaborators

pub mod atomic_write;
pub mod error;
pub mod http_client;
pub mod logging;
pub mod redaction;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod stub_server;
