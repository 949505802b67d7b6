//! Session state management.
//!
//! This module provides:
//! - `TokenStore`: bearer token, refresh token and user profile accessors
//!   with per-kind default lifetimes, backed by `SecureStore`
//! - `Session`: the authenticated/unauthenticated view derived from storage
//! - `SessionEvents`: broadcast fired when a session is lost for good
//!
//! Tokens last 8 hours, refresh tokens 7 days and the cached profile 60
//! minutes unless the caller chooses otherwise.

pub mod events;
pub mod session;

pub use events::{SessionEvent, SessionEvents};
pub use session::{Session, TokenStore, UserRecord};
