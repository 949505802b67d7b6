//! sessionpipe core - the authenticated session pipeline.
//!
//! Layers, leaf first:
//!
//! - [`storage`]: TTL-keyed persistent store with reversible obfuscation
//! - [`auth`]: token, refresh token and user accessors, session events
//! - [`api`]: the request pipeline that attaches credentials and renews them
//! - [`config`]: environment-driven settings
//!
//! Typical wiring:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sessionpipe_core::api::ApiClient;
//! use sessionpipe_core::auth::TokenStore;
//! use sessionpipe_core::config::Config;
//! use sessionpipe_core::storage::{MemoryStorage, SecureStore, SystemClock};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::from_env()?;
//! let store = SecureStore::new(Arc::new(MemoryStorage::new()), Arc::new(SystemClock));
//! let client = ApiClient::new(&config, TokenStore::new(store))?;
//!
//! let mut expired = client.session_events().subscribe();
//! let portfolios: serde_json::Value = client.get_json("/portfolios").await?;
//! # let _ = (portfolios, expired.try_recv());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod storage;
