//! Persistent key/value storage for session state.
//!
//! This module provides:
//! - `SecureStore`: TTL-keyed store with lazy expiry and reversible obfuscation
//! - `StorageBackend`: where sealed records live (`MemoryStorage`, `FileStorage`)
//! - `Clock`: time source used for expiry (`SystemClock`, `ManualClock`)
//!
//! The obfuscation applied by `SecureStore` is a fixed-key XOR followed by
//! base64. Anyone holding this crate can reverse it, so it keeps tokens out of
//! casual view and nothing more. It is not encryption. Deployments that need
//! confidentiality at rest should rely on server-set httpOnly cookies or an
//! OS keychain instead of this store.

pub mod backend;
pub mod clock;
pub mod secure;

pub use backend::{FileStorage, MemoryStorage, StorageBackend, StorageError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use secure::{SecureStore, StoredRecord};
