//! TTL-keyed store over a `StorageBackend`.
//!
//! Every value is wrapped in a `StoredRecord` carrying an absolute expiry,
//! serialized to JSON, XORed against a fixed key, base64-encoded and written
//! as `{"cipherText": "..."}` under a namespaced key.
//!
//! Expiry is lazy: nothing sweeps the backend, a record is dropped the first
//! time it is read after `now > expiration`. Records that fail to decode are
//! dropped the same way. Reads never fail.

use std::sync::Arc;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Duration;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Clock, StorageBackend};

/// Prefix applied to every key this store writes.
pub const DEFAULT_NAMESPACE: &str = "sessionpipe_";

/// Shared obfuscation key. Public knowledge; see the module docs.
const DEFAULT_OBFUSCATION_KEY: &[u8] = b"sessionpipe::obfuscation::v1";

/// Key written and removed by `is_available`.
const PROBE_KEY: &str = "__storage_probe__";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub value: serde_json::Value,
    /// Absolute expiry, epoch milliseconds.
    pub expiration: i64,
    /// Write time, epoch milliseconds.
    pub timestamp: i64,
}

impl StoredRecord {
    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        now_millis > self.expiration
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "cipherText")]
    cipher_text: String,
}

/// XOR `bytes` against `key`, cycling the key. Applying it twice with the
/// same key restores the input.
fn xor_with_key(bytes: &[u8], key: &[u8]) -> Vec<u8> {
    if key.is_empty() {
        return bytes.to_vec();
    }
    bytes
        .iter()
        .zip(key.iter().cycle())
        .map(|(b, k)| b ^ k)
        .collect()
}

/// TTL store with reversible at-rest obfuscation.
///
/// Clone is cheap and clones share the same backend.
#[derive(Clone)]
pub struct SecureStore {
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    namespace: Arc<str>,
    key: Arc<[u8]>,
}

impl SecureStore {
    pub fn new(backend: Arc<dyn StorageBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            namespace: Arc::from(DEFAULT_NAMESPACE),
            key: Arc::from(DEFAULT_OBFUSCATION_KEY),
        }
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Arc::from(namespace);
        self
    }

    pub fn with_obfuscation_key(mut self, key: &[u8]) -> Self {
        self.key = Arc::from(key);
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    /// Store `value` under `key` for `ttl`.
    ///
    /// Serialization and backend failures are logged and swallowed; callers
    /// that need to know whether persistence works should check
    /// [`SecureStore::is_available`] first.
    pub fn set_item<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        let now = self.clock.now_millis();
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = key, error = %e, "Failed to serialize value for secure storage");
                return;
            }
        };

        let record = StoredRecord {
            value,
            expiration: now.saturating_add(ttl.num_milliseconds()),
            timestamp: now,
        };

        let sealed = match self.seal(&record) {
            Ok(sealed) => sealed,
            Err(e) => {
                warn!(key = key, error = %e, "Failed to seal secure storage record");
                return;
            }
        };

        if let Err(e) = self.backend.set(&self.namespaced(key), &sealed) {
            warn!(key = key, error = %e, "Failed to write secure storage item");
        }
    }

    /// Read the value under `key`, or `None` when missing, expired or
    /// unreadable. Expired and unreadable records are deleted.
    pub fn get_item<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let record = self.get_record(key)?;
        match serde_json::from_value(record.value) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = key, error = %e, "Stored value has unexpected shape, discarding");
                self.discard(key);
                None
            }
        }
    }

    /// Read the full record (value plus timing) under `key`.
    pub fn get_record(&self, key: &str) -> Option<StoredRecord> {
        let raw = self.backend.get(&self.namespaced(key))?;

        let record = match self.unseal(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(key = key, error = %format!("{e:#}"), "Discarding unreadable secure storage item");
                self.discard(key);
                return None;
            }
        };

        if record.is_expired_at(self.clock.now_millis()) {
            debug!(key = key, expiration = record.expiration, "Secure storage item expired");
            self.discard(key);
            return None;
        }

        Some(record)
    }

    pub fn remove_item(&self, key: &str) {
        self.discard(key);
    }

    /// Remove every key under this store's namespace. Keys written by
    /// anything else in the same backend are left alone.
    pub fn clear(&self) {
        let owned: Vec<String> = self
            .backend
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(&*self.namespace))
            .collect();

        for key in &owned {
            if let Err(e) = self.backend.remove(key) {
                warn!(key = %key, error = %e, "Failed to remove secure storage item");
            }
        }
        debug!(removed = owned.len(), "Cleared secure storage namespace");
    }

    /// Probe whether the backend accepts writes.
    pub fn is_available(&self) -> bool {
        let probe = self.namespaced(PROBE_KEY);
        let writable = match self.backend.set(&probe, PROBE_KEY) {
            Ok(()) => self.backend.get(&probe).as_deref() == Some(PROBE_KEY),
            Err(e) => {
                debug!(error = %e, "Secure storage unavailable");
                false
            }
        };
        let _ = self.backend.remove(&probe);
        writable
    }

    fn discard(&self, key: &str) {
        if let Err(e) = self.backend.remove(&self.namespaced(key)) {
            warn!(key = key, error = %e, "Failed to remove secure storage item");
        }
    }

    fn seal(&self, record: &StoredRecord) -> Result<String> {
        let plain = serde_json::to_vec(record).context("Failed to serialize record")?;
        let envelope = Envelope {
            cipher_text: STANDARD.encode(xor_with_key(&plain, &self.key)),
        };
        serde_json::to_string(&envelope).context("Failed to serialize envelope")
    }

    fn unseal(&self, raw: &str) -> Result<StoredRecord> {
        let envelope: Envelope = serde_json::from_str(raw).context("Malformed envelope")?;
        let obfuscated = STANDARD
            .decode(envelope.cipher_text.as_bytes())
            .context("Invalid base64 payload")?;
        let plain = xor_with_key(&obfuscated, &self.key);
        serde_json::from_slice(&plain).context("Payload is not a stored record")
    }
}

// ============================================================================
// Tests
// ============================================================================
