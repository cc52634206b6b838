//! Namespaced keys for the durable tier.
//!
//! Durable storage is a flat string map shared with whatever else the host
//! keeps on the device, so every key carries the cache's prefix:
//! `{prefix}{userId}`. A `DurableKey` can only be built from a prefix and a
//! user id, which keeps keys from different caches (or different result
//! kinds sharing one environment) from colliding.

use tally_core::UserId;

/// A durable-tier key, `{prefix}{userId}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DurableKey {
    encoded: String,
    prefix_len: usize,
}

impl DurableKey {
    pub fn new(prefix: &str, user_id: &UserId) -> Self {
        let mut encoded = String::with_capacity(prefix.len() + user_id.as_str().len());
        encoded.push_str(prefix);
        encoded.push_str(user_id.as_str());
        Self {
            encoded,
            prefix_len: prefix.len(),
        }
    }

    /// The full storage key.
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    pub fn prefix(&self) -> &str {
        &self.encoded[..self.prefix_len]
    }

    /// Recover a key from storage, if it belongs to `prefix`.
    pub fn decode(prefix: &str, raw: &str) -> Option<Self> {
        raw.strip_prefix(prefix).map(|user| Self::new(prefix, &UserId::from(user)))
    }

    pub fn user_id(&self) -> UserId {
        UserId::from(&self.encoded[self.prefix_len..])
    }
}

impl std::fmt::Display for DurableKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encoded)
    }
}
