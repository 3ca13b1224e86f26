//! Cache entry and retention attributes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between the group name and the member part of a grouped key.
///
/// A key ending in this delimiter names a whole group; backends widen
/// removal of such a key to every member of the group.
pub const NAME_COMPONENT_DELIMITER: char = ':';

/// Retention attributes attached to every cache entry.
///
/// `create_time_ms` is stamped by the cache facade when the entry is first
/// accepted; callers may leave it at zero. Expiry arithmetic is done in whole
/// seconds because the persistent tier stores scalar epoch-second columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementAttributes {
    /// Epoch milliseconds at which the entry was first accepted.
    pub create_time_ms: u64,
    /// Maximum lifetime in seconds, counted from `create_time_ms`.
    pub max_life_s: u64,
    /// Eternal entries never expire regardless of `max_life_s`.
    pub is_eternal: bool,
}

impl ElementAttributes {
    /// Attributes for an entry that lives `max_life_s` seconds.
    pub fn with_max_life(max_life_s: u64) -> Self {
        Self {
            create_time_ms: 0,
            max_life_s,
            is_eternal: false,
        }
    }

    /// Attributes for an entry that never expires.
    pub fn eternal() -> Self {
        Self {
            create_time_ms: 0,
            max_life_s: 0,
            is_eternal: true,
        }
    }

    /// Epoch second at which the entry expires.
    pub fn expire_time_s(&self) -> u64 {
        self.create_time_ms / 1000 + self.max_life_s
    }

    /// Whether the entry is expired at the given epoch second.
    ///
    /// Eternal entries are never expired.
    pub fn is_expired_at(&self, now_s: u64) -> bool {
        !self.is_eternal && now_s > self.expire_time_s()
    }
}

impl Default for ElementAttributes {
    fn default() -> Self {
        Self::eternal()
    }
}

/// The unit of caching: an opaque value under a stringifiable key.
///
/// The value payload is already encoded by the caller's serializer or is
/// handed to an [`EntryCodec`](crate::EntryCodec) at the persistence
/// boundary; this tier never inspects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Non-empty cache key, unique within a region.
    pub key: String,
    /// Opaque payload.
    pub value: Bytes,
    /// Retention attributes.
    pub attributes: ElementAttributes,
}

impl CacheEntry {
    /// Create an entry with the given attributes.
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>, attributes: ElementAttributes) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            attributes,
        }
    }

    /// Create an eternal entry.
    pub fn eternal(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self::new(key, value, ElementAttributes::eternal())
    }

    /// Current epoch milliseconds, used to stamp `create_time_ms`.
    pub fn now_ms() -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Lifecycle status of a cache facade.
///
/// Construction yields an `Alive` facade; `dispose` moves it through
/// `Disposing` to `Disposed`. Public operations are no-ops in the latter two
/// states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheStatus {
    /// Initialized and accepting operations.
    Alive,
    /// Shutdown in progress; new operations are rejected.
    Disposing,
    /// Shut down.
    Disposed,
}

impl CacheStatus {
    /// Whether the cache accepts operations.
    pub fn is_alive(&self) -> bool {
        matches!(self, CacheStatus::Alive)
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CacheStatus::Alive => "alive",
            CacheStatus::Disposing => "disposing",
            CacheStatus::Disposed => "disposed",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expire_time_from_create_time() {
        let attrs = ElementAttributes {
            create_time_ms: 10_000,
            max_life_s: 60,
            is_eternal: false,
        };
        assert_eq!(attrs.expire_time_s(), 70);
    }

    #[test]
    fn test_expired_after_max_life() {
        let attrs = ElementAttributes {
            create_time_ms: 10_000,
            max_life_s: 60,
            is_eternal: false,
        };
        assert!(!attrs.is_expired_at(70));
        assert!(attrs.is_expired_at(71));
    }

    #[test]
    fn test_eternal_never_expires() {
        let attrs = ElementAttributes {
            create_time_ms: 10_000,
            max_life_s: 1,
            is_eternal: true,
        };
        assert!(!attrs.is_expired_at(u64::MAX));
    }

    #[test]
    fn test_status_is_alive() {
        assert!(CacheStatus::Alive.is_alive());
        assert!(!CacheStatus::Disposing.is_alive());
        assert!(!CacheStatus::Disposed.is_alive());
    }

    #[test]
    fn test_entry_construction() {
        let entry = CacheEntry::eternal("k1", "payload");
        assert_eq!(entry.key, "k1");
        assert_eq!(entry.value, Bytes::from("payload"));
        assert!(entry.attributes.is_eternal);
    }
}
