//! The value stored under a key.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};

/// Remaining-uses value meaning "no access limit".
pub const UNLIMITED_USES: i64 = -1;

/// What an entry's payload holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// A URL to redirect to
    Url,
    /// A text blob to display
    Text,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Url => "url",
            EntryKind::Text => "text",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An active entry, as returned by lookups and snapshots.
///
/// Entries are never mutated after they are added; a lookup hands out a
/// copy, so callers cannot reach into a bucket's expiry chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// The key this entry is stored under
    pub key: String,
    pub kind: EntryKind,
    /// Raw or gzip-compressed payload, see `compressed`
    pub payload: Bytes,
    pub compressed: bool,
    /// Accesses left before the entry should go away, [`UNLIMITED_USES`] for no limit
    pub remaining_uses: i64,
    /// When the entry is evicted
    pub expires_at: SystemTime,
}

impl Entry {
    /// Checks if this entry has expired as of `now`.
    #[inline]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }

    /// Time left until expiry, zero if already expired.
    pub fn ttl(&self) -> Duration {
        self.expires_at
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)
    }
}

/// `now + ttl`, or the epoch if that is not representable.
///
/// An entry stamped with the epoch is rejected by `add` as already expired.
fn expires_in(ttl: Duration) -> SystemTime {
    SystemTime::now()
        .checked_add(ttl)
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// An entry waiting to be added to a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    /// Requested key; must be set for the custom bucket and unset for fixed-length buckets
    pub key: Option<String>,
    pub kind: EntryKind,
    pub payload: Bytes,
    pub compressed: bool,
    pub remaining_uses: i64,
    pub expires_at: SystemTime,
}

impl NewEntry {
    /// A new uncompressed entry with unlimited uses.
    pub fn new(kind: EntryKind, payload: impl Into<Bytes>, expires_at: SystemTime) -> Self {
        Self {
            key: None,
            kind,
            payload: payload.into(),
            compressed: false,
            remaining_uses: UNLIMITED_USES,
            expires_at,
        }
    }

    /// Shorthand for a URL entry expiring `ttl` from now.
    pub fn url(url: impl Into<Bytes>, ttl: Duration) -> Self {
        Self::new(EntryKind::Url, url, expires_in(ttl))
    }

    /// Shorthand for a text entry expiring `ttl` from now.
    pub fn text(text: impl Into<Bytes>, ttl: Duration) -> Self {
        Self::new(EntryKind::Text, text, expires_in(ttl))
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    pub fn with_remaining_uses(mut self, remaining_uses: i64) -> Self {
        self.remaining_uses = remaining_uses;
        self
    }

    pub(crate) fn into_entry(self, key: String) -> Entry {
        Entry {
            key,
            kind: self.kind,
            payload: self.payload,
            compressed: self.compressed,
            remaining_uses: self.remaining_uses,
            expires_at: self.expires_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entry_defaults() {
        let entry = NewEntry::url("https://example.com/", Duration::from_secs(60));
        assert_eq!(entry.kind, EntryKind::Url);
        assert_eq!(entry.key, None);
        assert!(!entry.compressed);
        assert_eq!(entry.remaining_uses, UNLIMITED_USES);
        assert!(entry.expires_at > SystemTime::now());
    }

    #[test]
    fn test_entry_expiry() {
        let now = SystemTime::now();
        let entry = NewEntry::new(EntryKind::Text, "hello", now + Duration::from_secs(5))
            .into_entry("ab".to_string());

        assert!(!entry.is_expired_at(now));
        assert!(entry.is_expired_at(now + Duration::from_secs(5)));
        assert!(entry.ttl() <= Duration::from_secs(5));
    }

    #[test]
    fn test_unrepresentable_ttl_does_not_panic() {
        let entry = NewEntry::text("hello", Duration::MAX);
        assert_eq!(entry.expires_at, SystemTime::UNIX_EPOCH);
        assert!(NewEntry::url("https://example.com/", Duration::MAX).expires_at < SystemTime::now());
    }

    #[test]
    fn test_entry_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&EntryKind::Url).unwrap(), "\"url\"");
        assert_eq!(
            serde_json::from_str::<EntryKind>("\"text\"").unwrap(),
            EntryKind::Text
        );
    }
}
