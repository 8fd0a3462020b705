//! Per-domain keyspace partition.
//!
//! Each served domain owns four independent buckets: one per fixed key
//! length (1, 2 and 3 characters) and one for custom keys. Buckets never
//! share locks, so an operation that spans tiers (like [`quick_add`]) is not
//! atomic across them.
//!
//! [`quick_add`]: KeySpacePartition::quick_add

use crate::error::KeyError;
use crate::keyspace::bucket::{Allocation, KeyBucket};
use crate::keyspace::charset::{is_custom_charset, MAX_CUSTOM_KEY_LEN, MIN_CUSTOM_KEY_LEN};
use crate::keyspace::entry::{Entry, EntryKind, UNLIMITED_USES};
use crate::keyspace::expiry::{ExpiryConfig, ExpiryLoop};
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// One of the four buckets of a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyTier {
    One,
    Two,
    Three,
    Custom,
}

impl KeyTier {
    pub const ALL: [KeyTier; 4] = [KeyTier::One, KeyTier::Two, KeyTier::Three, KeyTier::Custom];

    /// Fixed key length of the tier, `None` for custom keys.
    pub fn key_length(&self) -> Option<usize> {
        match self {
            KeyTier::One => Some(1),
            KeyTier::Two => Some(2),
            KeyTier::Three => Some(3),
            KeyTier::Custom => None,
        }
    }

    /// Short name used in logs and backup file names.
    pub fn label(&self) -> &'static str {
        match self {
            KeyTier::One => "len1",
            KeyTier::Two => "len2",
            KeyTier::Three => "len3",
            KeyTier::Custom => "custom",
        }
    }

    /// The tier a key of this many characters would live in.
    pub fn for_key(key: &str) -> Option<KeyTier> {
        match key.chars().count() {
            1 => Some(KeyTier::One),
            2 => Some(KeyTier::Two),
            3 => Some(KeyTier::Three),
            n if (MIN_CUSTOM_KEY_LEN..MAX_CUSTOM_KEY_LEN).contains(&n) => Some(KeyTier::Custom),
            _ => None,
        }
    }
}

impl fmt::Display for KeyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for KeyTier {
    type Err = KeyError;

    /// Parses the `len` form value of a request: `1`, `2`, `3` or `custom`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" => Ok(KeyTier::One),
            "2" => Ok(KeyTier::Two),
            "3" => Ok(KeyTier::Three),
            "custom" => Ok(KeyTier::Custom),
            _ => Err(KeyError::InvalidInput("unknown key length")),
        }
    }
}

/// Per-domain settings for a partition's buckets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionConfig {
    pub clear1: Duration,
    pub clear2: Duration,
    pub clear3: Duration,
    pub clear_custom: Duration,
    pub max_custom_links: usize,
}

impl PartitionConfig {
    /// Entry lifetime for a tier.
    pub fn timeout(&self, tier: KeyTier) -> Duration {
        match tier {
            KeyTier::One => self.clear1,
            KeyTier::Two => self.clear2,
            KeyTier::Three => self.clear3,
            KeyTier::Custom => self.clear_custom,
        }
    }
}

/// The four buckets serving one domain.
#[derive(Debug)]
pub struct KeySpacePartition {
    domain: String,
    len1: Arc<KeyBucket>,
    len2: Arc<KeyBucket>,
    len3: Arc<KeyBucket>,
    custom: Arc<KeyBucket>,
}

impl KeySpacePartition {
    /// Builds the buckets for `domain`, with every fixed-length free pool full.
    pub fn new(domain: impl Into<String>, config: &PartitionConfig) -> Self {
        let domain = domain.into();
        let fixed = |tier: KeyTier, length: usize| {
            Arc::new(KeyBucket::fixed(domain.clone(), length, config.timeout(tier)))
        };

        let partition = Self {
            len1: fixed(KeyTier::One, 1),
            len2: fixed(KeyTier::Two, 2),
            len3: fixed(KeyTier::Three, 3),
            custom: Arc::new(KeyBucket::custom(
                domain.clone(),
                config.max_custom_links,
                config.timeout(KeyTier::Custom),
            )),
            domain,
        };

        info!(domain = %partition.domain, "keyspace partition initialized");
        partition
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The bucket for `tier`.
    pub fn bucket(&self, tier: KeyTier) -> &Arc<KeyBucket> {
        match tier {
            KeyTier::One => &self.len1,
            KeyTier::Two => &self.len2,
            KeyTier::Three => &self.len3,
            KeyTier::Custom => &self.custom,
        }
    }

    /// Iterates over `(tier, bucket)` for all four buckets.
    pub fn buckets(&self) -> impl Iterator<Item = (KeyTier, &Arc<KeyBucket>)> {
        KeyTier::ALL.into_iter().map(move |tier| (tier, self.bucket(tier)))
    }

    /// Starts one expiry loop per bucket.
    ///
    /// The loops run until the returned handles are dropped.
    pub fn start_expiry(&self, config: &ExpiryConfig) -> Vec<ExpiryLoop> {
        self.buckets()
            .map(|(_, bucket)| ExpiryLoop::start(Arc::clone(bucket), config.clone()))
            .collect()
    }

    /// Adds an entry to one tier with that tier's configured lifetime.
    ///
    /// A `custom_key` is only accepted by [`KeyTier::Custom`]; fixed tiers
    /// reject it with [`KeyError::InvalidInput`].
    pub fn add(
        &self,
        tier: KeyTier,
        kind: EntryKind,
        payload: Bytes,
        compressed: bool,
        remaining_uses: i64,
        custom_key: Option<String>,
    ) -> Result<Allocation, KeyError> {
        self.bucket(tier)
            .insert(kind, payload, compressed, remaining_uses, custom_key)
    }

    /// Adds a URL to the shortest tier that still has a free key.
    ///
    /// Tries 1, then 2, then 3 characters. With a custom key only the custom
    /// bucket is tried and its error is returned as is. Each tier is locked
    /// separately, so another request may take a tier's last key between
    /// attempts.
    pub fn quick_add(
        &self,
        url: Bytes,
        compressed: bool,
        custom_key: Option<String>,
    ) -> Result<Allocation, KeyError> {
        if let Some(key) = custom_key {
            return self.custom.insert(
                EntryKind::Url,
                url,
                compressed,
                UNLIMITED_USES,
                Some(key),
            );
        }

        let mut last_err = KeyError::NoKeysLeft { length: 3 };
        for tier in [KeyTier::One, KeyTier::Two, KeyTier::Three] {
            match self
                .bucket(tier)
                .insert(EntryKind::Url, url.clone(), compressed, UNLIMITED_USES, None)
            {
                Ok(allocation) => return Ok(allocation),
                Err(err) => last_err = err,
            }
        }
        Err(last_err)
    }

    /// Looks a key up in the bucket its length maps to.
    ///
    /// Keys that fit no tier, or custom-length keys outside the custom
    /// charset, are not found.
    pub fn lookup(&self, key: &str) -> Option<Entry> {
        let tier = KeyTier::for_key(key)?;
        if tier == KeyTier::Custom && !is_custom_charset(key) {
            return None;
        }
        self.bucket(tier).lookup(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::charset::KEY_CHARSET;
    use tokio_test::{assert_err, assert_ok};

    fn config() -> PartitionConfig {
        PartitionConfig {
            clear1: Duration::from_secs(60),
            clear2: Duration::from_secs(120),
            clear3: Duration::from_secs(180),
            clear_custom: Duration::from_secs(240),
            max_custom_links: 2,
        }
    }

    #[test]
    fn test_partition_wires_timeouts_and_capacity() {
        let partition = KeySpacePartition::new("test.example", &config());

        for (tier, bucket) in partition.buckets() {
            assert_eq!(bucket.domain(), "test.example");
            assert_eq!(bucket.default_timeout(), config().timeout(tier));
            assert_eq!(bucket.key_length(), tier.key_length());
        }
        assert_eq!(partition.bucket(KeyTier::One).capacity(), 57);
        assert_eq!(partition.bucket(KeyTier::Three).capacity(), 57 * 57 * 57);
        assert_eq!(partition.bucket(KeyTier::Custom).capacity(), 2);
    }

    #[test]
    fn test_tier_parsing() {
        assert_eq!("1".parse::<KeyTier>(), Ok(KeyTier::One));
        assert_eq!("custom".parse::<KeyTier>(), Ok(KeyTier::Custom));
        assert!("4".parse::<KeyTier>().is_err());

        assert_eq!(KeyTier::for_key("a"), Some(KeyTier::One));
        assert_eq!(KeyTier::for_key("abc"), Some(KeyTier::Three));
        assert_eq!(KeyTier::for_key("abcd"), Some(KeyTier::Custom));
        assert_eq!(KeyTier::for_key(""), None);
        assert_eq!(KeyTier::for_key(&"x".repeat(64)), None);
    }

    #[test]
    fn test_add_routes_to_tier() {
        let partition = KeySpacePartition::new("test.example", &config());

        let allocation = assert_ok!(partition.add(
            KeyTier::Two,
            EntryKind::Text,
            Bytes::from("some text"),
            false,
            UNLIMITED_USES,
            None
        ));
        assert_eq!(allocation.key.chars().count(), 2);
        assert!(partition.bucket(KeyTier::Two).contains(&allocation.key));

        let custom = assert_ok!(partition.add(
            KeyTier::Custom,
            EntryKind::Url,
            Bytes::from("https://example.com/"),
            false,
            5,
            Some("my-link".into())
        ));
        assert_eq!(custom.key, "my-link");

        let entry = partition.lookup("my-link").unwrap();
        assert_eq!(entry.remaining_uses, 5);
        assert_eq!(partition.lookup(&allocation.key).unwrap().kind, EntryKind::Text);
    }

    #[test]
    fn test_custom_key_rejected_for_fixed_tiers() {
        let partition = KeySpacePartition::new("test.example", &config());
        let result = partition.add(
            KeyTier::One,
            EntryKind::Url,
            Bytes::from("https://example.com/"),
            false,
            UNLIMITED_USES,
            Some("mykey".into()),
        );
        assert_eq!(
            result,
            Err(KeyError::InvalidInput("fixed-length buckets assign their own keys"))
        );
        assert!(partition.bucket(KeyTier::One).is_empty());
    }

    #[test]
    fn test_custom_tier_capacity_and_collisions() {
        let partition = KeySpacePartition::new("test.example", &config());
        let add = |key: &str| {
            partition.add(
                KeyTier::Custom,
                EntryKind::Url,
                Bytes::from("https://example.com/"),
                false,
                UNLIMITED_USES,
                Some(key.to_string()),
            )
        };

        assert_ok!(add("abcd"));
        assert_ok!(add("efgh"));
        assert_eq!(assert_err!(add("ijkl")), KeyError::CapacityExceeded);
        assert_eq!(assert_err!(add("abcd")), KeyError::KeyAlreadyInUse);
    }

    #[test]
    fn test_quick_add_cascades_through_tiers() {
        let partition = KeySpacePartition::new("test.example", &config());
        let url = Bytes::from("https://example.com/");

        for _ in 0..KEY_CHARSET.chars().count() {
            let allocation = assert_ok!(partition.quick_add(url.clone(), false, None));
            assert_eq!(allocation.key.chars().count(), 1);
        }

        // Tier one is full, the next key comes from tier two
        let allocation = assert_ok!(partition.quick_add(url.clone(), false, None));
        assert_eq!(allocation.key.chars().count(), 2);
        assert_eq!(partition.bucket(KeyTier::One).free_len(), Some(0));
    }

    #[test]
    fn test_quick_add_with_custom_key() {
        let partition = KeySpacePartition::new("test.example", &config());
        let url = Bytes::from("https://example.com/");

        let allocation = assert_ok!(partition.quick_add(url.clone(), false, Some("mine".into())));
        assert_eq!(allocation.key, "mine");
        assert_eq!(
            partition.quick_add(url, false, Some("mine".into())),
            Err(KeyError::KeyAlreadyInUse)
        );
        assert!(partition.bucket(KeyTier::One).is_empty());
    }

    #[test]
    fn test_lookup_routing() {
        let partition = KeySpacePartition::new("test.example", &config());
        assert_eq!(partition.lookup(""), None);
        assert_eq!(partition.lookup("no such key"), None);
        assert_eq!(partition.lookup(&"x".repeat(80)), None);
        assert_eq!(partition.lookup("a"), None);
    }

    #[tokio::test]
    async fn test_start_expiry_runs_one_loop_per_bucket() {
        let partition = KeySpacePartition::new("test.example", &config());
        let loops = partition.start_expiry(&ExpiryConfig::default());
        assert_eq!(loops.len(), 4);
    }
}
