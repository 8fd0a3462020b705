//! Application context.
//!
//! Holds everything request handling needs: one [`KeySpacePartition`] per
//! served domain, the static links and the access-count limit. Built once at
//! startup and shared behind an `Arc`.

use crate::config::Config;
use crate::error::KeyError;
use crate::keyspace::{
    parse_request_key, Allocation, Entry, EntryKind, ExpiryConfig, ExpiryLoop, KeySpacePartition,
    KeyTier, UNLIMITED_USES,
};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// What a requested key points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A configured link that never expires
    Static(String),
    /// An active entry
    Entry(Entry),
}

/// A successfully resolved request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub target: Target,
    /// The request asked for the info page (`key~`)
    pub show_info: bool,
}

/// Shared state for all served domains.
#[derive(Debug)]
pub struct AppContext {
    partitions: HashMap<String, Arc<KeySpacePartition>>,
    static_links: HashMap<String, String>,
    link_access_max_nr: i64,
    expiry: ExpiryConfig,
}

impl AppContext {
    /// Builds a partition for every configured domain.
    pub fn from_config(config: &Config) -> Self {
        let partition_config = config.partition_config();
        let partitions = config
            .domain_names
            .iter()
            .map(|domain| {
                let partition = KeySpacePartition::new(domain.clone(), &partition_config);
                (domain.clone(), Arc::new(partition))
            })
            .collect::<HashMap<_, _>>();

        info!(
            domains = partitions.len(),
            static_links = config.static_links.len(),
            "application context ready"
        );

        Self {
            partitions,
            static_links: config.static_links.clone(),
            link_access_max_nr: config.link_access_max_nr,
            expiry: config.expiry_config(),
        }
    }

    /// The partition serving `domain`.
    pub fn partition(&self, domain: &str) -> Result<&Arc<KeySpacePartition>, KeyError> {
        self.partitions
            .get(domain)
            .ok_or_else(|| KeyError::UnknownDomain(domain.to_string()))
    }

    /// All partitions, in no particular order.
    pub fn partitions(&self) -> impl Iterator<Item = &Arc<KeySpacePartition>> {
        self.partitions.values()
    }

    /// Starts the expiry loops of every bucket of every domain.
    pub fn start_expiry(&self) -> Vec<ExpiryLoop> {
        self.partitions
            .values()
            .flat_map(|partition| partition.start_expiry(&self.expiry))
            .collect()
    }

    /// Maps a requested access count onto what gets stored.
    ///
    /// Missing or non-positive counts mean unlimited; larger counts are
    /// capped at the configured maximum.
    pub fn clamp_remaining_uses(&self, requested: Option<i64>) -> i64 {
        match requested {
            Some(n) if n >= 1 => n.min(self.link_access_max_nr),
            _ => UNLIMITED_USES,
        }
    }

    /// Adds an entry to one tier of `domain`.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &self,
        domain: &str,
        tier: KeyTier,
        kind: EntryKind,
        payload: Bytes,
        compressed: bool,
        requested_uses: Option<i64>,
        custom_key: Option<String>,
    ) -> Result<Allocation, KeyError> {
        let remaining_uses = self.clamp_remaining_uses(requested_uses);
        self.partition(domain)?
            .add(tier, kind, payload, compressed, remaining_uses, custom_key)
    }

    /// Adds a URL to the shortest tier of `domain` with a free key.
    pub fn quick_add(
        &self,
        domain: &str,
        url: Bytes,
        compressed: bool,
        custom_key: Option<String>,
    ) -> Result<Allocation, KeyError> {
        self.partition(domain)?.quick_add(url, compressed, custom_key)
    }

    /// Resolves a request path such as `/abc` or `/abc~` on `domain`.
    ///
    /// Static links win over bucket entries. Returns `Ok(None)` when nothing
    /// is stored under the key.
    pub fn resolve(&self, domain: &str, path: &str) -> Result<Option<Resolution>, KeyError> {
        let partition = self.partition(domain)?;
        let Some(request) = parse_request_key(path) else {
            return Ok(None);
        };

        if let Some(url) = self.static_links.get(request.key) {
            return Ok(Some(Resolution {
                target: Target::Static(url.clone()),
                show_info: request.show_info,
            }));
        }

        Ok(partition.lookup(request.key).map(|entry| Resolution {
            target: Target::Entry(entry),
            show_info: request.show_info,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn context() -> AppContext {
        let config = Config::from_yaml(
            r#"
DomainNames: ["7i.se", "example.org"]
Clear1Duration: 1h
Clear2Duration: 2h
Clear3Duration: 3h
ClearCustomLinksDuration: 4h
MaxCustomLinks: 3
LinkAccessMaxNr: 10
StaticLinks:
  about: https://example.com/about
"#,
        )
        .unwrap();
        AppContext::from_config(&config)
    }

    #[test]
    fn test_partition_per_domain() {
        let ctx = context();
        assert_eq!(ctx.partitions().count(), 2);
        assert_eq!(assert_ok!(ctx.partition("7i.se")).domain(), "7i.se");
        assert_eq!(
            ctx.partition("other.net").unwrap_err(),
            KeyError::UnknownDomain("other.net".to_string())
        );
    }

    #[test]
    fn test_clamp_remaining_uses() {
        let ctx = context();
        assert_eq!(ctx.clamp_remaining_uses(None), UNLIMITED_USES);
        assert_eq!(ctx.clamp_remaining_uses(Some(0)), UNLIMITED_USES);
        assert_eq!(ctx.clamp_remaining_uses(Some(-7)), UNLIMITED_USES);
        assert_eq!(ctx.clamp_remaining_uses(Some(1)), 1);
        assert_eq!(ctx.clamp_remaining_uses(Some(10)), 10);
        assert_eq!(ctx.clamp_remaining_uses(Some(500)), 10);
    }

    #[test]
    fn test_add_and_resolve() {
        let ctx = context();
        let allocation = assert_ok!(ctx.add(
            "7i.se",
            KeyTier::Three,
            EntryKind::Text,
            Bytes::from("hello"),
            false,
            Some(99),
            None
        ));

        let resolution = ctx
            .resolve("7i.se", &format!("/{}", allocation.key))
            .unwrap()
            .unwrap();
        assert!(!resolution.show_info);
        match resolution.target {
            Target::Entry(entry) => {
                assert_eq!(entry.payload, Bytes::from("hello"));
                assert_eq!(entry.remaining_uses, 10);
            }
            other => panic!("expected entry, got {:?}", other),
        }

        let info = ctx
            .resolve("7i.se", &format!("/{}~", allocation.key))
            .unwrap()
            .unwrap();
        assert!(info.show_info);

        // Domains do not share keyspaces
        assert_eq!(
            ctx.resolve("example.org", &format!("/{}", allocation.key)),
            Ok(None)
        );
    }

    #[test]
    fn test_static_links_take_precedence() {
        let ctx = context();
        assert_ok!(ctx.quick_add(
            "7i.se",
            Bytes::from("https://shadowed.example/"),
            false,
            Some("about".into())
        ));

        let resolution = ctx.resolve("7i.se", "/about").unwrap().unwrap();
        assert_eq!(
            resolution.target,
            Target::Static("https://example.com/about".to_string())
        );

        let info = ctx.resolve("example.org", "/about~").unwrap().unwrap();
        assert!(info.show_info);
    }

    #[test]
    fn test_resolve_misses() {
        let ctx = context();
        assert_eq!(ctx.resolve("7i.se", "/nothing-here"), Ok(None));
        assert_eq!(ctx.resolve("7i.se", "/bad%key"), Ok(None));
        assert_eq!(ctx.resolve("7i.se", "/"), Ok(None));
        assert_eq!(
            assert_err!(ctx.resolve("nowhere.example", "/abc")),
            KeyError::UnknownDomain("nowhere.example".to_string())
        );
    }

    #[test]
    fn test_unknown_domain_is_internal() {
        let ctx = context();
        let err = ctx
            .quick_add("nowhere.example", Bytes::from("https://x/"), false, None)
            .unwrap_err();
        assert!(!err.is_user_facing());
    }

    #[tokio::test]
    async fn test_start_expiry_covers_every_bucket() {
        let ctx = context();
        let loops = ctx.start_expiry();
        assert_eq!(loops.len(), 8);
    }
}
