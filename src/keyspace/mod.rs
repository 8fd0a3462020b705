//! Keyspace Module
//!
//! This module holds the key allocation and expiry machinery. Every served
//! domain gets a [`KeySpacePartition`] of four [`KeyBucket`]s, and every
//! bucket gets its own background [`ExpiryLoop`].
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────── KeySpacePartition ("7i.se") ───────────────────┐
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌──────────┐                │
//! │  │  len1    │  │  len2    │  │  len3    │  │  custom  │                │
//! │  │  57 keys │  │ 3249 keys│  │ 185k keys│  │ max_links│                │
//! │  │  RwLock  │  │  RwLock  │  │  RwLock  │  │  RwLock  │                │
//! │  └────▲─────┘  └────▲─────┘  └────▲─────┘  └────▲─────┘                │
//! └───────┼─────────────┼─────────────┼─────────────┼──────────────────────┘
//!         │             │             │             │
//!    ExpiryLoop    ExpiryLoop    ExpiryLoop    ExpiryLoop
//!  (Tokio task)   (Tokio task)  (Tokio task)  (Tokio task)
//! ```
//!
//! ## Example
//!
//! ```
//! use tempkey::keyspace::{EntryKind, KeyBucket, NewEntry};
//! use std::time::Duration;
//!
//! let bucket = KeyBucket::fixed("7i.se", 1, Duration::from_secs(86400));
//!
//! let key = bucket
//!     .add(NewEntry::url("https://example.com/", Duration::from_secs(60)))
//!     .unwrap();
//! assert_eq!(key.chars().count(), 1);
//!
//! let entry = bucket.lookup(&key).unwrap();
//! assert_eq!(entry.kind, EntryKind::Url);
//! ```

pub mod bucket;
pub mod charset;
pub mod entry;
pub mod expiry;
pub mod partition;

// Re-export commonly used types
pub use bucket::{Allocation, BucketKind, BucketStats, ExpiryPass, KeyBucket};
pub use charset::{
    parse_request_key, validate_custom_key, KeyGenerator, RequestKey, CUSTOM_KEY_CHARSET,
    KEY_CHARSET,
};
pub use entry::{Entry, EntryKind, NewEntry, UNLIMITED_USES};
pub use expiry::{ExpiryConfig, ExpiryLoop};
pub use partition::{KeySpacePartition, KeyTier, PartitionConfig};
