//! # tempkey - Temporary Short Keys
//!
//! tempkey hands out short, temporary keys for URLs and text blobs, per
//! domain. Keys are 1, 2 or 3 characters long, or chosen by the user, and
//! every entry is evicted after a fixed lifetime so its key can be reused.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              AppContext                                 │
//! │                                                                         │
//! │   static links ──> resolve(domain, "/key~")                             │
//! │                          │                                              │
//! │                          ▼                                              │
//! │  ┌──────────────── KeySpacePartition (one per domain) ───────────────┐  │
//! │  │  ┌────────┐   ┌────────┐   ┌────────┐   ┌────────┐                │  │
//! │  │  │  len1  │   │  len2  │   │  len3  │   │ custom │  KeyBucket     │  │
//! │  │  │ RwLock │   │ RwLock │   │ RwLock │   │ RwLock │                │  │
//! │  │  └───▲────┘   └───▲────┘   └───▲────┘   └───▲────┘                │  │
//! │  └──────┼────────────┼────────────┼────────────┼─────────────────────┘  │
//! │         │            │            │            │                        │
//! │   ┌─────┴────────────┴────────────┴────────────┴──────┐                 │
//! │   │   ExpiryLoop per bucket (Background Tokio Tasks)  │                 │
//! │   └───────────────────────────────────────────────────┘                 │
//! │                                                                         │
//! │   BackupRoutine ──> <BackupDir>/<domain>/backupdb-<domain>-<tier>.json  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use tempkey::config::Config;
//! use tempkey::context::AppContext;
//! use bytes::Bytes;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(Path::new("./config"))?;
//!     let ctx = Arc::new(AppContext::from_config(&config));
//!
//!     // Keep the handles alive; dropping them stops the loops
//!     let _expiry = ctx.start_expiry();
//!
//!     let allocation = ctx.quick_add("7i.se", Bytes::from("https://example.com/"), false, None)?;
//!     println!("https://7i.se/{}", allocation.key);
//!
//!     let resolved = ctx.resolve("7i.se", &format!("/{}", allocation.key))?;
//!     assert!(resolved.is_some());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`keyspace`]: key alphabets, buckets, expiry loops and per-domain partitions
//! - [`context`]: application context shared by request handlers
//! - [`config`]: YAML configuration
//! - [`logging`]: tracing subscriber setup
//! - [`backup`]: bucket snapshots on disk
//! - [`error`]: error types
//!
//! ## Design Highlights
//!
//! ### Ordered Expiry
//!
//! Every entry in a bucket gets the same lifetime, so entries expire in the
//! order they were added. Each bucket threads its entries into a chain
//! ordered by expiry time; eviction only ever pops the head, and adding only
//! ever appends at the tail.
//!
//! ### Key Reuse
//!
//! Fixed-length keys come from a shuffled pool. A key freed by eviction goes
//! to the back of the pool, so it is handed out again as late as possible.

pub mod backup;
pub mod config;
pub mod context;
pub mod error;
pub mod keyspace;
pub mod logging;

// Re-export commonly used types for convenience
pub use config::Config;
pub use context::{AppContext, Resolution, Target};
pub use error::KeyError;
pub use keyspace::{
    Allocation, Entry, EntryKind, ExpiryConfig, ExpiryLoop, KeyBucket, KeySpacePartition, KeyTier,
    NewEntry,
};

/// Version of tempkey
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
