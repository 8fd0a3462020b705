//! Bucket backups.
//!
//! Every bucket's active entries are written to their own JSON file, in
//! expiry order, so a restart does not lose live links:
//!
//! ```text
//! <BackupDir>/
//!   7i.se/
//!     backupdb-7i.se-len1.json
//!     backupdb-7i.se-len2.json
//!     backupdb-7i.se-len3.json
//!     backupdb-7i.se-custom.json
//! ```
//!
//! Backups are best-effort. A bucket that cannot be written or restored is
//! logged and skipped; the rest carry on. Files are written to a temporary
//! name first and renamed into place, so a crash mid-write leaves the last
//! good backup intact.

use crate::context::AppContext;
use crate::keyspace::{Entry, KeyBucket, KeySpacePartition, KeyTier};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// On-disk form of one bucket.
#[derive(Debug, Serialize, Deserialize)]
struct BucketBackup {
    domain: String,
    tier: String,
    entries: Vec<Entry>,
}

/// Path of the backup file for one bucket.
pub fn backup_path(dir: &Path, domain: &str, tier: KeyTier) -> PathBuf {
    dir.join(domain)
        .join(format!("backupdb-{}-{}.json", domain, tier.label()))
}

/// Writes one bucket's snapshot and returns the number of entries saved.
///
/// Empty buckets are written too, so a restore never brings back entries
/// that expired after an older backup.
pub async fn save_bucket(dir: &Path, tier: KeyTier, bucket: &KeyBucket) -> Result<usize> {
    let path = backup_path(dir, bucket.domain(), tier);
    let backup = BucketBackup {
        domain: bucket.domain().to_string(),
        tier: tier.label().to_string(),
        entries: bucket.snapshot(),
    };
    let count = backup.entries.len();
    let data = serde_json::to_vec(&backup).context("failed to encode backup")?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &data)
        .await
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, &path)
        .await
        .with_context(|| format!("failed to move backup into place at {}", path.display()))?;

    debug!(domain = %bucket.domain(), tier = %tier, entries = count, path = %path.display(), "bucket backed up");
    Ok(count)
}

/// Reads one bucket's backup file and restores it into `bucket`.
///
/// Returns `Ok(None)` if there is no backup file.
pub async fn restore_bucket(dir: &Path, tier: KeyTier, bucket: &KeyBucket) -> Result<Option<usize>> {
    let path = backup_path(dir, bucket.domain(), tier);
    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    };

    let backup: BucketBackup = serde_json::from_slice(&data)
        .with_context(|| format!("failed to decode {}", path.display()))?;

    if backup.domain != bucket.domain() || backup.tier != tier.label() {
        bail!(
            "{} holds {}/{}, expected {}/{}",
            path.display(),
            backup.domain,
            backup.tier,
            bucket.domain(),
            tier
        );
    }

    let restored = bucket
        .restore(backup.entries)
        .with_context(|| format!("rejected backup {}", path.display()))?;
    Ok(Some(restored))
}

/// Backs up every bucket of one partition; returns the number of buckets written.
pub async fn save_partition(dir: &Path, partition: &KeySpacePartition) -> usize {
    let mut written = 0;
    for (tier, bucket) in partition.buckets() {
        match save_bucket(dir, tier, bucket).await {
            Ok(_) => written += 1,
            Err(e) => error!(domain = %partition.domain(), tier = %tier, "backup failed: {:#}", e),
        }
    }
    written
}

/// Backs up every bucket of every domain; returns the number of buckets written.
pub async fn save_all(dir: &Path, ctx: &AppContext) -> usize {
    let mut written = 0;
    for partition in ctx.partitions() {
        written += save_partition(dir, partition).await;
    }
    written
}

/// Restores every bucket that has a backup file; returns the number of entries restored.
pub async fn restore_all(dir: &Path, ctx: &AppContext) -> usize {
    let mut restored = 0;
    for partition in ctx.partitions() {
        for (tier, bucket) in partition.buckets() {
            match restore_bucket(dir, tier, bucket).await {
                Ok(Some(count)) => {
                    info!(domain = %partition.domain(), tier = %tier, entries = count, "bucket restored from backup");
                    restored += count;
                }
                Ok(None) => debug!(domain = %partition.domain(), tier = %tier, "no backup found"),
                Err(e) => warn!(domain = %partition.domain(), tier = %tier, "restore skipped: {:#}", e),
            }
        }
    }
    restored
}

/// A handle to the periodic backup task.
///
/// When this handle is dropped, the task will be stopped.
#[derive(Debug)]
pub struct BackupRoutine {
    shutdown_tx: watch::Sender<bool>,
}

impl BackupRoutine {
    /// Starts backing up every `interval`, beginning one interval from now.
    pub fn start(ctx: Arc<AppContext>, dir: PathBuf, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(dir = %dir.display(), interval_secs = interval.as_secs(), "backup routine started");
        tokio::spawn(backup_loop(ctx, dir, interval, shutdown_rx));

        Self { shutdown_tx }
    }

    /// Stops the backup routine.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for BackupRoutine {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn backup_loop(
    ctx: Arc<AppContext>,
    dir: PathBuf,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let written = save_all(&dir, &ctx).await;
                debug!(buckets = written, "periodic backup complete");
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("backup routine received shutdown signal");
                    return;
                }
            }
        }
    }
}
