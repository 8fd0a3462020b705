//! Background Expiry Loop
//!
//! Every bucket runs one of these for its whole lifetime. The loop evicts
//! entries off the head of the bucket's expiry chain as they time out.
//!
//! ## Wake Sources
//!
//! ```text
//!            ┌────────────────────┐
//!  tick ────>│                    │
//!  timer ───>│  select!  ──> expire_due(now) ──> re-arm timer at new head
//!  add ─────>│                    │
//!  stop ────>│  (return)          │
//!            └────────────────────┘
//! ```
//!
//! - **timer**: one-shot, armed for the head's expiry time; disarmed while
//!   the bucket is empty.
//! - **tick**: periodic safety wake (default: 10s). Bounds how long an
//!   expired entry can stay visible if the timer is ever missed.
//! - **add**: the bucket signals when an entry lands in an empty chain, so
//!   the timer gets armed without waiting for a tick.
//! - **stop**: dropping the [`ExpiryLoop`] handle ends the task.
//!
//! Each eviction pass drains every entry that is already due, so a loop that
//! was starved for a while catches up in one go.

use crate::keyspace::bucket::KeyBucket;
use std::future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

/// Configuration for the expiry loop.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Interval of the periodic safety wake (default: 10s)
    pub tick_interval: Duration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
        }
    }
}

/// A handle to a running expiry loop.
///
/// When this handle is dropped, the loop will be stopped.
#[derive(Debug)]
pub struct ExpiryLoop {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
}

impl ExpiryLoop {
    /// Starts the expiry loop for `bucket` as a background task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use tempkey::keyspace::{ExpiryConfig, ExpiryLoop, KeyBucket};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// let bucket = Arc::new(KeyBucket::fixed("7i.se", 1, Duration::from_secs(86400)));
    /// let expiry = ExpiryLoop::start(Arc::clone(&bucket), ExpiryConfig::default());
    ///
    /// // Entries are evicted in the background...
    ///
    /// // Dropping the handle stops the loop
    /// drop(expiry);
    /// ```
    pub fn start(bucket: Arc<KeyBucket>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            domain = %bucket.domain(),
            tier = bucket.tier_label(),
            keys = bucket.capacity(),
            "expiry loop started"
        );

        tokio::spawn(expiry_loop(bucket, config, shutdown_rx));

        Self { shutdown_tx }
    }

    /// Stops the expiry loop.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for ExpiryLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Longest single timer wait; a farther head deadline re-arms when this fires.
const MAX_TIMER_WAIT: Duration = Duration::from_secs(24 * 3600);

/// Converts a wall-clock deadline into a timer instant.
fn timer_instant(deadline: SystemTime) -> Instant {
    let wait = deadline
        .duration_since(SystemTime::now())
        .unwrap_or(Duration::ZERO)
        .min(MAX_TIMER_WAIT);
    Instant::now() + wait
}

/// The main expiry loop.
async fn expiry_loop(
    bucket: Arc<KeyBucket>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut deadline = bucket.next_deadline().map(timer_instant);

    loop {
        let timer = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = ticker.tick() => trace!(domain = %bucket.domain(), tier = bucket.tier_label(), "expiry tick"),
            _ = timer => trace!(domain = %bucket.domain(), tier = bucket.tier_label(), "expiry timer fired"),
            _ = bucket.woken() => trace!(domain = %bucket.domain(), tier = bucket.tier_label(), "expiry loop woken by add"),
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!(domain = %bucket.domain(), tier = bucket.tier_label(), "expiry loop received shutdown signal");
                    return;
                }
            }
        }

        let pass = bucket.expire_due(SystemTime::now());
        deadline = pass.next_deadline.map(timer_instant);
    }
}
