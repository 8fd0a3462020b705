//! Key Bucket: one keyspace tier with its own expiry chain
//!
//! A bucket owns every key of one length (or, for the custom bucket, every
//! user-chosen key) for one domain. It hands out free keys, stores entries
//! under them, and evicts entries in the order they expire.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────────────── KeyBucket ─────────────────────────────┐
//! │ RwLock<BucketState>                                                │
//! │                                                                    │
//! │  free:   [ k7 | q2 | Zx | ... ]        (fixed-length buckets only) │
//! │                                                                    │
//! │  active: HashMap<key, Slot>                                        │
//! │                                                                    │
//! │  head ──> "ab" ──next──> "x9" ──next──> "Tm" <── tail              │
//! │          10:00           10:05          10:07   (expires_at)       │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The chain is a singly-linked list threaded through the active map: each
//! slot stores the *key* of its successor, never a reference, so a freed key
//! that gets reused can never be reached through a stale link.
//!
//! ## Ordering
//!
//! All entries in a bucket get the same lifetime added to "now", so expiry
//! times arrive in non-decreasing order and `add` only ever appends at the
//! tail (O(1)). An entry that would expire before the current tail is
//! rejected instead of being sorted in.
//!
//! ## Concurrency
//!
//! One `parking_lot::RwLock` guards the whole state. `add`, `restore` and
//! evictions take the write lock; lookups and snapshots take the read lock.
//! [`KeyBucket::expire_due`] checks the head under an upgradable read and only
//! upgrades when something is due.

use crate::error::KeyError;
use crate::keyspace::charset::{validate_custom_key, KeyGenerator};
use crate::keyspace::entry::{Entry, EntryKind, NewEntry};
use bytes::Bytes;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::Notify;
use tracing::{debug, error, warn};

/// Which keys a bucket manages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketKind {
    /// System-assigned keys of one length, seeded from a [`KeyGenerator`]
    Fixed(KeyGenerator),
    /// User-chosen keys, capped at `max_links` active at once
    Custom { max_links: usize },
}

/// An active entry plus its link in the expiry chain.
#[derive(Debug)]
struct Slot {
    entry: Entry,
    next: Option<String>,
}

#[derive(Debug)]
struct BucketState {
    active: HashMap<String, Slot>,
    /// Unused keys, `None` for the custom bucket
    free: Option<VecDeque<String>>,
    /// Earliest-expiring key
    head: Option<String>,
    /// Latest-expiring key
    tail: Option<String>,
}

impl BucketState {
    fn head_expires_at(&self) -> Option<SystemTime> {
        self.head
            .as_ref()
            .and_then(|key| self.active.get(key))
            .map(|slot| slot.entry.expires_at)
    }
}

/// Result of one eviction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPass {
    /// Entries evicted during the pass
    pub evicted: usize,
    /// Expiry time of the new head, `None` if the bucket is empty
    pub next_deadline: Option<SystemTime>,
}

/// A key handed out by [`KeyBucket::insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub key: String,
    pub expires_at: SystemTime,
}

/// Bucket statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketStats {
    /// Entries currently active
    pub active: usize,
    /// Free keys left (fixed-length) or free custom slots
    pub free: usize,
    /// Successful adds
    pub adds: u64,
    /// Rejected adds
    pub rejected: u64,
    /// Entries evicted by expiry
    pub evictions: u64,
}

/// One keyspace tier of one domain.
///
/// Designed to be wrapped in an `Arc` and shared between request handlers
/// and the bucket's [`ExpiryLoop`](crate::keyspace::ExpiryLoop).
pub struct KeyBucket {
    domain: String,
    kind: BucketKind,
    default_timeout: Duration,
    state: RwLock<BucketState>,
    /// Wakes the expiry loop when the chain goes from empty to non-empty
    wake: Notify,
    adds: AtomicU64,
    rejected: AtomicU64,
    evictions: AtomicU64,
}

impl std::fmt::Debug for KeyBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("KeyBucket")
            .field("domain", &self.domain)
            .field("kind", &self.kind)
            .field("active", &state.active.len())
            .field("free", &state.free.as_ref().map(VecDeque::len))
            .finish()
    }
}

impl KeyBucket {
    /// Creates a bucket of system-assigned keys of `length` characters.
    pub fn fixed(domain: impl Into<String>, length: usize, default_timeout: Duration) -> Self {
        Self::with_kind(
            domain,
            BucketKind::Fixed(KeyGenerator::fixed(length)),
            default_timeout,
        )
    }

    /// Creates the bucket for user-chosen keys.
    pub fn custom(domain: impl Into<String>, max_links: usize, default_timeout: Duration) -> Self {
        Self::with_kind(domain, BucketKind::Custom { max_links }, default_timeout)
    }

    pub fn with_kind(domain: impl Into<String>, kind: BucketKind, default_timeout: Duration) -> Self {
        let free = match &kind {
            BucketKind::Fixed(generator) => Some(seed_pool(generator, &HashSet::new())),
            BucketKind::Custom { .. } => None,
        };

        Self {
            domain: domain.into(),
            kind,
            default_timeout,
            state: RwLock::new(BucketState {
                active: HashMap::new(),
                free,
                head: None,
                tail: None,
            }),
            wake: Notify::new(),
            adds: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn kind(&self) -> &BucketKind {
        &self.kind
    }

    pub fn is_custom(&self) -> bool {
        matches!(self.kind, BucketKind::Custom { .. })
    }

    /// Lifetime given to entries created through [`KeyBucket::insert`].
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Maximum number of simultaneously active entries.
    pub fn capacity(&self) -> usize {
        match &self.kind {
            BucketKind::Fixed(generator) => generator.capacity(),
            BucketKind::Custom { max_links } => *max_links,
        }
    }

    /// Key length for fixed-length buckets, `None` for the custom bucket.
    pub fn key_length(&self) -> Option<usize> {
        match &self.kind {
            BucketKind::Fixed(generator) => Some(generator.length()),
            BucketKind::Custom { .. } => None,
        }
    }

    /// Adds an entry and returns the key it is stored under.
    ///
    /// Fixed-length buckets pick an arbitrary free key and reject entries
    /// that already carry one. The custom bucket stores the entry under its
    /// requested key.
    ///
    /// # Errors
    ///
    /// - [`KeyError::InvalidInput`]: a key was requested from a fixed-length bucket
    /// - [`KeyError::InvalidKey`]: custom key missing, out of bounds or outside the charset
    /// - [`KeyError::KeyAlreadyInUse`]: custom key is active
    /// - [`KeyError::NoKeysLeft`] / [`KeyError::CapacityExceeded`]: bucket is full
    /// - [`KeyError::TimeoutInPast`]: `expires_at` is not after now
    /// - [`KeyError::TimeoutOrderingViolation`]: `expires_at` is before the tail's
    pub fn add(&self, entry: NewEntry) -> Result<String, KeyError> {
        self.add_logged(entry, false).map(|(key, _)| key)
    }

    /// Adds an entry expiring [`default_timeout`](KeyBucket::default_timeout) from now.
    ///
    /// This is the call request handlers use: `explicit_key` is `Some` only
    /// for the custom bucket. The expiry time is taken inside the bucket's
    /// critical section, so concurrent inserts can never arrive out of order.
    pub fn insert(
        &self,
        kind: EntryKind,
        payload: Bytes,
        compressed: bool,
        remaining_uses: i64,
        explicit_key: Option<String>,
    ) -> Result<Allocation, KeyError> {
        let entry = NewEntry {
            key: explicit_key,
            kind,
            payload,
            compressed,
            remaining_uses,
            expires_at: SystemTime::UNIX_EPOCH,
        };

        let (key, expires_at) = self.add_logged(entry, true)?;
        Ok(Allocation { key, expires_at })
    }

    fn add_logged(&self, entry: NewEntry, stamp: bool) -> Result<(String, SystemTime), KeyError> {
        let expires_at = entry.expires_at;

        match self.try_add(entry, stamp) {
            Ok(added) => {
                self.adds.fetch_add(1, Ordering::Relaxed);
                Ok(added)
            }
            Err(err) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                if err.is_user_facing() {
                    debug!(domain = %self.domain, tier = self.tier_label(), error = %err, "add rejected");
                } else {
                    warn!(
                        domain = %self.domain,
                        tier = self.tier_label(),
                        ?expires_at,
                        tail_expires_at = ?self.tail_expires_at(),
                        error = %err,
                        "add failed"
                    );
                }
                Err(err)
            }
        }
    }

    /// The whole add runs under the write lock: the tail comparison and the
    /// append are one critical section.
    fn try_add(&self, mut entry: NewEntry, stamp: bool) -> Result<(String, SystemTime), KeyError> {
        match (&self.kind, entry.key.as_deref()) {
            (BucketKind::Fixed(_), Some(_)) => {
                return Err(KeyError::InvalidInput(
                    "fixed-length buckets assign their own keys",
                ))
            }
            (BucketKind::Custom { .. }, None) => return Err(KeyError::InvalidKey),
            (BucketKind::Custom { .. }, Some(key)) => validate_custom_key(key)?,
            (BucketKind::Fixed(_), None) => {}
        }

        let mut state = self.state.write();
        let now = SystemTime::now();

        if state.head.is_some() != state.tail.is_some() {
            self.heal(&mut state, "head and tail disagree on add");
        }

        match &self.kind {
            BucketKind::Fixed(generator) => {
                if state.free.as_ref().map_or(true, VecDeque::is_empty) {
                    return Err(KeyError::NoKeysLeft {
                        length: generator.length(),
                    });
                }
            }
            BucketKind::Custom { max_links } => {
                if let Some(key) = entry.key.as_deref() {
                    if state.active.contains_key(key) {
                        return Err(KeyError::KeyAlreadyInUse);
                    }
                }
                if state.active.len() >= *max_links {
                    return Err(KeyError::CapacityExceeded);
                }
            }
        }

        let tail_expires_at = state
            .tail
            .as_ref()
            .map(|tail| state.active.get(tail).map(|slot| slot.entry.expires_at));
        let tail_expires_at = match tail_expires_at {
            Some(Some(at)) => Some(at),
            Some(None) => {
                self.heal(&mut state, "tail key missing from active map");
                None
            }
            None => None,
        };

        if stamp {
            let at = now
                .checked_add(self.default_timeout)
                .ok_or(KeyError::InvalidInput("entry lifetime out of range"))?;
            entry.expires_at = tail_expires_at.map_or(at, |tail| at.max(tail));
        }

        if entry.expires_at <= now {
            return Err(KeyError::TimeoutInPast);
        }
        if tail_expires_at.is_some_and(|tail| tail > entry.expires_at) {
            return Err(KeyError::TimeoutOrderingViolation);
        }

        let key = match entry.key.take() {
            Some(key) => key,
            None => match state.free.as_mut().and_then(VecDeque::pop_front) {
                Some(key) => key,
                None => {
                    return Err(KeyError::NoKeysLeft {
                        length: self.key_length().unwrap_or_default(),
                    })
                }
            },
        };
        let expires_at = entry.expires_at;

        let was_empty = state.head.is_none();
        match state.tail.take() {
            Some(tail) => {
                if let Some(slot) = state.active.get_mut(&tail) {
                    slot.next = Some(key.clone());
                }
            }
            None => state.head = Some(key.clone()),
        }
        state.tail = Some(key.clone());
        state.active.insert(
            key.clone(),
            Slot {
                entry: entry.into_entry(key.clone()),
                next: None,
            },
        );

        debug!(
            domain = %self.domain,
            tier = self.tier_label(),
            key = %key,
            active = state.active.len(),
            free = state.free.as_ref().map(VecDeque::len),
            "entry added"
        );

        drop(state);
        if was_empty {
            self.wake.notify_one();
        }

        Ok((key, expires_at))
    }

    /// Returns a copy of the entry stored under `key`.
    ///
    /// An entry past its expiry time stays visible until the expiry loop
    /// evicts it.
    pub fn lookup(&self, key: &str) -> Option<Entry> {
        let state = self.state.read();
        state.active.get(key).map(|slot| slot.entry.clone())
    }

    /// Returns true if `key` is currently active.
    pub fn contains(&self, key: &str) -> bool {
        self.state.read().active.contains_key(key)
    }

    /// Number of active entries.
    pub fn len(&self) -> usize {
        self.state.read().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of unused keys, `None` for the custom bucket.
    pub fn free_len(&self) -> Option<usize> {
        self.state.read().free.as_ref().map(VecDeque::len)
    }

    /// Expiry time of the earliest-expiring entry.
    pub fn next_deadline(&self) -> Option<SystemTime> {
        self.state.read().head_expires_at()
    }

    fn tail_expires_at(&self) -> Option<SystemTime> {
        let state = self.state.read();
        state
            .tail
            .as_ref()
            .and_then(|key| state.active.get(key))
            .map(|slot| slot.entry.expires_at)
    }

    /// Evicts every entry that has expired as of `now`.
    ///
    /// Pops from the head of the chain until the head is still live, so a
    /// loop that overslept catches up in one pass. Each evicted key goes
    /// back to the end of the free pool.
    pub fn expire_due(&self, now: SystemTime) -> ExpiryPass {
        let state = self.state.upgradable_read();

        let due = match &state.head {
            Some(key) => state
                .active
                .get(key)
                .map_or(true, |slot| slot.entry.is_expired_at(now)),
            None => state.tail.is_some(),
        };
        if !due {
            return ExpiryPass {
                evicted: 0,
                next_deadline: state.head_expires_at(),
            };
        }

        let mut state = RwLockUpgradableReadGuard::upgrade(state);
        let mut evicted = 0;

        loop {
            let Some(head) = state.head.take() else {
                if state.tail.is_some() {
                    self.heal(&mut state, "tail set on an empty chain");
                }
                break;
            };

            let live = state
                .active
                .get(&head)
                .map(|slot| !slot.entry.is_expired_at(now));
            match live {
                Some(true) => {
                    state.head = Some(head);
                    break;
                }
                Some(false) => {}
                None => {
                    self.heal(&mut state, "head key missing from active map");
                    break;
                }
            }

            let Some(slot) = state.active.remove(&head) else {
                break;
            };
            let is_tail = state.tail.as_deref() == Some(head.as_str());

            match (slot.next, is_tail) {
                (None, true) => state.tail = None,
                (Some(next), false) => state.head = Some(next),
                _ => {
                    evicted += 1;
                    self.heal(&mut state, "chain link disagrees with tail");
                    break;
                }
            }

            if let Some(free) = state.free.as_mut() {
                free.push_back(head);
            }
            evicted += 1;
        }

        if evicted > 0 {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            debug!(
                domain = %self.domain,
                tier = self.tier_label(),
                evicted,
                active = state.active.len(),
                free = state.free.as_ref().map(VecDeque::len),
                "expired entries evicted"
            );
        }

        ExpiryPass {
            evicted,
            next_deadline: state.head_expires_at(),
        }
    }

    /// All active entries in expiry order, taken under one read lock.
    pub fn snapshot(&self) -> Vec<Entry> {
        let state = self.state.read();
        let mut entries = Vec::with_capacity(state.active.len());

        let mut cursor = state.head.as_ref();
        while let Some(key) = cursor {
            // A well-formed chain visits each active key exactly once
            if entries.len() >= state.active.len() {
                error!(domain = %self.domain, tier = self.tier_label(), "expiry chain longer than active map");
                break;
            }
            let Some(slot) = state.active.get(key) else {
                error!(domain = %self.domain, tier = self.tier_label(), "expiry chain points at an inactive key");
                break;
            };
            entries.push(slot.entry.clone());
            cursor = slot.next.as_ref();
        }

        entries
    }

    /// Replaces the bucket contents with `entries`, given in expiry order.
    ///
    /// The first entry becomes the head, the last the tail, and each entry
    /// links to the one after it. Restored keys are taken out of the free
    /// pool. Entries that have already expired are kept and evicted by the
    /// next expiry pass. Nothing changes if any entry is rejected.
    pub fn restore(&self, entries: Vec<Entry>) -> Result<usize, KeyError> {
        let mut seen = HashSet::with_capacity(entries.len());
        let mut previous: Option<SystemTime> = None;

        for entry in &entries {
            match &self.kind {
                BucketKind::Fixed(generator) => {
                    if !generator.contains(&entry.key) {
                        return Err(KeyError::InvalidKey);
                    }
                }
                BucketKind::Custom { .. } => validate_custom_key(&entry.key)?,
            }
            if !seen.insert(entry.key.as_str()) {
                return Err(KeyError::KeyAlreadyInUse);
            }
            if previous.is_some_and(|prev| prev > entry.expires_at) {
                return Err(KeyError::TimeoutOrderingViolation);
            }
            previous = Some(entry.expires_at);
        }
        if let BucketKind::Custom { max_links } = &self.kind {
            if entries.len() > *max_links {
                return Err(KeyError::CapacityExceeded);
            }
        }

        let free = match &self.kind {
            BucketKind::Fixed(generator) => Some(seed_pool(generator, &seen)),
            BucketKind::Custom { .. } => None,
        };
        drop(seen);

        let count = entries.len();
        let mut active = HashMap::with_capacity(count);
        let head = entries.first().map(|e| e.key.clone());
        let tail = entries.last().map(|e| e.key.clone());

        let mut iter = entries.into_iter().peekable();
        while let Some(entry) = iter.next() {
            let next = iter.peek().map(|e| e.key.clone());
            active.insert(entry.key.clone(), Slot { entry, next });
        }

        {
            let mut state = self.state.write();
            *state = BucketState {
                active,
                free,
                head,
                tail,
            };
        }
        self.wake.notify_one();

        debug!(domain = %self.domain, tier = self.tier_label(), restored = count, "bucket restored");
        Ok(count)
    }

    /// Returns bucket statistics.
    pub fn stats(&self) -> BucketStats {
        let (active, free) = {
            let state = self.state.read();
            let active = state.active.len();
            let free = match &state.free {
                Some(free) => free.len(),
                None => self.capacity().saturating_sub(active),
            };
            (active, free)
        };

        BucketStats {
            active,
            free,
            adds: self.adds.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Waits until `add` or `restore` puts entries into an empty bucket.
    pub(crate) async fn woken(&self) {
        self.wake.notified().await;
    }

    pub(crate) fn tier_label(&self) -> &'static str {
        match self.key_length() {
            Some(1) => "len1",
            Some(2) => "len2",
            Some(3) => "len3",
            Some(_) => "fixed",
            None => "custom",
        }
    }

    /// Drops every entry and refills the free pool after the chain was found
    /// inconsistent.
    fn heal(&self, state: &mut BucketState, reason: &str) {
        error!(
            domain = %self.domain,
            tier = self.tier_label(),
            reason,
            active = state.active.len(),
            head = ?state.head,
            tail = ?state.tail,
            "expiry chain corrupted, resetting bucket"
        );

        state.active.clear();
        state.head = None;
        state.tail = None;
        if let BucketKind::Fixed(generator) = &self.kind {
            state.free = Some(seed_pool(generator, &HashSet::new()));
        }
    }
}

/// Every key of `generator` not in `taken`, in random order.
fn seed_pool(generator: &KeyGenerator, taken: &HashSet<&str>) -> VecDeque<String> {
    let mut keys: Vec<String> = generator
        .iter()
        .filter(|key| !taken.contains(key.as_str()))
        .collect();
    keys.shuffle(&mut rand::rng());
    VecDeque::from(keys)
}

#[cfg(test)]
impl KeyBucket {
    /// Checks every structural invariant of the bucket.
    pub(crate) fn check_invariants(&self) -> Result<(), String> {
        let state = self.state.read();

        if state.head.is_none() != state.tail.is_none() {
            return Err("head and tail disagree".into());
        }
        if state.head.is_none() != state.active.is_empty() {
            return Err("empty chain with active entries".into());
        }

        let mut visited = HashSet::new();
        let mut previous: Option<SystemTime> = None;
        let mut cursor = state.head.clone();
        let mut last = None;
        while let Some(key) = cursor {
            let slot = state.active.get(&key).ok_or("chain points at inactive key")?;
            if !visited.insert(key.clone()) {
                return Err("chain has a cycle".into());
            }
            if previous.is_some_and(|prev| prev > slot.entry.expires_at) {
                return Err("chain out of order".into());
            }
            if slot.entry.key != key {
                return Err("entry stored under the wrong key".into());
            }
            previous = Some(slot.entry.expires_at);
            last = Some(key);
            cursor = slot.next.clone();
        }
        if last != state.tail {
            return Err("chain does not end at tail".into());
        }
        if visited.len() != state.active.len() {
            return Err("active entries missing from the chain".into());
        }

        if let Some(free) = &state.free {
            let unique: HashSet<&String> = free.iter().collect();
            if unique.len() != free.len() {
                return Err("duplicate key in free pool".into());
            }
            if free.iter().any(|k| state.active.contains_key(k)) {
                return Err("key both free and active".into());
            }
            if free.len() + state.active.len() != self.capacity() {
                return Err("free + active != capacity".into());
            }
        }

        Ok(())
    }

    /// Returns true if `key` sits in the free pool. Scans the whole pool.
    pub(crate) fn is_free(&self, key: &str) -> bool {
        let state = self.state.read();
        state
            .free
            .as_ref()
            .is_some_and(|free| free.iter().any(|k| k == key))
    }

    /// Breaks the chain so the self-healing path can be exercised.
    pub(crate) fn corrupt_tail(&self) {
        self.state.write().tail = None;
    }
}
