//! Named distributed locks backed by the shared store
//!
//! A lock row records its holder (management-server node plus a logical
//! owner), a reentrancy count, a lease deadline and a fencing token. Rows are
//! only changed inside a single store write transaction, which gives mutual
//! exclusion across every node sharing the store.
//!
//! A holder that dies without releasing keeps the lock until its lease runs
//! out; the next holder then receives a strictly larger fencing token, so
//! protected operations can reject work from the stale holder with
//! [`GlobalLock::validate_token`].

use crate::config::LockConfig;
use crate::error::NetplaneResult;
use crate::storage::{tables::LOCK_TABLE, Store};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Logical holder of a lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub node_id: u64,
    pub owner: String,
}

impl fmt::Display for LockHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@node-{}", self.owner, self.node_id)
    }
}

/// Persisted lock row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    pub name: String,
    pub holder: LockHolder,
    /// Reentrancy count; the lock is free at zero
    pub count: u32,
    pub fencing_token: u64,
    pub acquired_at_ms: u64,
    /// Lease deadline in Unix milliseconds, 0 once released
    pub deadline_ms: u64,
}

impl LockEntry {
    pub fn is_held(&self, now_ms: u64) -> bool {
        self.count > 0 && !is_lock_expired(self.deadline_ms, now_ms)
    }
}

/// Next fencing token after `current`; never 0
pub fn compute_next_fencing_token(current: Option<&LockEntry>) -> u64 {
    match current {
        Some(entry) => entry.fencing_token.saturating_add(1),
        None => 1,
    }
}

/// Released (deadline 0) or past its lease
pub fn is_lock_expired(deadline_ms: u64, now_ms: u64) -> bool {
    deadline_ms == 0 || now_ms > deadline_ms
}

/// Returns `(sleep_ms, next_backoff_ms)`; jitter is bounded by half the backoff
pub fn compute_backoff_with_jitter(current_ms: u64, max_ms: u64, jitter_seed: u64) -> (u64, u64) {
    let max_jitter = current_ms.saturating_div(2).saturating_add(1);
    let sleep_ms = current_ms.saturating_add(jitter_seed % max_jitter);
    let next_ms = current_ms.saturating_mul(2).min(max_ms);
    (sleep_ms, next_ms)
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

enum Attempt {
    Acquired { token: u64, count: u32 },
    Busy(LockHolder),
}

enum Release {
    Decremented(u32),
    Freed,
    NotHeld,
}

/// One named lock; obtain through [`LockManager::get`]
pub struct GlobalLock {
    name: String,
    node_id: u64,
    store: Store,
    config: LockConfig,
    released: Notify,
}

impl fmt::Debug for GlobalLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalLock")
            .field("name", &self.name)
            .field("node_id", &self.node_id)
            .finish()
    }
}

impl GlobalLock {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn holder(&self, owner: &str) -> LockHolder {
        LockHolder {
            node_id: self.node_id,
            owner: owner.to_string(),
        }
    }

    /// Acquire for `owner`, waiting at most `timeout`.
    ///
    /// Returns `Ok(false)` on timeout. Re-acquiring while already held by the
    /// same owner increments the reentrancy count.
    pub async fn acquire(&self, owner: &str, timeout: Duration) -> NetplaneResult<bool> {
        let deadline = Instant::now() + timeout;
        let mut backoff_ms = self.config.min_poll_interval.as_millis() as u64;
        let max_backoff_ms = self.config.max_poll_interval.as_millis() as u64;

        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_acquire(owner)? {
                Attempt::Acquired { token, count } => {
                    debug!(lock = %self.name, owner, token, count, "Lock acquired");
                    return Ok(true);
                }
                Attempt::Busy(current) => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(
                            lock = %self.name,
                            owner,
                            held_by = %current,
                            timeout_ms = timeout.as_millis() as u64,
                            "Timed out waiting for lock"
                        );
                        return Ok(false);
                    }

                    let (sleep_ms, next_ms) =
                        compute_backoff_with_jitter(backoff_ms, max_backoff_ms, rand::random());
                    backoff_ms = next_ms;
                    let sleep = Duration::from_millis(sleep_ms).min(deadline - now);

                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep(sleep) => {}
                    }
                }
            }
        }
    }

    /// Single acquisition attempt without waiting
    pub fn try_lock(&self, owner: &str) -> NetplaneResult<bool> {
        Ok(matches!(self.try_acquire(owner)?, Attempt::Acquired { .. }))
    }

    fn try_acquire(&self, owner: &str) -> NetplaneResult<Attempt> {
        let holder = self.holder(owner);
        let lease_ms = self.config.lease_ttl.as_millis() as u64;
        let name = self.name.clone();

        self.store
            .mutate_keyed::<LockEntry, _, _>(LOCK_TABLE, &self.name, |row| {
                let now = now_ms();
                if let Some(entry) = row.as_mut() {
                    if entry.is_held(now) {
                        if entry.holder != holder {
                            return Attempt::Busy(entry.holder.clone());
                        }
                        entry.count = entry.count.saturating_add(1);
                        entry.deadline_ms = now.saturating_add(lease_ms);
                        return Attempt::Acquired {
                            token: entry.fencing_token,
                            count: entry.count,
                        };
                    }
                    if entry.count > 0 {
                        info!(
                            lock = %name,
                            stale_holder = %entry.holder,
                            stale_token = entry.fencing_token,
                            "Breaking expired lock lease"
                        );
                    }
                }

                let token = compute_next_fencing_token(row.as_ref());
                *row = Some(LockEntry {
                    name,
                    holder,
                    count: 1,
                    fencing_token: token,
                    acquired_at_ms: now,
                    deadline_ms: now.saturating_add(lease_ms),
                });
                Attempt::Acquired { token, count: 1 }
            })
    }

    /// Release one level of `owner`'s hold. Returns whether `owner` held it.
    pub fn release(&self, owner: &str) -> NetplaneResult<bool> {
        let holder = self.holder(owner);
        let outcome = self
            .store
            .mutate_keyed::<LockEntry, _, _>(LOCK_TABLE, &self.name, |row| {
                let now = now_ms();
                match row.as_mut() {
                    Some(entry) if entry.is_held(now) && entry.holder == holder => {
                        entry.count -= 1;
                        if entry.count == 0 {
                            entry.deadline_ms = 0;
                            Release::Freed
                        } else {
                            Release::Decremented(entry.count)
                        }
                    }
                    _ => Release::NotHeld,
                }
            })?;

        match outcome {
            Release::Freed => {
                debug!(lock = %self.name, owner, "Lock released");
                self.released.notify_waiters();
                Ok(true)
            }
            Release::Decremented(count) => {
                debug!(lock = %self.name, owner, count, "Lock reentrancy count decremented");
                Ok(true)
            }
            Release::NotHeld => {
                warn!(lock = %self.name, owner, "Release of a lock that is not held");
                Ok(false)
            }
        }
    }

    /// Extend `owner`'s lease; false if the lock is no longer held by `owner`
    pub fn renew(&self, owner: &str) -> NetplaneResult<bool> {
        let holder = self.holder(owner);
        let lease_ms = self.config.lease_ttl.as_millis() as u64;
        self.store
            .mutate_keyed::<LockEntry, _, _>(LOCK_TABLE, &self.name, |row| {
                let now = now_ms();
                match row.as_mut() {
                    Some(entry) if entry.is_held(now) && entry.holder == holder => {
                        entry.deadline_ms = now.saturating_add(lease_ms);
                        true
                    }
                    _ => false,
                }
            })
    }

    /// Fencing token of `owner`'s current hold
    pub fn fencing_token(&self, owner: &str) -> NetplaneResult<Option<u64>> {
        let holder = self.holder(owner);
        Ok(self
            .entry()?
            .filter(|entry| entry.is_held(now_ms()) && entry.holder == holder)
            .map(|entry| entry.fencing_token))
    }

    /// Whether `token` belongs to the live holder of this lock
    pub fn validate_token(&self, token: u64) -> NetplaneResult<bool> {
        Ok(self
            .entry()?
            .map(|entry| entry.is_held(now_ms()) && entry.fencing_token == token)
            .unwrap_or(false))
    }

    pub fn is_locked(&self) -> NetplaneResult<bool> {
        Ok(self
            .entry()?
            .map(|entry| entry.is_held(now_ms()))
            .unwrap_or(false))
    }

    pub fn entry(&self) -> NetplaneResult<Option<LockEntry>> {
        self.store.find_keyed(LOCK_TABLE, &self.name)
    }
}

/// Process-wide registry of named locks.
///
/// Handles are shared while referenced and pruned once every `Arc` is dropped,
/// so waiters on one node are woken directly by local releases.
pub struct LockManager {
    node_id: u64,
    store: Store,
    config: LockConfig,
    locks: Mutex<HashMap<String, Weak<GlobalLock>>>,
}

impl LockManager {
    pub fn new(node_id: u64, store: Store, config: LockConfig) -> Self {
        Self {
            node_id,
            store,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.config.default_timeout
    }

    pub fn lease_ttl(&self) -> Duration {
        self.config.lease_ttl
    }

    /// Handle for `name`, created on first reference
    pub fn get(&self, name: &str) -> Arc<GlobalLock> {
        let mut locks = self.locks.lock();
        if let Some(lock) = locks.get(name).and_then(Weak::upgrade) {
            return lock;
        }
        locks.retain(|_, lock| lock.strong_count() > 0);

        let lock = Arc::new(GlobalLock {
            name: name.to_string(),
            node_id: self.node_id,
            store: self.store.clone(),
            config: self.config.clone(),
            released: Notify::new(),
        });
        locks.insert(name.to_string(), Arc::downgrade(&lock));
        lock
    }

    /// Number of live handles held by this process
    pub fn local_count(&self) -> usize {
        self.locks
            .lock()
            .values()
            .filter(|lock| lock.strong_count() > 0)
            .count()
    }

    /// Every lock row in the shared store, held or not
    pub fn list(&self) -> NetplaneResult<Vec<LockEntry>> {
        Ok(self
            .store
            .list_keyed::<LockEntry>(LOCK_TABLE)?
            .into_iter()
            .map(|(_, entry)| entry)
            .collect())
    }
}
