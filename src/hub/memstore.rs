use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use crate::core::error::{Error, Result};
use crate::hub::{ChangeEvent, CoordStore, LeaseId};

/// How long a waiter parks before sweeping leases again.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);
/// A change wait gives up (and reports the unchanged revision) after this.
const WATCH_WINDOW: Duration = Duration::from_secs(25);

/// Embedded single-node coordination store: lease-scoped keys, prefix
/// listing, revision watch. Leases expire lazily; every operation and
/// every parked waiter sweeps, so a dead shard's key vanishes within a
/// sweep interval without a background reaper.
pub struct MemStore {
    inner: Mutex<MemInner>,
    revision: AtomicU64,
    events: broadcast::Sender<ChangeEvent>,
}

struct MemInner {
    /// key -> owning lease
    keys: BTreeMap<String, LeaseId>,
    /// lease -> (deadline, ttl)
    leases: HashMap<u64, (Instant, Duration)>,
    next_lease: u64,
}

impl Default for MemStore {
    fn default() -> Self {
        let (events, _) = broadcast::channel(256);
        MemStore {
            inner: Mutex::new(MemInner {
                keys: BTreeMap::new(),
                leases: HashMap::new(),
                next_lease: 0,
            }),
            revision: AtomicU64::new(0),
            events,
        }
    }
}

impl MemStore {
    pub fn new() -> Self {
        MemStore::default()
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    fn bump(&self, key: &str) -> u64 {
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.events.send(ChangeEvent {
            key: key.to_string(),
            revision,
        });
        revision
    }

    /// Drop expired leases and every key they owned.
    fn sweep(&self) {
        let expired_keys: Vec<String> = {
            let mut inner = self.inner.lock();
            let now = Instant::now();
            let dead: Vec<u64> = inner
                .leases
                .iter()
                .filter(|(_, (deadline, _))| *deadline <= now)
                .map(|(id, _)| *id)
                .collect();
            if dead.is_empty() {
                return;
            }
            for id in &dead {
                inner.leases.remove(id);
            }
            let keys: Vec<String> = inner
                .keys
                .iter()
                .filter(|(_, lease)| dead.contains(&lease.0))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &keys {
                inner.keys.remove(key);
            }
            keys
        };
        for key in expired_keys {
            debug!(key = %key, "lease expired, key dropped");
            self.bump(&key);
        }
    }
}

impl CoordStore for MemStore {
    async fn grant(&self, ttl: Duration) -> Result<LeaseId> {
        self.sweep();
        let mut inner = self.inner.lock();
        inner.next_lease += 1;
        let id = inner.next_lease;
        inner.leases.insert(id, (Instant::now() + ttl, ttl));
        Ok(LeaseId(id))
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<()> {
        self.sweep();
        let mut inner = self.inner.lock();
        match inner.leases.get_mut(&lease.0) {
            Some((deadline, ttl)) => {
                *deadline = Instant::now() + *ttl;
                Ok(())
            }
            None => Err(Error::LeaseLost(lease.0)),
        }
    }

    async fn put(&self, key: String, lease: LeaseId) -> Result<()> {
        self.sweep();
        {
            let mut inner = self.inner.lock();
            if !inner.leases.contains_key(&lease.0) {
                return Err(Error::LeaseLost(lease.0));
            }
            inner.keys.insert(key.clone(), lease);
        }
        self.bump(&key);
        Ok(())
    }

    async fn delete(&self, key: String) -> Result<()> {
        self.sweep();
        let removed = self.inner.lock().keys.remove(&key).is_some();
        if removed {
            self.bump(&key);
        }
        Ok(())
    }

    async fn list_prefix(&self, prefix: String) -> Result<Vec<String>> {
        self.sweep();
        let inner = self.inner.lock();
        Ok(inner
            .keys
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn wait_change(&self, _prefix: String, since: u64) -> Result<u64> {
        let started = Instant::now();
        let mut rx = self.events.subscribe();
        loop {
            self.sweep();
            let revision = self.revision();
            if revision > since || started.elapsed() >= WATCH_WINDOW {
                return Ok(revision);
            }
            match tokio::time::timeout(SWEEP_INTERVAL, rx.recv()).await {
                Ok(Ok(event)) => return Ok(event.revision),
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => {
                    return Ok(self.revision());
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Ok(self.revision());
                }
                Err(_) => {
                    // Timed out; sweep and re-check.
                }
            }
        }
    }
}
