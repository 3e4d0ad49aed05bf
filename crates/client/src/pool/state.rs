use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use futures::channel::oneshot;
use tracing::trace;

use crate::pool::{Connection, PoolKey};

/// What a waiting acquisition is handed when capacity frees up.
pub(crate) enum Grant {
    /// An idle connection of the waiter's key, already counted as outstanding.
    Idle(Connection),
    /// A reserved slot; the waiter establishes the connection itself.
    Slot,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Limits {
    pub(crate) max_connections: usize,
    /// `0` disables the per-key bound.
    pub(crate) max_per_key: usize,
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<Grant>,
}

/// Slot accounting, idle connections and the wait queues of a pool.
///
/// Every live connection, idle, loaned or still being established, holds one
/// slot of its key. The owner keeps this behind a mutex that is never held
/// across a suspension point.
#[derive(Default)]
pub(crate) struct PoolState {
    idle: HashMap<PoolKey, VecDeque<Connection>>,
    outstanding: HashMap<PoolKey, usize>,
    total: usize,
    waiters: HashMap<PoolKey, VecDeque<Waiter>>,
    next_waiter: u64,
    closed: bool,
}

impl PoolState {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn outstanding(&self, key: &PoolKey) -> usize {
        self.outstanding.get(key).copied().unwrap_or(0)
    }

    pub(crate) fn total(&self) -> usize {
        self.total
    }

    pub(crate) fn idle_count(&self) -> usize {
        self.idle.values().map(VecDeque::len).sum()
    }

    pub(crate) fn waiting(&self, key: &PoolKey) -> usize {
        self.waiters.get(key).map_or(0, VecDeque::len)
    }

    pub(crate) fn waiting_total(&self) -> usize {
        self.waiters.values().map(VecDeque::len).sum()
    }

    pub(crate) fn key_has_room(&self, key: &PoolKey, limits: Limits) -> bool {
        limits.max_per_key == 0 || self.outstanding(key) < limits.max_per_key
    }

    pub(crate) fn has_capacity(&self, key: &PoolKey, limits: Limits) -> bool {
        self.key_has_room(key, limits) && self.total < limits.max_connections
    }

    pub(crate) fn reserve(&mut self, key: &PoolKey) {
        *self.outstanding.entry(key.clone()).or_insert(0) += 1;
        self.total += 1;
    }

    pub(crate) fn forget(&mut self, key: &PoolKey) {
        if let Some(count) = self.outstanding.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                self.outstanding.remove(key);
            }
            self.total -= 1;
        }
    }

    /// Takes the most recently used idle connection of `key`.
    pub(crate) fn pop_idle(&mut self, key: &PoolKey) -> Option<Connection> {
        let idle = self.idle.get_mut(key)?;
        let conn = idle.pop_back();
        if idle.is_empty() {
            self.idle.remove(key);
        }
        conn
    }

    pub(crate) fn push_idle(&mut self, conn: Connection) {
        self.idle.entry(conn.key().clone()).or_default().push_back(conn);
    }

    /// Removes the least recently used idle connection of any other key, freeing its slot.
    pub(crate) fn evict_idle_except(&mut self, key: &PoolKey) -> Option<Connection> {
        let victim = self
            .idle
            .iter()
            .filter(|(idle_key, _)| *idle_key != key)
            .filter_map(|(idle_key, idle)| idle.front().map(|conn| (idle_key, conn.last_used())))
            .min_by_key(|(_, last_used)| *last_used)
            .map(|(idle_key, _)| idle_key.clone())?;

        let idle = self.idle.get_mut(&victim)?;
        let conn = idle.pop_front();
        if idle.is_empty() {
            self.idle.remove(&victim);
        }
        if conn.is_some() {
            self.forget(&victim);
        }
        conn
    }

    /// Removes idle connections unused for at least `idle_timeout`.
    pub(crate) fn take_expired(&mut self, idle_timeout: Duration) -> Vec<Connection> {
        let mut expired = Vec::new();
        for idle in self.idle.values_mut() {
            while idle.front().is_some_and(|conn| conn.last_used().elapsed() >= idle_timeout) {
                expired.extend(idle.pop_front());
            }
        }
        self.idle.retain(|_, idle| !idle.is_empty());
        for conn in &expired {
            let key = conn.key().clone();
            self.forget(&key);
        }
        expired
    }

    pub(crate) fn enqueue(&mut self, key: &PoolKey) -> (u64, oneshot::Receiver<Grant>) {
        let (tx, rx) = oneshot::channel();
        let id = self.next_waiter;
        self.next_waiter += 1;
        self.waiters.entry(key.clone()).or_default().push_back(Waiter { id, tx });
        (id, rx)
    }

    /// Drops a waiter from its queue. `false` means it was already served.
    pub(crate) fn remove_waiter(&mut self, key: &PoolKey, id: u64) -> bool {
        let Some(queue) = self.waiters.get_mut(key) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|waiter| waiter.id != id);
        let removed = queue.len() != before;
        if queue.is_empty() {
            self.waiters.remove(key);
        }
        removed
    }

    /// Hands `grant` to the longest waiting acquisition of `key`.
    fn offer(&mut self, key: &PoolKey, mut grant: Grant) -> Result<(), Grant> {
        let Some(queue) = self.waiters.get_mut(key) else {
            return Err(grant);
        };

        let result = loop {
            let Some(waiter) = queue.pop_front() else {
                break Err(grant);
            };
            match waiter.tx.send(grant) {
                Ok(()) => {
                    trace!(key = %key, waiter = waiter.id, "grant handed to waiter");
                    break Ok(());
                }
                Err(returned) => grant = returned,
            }
        };

        if queue.is_empty() {
            self.waiters.remove(key);
        }
        result
    }

    /// Offers an idle connection to a waiter of its key, giving it back if nobody waits.
    pub(crate) fn offer_idle(&mut self, conn: Connection) -> Option<Connection> {
        let key = conn.key().clone();
        match self.offer(&key, Grant::Idle(conn)) {
            Ok(()) | Err(Grant::Slot) => None,
            Err(Grant::Idle(conn)) => Some(conn),
        }
    }

    /// Serves waiting acquisitions from idle connections and free capacity.
    ///
    /// Idle connections of other keys are evicted when only the global bound
    /// stands in a waiter's way. The evicted connections are returned so they
    /// can be closed outside the lock.
    pub(crate) fn dispatch(&mut self, limits: Limits) -> Vec<Connection> {
        let mut evicted = Vec::new();
        let keys: Vec<PoolKey> = self.waiters.keys().cloned().collect();

        for key in keys {
            while self.waiting(&key) > 0 {
                if let Some(conn) = self.pop_idle(&key) {
                    if let Some(conn) = self.offer_idle(conn) {
                        self.push_idle(conn);
                        break;
                    }
                    continue;
                }

                if !self.has_capacity(&key, limits) {
                    if self.key_has_room(&key, limits) {
                        if let Some(conn) = self.evict_idle_except(&key) {
                            evicted.push(conn);
                            continue;
                        }
                    }
                    break;
                }

                self.reserve(&key);
                if self.offer(&key, Grant::Slot).is_err() {
                    self.forget(&key);
                    break;
                }
            }
        }

        evicted
    }

    /// Marks the pool closed, failing every waiter and handing back all idle connections.
    pub(crate) fn close(&mut self) -> Vec<Connection> {
        self.closed = true;
        self.waiters.clear();

        let idle: Vec<Connection> = self.idle.drain().flat_map(|(_, idle)| idle).collect();
        for conn in &idle {
            let key = conn.key().clone();
            self.forget(&key);
        }
        idle
    }
}
