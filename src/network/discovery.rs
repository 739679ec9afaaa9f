//! Connection-pool discovery: address sets and the dial queue.

use std::collections::{HashMap, HashSet};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::debug;

/// Capacity of the channel buffering unconnected addresses for the
/// dial worker.
pub const MAX_POOL_SIZE: usize = 200;

/// Dial attempts before an address is written off as bad.
pub const CONN_RETRIES: i32 = 3;

#[derive(Default)]
struct AddressSets {
    /// Addresses we know about but are not connected to, with their
    /// remaining retry budget.
    unconnected: HashMap<String, i32>,
    connected: HashSet<String>,
    /// Addresses that completed a handshake at least once.
    good: HashSet<String>,
    bad: HashSet<String>,
}

/// Tracks peer addresses through their lifecycle:
/// unconnected → connected → good, or unconnected → bad after the retry
/// budget runs out. The server's discovery worker consumes the pool and
/// request channels taken via [`Discovery::take_channels`].
pub struct Discovery {
    sets: RwLock<AddressSets>,
    pool_tx: mpsc::Sender<String>,
    request_tx: mpsc::Sender<usize>,
    receivers: Mutex<Option<(mpsc::Receiver<String>, mpsc::Receiver<usize>)>>,
}

impl Discovery {
    pub fn new() -> Self {
        let (pool_tx, pool_rx) = mpsc::channel(MAX_POOL_SIZE);
        let (request_tx, request_rx) = mpsc::channel(16);
        Discovery {
            sets: RwLock::new(AddressSets::default()),
            pool_tx,
            request_tx,
            receivers: Mutex::new(Some((pool_rx, request_rx))),
        }
    }

    /// Hands the worker its ends of the pool and request channels. May
    /// be called once.
    pub fn take_channels(&self) -> Option<(mpsc::Receiver<String>, mpsc::Receiver<usize>)> {
        self.receivers.lock().take()
    }

    /// Ingests addresses, skipping any already known in some capacity.
    pub fn backfill<I: IntoIterator<Item = String>>(&self, addrs: I) {
        let mut sets = self.sets.write();
        for addr in addrs {
            if sets.bad.contains(&addr)
                || sets.connected.contains(&addr)
                || sets.unconnected.get(&addr).is_some_and(|left| *left > 0)
            {
                continue;
            }
            sets.unconnected.insert(addr.clone(), CONN_RETRIES);
            // A full pool just drops the address; it stays unconnected
            // and may be queued again later.
            let _ = self.pool_tx.try_send(addr);
        }
    }

    /// Number of addresses currently buffered for dialing.
    pub fn pool_count(&self) -> usize {
        MAX_POOL_SIZE - self.pool_tx.capacity()
    }

    /// Asks the worker to dial up to `n` fresh addresses.
    pub fn request_remote(&self, n: usize) {
        let _ = self.request_tx.try_send(n);
    }

    /// A dial failed: burn one retry, requeue or give up on the address.
    pub fn register_bad(&self, addr: &str) {
        let mut sets = self.sets.write();
        let left = sets.unconnected.entry(addr.to_string()).or_insert(0);
        *left -= 1;
        if *left > 0 {
            let _ = self.pool_tx.try_send(addr.to_string());
        } else {
            sets.unconnected.remove(addr);
            sets.bad.insert(addr.to_string());
            debug!(addr, "address marked bad");
        }
    }

    /// A dial succeeded; the address is now occupied by a connection.
    pub fn register_connected(&self, addr: &str) {
        let mut sets = self.sets.write();
        sets.unconnected.remove(addr);
        sets.connected.insert(addr.to_string());
    }

    /// The peer behind the address completed a handshake.
    pub fn register_good(&self, addr: &str) {
        self.sets.write().good.insert(addr.to_string());
    }

    /// A graceful disconnect: back to the unconnected pool, no penalty.
    pub fn unregister_connected(&self, addr: &str) {
        {
            let mut sets = self.sets.write();
            sets.connected.remove(addr);
        }
        self.backfill([addr.to_string()]);
    }

    pub fn is_connected(&self, addr: &str) -> bool {
        self.sets.read().connected.contains(addr)
    }

    pub fn unconnected_peers(&self) -> Vec<String> {
        self.sets.read().unconnected.keys().cloned().collect()
    }

    pub fn bad_peers(&self) -> Vec<String> {
        self.sets.read().bad.iter().cloned().collect()
    }

    pub fn good_peers(&self) -> Vec<String> {
        self.sets.read().good.iter().cloned().collect()
    }
}

impl Default for Discovery {
    fn default() -> Self {
        Discovery::new()
    }
}
