//! Process-wide list of live peer endpoints.

use std::sync::Mutex;

/// Ordered list of the ports of all live generals, oldest first.
///
/// Only the operator shell mutates it; generals read snapshots. A snapshot
/// can go stale across a network call, so callers treat unreachable entries
/// as dead peers rather than assuming the list is current.
pub struct ClusterRegistry {
    ports: Mutex<Vec<u16>>,
}

impl ClusterRegistry {
    pub fn new() -> ClusterRegistry {
        ClusterRegistry {
            ports: Mutex::new(Vec::new()),
        }
    }

    /// Appends a freshly started general.
    pub fn register(&self, port: u16) {
        self.ports.lock().unwrap().push(port);
    }

    /// Drops a killed general; unknown ports are ignored.
    pub fn deregister(&self, port: u16) {
        self.ports.lock().unwrap().retain(|&entry| entry != port);
    }

    /// The current membership, in creation order.
    pub fn snapshot(&self) -> Vec<u16> {
        self.ports.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.ports.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ClusterRegistry {
    fn default() -> ClusterRegistry {
        ClusterRegistry::new()
    }
}
