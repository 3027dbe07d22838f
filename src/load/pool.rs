//! The shared pool of load-generating connections.

use super::connection::ConnectionHandle;
use std::sync::{Arc, Mutex, MutexGuard};

/// An append-only, mutex-guarded sequence of connection handles.
///
/// Invariants: the pool only grows while a test is running; handles are
/// never reordered; the handle at index 0 is the designated self-probe
/// connection. Every read or write - including length queries that feed a
/// decision - happens under the lock, which the guard type enforces.
#[derive(Debug, Default)]
pub struct ConnectionPool {
    connections: Mutex<Vec<Arc<ConnectionHandle>>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self { connections: Mutex::new(Vec::new()) }
    }

    /// Acquire the pool lock.
    pub fn lock(&self) -> MutexGuard<'_, Vec<Arc<ConnectionHandle>>> {
        self.connections.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Client;

    #[test]
    fn test_pool_appends_in_order() {
        let pool = ConnectionPool::new();
        let first = ConnectionHandle::new(Client::new());
        let second = ConnectionHandle::new(Client::new());

        {
            let mut guard = pool.lock();
            guard.push(first.clone());
            guard.push(second.clone());
        }

        let guard = pool.lock();
        assert_eq!(guard.len(), 2);
        assert_eq!(guard[0].id(), first.id());
        assert_eq!(guard[1].id(), second.id());
    }
}
