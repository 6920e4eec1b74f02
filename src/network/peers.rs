use log::{debug, error};
use std::collections::HashMap;
use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::error::{NodeError, Result};
use crate::network::Message;

struct PeerEntry {
    stream: Arc<Mutex<TcpStream>>,
    chain_height: u64,
    last_pong: Instant,
}

/// Connected peers keyed by connection id, with their writer half, last
/// reported chain height and liveness bookkeeping.
pub struct PeerRegistry {
    inner: RwLock<HashMap<String, PeerEntry>>,
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerRegistry {
    pub fn new() -> PeerRegistry {
        PeerRegistry {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, id: &str, stream: TcpStream) {
        let mut inner = self
            .inner
            .write()
            .expect("Peer registry lock poisoned");
        inner.insert(
            id.to_string(),
            PeerEntry {
                stream: Arc::new(Mutex::new(stream)),
                chain_height: 0,
                last_pong: Instant::now(),
            },
        );
    }

    /// Drop the peer and shut its socket down, which also unblocks the
    /// reader thread serving the connection.
    pub fn evict(&self, id: &str) {
        let mut inner = self
            .inner
            .write()
            .expect("Peer registry lock poisoned");
        if let Some(entry) = inner.remove(id) {
            if let Ok(stream) = entry.stream.lock() {
                let _ = stream.shutdown(Shutdown::Both);
            }
            debug!("Peer {id} removed from the peer table");
        }
    }

    pub fn is_known(&self, id: &str) -> bool {
        self.inner
            .read()
            .expect("Peer registry lock poisoned")
            .contains_key(id)
    }

    pub fn update_height(&self, id: &str, chain_height: u64) {
        let mut inner = self
            .inner
            .write()
            .expect("Peer registry lock poisoned");
        if let Some(entry) = inner.get_mut(id) {
            entry.chain_height = chain_height;
        }
    }

    pub fn touch_pong(&self, id: &str) {
        let mut inner = self
            .inner
            .write()
            .expect("Peer registry lock poisoned");
        if let Some(entry) = inner.get_mut(id) {
            entry.last_pong = Instant::now();
        }
    }

    /// Peers that have not answered a ping within `timeout`.
    pub fn stale(&self, timeout: Duration) -> Vec<String> {
        let inner = self
            .inner
            .read()
            .expect("Peer registry lock poisoned");
        inner
            .iter()
            .filter(|(_, entry)| entry.last_pong.elapsed() > timeout)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// The peer reporting the tallest chain.
    pub fn best_peer(&self) -> Option<(String, u64)> {
        let inner = self
            .inner
            .read()
            .expect("Peer registry lock poisoned");
        inner
            .iter()
            .max_by_key(|(_, entry)| entry.chain_height)
            .map(|(id, entry)| (id.clone(), entry.chain_height))
    }

    pub fn send(&self, id: &str, message: &Message) -> Result<()> {
        let stream = {
            let inner = self
                .inner
                .read()
                .expect("Peer registry lock poisoned");
            let entry = inner
                .get(id)
                .ok_or_else(|| NodeError::Network(format!("Unknown peer {id}")))?;
            Arc::clone(&entry.stream)
        };

        let mut stream = stream.lock().expect("Peer stream lock poisoned");
        serde_json::to_writer(&mut *stream, message)
            .map_err(|e| NodeError::Network(format!("Failed to send to {id}: {e}")))?;
        stream
            .flush()
            .map_err(|e| NodeError::Network(format!("Failed to flush to {id}: {e}")))?;
        Ok(())
    }

    /// Send to every peer, optionally skipping the one the message came
    /// from. Send failures are logged, not propagated; the heartbeat
    /// evicts dead peers.
    pub fn broadcast(&self, message: &Message, except: Option<&str>) {
        let ids: Vec<String> = {
            let inner = self
                .inner
                .read()
                .expect("Peer registry lock poisoned");
            inner.keys().cloned().collect()
        };

        for id in ids {
            if Some(id.as_str()) == except {
                continue;
            }
            if let Err(e) = self.send(&id, message) {
                error!("Broadcast to {id} failed: {e}");
            }
        }
    }

    pub fn peer_ids(&self) -> Vec<String> {
        self.inner
            .read()
            .expect("Peer registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .expect("Peer registry lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
