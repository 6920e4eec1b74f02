use log::{debug, error, info, warn};
use serde_json::Deserializer;
use std::collections::HashSet;
use std::io::BufReader;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

use crate::core::{Block, Transaction};
use crate::error::{NodeError, Result};
use crate::network::message::HandshakePayload;
use crate::network::{Message, MessageKind, PeerRegistry};
use crate::node::ChainState;
use crate::storage::SnapshotStore;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const PEER_TIMEOUT: Duration = Duration::from_secs(60);

/// The gossip side of the node: one duplex JSON stream per peer,
/// handshake on connect, block/transaction relay and chain sync.
pub struct GossipServer {
    shared: Arc<RwLock<ChainState>>,
    store: Arc<SnapshotStore>,
    peers: Arc<PeerRegistry>,
    seen_txs: RwLock<HashSet<String>>,
    seen_blocks: RwLock<HashSet<String>>,
    node_info: String,
}

impl GossipServer {
    pub fn new(
        shared: Arc<RwLock<ChainState>>,
        store: Arc<SnapshotStore>,
        node_info: String,
    ) -> GossipServer {
        GossipServer {
            shared,
            store,
            peers: Arc::new(PeerRegistry::new()),
            seen_txs: RwLock::new(HashSet::new()),
            seen_blocks: RwLock::new(HashSet::new()),
            node_info,
        }
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    fn height(&self) -> u64 {
        self.shared
            .read()
            .expect("Chain state lock poisoned")
            .chain
            .height()
    }

    /// Dial a bootstrap peer. Failures surface to the caller and are not
    /// retried.
    pub fn connect(self: &Arc<Self>, addr: &str) -> Result<()> {
        let stream = TcpStream::connect(addr)
            .map_err(|e| NodeError::Network(format!("Failed to connect to {addr}: {e}")))?;
        self.adopt_connection(addr.to_string(), stream)
    }

    /// Register a connection, greet the peer and hand the read half to a
    /// dedicated handler thread.
    fn adopt_connection(self: &Arc<Self>, peer_id: String, stream: TcpStream) -> Result<()> {
        let reader = stream
            .try_clone()
            .map_err(|e| NodeError::Network(format!("Failed to clone stream: {e}")))?;
        self.peers.register(&peer_id, stream);

        let hello = Message::handshake(self.height(), &self.node_info)?;
        if let Err(e) = self.peers.send(&peer_id, &hello) {
            self.peers.evict(&peer_id);
            return Err(e);
        }

        let server = Arc::clone(self);
        let id = peer_id.clone();
        thread::spawn(move || {
            server.handle_connection(&id, reader);
        });
        info!("Connected to peer {peer_id}");
        Ok(())
    }

    /// Accept inbound peers forever. Runs on the caller's thread.
    pub fn accept_loop(self: &Arc<Self>, listener: TcpListener) {
        info!("Gossip listening on {:?}", listener.local_addr());
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let peer_id = match stream.peer_addr() {
                        Ok(addr) => addr.to_string(),
                        Err(e) => {
                            error!("Failed to get peer address: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = self.adopt_connection(peer_id, stream) {
                        error!("Failed to adopt inbound connection: {e}");
                    }
                }
                Err(e) => error!("Error accepting connection: {e}"),
            }
        }
    }

    /// Read frames until the stream closes, handling them in arrival
    /// order. The peer is evicted when the connection dies.
    fn handle_connection(self: &Arc<Self>, peer_id: &str, stream: TcpStream) {
        let reader = BufReader::new(stream);
        let frames = Deserializer::from_reader(reader).into_iter::<Message>();

        for frame in frames {
            let message = match frame {
                Ok(message) => message,
                Err(e) => {
                    debug!("Peer {peer_id} stream ended: {e}");
                    break;
                }
            };
            if let Err(e) = self.handle_message(peer_id, message) {
                // Gossip-induced failures are logged, never propagated
                warn!("Rejected message from {peer_id}: {e}");
            }
        }

        self.peers.evict(peer_id);
        info!("Peer {peer_id} disconnected");
    }

    fn handle_message(self: &Arc<Self>, peer_id: &str, message: Message) -> Result<()> {
        match message.kind {
            MessageKind::Handshake => {
                let payload: HandshakePayload = message.payload()?;
                debug!(
                    "Handshake from {peer_id}: height {} ({})",
                    payload.chain_height, payload.node_info
                );
                self.peers.update_height(peer_id, payload.chain_height);
                if payload.chain_height > self.height() {
                    self.peers.send(peer_id, &Message::request_chain())?;
                }
                Ok(())
            }
            MessageKind::RequestChain => {
                let response = {
                    let state = self.shared.read().expect("Chain state lock poisoned");
                    Message::receive_chain(state.chain.blocks())?
                };
                self.peers.send(peer_id, &response)
            }
            MessageKind::ReceiveChain => {
                let blocks: Vec<Block> = message.payload()?;
                self.handle_receive_chain(blocks)
            }
            MessageKind::RequestLatest => {
                let response = {
                    let state = self.shared.read().expect("Chain state lock poisoned");
                    Message::receive_latest(state.chain.latest())?
                };
                self.peers.send(peer_id, &response)
            }
            MessageKind::ReceiveLatest | MessageKind::NewBlock => {
                let block: Block = message.payload()?;
                self.handle_incoming_block(peer_id, block)
            }
            MessageKind::NewTransaction => {
                let tx: Transaction = message.payload()?;
                self.handle_incoming_transaction(peer_id, tx)
            }
            MessageKind::Ping => self.peers.send(peer_id, &Message::pong()),
            MessageKind::Pong => {
                self.peers.touch_pong(peer_id);
                Ok(())
            }
        }
    }

    /// Sync policy for an announced tip: append it if it directly extends
    /// ours, ignore it if it is behind, otherwise ask the network for
    /// full chains.
    fn handle_incoming_block(self: &Arc<Self>, peer_id: &str, block: Block) -> Result<()> {
        if self.block_already_seen(&block) {
            debug!("Dropping already-seen block {}", block.hash);
            return Ok(());
        }

        let appended = {
            let mut state = self.shared.write().expect("Chain state lock poisoned");
            let tip = state.chain.latest();

            if block.index == tip.index + 1 && block.previous_hash == tip.hash {
                state.apply_block(block.clone())?;
                self.store
                    .persist_or_warn(&state.chain, state.mining_reward);
                info!("Appended gossiped block {} ({})", block.index, block.hash);
                true
            } else {
                false
            }
        };

        if appended {
            self.mark_block_seen(&block);
            self.peers
                .broadcast(&Message::new_block(&block)?, Some(peer_id));
        } else {
            // Behind by more than one, or forked. Blocks we already hold
            // were dropped by the dedup check above, so anything landing
            // here is unknown: resync from everyone.
            info!(
                "Block {} does not extend our tip, requesting chains",
                block.index
            );
            self.peers.broadcast(&Message::request_chain(), None);
        }
        Ok(())
    }

    fn handle_receive_chain(&self, blocks: Vec<Block>) -> Result<()> {
        let mut state = self.shared.write().expect("Chain state lock poisoned");
        let offered = blocks.len();
        if state.adopt_chain(blocks)? {
            info!(
                "Replaced local chain with a {} block chain at height {}",
                offered,
                state.chain.height()
            );
            self.store
                .persist_or_warn(&state.chain, state.mining_reward);
        } else {
            debug!("Offered chain of {offered} blocks does not beat ours");
        }
        Ok(())
    }

    fn handle_incoming_transaction(self: &Arc<Self>, peer_id: &str, tx: Transaction) -> Result<()> {
        if self.tx_already_seen(&tx) {
            debug!("Dropping already-seen transaction {}", tx.tx_id());
            return Ok(());
        }

        {
            let mut state = self.shared.write().expect("Chain state lock poisoned");
            if state.chain.contains_transaction(tx.tx_id()) {
                return Ok(());
            }
            let state = &mut *state;
            state.mempool.add(tx.clone(), &state.utxo)?;
        }

        self.mark_tx_seen(&tx);
        self.peers
            .broadcast(&Message::new_transaction(&tx)?, Some(peer_id));
        Ok(())
    }

    fn block_already_seen(&self, block: &Block) -> bool {
        if self
            .seen_blocks
            .read()
            .expect("Seen block set lock poisoned")
            .contains(&block.hash)
        {
            return true;
        }
        let state = self.shared.read().expect("Chain state lock poisoned");
        state.chain.block_by_hash(&block.hash).is_some()
    }

    fn mark_block_seen(&self, block: &Block) {
        self.seen_blocks
            .write()
            .expect("Seen block set lock poisoned")
            .insert(block.hash.clone());
    }

    fn tx_already_seen(&self, tx: &Transaction) -> bool {
        if self
            .seen_txs
            .read()
            .expect("Seen transaction set lock poisoned")
            .contains(tx.tx_id())
        {
            return true;
        }
        let state = self.shared.read().expect("Chain state lock poisoned");
        state.mempool.contains(tx.tx_id())
    }

    fn mark_tx_seen(&self, tx: &Transaction) {
        self.seen_txs
            .write()
            .expect("Seen transaction set lock poisoned")
            .insert(tx.tx_id().to_string());
    }

    /// Announce a locally produced block or transaction to every peer.
    pub fn announce_block(&self, block: &Block) {
        self.mark_block_seen(block);
        match Message::new_block(block) {
            Ok(message) => self.peers.broadcast(&message, None),
            Err(e) => error!("Failed to encode block announcement: {e}"),
        }
    }

    pub fn announce_transaction(&self, tx: &Transaction) {
        self.mark_tx_seen(tx);
        match Message::new_transaction(tx) {
            Ok(message) => self.peers.broadcast(&message, None),
            Err(e) => error!("Failed to encode transaction announcement: {e}"),
        }
    }

    /// Initial sync: ask the peer reporting the tallest chain for all of
    /// it.
    pub fn synchronize(&self) {
        match self.peers.best_peer() {
            Some((peer_id, height)) if height > self.height() => {
                info!("Synchronizing from {peer_id} at height {height}");
                if let Err(e) = self.peers.send(&peer_id, &Message::request_chain()) {
                    warn!("Synchronization request failed: {e}");
                }
            }
            Some(_) => debug!("No peer is ahead of us, skipping initial sync"),
            None => debug!("No peers connected, skipping initial sync"),
        }
    }

    /// Ping every peer on a timer and terminate the silent ones.
    pub fn start_heartbeat(self: &Arc<Self>) {
        let server = Arc::clone(self);
        thread::spawn(move || loop {
            thread::sleep(HEARTBEAT_INTERVAL);
            server.peers.broadcast(&Message::ping(), None);
            for peer_id in server.peers.stale(PEER_TIMEOUT) {
                warn!("Peer {peer_id} missed its heartbeat, terminating");
                server.peers.evict(&peer_id);
            }
        });
    }
}

/// Fire-and-forget a signed transaction at a node's gossip port. Used by
/// the CLI `send` command; the node validates, admits and relays it.
pub fn push_transaction(addr: &str, tx: &Transaction) -> Result<()> {
    use std::io::Write;

    let mut stream = TcpStream::connect(addr)
        .map_err(|e| NodeError::Network(format!("Failed to connect to {addr}: {e}")))?;
    let message = Message::new_transaction(tx)?;
    serde_json::to_writer(&mut stream, &message)
        .map_err(|e| NodeError::Network(format!("Failed to send transaction: {e}")))?;
    stream
        .flush()
        .map_err(|e| NodeError::Network(format!("Failed to flush transaction: {e}")))?;
    Ok(())
}
