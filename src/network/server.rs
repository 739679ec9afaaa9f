//! The p2p server: peer registry, protocol handlers and relay.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::core::block::Block;
use crate::core::mempool::{Feer, PoolItem};
use crate::core::transaction::{Transaction, TxData};
use crate::core::{Blockchain, VerifyError};

use super::block_queue::{self, BlockQueue};
use super::discovery::Discovery;
use super::message::{Command, FrameHeader, Message, Payload, FRAME_HEADER_SIZE, MAX_PAYLOAD_SIZE};
use super::payload::{
    AddrWithTime, AddressList, GetBlocksPayload, Inventory, InvType, PingPayload, VersionPayload,
};
use super::peer::TcpPeer;
use super::{NetworkError, NetworkResult};

/// Request more addresses when the dial pool drops below this.
const MIN_POOL_COUNT: usize = 30;

/// Blocks requested per `getdata` round.
const MAX_BLOCK_BATCH: usize = 200;

/// Addresses handed out per `getaddr`.
const MAX_ADDRS_TO_SEND: usize = 200;

/// Outcome of handing a transaction to [`Server::relay_tx`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayReason {
    Succeed,
    AlreadyExists,
    OutOfMemory,
    UnableToVerify,
    Invalid,
    PolicyFail,
}

/// The local node. Owns the peer registry and every network task; all of
/// them stop when [`Server::shutdown`] cancels the token.
pub struct Server {
    config: NodeConfig,
    magic: u32,
    /// Our nonce, telling our own connections apart from loopbacks.
    id: u32,
    chain: Arc<Blockchain>,
    discovery: Arc<Discovery>,
    peers: RwLock<HashMap<SocketAddr, Arc<TcpPeer>>>,
    block_queue: BlockQueue,
    register_tx: mpsc::Sender<Arc<TcpPeer>>,
    unregister_tx: mpsc::Sender<(Arc<TcpPeer>, String)>,
    startup: Mutex<Option<StartupChannels>>,
    cancel: CancellationToken,
}

/// Receiver ends handed to the background tasks on start.
struct StartupChannels {
    register_rx: mpsc::Receiver<Arc<TcpPeer>>,
    unregister_rx: mpsc::Receiver<(Arc<TcpPeer>, String)>,
    block_rx: mpsc::Receiver<Block>,
}

impl Server {
    pub fn new(config: NodeConfig, chain: Arc<Blockchain>) -> Arc<Self> {
        let (register_tx, register_rx) = mpsc::channel(16);
        let (unregister_tx, unregister_rx) = mpsc::channel(16);
        let (block_queue, block_rx) = BlockQueue::new();
        let magic = chain.protocol().magic;
        Arc::new(Server {
            config,
            magic,
            id: rand::thread_rng().gen(),
            chain,
            discovery: Arc::new(Discovery::new()),
            peers: RwLock::new(HashMap::new()),
            block_queue,
            register_tx,
            unregister_tx,
            startup: Mutex::new(Some(StartupChannels {
                register_rx,
                unregister_rx,
                block_rx,
            })),
            cancel: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn chain(&self) -> &Arc<Blockchain> {
        &self.chain
    }

    pub fn discovery(&self) -> &Arc<Discovery> {
        &self.discovery
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    /// Binds the listener and spawns every background task. Returns the
    /// bound address (useful when the configured port is 0).
    pub async fn start(self: &Arc<Self>) -> NetworkResult<SocketAddr> {
        let bind = format!("{}:{}", self.config.address, self.config.port);
        let listener = TcpListener::bind(&bind).await?;
        let local = listener.local_addr()?;
        info!(
            %local,
            height = self.chain.block_height(),
            header_height = self.chain.header_height(),
            "node started"
        );

        let channels = self
            .startup
            .lock()
            .take()
            .expect("server started only once");
        let (pool_rx, request_rx) = self
            .discovery
            .take_channels()
            .expect("discovery channels untouched");

        self.discovery
            .backfill(self.chain.protocol().seed_list.iter().cloned());

        tokio::spawn(self.clone().accept_loop(listener));
        tokio::spawn(
            self.clone()
                .run_loop(channels.register_rx, channels.unregister_rx),
        );
        tokio::spawn(self.clone().discovery_worker(pool_rx, request_rx));
        tokio::spawn(block_queue::run(
            self.chain.clone(),
            channels.block_rx,
            self.cancel.clone(),
        ));
        tokio::spawn(self.clone().chain_housekeeping());
        Ok(local)
    }

    /// Cancels every task and disconnects every peer.
    pub fn shutdown(&self) {
        info!(peers = self.peer_count(), "shutting down server");
        self.cancel.cancel();
    }

    // -- background tasks --------------------------------------------------

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        if let Err(err) = self.spawn_peer(stream, false).await {
                            warn!(%err, "failed to set up inbound peer");
                        }
                    }
                    Err(err) => {
                        warn!(%err, "accept error");
                    }
                },
            }
        }
    }

    async fn run_loop(
        self: Arc<Self>,
        mut register_rx: mpsc::Receiver<Arc<TcpPeer>>,
        mut unregister_rx: mpsc::Receiver<(Arc<TcpPeer>, String)>,
    ) {
        let mut maintain = interval(Duration::from_secs(1));
        maintain.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let peers: Vec<Arc<TcpPeer>> =
                        self.peers.write().drain().map(|(_, p)| p).collect();
                    for peer in peers {
                        debug!(addr = %peer.remote_addr(), "server shutdown");
                        peer.disconnect();
                    }
                    return;
                }
                _ = maintain.tick() => {
                    if self.peer_count() < self.config.min_peers {
                        self.discovery.request_remote(self.config.attempt_conn_peers);
                    }
                }
                registered = register_rx.recv() => {
                    let Some(peer) = registered else { return };
                    if let Err(err) = self.send_version(&peer).await {
                        warn!(addr = %peer.remote_addr(), %err, "version send failed");
                        peer.disconnect();
                        continue;
                    }
                    let count = {
                        let mut peers = self.peers.write();
                        peers.insert(peer.remote_addr(), peer.clone());
                        peers.len()
                    };
                    info!(addr = %peer.remote_addr(), count, "new peer connected");
                    if count > self.config.max_peers {
                        debug!(addr = %peer.remote_addr(), "max peers reached");
                        peer.disconnect();
                    }
                }
                dropped = unregister_rx.recv() => {
                    let Some((peer, reason)) = dropped else { return };
                    if self.peers.write().remove(&peer.remote_addr()).is_some() {
                        let addr = peer.peer_addr().to_string();
                        self.discovery.unregister_connected(&addr);
                        info!(
                            addr = %peer.remote_addr(),
                            reason,
                            peers = self.peer_count(),
                            "peer disconnected"
                        );
                    }
                }
            }
        }
    }

    async fn discovery_worker(
        self: Arc<Self>,
        mut pool_rx: mpsc::Receiver<String>,
        mut request_rx: mpsc::Receiver<usize>,
    ) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                requested = request_rx.recv() => {
                    let Some(n) = requested else { return };
                    for _ in 0..n {
                        let Ok(addr) = pool_rx.try_recv() else { break };
                        if self.discovery.is_connected(&addr) {
                            continue;
                        }
                        let server = self.clone();
                        tokio::spawn(async move { server.try_dial(addr).await });
                    }
                }
            }
        }
    }

    async fn try_dial(self: Arc<Self>, addr: String) {
        match timeout(self.config.dial_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                self.discovery.register_connected(&addr);
                if let Err(err) = self.spawn_peer(stream, true).await {
                    warn!(addr, %err, "failed to set up outbound peer");
                }
            }
            _ => {
                self.discovery.register_bad(&addr);
                self.discovery.request_remote(1);
            }
        }
    }

    async fn chain_housekeeping(self: Arc<Self>) {
        let mut tick = interval(Duration::from_secs(5));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    // Final flush before going away.
                    if let Err(err) = self.chain.persist() {
                        warn!(%err, "final persist failed");
                    }
                    return;
                }
                _ = tick.tick() => {
                    if let Err(err) = self.chain.persist() {
                        warn!(%err, "chain persist failed");
                    }
                }
            }
        }
    }

    // -- peer plumbing -----------------------------------------------------

    /// Wires up a fresh connection: writer, reader and protocol tasks
    /// plus registration with the server loop.
    async fn spawn_peer(self: &Arc<Self>, stream: TcpStream, outbound: bool) -> NetworkResult<()> {
        let remote = stream.peer_addr()?;
        let (read_half, mut write_half) = stream.into_split();
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(100);
        let peer = Arc::new(TcpPeer::new(
            remote,
            outbound,
            out_tx,
            self.cancel.child_token(),
        ));

        let writer_peer = peer.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_peer.cancel.cancelled() => return,
                    queued = out_rx.recv() => {
                        let Some(msg) = queued else { return };
                        let bytes = match msg.encode() {
                            Ok(bytes) => bytes,
                            Err(err) => {
                                warn!(%err, "dropping unencodable message");
                                continue;
                            }
                        };
                        if write_half.write_all(&bytes).await.is_err() {
                            writer_peer.disconnect();
                            return;
                        }
                    }
                }
            }
        });

        let (in_tx, in_rx) = mpsc::channel::<Message>(100);
        let reader_peer = peer.clone();
        let server = self.clone();
        tokio::spawn(async move {
            let reason = match server.read_frames(&reader_peer, read_half, in_tx).await {
                Ok(()) => "connection closed".to_string(),
                Err(err) => err.to_string(),
            };
            reader_peer.disconnect();
            let _ = server.unregister_tx.send((reader_peer, reason)).await;
        });

        tokio::spawn(self.clone().protocol_loop(peer.clone(), in_rx));

        self.register_tx
            .send(peer)
            .await
            .map_err(|_| NetworkError::ServerShutdown)
    }

    /// Drains frames off the socket into the peer's inbound queue.
    async fn read_frames(
        &self,
        peer: &Arc<TcpPeer>,
        mut read_half: OwnedReadHalf,
        in_tx: mpsc::Sender<Message>,
    ) -> NetworkResult<()> {
        let mut header_buf = [0u8; FRAME_HEADER_SIZE];
        loop {
            tokio::select! {
                _ = peer.cancel.cancelled() => return Ok(()),
                read = read_half.read_exact(&mut header_buf) => { read?; }
            }
            let header = FrameHeader::decode(&header_buf);
            if header.length as usize > MAX_PAYLOAD_SIZE {
                return Err(NetworkError::PayloadTooLarge(header.length as usize));
            }
            let mut payload = vec![0u8; header.length as usize];
            read_half.read_exact(&mut payload).await?;
            match Message::from_frame(&header, &payload, self.magic)? {
                Some(msg) => {
                    if in_tx.send(msg).await.is_err() {
                        return Ok(());
                    }
                }
                None => debug!(addr = %peer.remote_addr(), "ignoring unknown command"),
            }
        }
    }

    /// Consumes decoded messages and drives the periodic per-peer tick.
    async fn protocol_loop(self: Arc<Self>, peer: Arc<TcpPeer>, mut in_rx: mpsc::Receiver<Message>) {
        let mut tick = interval(self.config.proto_tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = peer.cancel.cancelled() => return,
                _ = tick.tick() => {
                    if let Err(err) = self.on_tick(&peer).await {
                        debug!(addr = %peer.remote_addr(), %err, "tick failed");
                        peer.disconnect();
                        return;
                    }
                }
                received = in_rx.recv() => {
                    let Some(msg) = received else { return };
                    if let Err(err) = self.handle_message(&peer, msg).await {
                        warn!(addr = %peer.remote_addr(), %err, "protocol error");
                        peer.disconnect();
                        return;
                    }
                }
            }
        }
    }

    async fn on_tick(&self, peer: &Arc<TcpPeer>) -> NetworkResult<()> {
        if !peer.handshaked() {
            return Ok(());
        }
        if peer.last_height() > self.chain.block_height() {
            self.request_blocks(peer).await?;
        }
        if self.discovery.pool_count() < MIN_POOL_COUNT {
            peer.send(self.message(Command::GetAddr, Payload::Null)).await?;
        }
        Ok(())
    }

    fn message(&self, command: Command, payload: Payload) -> Message {
        Message::new(self.magic, command, payload)
    }

    async fn send_version(&self, peer: &Arc<TcpPeer>) -> NetworkResult<()> {
        peer.record_version_sent()?;
        let version = VersionPayload::new(
            self.id,
            self.config.port,
            &self.config.user_agent,
            self.chain.block_height(),
            self.config.relay,
        );
        peer.send(self.message(Command::Version, Payload::Version(version)))
            .await
    }

    // -- handlers ----------------------------------------------------------

    /// Dispatches one message according to the peer's handshake stage.
    pub async fn handle_message(
        &self,
        peer: &Arc<TcpPeer>,
        msg: Message,
    ) -> NetworkResult<()> {
        if peer.handshaked() {
            match (msg.command, msg.payload) {
                (Command::Addr, Payload::Addr(list)) => self.handle_addr(list),
                (Command::GetAddr, Payload::Null) => self.handle_get_addr(peer).await?,
                (Command::GetHeaders, Payload::GetBlocks(p)) => {
                    self.handle_get_headers(peer, p).await?
                }
                (Command::GetBlocks, Payload::GetBlocks(p)) => {
                    self.handle_get_blocks(peer, p).await?
                }
                (Command::Headers, Payload::Headers(p)) => self.handle_headers(peer, p.headers).await?,
                (Command::Inv, Payload::Inv(inv)) => self.handle_inv(peer, inv).await?,
                (Command::GetData, Payload::Inv(inv)) => self.handle_get_data(peer, inv).await?,
                (Command::Block, Payload::Block(block)) => {
                    self.block_queue.put_block(*block).await?
                }
                (Command::Tx, Payload::Tx(tx)) => {
                    let reason = self.relay_tx(*tx).await;
                    debug!(addr = %peer.remote_addr(), ?reason, "tx relayed");
                }
                (Command::Ping, Payload::Ping(p)) => {
                    peer.set_last_height(p.last_block_index);
                    let pong = PingPayload::new(self.chain.block_height(), p.nonce);
                    peer.send(self.message(Command::Pong, Payload::Ping(pong))).await?;
                }
                (Command::Pong, Payload::Ping(p)) => peer.set_last_height(p.last_block_index),
                (Command::Mempool, Payload::Null) => self.handle_mempool(peer).await?,
                (Command::Consensus, Payload::Raw(_)) => {
                    // Consensus participation is out of scope; the
                    // payload is accepted and dropped.
                }
                (command @ (Command::Version | Command::Verack), _) => {
                    return Err(NetworkError::UnexpectedCommand(command));
                }
                (command, _) => {
                    debug!(?command, "mismatched payload");
                }
            }
        } else {
            match (msg.command, msg.payload) {
                (Command::Version, Payload::Version(version)) => {
                    self.handle_version(peer, version).await?
                }
                (Command::Verack, Payload::Null) => self.handle_verack(peer).await?,
                (command, _) => return Err(NetworkError::UnexpectedCommand(command)),
            }
        }
        Ok(())
    }

    async fn handle_version(
        &self,
        peer: &Arc<TcpPeer>,
        version: VersionPayload,
    ) -> NetworkResult<()> {
        if version.nonce == self.id {
            return Err(NetworkError::IdenticalNodeId);
        }
        {
            let peers = self.peers.read();
            let duplicate = peers.values().any(|other| {
                other.remote_addr() != peer.remote_addr()
                    && other.handshaked()
                    && other.version().is_some_and(|v| v.nonce == version.nonce)
            });
            if duplicate {
                return Err(NetworkError::AlreadyConnected);
            }
        }
        peer.record_version_received(version)?;
        peer.record_verack_sent()?;
        peer.send(self.message(Command::Verack, Payload::Null)).await
    }

    async fn handle_verack(&self, peer: &Arc<TcpPeer>) -> NetworkResult<()> {
        peer.record_verack_received()?;
        if peer.handshaked() {
            let addr = peer.peer_addr().to_string();
            self.discovery.register_good(&addr);
            info!(
                addr = %peer.remote_addr(),
                agent = %peer.version().map(|v| String::from_utf8_lossy(&v.user_agent).into_owned()).unwrap_or_default(),
                height = peer.last_height(),
                "handshake complete"
            );
            self.request_headers(peer).await?;
        }
        Ok(())
    }

    fn handle_addr(&self, list: AddressList) {
        self.discovery.backfill(
            list.addrs
                .iter()
                .map(|entry| entry.socket_addr().to_string()),
        );
    }

    async fn handle_get_addr(&self, peer: &Arc<TcpPeer>) -> NetworkResult<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or_default();
        let addrs: Vec<AddrWithTime> = self
            .discovery
            .good_peers()
            .into_iter()
            .take(MAX_ADDRS_TO_SEND)
            .filter_map(|addr| addr.parse::<SocketAddr>().ok())
            .map(|addr| AddrWithTime::new(addr, now))
            .collect();
        peer.send(self.message(Command::Addr, Payload::Addr(AddressList { addrs })))
            .await
    }

    /// Serves up to 2000 headers following the best-known locator hash.
    async fn handle_get_headers(
        &self,
        peer: &Arc<TcpPeer>,
        payload: GetBlocksPayload,
    ) -> NetworkResult<()> {
        let Some(start) = self.locate(&payload) else {
            return Ok(());
        };
        let mut headers = Vec::new();
        for index in start + 1..=self.chain.header_height() {
            if headers.len() >= super::payload::MAX_HEADERS_ALLOWED {
                break;
            }
            let Some(hash) = self.chain.get_header_hash(index) else {
                break;
            };
            if let Some(header) = self.chain.get_header(&hash)? {
                if !payload.hash_stop.is_zero() && header.hash() == payload.hash_stop {
                    break;
                }
                headers.push(header);
            }
        }
        if headers.is_empty() {
            return Ok(());
        }
        peer.send(self.message(
            Command::Headers,
            Payload::Headers(super::payload::HeadersPayload { headers }),
        ))
        .await
    }

    /// Announces up to 500 block hashes following the locator.
    async fn handle_get_blocks(
        &self,
        peer: &Arc<TcpPeer>,
        payload: GetBlocksPayload,
    ) -> NetworkResult<()> {
        let Some(start) = self.locate(&payload) else {
            return Ok(());
        };
        let mut hashes = Vec::new();
        for index in start + 1..=self.chain.block_height() {
            if hashes.len() >= 500 {
                break;
            }
            match self.chain.get_header_hash(index) {
                Some(hash) if hash != payload.hash_stop => hashes.push(hash),
                _ => break,
            }
        }
        if hashes.is_empty() {
            return Ok(());
        }
        peer.send(self.message(
            Command::Inv,
            Payload::Inv(Inventory::new(InvType::Block, hashes)),
        ))
        .await
    }

    /// Index of the first locator hash we recognize.
    fn locate(&self, payload: &GetBlocksPayload) -> Option<u32> {
        payload.hash_start.iter().find_map(|hash| {
            self.chain
                .get_header(hash)
                .ok()
                .flatten()
                .map(|header| header.base.index)
        })
    }

    async fn handle_headers(
        &self,
        peer: &Arc<TcpPeer>,
        headers: Vec<crate::core::block::Header>,
    ) -> NetworkResult<()> {
        if let Err(err) = self.chain.add_headers(&headers) {
            warn!(%err, "failed processing headers");
            return Ok(());
        }
        // One more batch if the peer still knows more than we do.
        if self.chain.header_height() < peer.last_height() {
            self.request_headers(peer).await?;
        }
        Ok(())
    }

    async fn handle_inv(&self, peer: &Arc<TcpPeer>, inv: Inventory) -> NetworkResult<()> {
        if inv.hashes.is_empty() {
            return Err(NetworkError::Codec(crate::io::IoError::InvalidFormat(
                "empty inventory".into(),
            )));
        }
        let missing: Vec<_> = match inv.inv_type {
            InvType::Block => inv
                .hashes
                .into_iter()
                .filter(|hash| !matches!(self.chain.get_block(hash), Ok(Some(_))))
                .collect(),
            InvType::Tx => inv
                .hashes
                .into_iter()
                .filter(|hash| {
                    !self.chain.has_transaction(hash) && !self.chain.mempool().contains(hash)
                })
                .collect(),
            InvType::Consensus => Vec::new(),
        };
        if missing.is_empty() {
            return Ok(());
        }
        peer.send(self.message(
            Command::GetData,
            Payload::Inv(Inventory::new(inv.inv_type, missing)),
        ))
        .await
    }

    /// Serves blocks from the chain and transactions from chain or pool.
    async fn handle_get_data(&self, peer: &Arc<TcpPeer>, inv: Inventory) -> NetworkResult<()> {
        match inv.inv_type {
            InvType::Block => {
                for hash in &inv.hashes {
                    if let Some(block) = self.chain.get_block(hash)? {
                        peer.send(self.message(Command::Block, Payload::Block(Box::new(block))))
                            .await?;
                    }
                }
            }
            InvType::Tx => {
                for hash in &inv.hashes {
                    let tx = self.chain.mempool().get(hash).or_else(|| {
                        self.chain
                            .get_transaction(hash)
                            .ok()
                            .flatten()
                            .map(|(tx, _)| tx)
                    });
                    if let Some(tx) = tx {
                        peer.send(self.message(Command::Tx, Payload::Tx(Box::new(tx))))
                            .await?;
                    }
                }
            }
            InvType::Consensus => {}
        }
        Ok(())
    }

    async fn handle_mempool(&self, peer: &Arc<TcpPeer>) -> NetworkResult<()> {
        let hashes = self.chain.mempool().hashes();
        if hashes.is_empty() {
            return Ok(());
        }
        peer.send(self.message(
            Command::Inv,
            Payload::Inv(Inventory::new(InvType::Tx, hashes)),
        ))
        .await
    }

    async fn request_headers(&self, peer: &Arc<TcpPeer>) -> NetworkResult<()> {
        let payload = GetBlocksPayload::new(
            vec![self.chain.current_header_hash()],
            Default::default(),
        );
        peer.send(self.message(Command::GetHeaders, Payload::GetBlocks(payload)))
            .await
    }

    /// Requests the next batch of blocks we have headers for, or more
    /// headers when the header chain itself is behind.
    async fn request_blocks(&self, peer: &Arc<TcpPeer>) -> NetworkResult<()> {
        let mut hashes = Vec::new();
        let mut next = self.chain.block_height() + 1;
        while next <= self.chain.header_height() && hashes.len() < MAX_BLOCK_BATCH {
            let Some(hash) = self.chain.get_header_hash(next) else {
                break;
            };
            hashes.push(hash);
            next += 1;
        }
        if !hashes.is_empty() {
            peer.send(self.message(
                Command::GetData,
                Payload::Inv(Inventory::new(InvType::Block, hashes)),
            ))
            .await
        } else if self.chain.header_height() < peer.last_height() {
            self.request_headers(peer).await
        } else {
            Ok(())
        }
    }

    // -- relay -------------------------------------------------------------

    /// Verifies a transaction, admits it to the mempool and announces it
    /// to every relaying peer.
    pub async fn relay_tx(&self, tx: Transaction) -> RelayReason {
        if matches!(tx.data, TxData::Miner { .. }) {
            return RelayReason::Invalid;
        }
        let hash = tx.hash();
        if self.chain.has_transaction(&hash) || self.chain.mempool().contains(&hash) {
            return RelayReason::AlreadyExists;
        }
        if tx.inputs.iter().any(|input| self.chain.mempool().spends(input)) {
            return RelayReason::Invalid;
        }
        match self.chain.verify_tx(&tx) {
            Ok(()) => {}
            Err(VerifyError::Internal(err)) => {
                warn!(%hash, err, "tx verification failed internally");
                return RelayReason::UnableToVerify;
            }
            Err(VerifyError::InsufficientNetworkFee) => return RelayReason::PolicyFail,
            Err(err) => {
                debug!(%hash, %err, "invalid transaction");
                return RelayReason::Invalid;
            }
        }
        let item = PoolItem::new(tx, self.chain.as_ref() as &dyn Feer);
        if !self.chain.mempool().try_add(item) {
            return RelayReason::OutOfMemory;
        }

        let inv = Inventory::new(InvType::Tx, vec![hash]);
        self.broadcast(self.message(Command::Inv, Payload::Inv(inv)));
        RelayReason::Succeed
    }

    /// Queues a message on every handshaked peer that asked for relays.
    fn broadcast(&self, msg: Message) {
        let peers: Vec<Arc<TcpPeer>> = self.peers.read().values().cloned().collect();
        for peer in peers {
            if peer.handshaked() && peer.version().is_some_and(|v| v.relay) {
                peer.try_send(msg.clone());
            }
        }
    }

    /// Announces a freshly stored block to relaying peers.
    pub fn relay_block(&self, block: &Block) {
        let inv = Inventory::new(InvType::Block, vec![block.hash()]);
        self.broadcast(self.message(Command::Inv, Payload::Inv(inv)));
    }
}
