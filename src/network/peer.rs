//! Per-connection peer state and handshake tracking.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::message::Message;
use super::payload::VersionPayload;
use super::{NetworkError, NetworkResult};

const VERSION_SENT: u8 = 1 << 0;
const VERSION_RECEIVED: u8 = 1 << 1;
const VERACK_SENT: u8 = 1 << 2;
const VERACK_RECEIVED: u8 = 1 << 3;
const HANDSHAKED: u8 = VERSION_SENT | VERSION_RECEIVED | VERACK_SENT | VERACK_RECEIVED;

/// A connected peer: its outbound queue, handshake progress and the
/// version it announced. The reader/writer/protocol tasks live in the
/// server; cancelling `cancel` tears all three down.
pub struct TcpPeer {
    remote: SocketAddr,
    outbound: bool,
    out_tx: mpsc::Sender<Message>,
    state: AtomicU8,
    version: RwLock<Option<VersionPayload>>,
    /// Height the peer last reported, via version and later pings.
    last_height: AtomicU32,
    pub cancel: CancellationToken,
}

impl TcpPeer {
    pub fn new(
        remote: SocketAddr,
        outbound: bool,
        out_tx: mpsc::Sender<Message>,
        cancel: CancellationToken,
    ) -> Self {
        TcpPeer {
            remote,
            outbound,
            out_tx,
            state: AtomicU8::new(0),
            version: RwLock::new(None),
            last_height: AtomicU32::new(0),
            cancel,
        }
    }

    /// The socket address of the connection.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn is_outbound(&self) -> bool {
        self.outbound
    }

    /// The address the peer is dialable at: its IP plus the listen port
    /// it announced in `version`.
    pub fn peer_addr(&self) -> SocketAddr {
        let port = self
            .version
            .read()
            .as_ref()
            .map(|v| v.port)
            .unwrap_or_else(|| self.remote.port());
        SocketAddr::new(self.remote.ip(), port)
    }

    pub fn version(&self) -> Option<VersionPayload> {
        self.version.read().clone()
    }

    pub fn handshaked(&self) -> bool {
        self.state.load(Ordering::SeqCst) == HANDSHAKED
    }

    pub fn last_height(&self) -> u32 {
        self.last_height.load(Ordering::SeqCst)
    }

    pub fn set_last_height(&self, height: u32) {
        self.last_height.store(height, Ordering::SeqCst);
    }

    fn set_flag(&self, flag: u8, forbidden_twice: bool) -> NetworkResult<()> {
        let prev = self.state.fetch_or(flag, Ordering::SeqCst);
        if forbidden_twice && prev & flag != 0 {
            return Err(NetworkError::UnexpectedCommand(
                super::message::Command::Version,
            ));
        }
        Ok(())
    }

    pub fn record_version_sent(&self) -> NetworkResult<()> {
        self.set_flag(VERSION_SENT, true)
    }

    pub fn record_version_received(&self, version: VersionPayload) -> NetworkResult<()> {
        self.set_flag(VERSION_RECEIVED, true)?;
        self.last_height.store(version.start_height, Ordering::SeqCst);
        *self.version.write() = Some(version);
        Ok(())
    }

    pub fn record_verack_sent(&self) -> NetworkResult<()> {
        // Acknowledging a version we never saw is a protocol violation.
        if self.state.load(Ordering::SeqCst) & VERSION_RECEIVED == 0 {
            return Err(NetworkError::UnexpectedCommand(
                super::message::Command::Verack,
            ));
        }
        self.set_flag(VERACK_SENT, true)
    }

    pub fn record_verack_received(&self) -> NetworkResult<()> {
        if self.state.load(Ordering::SeqCst) & VERSION_SENT == 0 {
            return Err(NetworkError::UnexpectedCommand(
                super::message::Command::Verack,
            ));
        }
        self.set_flag(VERACK_RECEIVED, true)
    }

    /// Queues a message for the writer task.
    pub async fn send(&self, msg: Message) -> NetworkResult<()> {
        self.out_tx.send(msg).await.map_err(|_| NetworkError::PeerGone)
    }

    /// Best-effort send that never suspends; used for broadcasts.
    pub fn try_send(&self, msg: Message) -> bool {
        self.out_tx.try_send(msg).is_ok()
    }

    /// Tears down the peer's tasks.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> TcpPeer {
        let (tx, _rx) = mpsc::channel(1);
        TcpPeer::new(
            "127.0.0.1:20333".parse().unwrap(),
            true,
            tx,
            CancellationToken::new(),
        )
    }

    #[test]
    fn full_handshake_sequence() {
        let p = peer();
        assert!(!p.handshaked());
        p.record_version_sent().unwrap();
        p.record_version_received(VersionPayload::new(1, 30333, "ua", 9, true))
            .unwrap();
        p.record_verack_sent().unwrap();
        p.record_verack_received().unwrap();
        assert!(p.handshaked());
        assert_eq!(p.last_height(), 9);
        assert_eq!(p.peer_addr().port(), 30333);
    }

    #[test]
    fn duplicate_version_is_rejected() {
        let p = peer();
        p.record_version_received(VersionPayload::new(1, 1, "", 0, true))
            .unwrap();
        assert!(p
            .record_version_received(VersionPayload::new(2, 1, "", 0, true))
            .is_err());
    }

    #[test]
    fn verack_requires_version_first() {
        let p = peer();
        assert!(p.record_verack_sent().is_err());
        assert!(p.record_verack_received().is_err());
    }
}
