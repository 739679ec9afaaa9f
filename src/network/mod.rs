//! Peer-to-peer networking: message frames, the server loop, peer
//! discovery and the ordered block-ingest queue.

pub mod block_queue;
pub mod discovery;
pub mod message;
pub mod payload;
pub mod peer;
pub mod server;

pub use message::{Command, Message, Payload};
pub use server::{RelayReason, Server};

use thiserror::Error;

use crate::core::BlockchainError;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] crate::io::IoError),
    #[error("invalid message checksum")]
    InvalidChecksum,
    #[error("message from a different network (magic {0:#010x})")]
    InvalidNetwork(u32),
    #[error("payload of {0} bytes exceeds the frame limit")]
    PayloadTooLarge(usize),
    #[error("identical node id")]
    IdenticalNodeId,
    #[error("already connected to this peer")]
    AlreadyConnected,
    #[error("max peers reached")]
    MaxPeers,
    #[error("received {0:?} at the wrong handshake stage")]
    UnexpectedCommand(message::Command),
    #[error("peer queue is gone")]
    PeerGone,
    #[error("server shutdown")]
    ServerShutdown,
    #[error(transparent)]
    Chain(#[from] BlockchainError),
}

pub type NetworkResult<T> = Result<T, NetworkError>;
