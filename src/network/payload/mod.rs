//! Payload structures of the protocol commands.

mod address;
mod getblocks;
mod headers;
mod inventory;
mod ping;
mod version;

pub use address::{AddrWithTime, AddressList};
pub use getblocks::GetBlocksPayload;
pub use headers::{HeadersPayload, MAX_HEADERS_ALLOWED};
pub use inventory::{InvType, Inventory};
pub use ping::PingPayload;
pub use version::VersionPayload;
