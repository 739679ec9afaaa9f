//! Fixed-width identifiers and the fixed-point amount type.

mod fixed8;
mod uint160;
mod uint256;

pub use fixed8::Fixed8;
pub use uint160::UInt160;
pub use uint256::UInt256;
