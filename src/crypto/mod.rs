//! Hashing primitives, P-256 key handling and the merkle tree.

pub mod hash;
pub mod keys;
pub mod merkle;
