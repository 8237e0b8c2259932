//! Integration test suite for tapforge.
//!
//! Published BIP test vectors run against the public API of both crates,
//! and end-to-end flows go from mnemonic to a broadcast transaction
//! through an in-memory node.

pub mod helpers;
