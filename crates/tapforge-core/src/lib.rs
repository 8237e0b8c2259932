//! # tapforge-core
//! Bitcoin primitives for building and signing transactions.
//!
//! # Modules
//! - [`hashes`]: SHA-256, HASH160, BIP340 tagged hashes, HMAC-SHA512
//! - [`encode`]: consensus encoding, CompactSize, byte reader
//! - [`types`]: `Transaction`, `OutPoint`, `TxOut`, `Utxo`
//! - [`script`]: `ScriptBuilder`, standard templates, classification
//! - [`address`]: Base58Check, Bech32 and Bech32m addresses
//! - [`taproot`]: script trees, output key tweak, control blocks
//! - [`sighash`]: legacy, BIP143 and BIP341 signature hashes
//! - [`fee`]: fee rates, weight estimates, dust thresholds

pub mod address;
pub mod constants;
pub mod encode;
pub mod error;
pub mod fee;
pub mod hashes;
pub mod script;
pub mod sighash;
pub mod taproot;
pub mod types;

pub use address::{Address, Network, Payload};
pub use error::CoreError;
pub use fee::FeeRate;
pub use script::{Script, ScriptBuilder, ScriptType};
pub use sighash::{EcdsaSighashType, SighashCache, TapSighashType};
pub use taproot::{ControlBlock, TaprootLeaf, TaprootSpendInfo, TaprootTreeBuilder};
pub use types::{Hash256, OutPoint, Transaction, TxIn, TxOut, Utxo};
