//! # tapforge-wallet
//! Keys, coin selection, building and signing.
//!
//! Derives BIP32/39/44/49/84/86 keys, selects coins, assembles unsigned
//! transactions and signs them for legacy, SegWit v0 and Taproot outputs.
//! Secrets are erased when they go out of scope.
//!
//! # Modules
//!
//! - [`error`]: `WalletError` enum
//! - [`keys`]: `KeyMaterial`, `Seed`, `SharedKey`
//! - [`mnemonic`]: BIP39 phrases and seeds
//! - [`hd`]: extended keys, derivation paths, `HdKeyTree`
//! - [`coin_selection`]: branch-and-bound and largest-first selection
//! - [`builder`]: fluent `TransactionBuilder`
//! - [`signer`]: sighash computation and input satisfaction
//! - [`external`]: sign-request boundary for hardware signers
//! - [`encryption`]: Argon2id + AES-256-GCM backup records
//! - [`config`]: `WalletConfig` loading
//! - [`node`]: async `NodeClient` trait
//! - [`wallet`]: high-level wallet composition

pub mod builder;
pub mod coin_selection;
pub mod config;
pub mod encryption;
pub mod error;
pub mod external;
pub mod hd;
pub mod keys;
pub mod mnemonic;
pub mod node;
pub mod signer;
pub mod wallet;

pub use builder::{FeePolicy, PartialTransaction, SpendInfo, TransactionBuilder};
pub use coin_selection::{CoinSelection, CoinSelector, SelectionParams, SelectionStrategy};
pub use config::WalletConfig;
pub use encryption::{BackupRecord, KdfParams};
pub use error::WalletError;
pub use external::{ExternalSigner, SignRequest, SignResponse, SignatureKind};
pub use hd::{ChildNumber, DerivationPath, ExtendedKey, HdKeyTree, Purpose};
pub use keys::{KeyMaterial, Seed, SharedKey};
pub use node::{NodeClient, NodeError, TxInfo};
pub use signer::{AuxRand, KeySource, SignedTransaction, Signer};
pub use wallet::{Recipient, Wallet, WalletBalance};
